//! Context window management: budgets, boundaries, eviction, and truncation.
//!
//! The pieces compose bottom-up:
//!
//! 1. **[`budget`]** sizes messages through a [`TokenEstimator`] and derives
//!    the per-call [`CompressionBudget`].
//!
//! 2. **[`arena`]** freezes a sequence into token costs plus resolved
//!    call/result pairing.
//!
//! 3. **[`boundary`]** computes the three zones:
//!    - **Cache prefix**: system prompt plus the first turns, until the
//!      cacheable minimum is reached. Never modified.
//!    - **Compressible range**: what may be archived.
//!    - **Protected tail**: the most recent turn (and its tool results).
//!
//! 4. **[`eviction`]** partitions the compressible range into atomic units
//!    and selects the newest ones first.
//!
//! 5. **[`history`]** archives the selection and splices in a reference note;
//!    **[`agent_loop`]** wraps it with a tool-result cap fallback.
//!
//! 6. **[`block`]** applies the same budget model to attached files and
//!    results, using **[`truncate`]** for head/tail cuts.

pub mod agent_loop;
pub mod arena;
pub mod block;
pub mod boundary;
pub mod budget;
pub mod eviction;
pub mod history;
pub mod truncate;

// Re-export commonly used items at the module level.
pub use agent_loop::{AgentLoopCompression, compress_agent_loop_messages, compress_for_model};
pub use arena::{MessageArena, PairingReport, validate_pairing};
pub use block::{ArchivedRef, ContextBlock, FileRef, OutputFile, ResultRef, truncate_context_block};
pub use budget::{
    CharRatioEstimator, CompressionBudget, DEFAULT_CHARS_PER_TOKEN, TokenEstimator,
    estimate_sequence_tokens,
};
pub use history::{HistoryCompression, compress_history};
