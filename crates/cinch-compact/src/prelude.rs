//! Convenience re-exports for common `cinch-compact` types.
//!
//! ```ignore
//! use cinch_compact::prelude::*;
//! ```
//!
//! Covers the entry points, their inputs and outputs, the archive seam, and
//! the event handlers. Boundary and eviction internals stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MessageKind, ToolCall, json_schema_for};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{CompactionConfig, ContextBlockLimits, ModelCapabilities};

// ── Entry points ────────────────────────────────────────────────────
pub use crate::context::{
    AgentLoopCompression, ArchivedRef, CharRatioEstimator, CompressionBudget, ContextBlock,
    FileRef, HistoryCompression, OutputFile, ResultRef, TokenEstimator,
    compress_agent_loop_messages, compress_for_model, compress_history, estimate_sequence_tokens,
    truncate_context_block, validate_pairing,
};

// ── Archive ─────────────────────────────────────────────────────────
pub use crate::archive::{
    ArchiveContext, ArchiveError, ArchiveFuture, ArchiveLocator, ArchiveRequest, ArchiveStore,
    FileArchiveStore, HttpArchiveStore, MemoryArchiveStore,
};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    CompactionEvent, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler,
    NoopHandler, SkipReason,
};
