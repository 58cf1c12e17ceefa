//! Policy configuration for compaction and context-block truncation.
//!
//! Every threshold the engine uses is a field here rather than a literal in
//! the algorithms. The defaults reproduce the established behavior; override
//! them through the `with_*` builder methods or struct update syntax.
//!
//! ```ignore
//! let config = CompactionConfig::default()
//!     .with_archive_ratio(0.5)
//!     .with_tool_result_token_cap(2048);
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remaining-budget fraction below which compaction runs, and the headroom
/// history compaction tries to restore.
pub const DEFAULT_MIN_HEADROOM_RATIO: f64 = 0.2;

/// Fraction of compressible tokens archived per compaction step.
pub const DEFAULT_ARCHIVE_RATIO: f64 = 0.7;

/// Token cap for individual tool results in the fallback pass.
pub const DEFAULT_TOOL_RESULT_TOKEN_CAP: usize = 4096;

/// Messages kept at the tail when the last message is an AI turn.
pub const DEFAULT_TAIL_RESERVED_MESSAGES: usize = 2;

/// System message plus the two messages that follow it.
pub const DEFAULT_PROTECTED_HEAD_MESSAGES: usize = 3;

/// Smallest prefix (in tokens) worth keeping stable for prompt caching.
pub const DEFAULT_CACHE_MIN_PREFIX_TOKENS: usize = 1024;

/// Sequences shorter than this are never compacted.
pub const DEFAULT_MIN_MESSAGES: usize = 3;

/// Default archive hand-off timeout in milliseconds.
pub const DEFAULT_ARCHIVE_TIMEOUT_MS: u64 = 30_000;

// ── CompactionConfig ──────────────────────────────────────────────

/// Configuration for history compaction and the agent-loop pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CompactionConfig {
    /// Skip compaction while `remaining / target` is at or above this ratio.
    pub min_headroom_ratio: f64,
    /// Archive at least this fraction of the compressible tokens per step.
    pub archive_ratio: f64,
    /// Tool results above this many tokens are cut down in the fallback pass.
    pub tool_result_token_cap: usize,
    /// Messages protected at the tail when the last message is an AI turn.
    pub tail_reserved_messages: usize,
    /// Minimum number of leading messages in the cache prefix.
    pub protected_head_messages: usize,
    /// Token threshold the cache prefix must reach.
    pub cache_min_prefix_tokens: usize,
    /// Whether the model benefits from a stable cached prefix. When `false`,
    /// only the leading system messages are protected.
    pub cache_aware: bool,
    /// Sequences with fewer messages are returned untouched.
    pub min_messages: usize,
    /// Timeout for the archive hand-off. `None` waits indefinitely.
    pub archive_timeout_ms: Option<u64>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_headroom_ratio: DEFAULT_MIN_HEADROOM_RATIO,
            archive_ratio: DEFAULT_ARCHIVE_RATIO,
            tool_result_token_cap: DEFAULT_TOOL_RESULT_TOKEN_CAP,
            tail_reserved_messages: DEFAULT_TAIL_RESERVED_MESSAGES,
            protected_head_messages: DEFAULT_PROTECTED_HEAD_MESSAGES,
            cache_min_prefix_tokens: DEFAULT_CACHE_MIN_PREFIX_TOKENS,
            cache_aware: true,
            min_messages: DEFAULT_MIN_MESSAGES,
            archive_timeout_ms: Some(DEFAULT_ARCHIVE_TIMEOUT_MS),
        }
    }
}

impl CompactionConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the headroom ratio that triggers compaction.
    pub fn with_min_headroom_ratio(mut self, ratio: f64) -> Self {
        self.min_headroom_ratio = ratio;
        self
    }

    /// Set the fraction of compressible tokens archived per step.
    pub fn with_archive_ratio(mut self, ratio: f64) -> Self {
        self.archive_ratio = ratio;
        self
    }

    /// Set the per-result token cap used by the fallback pass.
    pub fn with_tool_result_token_cap(mut self, cap: usize) -> Self {
        self.tool_result_token_cap = cap;
        self
    }

    /// Set how many messages stay protected behind a trailing AI turn.
    pub fn with_tail_reserved_messages(mut self, n: usize) -> Self {
        self.tail_reserved_messages = n;
        self
    }

    /// Set the cache-prefix token threshold.
    pub fn with_cache_min_prefix_tokens(mut self, tokens: usize) -> Self {
        self.cache_min_prefix_tokens = tokens;
        self
    }

    /// Enable or disable cache-prefix protection.
    pub fn with_cache_aware(mut self, cache_aware: bool) -> Self {
        self.cache_aware = cache_aware;
        self
    }

    /// Set the archive hand-off timeout. `None` disables it.
    pub fn with_archive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.archive_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// The archive hand-off timeout as a [`Duration`].
    pub fn archive_timeout(&self) -> Option<Duration> {
        self.archive_timeout_ms.map(Duration::from_millis)
    }
}

// ── Model capabilities ────────────────────────────────────────────

/// What the caller knows about the target model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModelCapabilities {
    /// Total context window in tokens.
    pub context_limit: usize,
    /// Tokens reserved for the model's response.
    pub reserved_output: usize,
    /// Whether the provider caches stable prompt prefixes.
    pub cache_aware: bool,
}

impl ModelCapabilities {
    pub fn new(context_limit: usize, reserved_output: usize) -> Self {
        Self {
            context_limit,
            reserved_output,
            cache_aware: true,
        }
    }

    pub fn with_cache_affinity(mut self, cache_aware: bool) -> Self {
        self.cache_aware = cache_aware;
        self
    }

    /// Carry the model's cache affinity into a compaction config.
    pub fn apply_to(&self, config: CompactionConfig) -> CompactionConfig {
        config.with_cache_aware(self.cache_aware)
    }
}

// ── ContextBlockLimits ────────────────────────────────────────────

/// Per-item limits for [`truncate_context_block`](crate::context::block::truncate_context_block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContextBlockLimits {
    /// Maximum number of file references kept.
    pub max_files: usize,
    /// Maximum number of results kept.
    pub max_results: usize,
    /// Maximum output files listed per result.
    pub max_output_files_per_result: usize,
    /// A result is truncated only if at least this many content tokens fit;
    /// otherwise it is dropped.
    pub min_result_content_tokens: usize,
}

impl Default for ContextBlockLimits {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_results: 10,
            max_output_files_per_result: 5,
            min_result_content_tokens: 1024,
        }
    }
}
