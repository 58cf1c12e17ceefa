//! Context-window eviction and compaction for LLM agent loops.
//!
//! An agent conversation grows a message sequence (turns, tool calls, tool
//! results) that must fit a fixed token budget before every model call.
//! `cinch-compact` decides which part of that sequence to move out of the
//! live prompt, archives it through an [`ArchiveStore`](archive::ArchiveStore),
//! and splices a single reference note in its place so the conversation stays
//! coherent and reconstructible.
//!
//! # Getting started
//!
//! ```ignore
//! use cinch_compact::prelude::*;
//!
//! let store = MemoryArchiveStore::new();
//! let estimator = CharRatioEstimator::default();
//! let ctx = ArchiveContext::new("conv-42", &store, &estimator)
//!     .with_execution_id("exec-7")
//!     .with_event_handler(&LoggingHandler);
//!
//! let outcome = compress_agent_loop_messages(&messages, 200_000, 8_192, &ctx, 0).await;
//! if outcome.was_compressed {
//!     println!("archived to {:?}", outcome.archive_locator);
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Per-iteration pipeline:** [`compress_agent_loop_messages`](context::agent_loop::compress_agent_loop_messages)
//!   runs history compaction and falls back to capping oversized tool results.
//! - **History compaction alone:** [`compress_history`](context::history::compress_history).
//! - **Attachment lists:** [`truncate_context_block`](context::block::truncate_context_block).
//! - **Boundaries and pairing:** [`context::boundary`] and [`context::arena`].
//! - **Archive seam:** [`archive`] defines the store trait and ships memory,
//!   file, and HTTP implementations.
//! - **Observability:** implement [`EventHandler`](events::EventHandler) or use
//!   [`LoggingHandler`](events::LoggingHandler) for `tracing` output.
//!
//! # Invariants
//!
//! 1. A tool call is never separated from its result.
//! 2. The cache prefix (system prompt plus the first turns, up to the
//!    cacheable minimum) is byte-identical before and after compaction.
//! 3. The most recent turn is never evicted.
//! 4. Archive failure returns the input unchanged; nothing is lost.

pub mod archive;
pub mod config;
pub mod context;
pub mod events;
pub mod prelude;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` for a type that implements
/// `schemars::JsonSchema`.
///
/// Used by the CLI to document its input formats.
///
/// # Example
///
/// ```
/// use cinch_compact::{Message, json_schema_for};
///
/// let schema = json_schema_for::<Vec<Message>>();
/// assert_eq!(schema["type"], "array");
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// A tool invocation requested by the model inside an [`Message::AiTurn`].
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A message in the conversation.
///
/// Every [`ToolResult`](Message::ToolResult) answers exactly one call id of an
/// earlier [`AiTurn`](Message::AiTurn); the engine keeps that pairing intact
/// across every transformation.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Instruction text. Never evicted.
    System { content: String },
    /// User-authored text.
    Human { content: String },
    /// Model output, optionally requesting tool calls.
    AiTurn {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// The output of a single tool call.
    ToolResult {
        tool_call_id: String,
        payload: String,
    },
}

/// Discriminant of a [`Message`], used for summaries and logging.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    System,
    Human,
    AiTurn,
    ToolResult,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::System => write!(f, "system"),
            MessageKind::Human => write!(f, "human"),
            MessageKind::AiTurn => write!(f, "ai"),
            MessageKind::ToolResult => write!(f, "tool_result"),
        }
    }
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Message::AiTurn {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn ai_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Message::AiTurn {
            content: content.into(),
            tool_calls: calls,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Message::ToolResult {
            tool_call_id: call_id.into(),
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::System { .. } => MessageKind::System,
            Message::Human { .. } => MessageKind::Human,
            Message::AiTurn { .. } => MessageKind::AiTurn,
            Message::ToolResult { .. } => MessageKind::ToolResult,
        }
    }

    /// Tool calls requested by this message (empty unless an `AiTurn`).
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::AiTurn { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// The call id answered by this message, if it is a tool result.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Message::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// The primary text of the message (payload for tool results).
    pub fn text(&self) -> &str {
        match self {
            Message::System { content }
            | Message::Human { content }
            | Message::AiTurn { content, .. } => content,
            Message::ToolResult { payload, .. } => payload,
        }
    }

    /// Whether this message is a reference note left behind by compaction.
    pub fn is_archive_note(&self) -> bool {
        matches!(self, Message::AiTurn { content, tool_calls }
            if tool_calls.is_empty() && content.starts_with(archive::ARCHIVE_NOTE_PREFIX))
    }
}
