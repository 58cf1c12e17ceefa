//! Transcript rendering and the reference note left in place of archived
//! history.

use super::{ARCHIVE_NOTE_PREFIX, ArchiveLocator};
use crate::{Message, MessageKind};
use std::collections::BTreeSet;
use std::fmt::Write;

/// Render messages as a role-tagged plain-text transcript.
///
/// ```text
/// [human] find the config loader
///
/// [ai] Searching.
///   -> grep {"pattern":"load_config"}
///
/// [tool_result c1] src/config.rs:12
/// ```
pub fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for (i, message) in messages.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        match message {
            Message::ToolResult {
                tool_call_id,
                payload,
            } => {
                let _ = write!(out, "[tool_result {tool_call_id}] {payload}");
            }
            other => {
                let _ = write!(out, "[{}] {}", other.kind(), other.text());
                for call in other.tool_calls() {
                    let _ = write!(out, "\n  -> {} {}", call.name, call.arguments);
                }
            }
        }
    }
    out
}

/// Message-type counts and distinct tool names of an archived span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub system: usize,
    pub human: usize,
    pub ai: usize,
    pub tool_results: usize,
    pub tool_names: BTreeSet<String>,
}

impl ArchiveSummary {
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut summary = Self::default();
        for message in messages {
            match message.kind() {
                MessageKind::System => summary.system += 1,
                MessageKind::Human => summary.human += 1,
                MessageKind::AiTurn => summary.ai += 1,
                MessageKind::ToolResult => summary.tool_results += 1,
            }
            for call in message.tool_calls() {
                summary.tool_names.insert(call.name.clone());
            }
        }
        summary
    }

    /// One-line description, e.g. `2 ai, 2 tool_result; tools: grep, read_file`.
    pub fn describe(&self) -> String {
        let counts: Vec<String> = [
            (self.system, MessageKind::System),
            (self.human, MessageKind::Human),
            (self.ai, MessageKind::AiTurn),
            (self.tool_results, MessageKind::ToolResult),
        ]
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, kind)| format!("{n} {kind}"))
        .collect();

        let mut out = counts.join(", ");
        if !self.tool_names.is_empty() {
            let names: Vec<&str> = self.tool_names.iter().map(String::as_str).collect();
            let _ = write!(out, "; tools: {}", names.join(", "));
        }
        out
    }
}

/// Build the `AiTurn` note that replaces an archived span.
///
/// An AI turn without tool calls can never be read as an unanswered call,
/// so splicing it in keeps the pairing intact.
pub fn build_reference_note(
    archived_count: usize,
    locator: &ArchiveLocator,
    summary: &ArchiveSummary,
) -> Message {
    Message::ai(format!(
        "{ARCHIVE_NOTE_PREFIX} {archived_count} earlier messages moved to {locator} ({})]",
        summary.describe()
    ))
}
