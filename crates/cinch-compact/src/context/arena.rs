//! Immutable, index-addressed view of a message sequence.
//!
//! Every algorithm in this crate works on indices into a [`MessageArena`]:
//! token costs are computed once, call/result pairing is resolved once into a
//! [`PairIndex`], and eviction produces a new vector instead of mutating the
//! caller's messages.

use super::budget::TokenEstimator;
use crate::Message;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::Range;

// ── PairIndex ──────────────────────────────────────────────────────

/// Resolved call/result pairing.
///
/// A `ToolResult` is paired with the earliest preceding `AiTurn` that has an
/// unanswered call with the same id. Results with no such turn (including a
/// second result for an already-answered id) are orphans.
#[derive(Debug, Clone, Default)]
pub struct PairIndex {
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
}

impl PairIndex {
    pub fn build(messages: &[Message]) -> Self {
        let mut parent = vec![None; messages.len()];
        let mut children = vec![Vec::new(); messages.len()];
        let mut pending: HashMap<&str, usize> = HashMap::new();

        for (i, message) in messages.iter().enumerate() {
            match message {
                Message::AiTurn { tool_calls, .. } => {
                    for call in tool_calls {
                        pending.entry(call.id.as_str()).or_insert(i);
                    }
                }
                Message::ToolResult { tool_call_id, .. } => {
                    if let Some(owner) = pending.remove(tool_call_id.as_str()) {
                        parent[i] = Some(owner);
                        children[owner].push(i);
                    }
                }
                Message::System { .. } | Message::Human { .. } => {}
            }
        }

        Self { parent, children }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Index of the `AiTurn` that owns the result at `index`.
    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.parent.get(index).copied().flatten()
    }

    /// Indices of the results answering the `AiTurn` at `index`, ascending.
    pub fn results_of(&self, index: usize) -> &[usize] {
        self.children.get(index).map_or(&[], Vec::as_slice)
    }
}

// ── MessageArena ───────────────────────────────────────────────────

/// A borrowed message sequence with per-message token costs and pairing.
pub struct MessageArena<'m> {
    messages: &'m [Message],
    tokens: Vec<usize>,
    unsized_messages: usize,
    pairs: PairIndex,
}

impl<'m> MessageArena<'m> {
    /// Size every message once. Unsizable messages cost zero and are counted
    /// in [`unsized_messages`](Self::unsized_messages).
    pub fn new(messages: &'m [Message], estimator: &dyn TokenEstimator) -> Self {
        let mut unsized_messages = 0;
        let tokens = messages
            .iter()
            .map(|m| {
                estimator.estimate_message(m).unwrap_or_else(|| {
                    unsized_messages += 1;
                    0
                })
            })
            .collect();
        Self {
            messages,
            tokens,
            unsized_messages,
            pairs: PairIndex::build(messages),
        }
    }

    pub fn messages(&self) -> &'m [Message] {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'m Message> {
        self.messages.get(index)
    }

    pub fn tokens(&self, index: usize) -> usize {
        self.tokens.get(index).copied().unwrap_or(0)
    }

    pub fn range_tokens(&self, range: Range<usize>) -> usize {
        self.tokens.get(range).map_or(0, |t| t.iter().sum())
    }

    pub fn total_tokens(&self) -> usize {
        self.tokens.iter().sum()
    }

    pub fn unsized_messages(&self) -> usize {
        self.unsized_messages
    }

    pub fn pairs(&self) -> &PairIndex {
        &self.pairs
    }
}

// ── Validation ─────────────────────────────────────────────────────

/// Structural problems found by [`validate_pairing`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PairingReport {
    /// Results with no earlier unanswered call of the same id.
    pub orphaned_results: Vec<usize>,
    /// `(ai_index, call_id)` for calls that have no result yet.
    pub unanswered_calls: Vec<(usize, String)>,
    /// Call ids requested again while an earlier call with that id was
    /// still unanswered.
    pub duplicate_call_ids: Vec<String>,
}

impl PairingReport {
    /// No orphans and no duplicate ids. Unanswered calls are allowed; the
    /// newest turn routinely has results still in flight.
    pub fn is_valid(&self) -> bool {
        self.orphaned_results.is_empty() && self.duplicate_call_ids.is_empty()
    }
}

/// Check the call/result pairing of a sequence.
pub fn validate_pairing(messages: &[Message]) -> PairingReport {
    let mut report = PairingReport::default();
    let mut pending: HashMap<&str, usize> = HashMap::new();

    for (i, message) in messages.iter().enumerate() {
        match message {
            Message::AiTurn { tool_calls, .. } => {
                for call in tool_calls {
                    match pending.entry(call.id.as_str()) {
                        Entry::Occupied(_) => report.duplicate_call_ids.push(call.id.clone()),
                        Entry::Vacant(slot) => {
                            slot.insert(i);
                        }
                    }
                }
            }
            Message::ToolResult { tool_call_id, .. } => {
                if pending.remove(tool_call_id.as_str()).is_none() {
                    report.orphaned_results.push(i);
                }
            }
            Message::System { .. } | Message::Human { .. } => {}
        }
    }

    report.unanswered_calls = pending
        .into_iter()
        .map(|(id, owner)| (owner, id.to_string()))
        .collect();
    report.unanswered_calls.sort();
    report
}
