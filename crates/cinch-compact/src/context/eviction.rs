//! Eviction units and candidate selection.
//!
//! The compressible range is partitioned into atomic [`EvictionUnit`]s: a
//! tool-calling turn together with its results, or a single message. Units
//! are ordered newest first, since older content sits next to the cached
//! prefix and is cheaper to keep. The selector then takes whole units until
//! enough tokens are covered.

use super::arena::MessageArena;
use crate::Message;
use std::ops::Range;
use tracing::trace;

// ── Units ──────────────────────────────────────────────────────────

/// The smallest group of messages that is archived together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionUnit {
    /// A tool-calling `AiTurn` and every result answering it.
    ToolPairGroup {
        ai_index: usize,
        tool_indices: Vec<usize>,
        token_count: usize,
    },
    /// A message that can leave on its own.
    Standalone { index: usize, token_count: usize },
}

impl EvictionUnit {
    /// Index of the earliest message in the unit.
    pub fn first_index(&self) -> usize {
        match self {
            EvictionUnit::ToolPairGroup { ai_index, .. } => *ai_index,
            EvictionUnit::Standalone { index, .. } => *index,
        }
    }

    pub fn token_count(&self) -> usize {
        match self {
            EvictionUnit::ToolPairGroup { token_count, .. }
            | EvictionUnit::Standalone { token_count, .. } => *token_count,
        }
    }

    /// Every message index in the unit.
    pub fn indices(&self) -> Vec<usize> {
        match self {
            EvictionUnit::ToolPairGroup {
                ai_index,
                tool_indices,
                ..
            } => std::iter::once(*ai_index)
                .chain(tool_indices.iter().copied())
                .collect(),
            EvictionUnit::Standalone { index, .. } => vec![*index],
        }
    }
}

/// Units of a compressible range, each list sorted newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionUnits {
    pub groups: Vec<EvictionUnit>,
    pub standalone: Vec<EvictionUnit>,
}

impl EvictionUnits {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.standalone.is_empty()
    }
}

/// Partition `range` into eviction units.
///
/// - `System` messages are never units.
/// - `Human` messages and `AiTurn`s without answered calls are standalone.
/// - An `AiTurn` with results forms a group when all results lie inside the
///   range; otherwise neither it nor its results are evictable.
/// - A `ToolResult` with no owning turn is standalone; one whose owner lies
///   outside the range is left alone.
pub fn group_units(arena: &MessageArena<'_>, range: Range<usize>) -> EvictionUnits {
    let pairs = arena.pairs();
    let mut units = EvictionUnits::default();

    for i in range.clone() {
        let Some(message) = arena.get(i) else {
            break;
        };
        match message {
            Message::System { .. } => {}
            Message::Human { .. } => units.standalone.push(EvictionUnit::Standalone {
                index: i,
                token_count: arena.tokens(i),
            }),
            Message::AiTurn { .. } => {
                let results = pairs.results_of(i);
                if results.is_empty() {
                    units.standalone.push(EvictionUnit::Standalone {
                        index: i,
                        token_count: arena.tokens(i),
                    });
                } else if results.iter().all(|r| range.contains(r)) {
                    let token_count =
                        arena.tokens(i) + results.iter().map(|&r| arena.tokens(r)).sum::<usize>();
                    units.groups.push(EvictionUnit::ToolPairGroup {
                        ai_index: i,
                        tool_indices: results.to_vec(),
                        token_count,
                    });
                } else {
                    trace!("Skipping turn {i}: results fall outside the compressible range");
                }
            }
            Message::ToolResult { .. } => {
                if pairs.parent_of(i).is_none() {
                    trace!("Treating orphaned tool result {i} as standalone");
                    units.standalone.push(EvictionUnit::Standalone {
                        index: i,
                        token_count: arena.tokens(i),
                    });
                }
            }
        }
    }

    units.groups.reverse();
    units.standalone.reverse();
    units
}

// ── Selection ──────────────────────────────────────────────────────

/// Fixed-length set of archived message indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedSet {
    marks: Vec<bool>,
    count: usize,
}

impl ArchivedSet {
    pub fn new(len: usize) -> Self {
        Self {
            marks: vec![false; len],
            count: 0,
        }
    }

    pub fn insert(&mut self, index: usize) {
        if let Some(mark) = self.marks.get_mut(index)
            && !*mark
        {
            *mark = true;
            self.count += 1;
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.marks.get(index).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Archived indices, ascending.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.marks
            .iter()
            .enumerate()
            .filter_map(|(i, &marked)| marked.then_some(i))
    }

    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }
}

/// Outcome of [`select_candidates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub archived: ArchivedSet,
    pub archived_tokens: usize,
    pub target_tokens: usize,
    pub units_selected: usize,
}

/// Greedily take groups, then standalone messages, newest first, until
/// `max(needed_tokens, ceil(archive_ratio * compressible_tokens))` tokens are
/// covered or the units run out.
pub fn select_candidates(
    units: &EvictionUnits,
    sequence_len: usize,
    compressible_tokens: usize,
    needed_tokens: usize,
    archive_ratio: f64,
) -> Selection {
    let ratio_target = (compressible_tokens as f64 * archive_ratio).ceil() as usize;
    let target_tokens = needed_tokens.max(ratio_target);

    let mut archived = ArchivedSet::new(sequence_len);
    let mut archived_tokens = 0;
    let mut units_selected = 0;

    for unit in units.groups.iter().chain(units.standalone.iter()) {
        if archived_tokens >= target_tokens {
            break;
        }
        for index in unit.indices() {
            archived.insert(index);
        }
        archived_tokens += unit.token_count();
        units_selected += 1;
    }

    Selection {
        archived,
        archived_tokens,
        target_tokens,
        units_selected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use crate::context::budget::CharRatioEstimator;

    fn turn(id: &str) -> Message {
        Message::ai_tool_calls("", vec![ToolCall::new(id, "grep", "{}")])
    }

    fn sequence() -> Vec<Message> {
        vec![
            Message::system("s"),
            Message::human("a".repeat(40)),    // 1: 10 tokens
            turn("c1"),                        // 2
            Message::tool_result("c1", "b".repeat(400)), // 3: 100 tokens
            Message::ai("c".repeat(80)),       // 4: 20 tokens
            Message::tool_result("ghost", "d".repeat(20)), // 5: orphan, 5 tokens
            turn("c2"),                        // 6
            Message::tool_result("c2", "e".repeat(800)), // 7: 200 tokens
            Message::human("last"),
        ]
    }

    #[test]
    fn groups_and_standalone_are_newest_first() {
        let messages = sequence();
        let arena = MessageArena::new(&messages, &CharRatioEstimator::new(4.0));
        let units = group_units(&arena, 1..8);

        let group_starts: Vec<usize> = units.groups.iter().map(EvictionUnit::first_index).collect();
        assert_eq!(group_starts, vec![6, 2]);
        let standalone: Vec<usize> = units.standalone.iter().map(EvictionUnit::first_index).collect();
        assert_eq!(standalone, vec![5, 4, 1]);

        assert_eq!(units.groups[0].indices(), vec![6, 7]);
        assert_eq!(units.groups[0].token_count(), arena.tokens(6) + 200);
    }

    #[test]
    fn turn_with_results_outside_range_is_skipped() {
        let messages = sequence();
        let arena = MessageArena::new(&messages, &CharRatioEstimator::new(4.0));
        let units = group_units(&arena, 1..7);
        let starts: Vec<usize> = units.groups.iter().map(EvictionUnit::first_index).collect();
        assert_eq!(starts, vec![2]);
        assert!(units.standalone.iter().all(|u| u.first_index() != 6));
    }

    #[test]
    fn unanswered_turn_is_standalone() {
        let messages = vec![Message::human("h"), turn("pending"), Message::human("x")];
        let arena = MessageArena::new(&messages, &CharRatioEstimator::new(4.0));
        let units = group_units(&arena, 0..3);
        assert!(units.groups.is_empty());
        assert_eq!(units.standalone.len(), 3);
    }

    #[test]
    fn selection_stops_once_target_is_met() {
        let messages = sequence();
        let arena = MessageArena::new(&messages, &CharRatioEstimator::new(4.0));
        let units = group_units(&arena, 1..8);
        let compressible = arena.range_tokens(1..8);

        // needed 0, ratio 0.5: target is half of the range, newest group covers it.
        let selection = select_candidates(&units, messages.len(), compressible, 0, 0.5);
        assert_eq!(selection.units_selected, 1);
        assert!(selection.archived.contains(6) && selection.archived.contains(7));
        assert_eq!(selection.archived.first(), Some(6));
        assert!(selection.archived_tokens >= selection.target_tokens);
    }

    #[test]
    fn selection_uses_needed_tokens_when_larger() {
        let messages = sequence();
        let arena = MessageArena::new(&messages, &CharRatioEstimator::new(4.0));
        let units = group_units(&arena, 1..8);
        let compressible = arena.range_tokens(1..8);

        let selection = select_candidates(&units, messages.len(), compressible, compressible, 0.1);
        assert_eq!(selection.target_tokens, compressible);
        assert_eq!(selection.units_selected, 5);
        assert_eq!(selection.archived.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn archived_set_counts_once() {
        let mut set = ArchivedSet::new(4);
        set.insert(2);
        set.insert(2);
        set.insert(9);
        assert_eq!(set.len(), 1);
        assert!(set.contains(2));
        assert!(!set.contains(9));
    }
}
