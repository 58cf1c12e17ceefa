//! Boundaries of the compressible range.
//!
//! The sequence is split into three zones:
//!
//! ```text
//! [ cache prefix | compressible | protected tail ]
//! 0              prefix_end     tail_start       len
//! ```
//!
//! Both cuts are pure functions of the arena and the config, and both are
//! pushed away from the compressible range until no call/result pair
//! straddles them.

use super::arena::{MessageArena, PairIndex};
use crate::Message;
use crate::config::CompactionConfig;
use std::ops::Range;

/// Move `boundary` forward until no pair starts before it and ends at or
/// after it.
pub fn adjust_forward(pairs: &PairIndex, boundary: usize) -> usize {
    let mut boundary = boundary.min(pairs.len());
    loop {
        let next = (boundary..pairs.len())
            .filter(|&i| pairs.parent_of(i).is_some_and(|p| p < boundary))
            .map(|i| i + 1)
            .max()
            .unwrap_or(boundary);
        if next == boundary {
            return boundary;
        }
        boundary = next;
    }
}

/// Move `boundary` backward until no pair starts before it and ends at or
/// after it. Mirror of [`adjust_forward`] for the tail cut.
pub fn adjust_backward(pairs: &PairIndex, boundary: usize) -> usize {
    let mut boundary = boundary.min(pairs.len());
    loop {
        let next = (boundary..pairs.len())
            .filter_map(|i| pairs.parent_of(i))
            .filter(|&p| p < boundary)
            .min()
            .unwrap_or(boundary);
        if next == boundary {
            return boundary;
        }
        boundary = next;
    }
}

/// End of the cache prefix, the range `[0, p)` that must stay byte-identical.
///
/// With cache affinity, `p` is the first index that covers at least
/// `protected_head_messages` messages and `cache_min_prefix_tokens` tokens,
/// or the sequence length if the threshold is never reached. Without it, only
/// the leading system messages are protected. Either way `p` is then moved
/// past any pair it would split.
pub fn cache_prefix_boundary(arena: &MessageArena<'_>, config: &CompactionConfig) -> usize {
    if arena.is_empty() {
        return 0;
    }

    let raw = if config.cache_aware {
        let mut cumulative = 0;
        (0..arena.len())
            .find(|&i| {
                cumulative += arena.tokens(i);
                i + 1 >= config.protected_head_messages && cumulative >= config.cache_min_prefix_tokens
            })
            .map_or(arena.len(), |i| i + 1)
    } else {
        arena
            .messages()
            .iter()
            .take_while(|m| matches!(m, Message::System { .. }))
            .count()
    };

    adjust_forward(arena.pairs(), raw)
}

/// Start of the protected tail, before pair adjustment.
fn raw_tail_start(arena: &MessageArena<'_>, config: &CompactionConfig) -> usize {
    let len = arena.len();
    match arena.messages().last() {
        None => 0,
        Some(Message::ToolResult { .. }) => arena.pairs().parent_of(len - 1).unwrap_or(len - 1),
        Some(Message::AiTurn { .. }) => len.saturating_sub(config.tail_reserved_messages.max(1)),
        Some(Message::Human { .. } | Message::System { .. }) => len - 1,
    }
}

/// The compressible range `[prefix_end, tail_start)`, or `None` when the
/// protected prefix and tail leave nothing between them.
pub fn compressible_range(arena: &MessageArena<'_>, config: &CompactionConfig) -> Option<Range<usize>> {
    let prefix_end = cache_prefix_boundary(arena, config);
    let tail_start = adjust_backward(arena.pairs(), raw_tail_start(arena, config));
    (prefix_end < tail_start).then_some(prefix_end..tail_start)
}
