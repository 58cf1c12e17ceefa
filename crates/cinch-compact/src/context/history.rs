//! History compaction: archive a span of the conversation and leave a
//! reference note in its place.

use super::arena::MessageArena;
use super::boundary::compressible_range;
use super::budget::tokens_to_restore_headroom;
use super::eviction::{group_units, select_candidates};
use crate::Message;
use crate::archive::{ArchiveContext, ArchiveLocator, ArchiveSummary, build_reference_note};
use crate::events::{CompactionEvent, SkipReason};
use tracing::{debug, warn};

/// Result of [`compress_history`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryCompression {
    pub messages: Vec<Message>,
    pub was_compressed: bool,
    pub archive_locator: Option<ArchiveLocator>,
    pub archived_count: usize,
    pub tokens_saved: usize,
}

impl HistoryCompression {
    fn unchanged(messages: &[Message]) -> Self {
        Self {
            messages: messages.to_vec(),
            was_compressed: false,
            archive_locator: None,
            archived_count: 0,
            tokens_saved: 0,
        }
    }
}

fn skip(messages: &[Message], ctx: &ArchiveContext<'_>, reason: SkipReason) -> HistoryCompression {
    debug!("History compaction skipped: {reason}");
    ctx.emit(CompactionEvent::Skipped { reason });
    HistoryCompression::unchanged(messages)
}

/// Archive enough history to restore the configured headroom.
///
/// `remaining_budget` is `target_budget - current_tokens` and may be
/// negative. Nothing happens when the budget already leaves
/// `min_headroom_ratio` of the target free, so calling this again on its own
/// output with a recomputed budget is a no-op.
///
/// The budget is taken as given. Passing the same stale `remaining_budget`
/// for the compacted output compacts again, and may archive the earlier
/// reference note along with other history.
///
/// Never fails: an archive error or timeout is logged, reported as
/// [`CompactionEvent::ArchiveFailed`], and the input comes back unchanged.
pub async fn compress_history(
    messages: &[Message],
    remaining_budget: i64,
    target_budget: usize,
    ctx: &ArchiveContext<'_>,
) -> HistoryCompression {
    let config = ctx.config();

    if messages.len() < config.min_messages {
        return skip(
            messages,
            ctx,
            SkipReason::TooFewMessages {
                count: messages.len(),
            },
        );
    }

    let needed = tokens_to_restore_headroom(remaining_budget, target_budget, config.min_headroom_ratio);
    if needed == 0 {
        return skip(messages, ctx, SkipReason::SufficientHeadroom);
    }

    let arena = MessageArena::new(messages, ctx.estimator());
    if arena.unsized_messages() > 0 {
        warn!(
            "Token estimator could not size {} message(s); counting them as zero",
            arena.unsized_messages()
        );
        ctx.emit(CompactionEvent::EstimatorAnomaly {
            unsized_messages: arena.unsized_messages(),
        });
    }

    let Some(range) = compressible_range(&arena, config) else {
        return skip(messages, ctx, SkipReason::NothingCompressible);
    };

    let units = group_units(&arena, range.clone());
    let compressible_tokens = arena.range_tokens(range.clone());
    let selection = select_candidates(
        &units,
        arena.len(),
        compressible_tokens,
        needed,
        config.archive_ratio,
    );
    let Some(first_archived) = selection.archived.first() else {
        return skip(messages, ctx, SkipReason::NothingSelected);
    };
    debug!(
        "Selected {} unit(s), {} messages, ~{} tokens from range {:?} (need {}, target {})",
        selection.units_selected,
        selection.archived.len(),
        selection.archived_tokens,
        range,
        needed,
        selection.target_tokens,
    );

    let archived: Vec<Message> = selection
        .archived
        .iter()
        .map(|i| messages[i].clone())
        .collect();
    let archived_count = archived.len();
    let summary = ArchiveSummary::from_messages(&archived);

    let locator = match ctx.archive(archived).await {
        Ok(locator) => locator,
        Err(error) => {
            warn!("Archive store failed, leaving history uncompacted: {error}");
            ctx.emit(CompactionEvent::ArchiveFailed { error: &error });
            return HistoryCompression::unchanged(messages);
        }
    };

    let note = build_reference_note(archived_count, &locator, &summary);
    let note_tokens = ctx.estimator().estimate_message(&note).unwrap_or(0);
    let tokens_before = arena.total_tokens();
    let tokens_after = tokens_before - selection.archived_tokens + note_tokens;
    if tokens_after >= tokens_before {
        return skip(messages, ctx, SkipReason::NoNetSaving);
    }

    let mut compacted = Vec::with_capacity(messages.len() - archived_count + 1);
    let mut note = Some(note);
    for (i, message) in messages.iter().enumerate() {
        if i == first_archived {
            compacted.extend(note.take());
        } else if !selection.archived.contains(i) {
            compacted.push(message.clone());
        }
    }

    let tokens_saved = tokens_before - tokens_after;
    ctx.emit(CompactionEvent::Archived {
        locator: &locator,
        archived_count,
        tokens_saved,
    });
    debug!(
        "Compacted history: {} -> {} messages, ~{tokens_saved} tokens saved",
        messages.len(),
        compacted.len()
    );

    HistoryCompression {
        messages: compacted,
        was_compressed: true,
        archive_locator: Some(locator),
        archived_count,
        tokens_saved,
    }
}
