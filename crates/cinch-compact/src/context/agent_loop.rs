//! The per-iteration pipeline: compact history, and if that is not enough,
//! cap oversized tool results.

use super::arena::MessageArena;
use super::boundary::cache_prefix_boundary;
use super::budget::{CompressionBudget, TokenEstimator, estimate_sequence_tokens};
use super::history::compress_history;
use super::truncate::truncate_to_tokens;
use crate::Message;
use crate::archive::{ArchiveContext, ArchiveLocator};
use crate::config::{CompactionConfig, ModelCapabilities};
use crate::events::{CompactionEvent, SkipReason};
use tracing::{debug, trace};

/// Result of [`compress_agent_loop_messages`].
#[derive(Debug, Clone, PartialEq)]
pub struct AgentLoopCompression {
    pub messages: Vec<Message>,
    /// Whether history was archived or any tool result was truncated.
    pub was_compressed: bool,
    pub archive_locator: Option<ArchiveLocator>,
    pub archived_count: usize,
    pub truncated_tool_results: usize,
    /// The budget computed for the input sequence.
    pub budget: CompressionBudget,
}

/// Run one iteration of context management for an agent loop.
///
/// `extra_reserved_tokens` is subtracted from the target on top of
/// `reserved_output` (tool schemas, injected reminders, and similar prompt
/// content that is not part of `messages`).
///
/// ```ignore
/// let outcome = compress_agent_loop_messages(&messages, 128_000, 4_096, &ctx, 0).await;
/// messages = outcome.messages;
/// ```
pub async fn compress_agent_loop_messages(
    messages: &[Message],
    context_limit: usize,
    reserved_output: usize,
    ctx: &ArchiveContext<'_>,
    extra_reserved_tokens: usize,
) -> AgentLoopCompression {
    let config = ctx.config();
    let current = estimate_sequence_tokens(messages, ctx.estimator());
    let budget = CompressionBudget::new(
        context_limit,
        reserved_output.saturating_add(extra_reserved_tokens),
        current,
    );
    debug!("Agent loop {}", budget.to_log_string());

    let unchanged = |reason: SkipReason| {
        ctx.emit(CompactionEvent::Skipped { reason });
        AgentLoopCompression {
            messages: messages.to_vec(),
            was_compressed: false,
            archive_locator: None,
            archived_count: 0,
            truncated_tool_results: 0,
            budget,
        }
    };

    if messages.len() < config.min_messages {
        return unchanged(SkipReason::TooFewMessages {
            count: messages.len(),
        });
    }
    if budget.has_headroom(config.min_headroom_ratio) {
        return unchanged(SkipReason::SufficientHeadroom);
    }

    let history =
        compress_history(messages, budget.remaining_budget, budget.target_budget, ctx).await;
    let mut compacted = history.messages;

    let mut truncated_tool_results = 0;
    if estimate_sequence_tokens(&compacted, ctx.estimator()) > budget.target_budget {
        let (count, tokens_saved) = cap_tool_results(&mut compacted, config, ctx.estimator());
        if count > 0 {
            ctx.emit(CompactionEvent::ToolResultsTruncated {
                count,
                tokens_saved,
            });
        }
        truncated_tool_results = count;
    }

    AgentLoopCompression {
        messages: compacted,
        was_compressed: history.was_compressed || truncated_tool_results > 0,
        archive_locator: history.archive_locator,
        archived_count: history.archived_count,
        truncated_tool_results,
        budget,
    }
}

/// [`compress_agent_loop_messages`] with the context window and output
/// reservation taken from `model`.
///
/// Cache affinity lives in the context's config; carry it over with
/// [`ModelCapabilities::apply_to`] when building the [`ArchiveContext`].
pub async fn compress_for_model(
    messages: &[Message],
    model: &ModelCapabilities,
    ctx: &ArchiveContext<'_>,
    extra_reserved_tokens: usize,
) -> AgentLoopCompression {
    compress_agent_loop_messages(
        messages,
        model.context_limit,
        model.reserved_output,
        ctx,
        extra_reserved_tokens,
    )
    .await
}

/// Truncate every tool result outside the cache prefix that exceeds
/// `tool_result_token_cap`. Message count and pairing are unchanged.
///
/// Returns the number of results truncated and the tokens saved.
pub fn cap_tool_results(
    messages: &mut [Message],
    config: &CompactionConfig,
    estimator: &dyn TokenEstimator,
) -> (usize, usize) {
    let cap = config.tool_result_token_cap;
    let (prefix_end, oversized) = {
        let arena = MessageArena::new(messages, estimator);
        let prefix_end = cache_prefix_boundary(&arena, config);
        let oversized: Vec<(usize, usize)> = (prefix_end..arena.len())
            .filter(|&i| {
                matches!(arena.get(i), Some(Message::ToolResult { .. })) && arena.tokens(i) > cap
            })
            .map(|i| (i, arena.tokens(i)))
            .collect();
        (prefix_end, oversized)
    };
    trace!(
        "Capping {} tool result(s) after prefix {prefix_end} to {cap} tokens",
        oversized.len()
    );

    let mut count = 0;
    let mut tokens_saved = 0;
    for (i, before) in oversized {
        if let Some(Message::ToolResult { payload, .. }) = messages.get_mut(i) {
            let truncated = truncate_to_tokens(payload, cap, estimator);
            let after = estimator.estimate_text(&truncated).unwrap_or(0);
            *payload = truncated;
            count += 1;
            tokens_saved += before.saturating_sub(after);
        }
    }
    (count, tokens_saved)
}
