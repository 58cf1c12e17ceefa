//! End-to-end properties of history compaction, the agent-loop pipeline, and
//! context-block truncation.
//!
//! Conversations are drawn from a `proptest` strategy covering plain turns,
//! multi-call turns, unanswered calls, and orphaned results. Token costs come
//! from a 4-chars-per-token estimator.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cinch_compact::archive::{ArchiveFuture, ArchiveRequest, ArchiveStore};
use cinch_compact::context::arena::MessageArena;
use cinch_compact::context::boundary::cache_prefix_boundary;
use cinch_compact::context::budget::tokens_to_restore_headroom;
use cinch_compact::prelude::*;
use proptest::prelude::*;

fn est() -> CharRatioEstimator {
    CharRatioEstimator::new(4.0)
}

fn tokens(messages: &[Message]) -> usize {
    estimate_sequence_tokens(messages, &est())
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
        .block_on(future)
}

// ── Conversation strategy ────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    Human(usize),
    Ai(usize),
    /// One entry per call; `Some(size)` is answered by a result of that size.
    ToolTurn(Vec<Option<usize>>),
    Orphan(usize),
}

fn step() -> impl Strategy<Value = Step> {
    let size = 1..8000usize;
    let call = prop::option::weighted(0.875, 1..12_000usize);
    prop_oneof![
        3 => size.clone().prop_map(Step::Human),
        2 => size.clone().prop_map(Step::Ai),
        4 => prop::collection::vec(call, 1..=3).prop_map(Step::ToolTurn),
        1 => size.prop_map(Step::Orphan),
    ]
}

/// A system message followed by 3 to 30 generated steps. Call ids are unique.
fn conversation() -> impl Strategy<Value = Vec<Message>> {
    (1..6000usize, prop::collection::vec(step(), 3..30)).prop_map(|(system, steps)| {
        let mut messages = vec![Message::system("s".repeat(system))];
        let mut next_id = 0;
        for step in steps {
            match step {
                Step::Human(n) => messages.push(Message::human("h".repeat(n))),
                Step::Ai(n) => messages.push(Message::ai("a".repeat(n))),
                Step::ToolTurn(answers) => {
                    let mut results = Vec::new();
                    let calls: Vec<ToolCall> = answers
                        .into_iter()
                        .map(|answer| {
                            next_id += 1;
                            let id = format!("c{next_id}");
                            if let Some(n) = answer {
                                results.push(Message::tool_result(id.clone(), "r".repeat(n)));
                            }
                            ToolCall::new(id, "read_file", "{}")
                        })
                        .collect();
                    messages.push(Message::ai_tool_calls("", calls));
                    messages.extend(results);
                }
                Step::Orphan(n) => {
                    next_id += 1;
                    messages.push(Message::tool_result(format!("orphan{next_id}"), "o".repeat(n)));
                }
            }
        }
        messages
    })
}

/// Call ids with both a call and a result in `messages`.
fn answered_ids(messages: &[Message]) -> HashSet<String> {
    let calls: HashSet<&str> = messages
        .iter()
        .flat_map(|m| m.tool_calls().iter().map(|c| c.id.as_str()))
        .collect();
    messages
        .iter()
        .filter_map(Message::tool_call_id)
        .filter(|id| calls.contains(id))
        .map(str::to_string)
        .collect()
}

fn assert_pairs_kept_together(input: &[Message], output: &[Message]) {
    let out_calls: HashSet<&str> = output
        .iter()
        .flat_map(|m| m.tool_calls().iter().map(|c| c.id.as_str()))
        .collect();
    let out_results: HashSet<&str> = output.iter().filter_map(Message::tool_call_id).collect();
    for id in answered_ids(input) {
        assert_eq!(
            out_calls.contains(id.as_str()),
            out_results.contains(id.as_str()),
            "pair {id} was split"
        );
    }
    assert_eq!(
        validate_pairing(output).duplicate_call_ids,
        validate_pairing(input).duplicate_call_ids
    );
}

// ── Properties ───────────────────────────────────────────────────────

async fn check_history_compaction(messages: &[Message], fraction: f64) {
    let estimator = est();
    let total = tokens(messages);
    let prefix = {
        let arena = MessageArena::new(messages, &estimator);
        cache_prefix_boundary(&arena, &CompactionConfig::default())
    };
    let store = MemoryArchiveStore::new();
    let ctx = ArchiveContext::new("prop", &store, &estimator);
    let target = (total as f64 * fraction) as usize;
    let remaining = target as i64 - total as i64;

    let out = compress_history(messages, remaining, target, &ctx).await;
    assert_pairs_kept_together(messages, &out.messages);
    assert_eq!(out.messages[..prefix], messages[..prefix]);

    if out.was_compressed {
        let after = tokens(&out.messages);
        assert!(after <= total, "{after} > {total}");
        assert_eq!(out.tokens_saved, total - after);
        assert_eq!(out.messages.len(), messages.len() - out.archived_count + 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.requests()[0].messages.len(), out.archived_count);
        assert_eq!(out.messages.last(), messages.last());
    } else {
        assert_eq!(out.messages, messages);
        assert_eq!(out.tokens_saved, 0);
    }
}

async fn check_idempotence(messages: &[Message], fraction: f64) {
    let estimator = est();
    let config = CompactionConfig::default();
    let total = tokens(messages);
    let target = (total as f64 * fraction) as usize;
    let store = MemoryArchiveStore::new();
    let ctx = ArchiveContext::new("idem", &store, &estimator);

    let first = compress_history(messages, target as i64 - total as i64, target, &ctx).await;
    if !first.was_compressed {
        return;
    }
    let remaining = target as i64 - tokens(&first.messages) as i64;
    if tokens_to_restore_headroom(remaining, target, config.min_headroom_ratio) > 0 {
        return;
    }

    let second = compress_history(&first.messages, remaining, target, &ctx).await;
    assert!(!second.was_compressed);
    assert_eq!(second.messages, first.messages);
}

async fn check_agent_loop(messages: &[Message], fraction: f64) {
    let estimator = est();
    let total = tokens(messages);
    let store = MemoryArchiveStore::new();
    let ctx = ArchiveContext::new("loop", &store, &estimator);
    let context_limit = (total as f64 * fraction) as usize + 100;

    let out = compress_agent_loop_messages(messages, context_limit, 100, &ctx, 0).await;
    assert_pairs_kept_together(messages, &out.messages);
    assert!(tokens(&out.messages) <= total);
    if !out.was_compressed {
        assert_eq!(out.messages, messages);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn compaction_preserves_pairing_prefix_and_token_monotonicity(
        messages in conversation(),
        fraction in 0.3f64..1.3,
    ) {
        block_on(check_history_compaction(&messages, fraction));
    }

    #[test]
    fn compaction_is_idempotent_once_headroom_is_restored(
        messages in conversation(),
        fraction in 0.3f64..1.3,
    ) {
        block_on(check_idempotence(&messages, fraction));
    }

    #[test]
    fn agent_loop_never_breaks_pairing_or_grows(
        messages in conversation(),
        fraction in 0.2f64..1.2,
    ) {
        block_on(check_agent_loop(&messages, fraction));
    }
}

#[tokio::test]
async fn small_inputs_are_never_compressed() {
    let estimator = est();
    let store = MemoryArchiveStore::new();
    let ctx = ArchiveContext::new("small", &store, &estimator);
    let inputs = [
        vec![],
        vec![Message::system("s".repeat(40_000))],
        vec![Message::system("s"), Message::human("h".repeat(40_000))],
    ];

    for messages in inputs {
        let out = compress_history(&messages, -100_000, 10, &ctx).await;
        assert!(!out.was_compressed);
        assert_eq!(out.messages, messages);

        let out = compress_agent_loop_messages(&messages, 10, 0, &ctx, 0).await;
        assert!(!out.was_compressed);
    }
    assert!(store.is_empty());
}

// ── Scenarios ────────────────────────────────────────────────────────

/// Ten messages; 6 and 7 are a tool pair of 5000 tokens each.
fn ten_message_conversation() -> Vec<Message> {
    vec![
        Message::system("s".repeat(1600)),
        Message::human("h".repeat(1600)),
        Message::ai("a".repeat(1600)),
        Message::human("h".repeat(200)),
        Message::ai("a".repeat(200)),
        Message::human("h".repeat(200)),
        Message::ai_tool_calls("t".repeat(19_992), vec![ToolCall::new("big", "bash", "{}")]),
        Message::tool_result("big", "r".repeat(20_000)),
        Message::ai("a".repeat(200)),
        Message::human("h".repeat(200)),
    ]
}

#[tokio::test]
async fn large_tool_pair_is_evicted_as_one_unit() {
    let estimator = est();
    let store = MemoryArchiveStore::new();
    let ctx = ArchiveContext::new("conv-10", &store, &estimator);
    let messages = ten_message_conversation();
    assert_eq!(estimator.estimate_message(&messages[6]), Some(5000));
    assert_eq!(estimator.estimate_message(&messages[7]), Some(5000));

    let total = tokens(&messages);
    let target = total - 6000;
    let out = compress_history(&messages, -6000, target, &ctx).await;

    assert!(out.was_compressed);
    assert_eq!(out.archived_count, 2);
    assert_eq!(out.messages.len(), 9);
    assert!(out.messages[6].is_archive_note());
    assert!(out.messages[6].text().contains("memory://conv-10/0"));
    assert_eq!(out.messages[..6], messages[..6]);
    assert_eq!(out.messages[7..], messages[8..]);

    let archived = &store.requests()[0];
    assert_eq!(archived.messages, messages[6..8]);
    assert!(archived.transcript.contains("-> bash {}"));

    // Headroom is back, so a second pass does nothing.
    let remaining = target as i64 - tokens(&out.messages) as i64;
    let again = compress_history(&out.messages, remaining, target, &ctx).await;
    assert!(!again.was_compressed);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn archive_failure_returns_the_exact_input() {
    let estimator = est();
    let store = MemoryArchiveStore::failing();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    let handler = FnEventHandler::new(move |event| {
        if let CompactionEvent::ArchiveFailed { error } = event {
            seen.lock().unwrap().push(error.to_string());
        }
    });
    let ctx = ArchiveContext::new("conv", &store, &estimator).with_event_handler(&handler);
    let messages = ten_message_conversation();
    let total = tokens(&messages);

    let out = compress_history(&messages, -6000, total - 6000, &ctx).await;
    assert!(!out.was_compressed);
    assert_eq!(out.messages, messages);
    assert!(out.archive_locator.is_none());
    assert_eq!(failures.lock().unwrap().len(), 1);
}

struct NeverStore;

impl ArchiveStore for NeverStore {
    fn archive(&self, _request: ArchiveRequest) -> ArchiveFuture<'_> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn archive_timeout_is_treated_as_failure() {
    let estimator = est();
    let config = CompactionConfig::default().with_archive_timeout(Some(Duration::from_millis(20)));
    let ctx = ArchiveContext::new("conv", &NeverStore, &estimator).with_config(config);
    let messages = ten_message_conversation();
    let total = tokens(&messages);

    let out = compress_history(&messages, -6000, total - 6000, &ctx).await;
    assert!(!out.was_compressed);
    assert_eq!(out.messages, messages);
}

#[tokio::test]
async fn cancelling_the_call_leaves_the_input_untouched() {
    let estimator = est();
    let config = CompactionConfig::default().with_archive_timeout(None);
    let ctx = ArchiveContext::new("conv", &NeverStore, &estimator).with_config(config);
    let messages = ten_message_conversation();
    let original = messages.clone();
    let total = tokens(&messages);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        compress_history(&messages, -6000, total - 6000, &ctx),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(messages, original);
}

struct NulBlindEstimator;

impl TokenEstimator for NulBlindEstimator {
    fn estimate_text(&self, text: &str) -> Option<usize> {
        if text.contains('\u{0}') {
            None
        } else {
            Some(text.len().div_ceil(4))
        }
    }
}

#[tokio::test]
async fn unsizable_messages_are_reported_and_do_not_block() {
    let estimator = NulBlindEstimator;
    let store = MemoryArchiveStore::new();
    let anomalies = Arc::new(Mutex::new(0));
    let seen = anomalies.clone();
    let handler = FnEventHandler::new(move |event| {
        if let CompactionEvent::EstimatorAnomaly { unsized_messages } = event {
            *seen.lock().unwrap() += *unsized_messages;
        }
    });
    let ctx = ArchiveContext::new("conv", &store, &estimator).with_event_handler(&handler);

    let mut messages = ten_message_conversation();
    messages[4] = Message::ai("bad\u{0}bytes");
    let total = estimate_sequence_tokens(&messages, &estimator);

    let out = compress_history(&messages, -6000, total - 6000, &ctx).await;
    assert!(out.was_compressed);
    assert_eq!(*anomalies.lock().unwrap(), 1);
}

#[tokio::test]
async fn events_report_skip_and_archive() {
    let estimator = est();
    let store = MemoryArchiveStore::new();
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let seen = kinds.clone();
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(FnEventHandler::new(move |event| {
            let kind = match event {
                CompactionEvent::Skipped { reason } => format!("skipped: {reason}"),
                CompactionEvent::Archived { archived_count, .. } => format!("archived {archived_count}"),
                other => format!("{other:?}"),
            };
            seen.lock().unwrap().push(kind);
        }));
    let ctx = ArchiveContext::new("conv", &store, &estimator).with_event_handler(&handler);
    let messages = ten_message_conversation();
    let total = tokens(&messages);

    compress_history(&messages, total as i64, total * 2, &ctx).await;
    compress_history(&messages, -6000, total - 6000, &ctx).await;

    let kinds = kinds.lock().unwrap();
    assert_eq!(
        *kinds,
        vec!["skipped: sufficient headroom".to_string(), "archived 2".to_string()]
    );
}

#[test]
fn context_block_keeps_first_result_and_drops_the_rest() {
    let estimator = est();
    let block = ContextBlock {
        results: (0..5)
            .map(|i| ResultRef {
                source: format!("r{i}"),
                content: "x".repeat(8000),
                output_files: Vec::new(),
            })
            .collect(),
        ..Default::default()
    };

    let out = truncate_context_block(&block, 3000, &ContextBlockLimits::default(), &estimator);
    assert_eq!(out.results.len(), 1);
    assert_eq!(out.results[0], block.results[0]);
    assert!(out.total_tokens <= 3000);
}

#[test]
fn context_block_truncates_first_result_to_the_budget() {
    let estimator = est();
    let block = ContextBlock {
        results: (0..5)
            .map(|i| ResultRef {
                source: format!("r{i}"),
                content: format!("header {i}\n") + &"x".repeat(16_000) + "\nfooter",
                output_files: Vec::new(),
            })
            .collect(),
        ..Default::default()
    };

    let out = truncate_context_block(&block, 3000, &ContextBlockLimits::default(), &estimator);
    assert_eq!(out.results.len(), 1);
    let kept = &out.results[0].content;
    assert!(kept.starts_with("header 0"));
    assert!(kept.ends_with("footer"));
    assert!(out.total_tokens <= 3000);
    assert!(out.total_tokens > 2500);
}

#[tokio::test]
async fn compaction_outcome_can_be_recorded_in_a_context_block() {
    let estimator = est();
    let store = MemoryArchiveStore::new();
    let ctx = ArchiveContext::new("conv-7", &store, &estimator);
    let messages = ten_message_conversation();
    let total = tokens(&messages);

    let out = compress_history(&messages, -6000, total - 6000, &ctx).await;
    let mut block = ContextBlock::default();
    if let Some(locator) = out.archive_locator {
        block.record_archive(ArchivedRef::from_locator(ctx.conversation_id(), locator));
    }

    let truncated = truncate_context_block(&block, 0, &ContextBlockLimits::default(), &estimator);
    assert_eq!(truncated.archived_refs.len(), 1);
    assert_eq!(truncated.archived_refs[0].locator.as_str(), "memory://conv-7/0");
}
