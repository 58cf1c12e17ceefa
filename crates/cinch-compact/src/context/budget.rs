//! Token estimation and the per-call compression budget.
//!
//! The engine never tokenizes anything itself. A [`TokenEstimator`] supplied
//! by the caller sizes each message; [`CharRatioEstimator`] is the default
//! heuristic. A [`CompressionBudget`] is derived fresh on every call from the
//! model's context limit, the reserved output, and the current usage.

use crate::Message;
use serde::Serialize;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

// ── Estimation ─────────────────────────────────────────────────────

/// Sizes text in tokens.
///
/// Returning `None` marks the text as unsizable. The engine counts such
/// content as zero tokens so every algorithm still terminates, and reports
/// the anomaly through [`CompactionEvent::EstimatorAnomaly`](crate::events::CompactionEvent::EstimatorAnomaly).
pub trait TokenEstimator: Send + Sync {
    /// Estimate the token count of a piece of text.
    fn estimate_text(&self, text: &str) -> Option<usize>;

    /// Estimate the token count of a whole message: its text plus the name
    /// and arguments of every tool call it carries.
    fn estimate_message(&self, message: &Message) -> Option<usize> {
        match message {
            Message::System { content } | Message::Human { content } => {
                self.estimate_text(content)
            }
            Message::AiTurn {
                content,
                tool_calls,
            } => {
                let mut total = self.estimate_text(content)?;
                for call in tool_calls {
                    total += self.estimate_text(&call.name)?;
                    total += self.estimate_text(&call.arguments)?;
                }
                Some(total)
            }
            Message::ToolResult { payload, .. } => self.estimate_text(payload),
        }
    }
}

/// Estimates tokens as `ceil(bytes / chars_per_token)`.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: f64,
}

impl CharRatioEstimator {
    /// Create an estimator with a calibrated chars-per-token ratio.
    /// Non-positive ratios fall back to [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate_text(&self, text: &str) -> Option<usize> {
        Some((text.len() as f64 / self.chars_per_token).ceil() as usize)
    }
}

/// Estimate the total tokens of a message slice, counting unsizable messages
/// as zero.
pub fn estimate_sequence_tokens(messages: &[Message], estimator: &dyn TokenEstimator) -> usize {
    messages
        .iter()
        .map(|m| estimator.estimate_message(m).unwrap_or(0))
        .sum()
}

// ── Budget ─────────────────────────────────────────────────────────

/// Token budget for a single compaction call.
///
/// `target_budget = context_limit - reserved_output` and
/// `remaining_budget = target_budget - current_tokens`. The remaining budget
/// is signed: a negative value is the current shortfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompressionBudget {
    pub context_limit: usize,
    pub reserved_output: usize,
    pub target_budget: usize,
    pub current_tokens: usize,
    pub remaining_budget: i64,
}

impl CompressionBudget {
    pub fn new(context_limit: usize, reserved_output: usize, current_tokens: usize) -> Self {
        let target_budget = context_limit.saturating_sub(reserved_output);
        Self {
            context_limit,
            reserved_output,
            target_budget,
            current_tokens,
            remaining_budget: target_budget as i64 - current_tokens as i64,
        }
    }

    /// `remaining / target`. A zero target reports `0.0` (no headroom).
    pub fn remaining_ratio(&self) -> f64 {
        if self.target_budget == 0 {
            return 0.0;
        }
        self.remaining_budget as f64 / self.target_budget as f64
    }

    /// Whether at least `min_ratio` of the target is still free.
    pub fn has_headroom(&self, min_ratio: f64) -> bool {
        self.remaining_ratio() >= min_ratio
    }

    /// Whether current usage is above the target.
    pub fn exceeds_target(&self) -> bool {
        self.remaining_budget < 0
    }

    /// Tokens that must be freed to get back to `min_ratio` headroom.
    pub fn tokens_to_restore_headroom(&self, min_ratio: f64) -> usize {
        tokens_to_restore_headroom(self.remaining_budget, self.target_budget, min_ratio)
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "budget: ~{} of {} tokens used ({} remaining, {:.0}% free)",
            self.current_tokens,
            self.target_budget,
            self.remaining_budget,
            self.remaining_ratio() * 100.0,
        )
    }
}

/// Tokens that must be freed so that `remaining_budget` reaches
/// `min_ratio * target_budget`. Zero when the headroom already exists.
pub fn tokens_to_restore_headroom(remaining_budget: i64, target_budget: usize, min_ratio: f64) -> usize {
    let required = (target_budget as f64 * min_ratio).ceil() as i64;
    (required - remaining_budget).max(0) as usize
}
