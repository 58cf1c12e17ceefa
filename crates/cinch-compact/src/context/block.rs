//! Attachment-list truncation.
//!
//! A [`ContextBlock`] carries the files and tool results attached to a
//! prompt. Unlike history, attachments are independent and order-stable, so
//! they are walked oldest first and kept while they fit. Archived references
//! are routing records and pass through untouched.

use super::budget::TokenEstimator;
use super::truncate::truncate_to_tokens;
use crate::archive::ArchiveLocator;
use crate::config::ContextBlockLimits;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// A file attached by reference. Only its metadata is sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileRef {
    pub name: String,
    #[serde(default)]
    pub summary: String,
}

/// A file produced by a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutputFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// The output of an earlier tool or sub-task, attached inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResultRef {
    pub source: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<OutputFile>,
}

/// Permanent record of an archival event. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArchivedRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub locator: ArchiveLocator,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedRef {
    pub fn new(kind: impl Into<String>, source: impl Into<String>, locator: ArchiveLocator) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            locator,
            archived_at: Utc::now(),
        }
    }

    /// Record for a history compaction of `conversation_id`.
    pub fn from_locator(conversation_id: impl Into<String>, locator: ArchiveLocator) -> Self {
        Self::new("history", conversation_id, locator)
    }
}

/// Files and results attached to a prompt, plus archive routing records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContextBlock {
    pub files: Vec<FileRef>,
    pub results: Vec<ResultRef>,
    pub total_tokens: usize,
    pub archived_refs: Vec<ArchivedRef>,
}

impl ContextBlock {
    /// Append an archive record. Existing records are never modified.
    pub fn record_archive(&mut self, archived: ArchivedRef) {
        self.archived_refs.push(archived);
    }

    /// Tokens this block costs under the truncation accounting, without
    /// applying any limits.
    pub fn estimate_tokens(&self, estimator: &dyn TokenEstimator) -> usize {
        let files: usize = self.files.iter().map(|f| file_cost(f, estimator)).sum();
        let results: usize = self
            .results
            .iter()
            .map(|r| result_meta_cost(&r.source, &r.output_files, estimator) + tokens(&r.content, estimator))
            .sum();
        files + results
    }
}

fn tokens(text: &str, estimator: &dyn TokenEstimator) -> usize {
    estimator.estimate_text(text).unwrap_or(0)
}

fn file_cost(file: &FileRef, estimator: &dyn TokenEstimator) -> usize {
    tokens(&file.name, estimator) + tokens(&file.summary, estimator)
}

fn result_meta_cost(source: &str, output_files: &[OutputFile], estimator: &dyn TokenEstimator) -> usize {
    tokens(source, estimator)
        + output_files
            .iter()
            .map(|f| tokens(&f.path, estimator))
            .sum::<usize>()
}

/// Fit a context block into `max_tokens`.
///
/// Files (at most `max_files`) are kept in order while their metadata fits;
/// a file that does not fit is skipped and later, smaller ones may still be
/// kept. Results (at most `max_results`, each listing at most
/// `max_output_files_per_result` output files) are kept whole if they fit,
/// truncated head-and-tail if at least `min_result_content_tokens` of content
/// still fits, and dropped otherwise. `archived_refs` are copied unchanged.
pub fn truncate_context_block(
    block: &ContextBlock,
    max_tokens: usize,
    limits: &ContextBlockLimits,
    estimator: &dyn TokenEstimator,
) -> ContextBlock {
    let mut used = 0;

    let mut files = Vec::new();
    for file in block.files.iter().take(limits.max_files) {
        let cost = file_cost(file, estimator);
        if used + cost <= max_tokens {
            used += cost;
            files.push(file.clone());
        } else {
            trace!("Skipping file {} ({cost} tokens)", file.name);
        }
    }

    let mut results = Vec::new();
    let mut truncated = 0;
    for result in block.results.iter().take(limits.max_results) {
        let output_files: Vec<OutputFile> = result
            .output_files
            .iter()
            .take(limits.max_output_files_per_result)
            .cloned()
            .collect();
        let meta = result_meta_cost(&result.source, &output_files, estimator);
        let content_tokens = tokens(&result.content, estimator);

        if used + meta + content_tokens <= max_tokens {
            used += meta + content_tokens;
            results.push(ResultRef {
                source: result.source.clone(),
                content: result.content.clone(),
                output_files,
            });
            continue;
        }

        let available = max_tokens.saturating_sub(used + meta);
        if available >= limits.min_result_content_tokens {
            let content = truncate_to_tokens(&result.content, available, estimator);
            used += meta + tokens(&content, estimator);
            truncated += 1;
            results.push(ResultRef {
                source: result.source.clone(),
                content,
                output_files,
            });
        } else {
            trace!(
                "Dropping result {} ({content_tokens} tokens, {available} available)",
                result.source
            );
        }
    }

    debug!(
        "Context block: kept {}/{} files, {}/{} results ({truncated} truncated), ~{used}/{max_tokens} tokens",
        files.len(),
        block.files.len(),
        results.len(),
        block.results.len(),
    );

    ContextBlock {
        files,
        results,
        total_tokens: used,
        archived_refs: block.archived_refs.clone(),
    }
}
