//! The archive seam: where evicted history goes.
//!
//! Compaction moves messages out of the live prompt only after an
//! [`ArchiveStore`] has durably accepted them and handed back an
//! [`ArchiveLocator`]. The store is the engine's single asynchronous I/O
//! boundary; any failure, timeout, or cancellation there leaves the caller's
//! sequence untouched.
//!
//! [`ArchiveContext`] bundles everything a compaction call needs besides the
//! messages themselves: routing identity, the store, the token estimator, an
//! optional [`EventHandler`], and the [`CompactionConfig`].

mod store;
mod transcript;

pub use store::{FileArchiveStore, HttpArchiveStore, MemoryArchiveStore};
pub use transcript::{ArchiveSummary, build_reference_note, render_transcript};

use crate::Message;
use crate::config::CompactionConfig;
use crate::context::budget::TokenEstimator;
use crate::events::{CompactionEvent, EventHandler};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Every reference note starts with this marker.
pub const ARCHIVE_NOTE_PREFIX: &str = "[Archived history:";

// ── Locator ────────────────────────────────────────────────────────

/// Opaque handle to archived content, as returned by an [`ArchiveStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ArchiveLocator(String);

impl ArchiveLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ArchiveLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Request / error ────────────────────────────────────────────────

/// What a store receives for one archival event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRequest {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub archived_at: DateTime<Utc>,
    pub message_count: usize,
    /// Role-tagged plain-text rendering of `messages`.
    pub transcript: String,
    /// The archived messages in their original order.
    pub messages: Vec<Message>,
}

/// Failure at the archive seam. Never surfaced by the compaction entry
/// points; they log it and return the input unchanged.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive store unavailable: {0}")]
    Unavailable(String),
    #[error("archive store rejected the request: {0}")]
    Rejected(String),
    #[error("failed to serialize archive: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("archive timed out after {0:?}")]
    Timeout(Duration),
}

// ── Store trait ────────────────────────────────────────────────────

/// Boxed future returned by [`ArchiveStore::archive`].
pub type ArchiveFuture<'a> = futures::future::BoxFuture<'a, Result<ArchiveLocator, ArchiveError>>;

/// Durable storage for evicted history.
///
/// Implementations must only return `Ok` once the content is persisted.
///
/// # Example
///
/// ```ignore
/// struct NullStore;
///
/// impl ArchiveStore for NullStore {
///     fn archive(&self, request: ArchiveRequest) -> ArchiveFuture<'_> {
///         Box::pin(async move {
///             Ok(ArchiveLocator::new(format!("null://{}", request.conversation_id)))
///         })
///     }
/// }
/// ```
pub trait ArchiveStore: Send + Sync {
    fn archive(&self, request: ArchiveRequest) -> ArchiveFuture<'_>;
}

// ── ArchiveContext ─────────────────────────────────────────────────

/// Caller identity, collaborators, and policy for one compaction call.
pub struct ArchiveContext<'a> {
    conversation_id: String,
    execution_id: Option<String>,
    store: &'a dyn ArchiveStore,
    estimator: &'a dyn TokenEstimator,
    events: Option<&'a dyn EventHandler>,
    config: CompactionConfig,
}

impl<'a> ArchiveContext<'a> {
    pub fn new(
        conversation_id: impl Into<String>,
        store: &'a dyn ArchiveStore,
        estimator: &'a dyn TokenEstimator,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            execution_id: None,
            store,
            estimator,
            events: None,
            config: CompactionConfig::default(),
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    /// Attach a handler that receives every [`CompactionEvent`].
    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.events = Some(handler);
        self
    }

    pub fn with_config(mut self, config: CompactionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator
    }

    pub(crate) fn emit(&self, event: CompactionEvent<'_>) {
        if let Some(handler) = self.events {
            handler.on_event(&event);
        }
    }

    /// Hand `messages` to the store, applying the configured timeout.
    pub async fn archive(&self, messages: Vec<Message>) -> Result<ArchiveLocator, ArchiveError> {
        let request = ArchiveRequest {
            conversation_id: self.conversation_id.clone(),
            execution_id: self.execution_id.clone(),
            archived_at: Utc::now(),
            message_count: messages.len(),
            transcript: render_transcript(&messages),
            messages,
        };
        debug!(
            "Archiving {} messages ({} transcript bytes) for conversation {}",
            request.message_count,
            request.transcript.len(),
            self.conversation_id,
        );

        match self.config.archive_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.store.archive(request)).await {
                Ok(result) => result,
                Err(_) => Err(ArchiveError::Timeout(limit)),
            },
            None => self.store.archive(request).await,
        }
    }
}
