//! Built-in [`ArchiveStore`] implementations.
//!
//! | Store | Locator | Use case |
//! |-------|---------|----------|
//! | [`MemoryArchiveStore`] | `memory://<conversation>/<n>` | Tests, embedding |
//! | [`FileArchiveStore`] | `file://<dir>/<conversation>/<uuid>.json` | Local CLI runs |
//! | [`HttpArchiveStore`] | whatever the service returns | Remote archive services |

use super::{ArchiveError, ArchiveFuture, ArchiveLocator, ArchiveRequest, ArchiveStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

// ── Memory ─────────────────────────────────────────────────────────

/// Keeps every request in memory. Can be switched into a failing mode to
/// exercise the archive-failure path.
#[derive(Default)]
pub struct MemoryArchiveStore {
    requests: Mutex<Vec<ArchiveRequest>>,
    failing: AtomicBool,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every request with [`ArchiveError::Unavailable`].
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Snapshot of every accepted request, oldest first.
    pub fn requests(&self) -> Vec<ArchiveRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArchiveStore for MemoryArchiveStore {
    fn archive(&self, request: ArchiveRequest) -> ArchiveFuture<'_> {
        Box::pin(async move {
            if self.failing.load(Ordering::Relaxed) {
                return Err(ArchiveError::Unavailable(
                    "memory store is in failing mode".into(),
                ));
            }
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            let locator = ArchiveLocator::new(format!(
                "memory://{}/{}",
                request.conversation_id,
                requests.len()
            ));
            requests.push(request);
            Ok(locator)
        })
    }
}

// ── File ───────────────────────────────────────────────────────────

const FILE_SCHEME: &str = "file://";

/// Writes each request as pretty JSON under
/// `<root>/<conversation>/<uuid>.json`.
pub struct FileArchiveStore {
    root: PathBuf,
}

impl FileArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read back a request previously written by this store.
    pub async fn load(&self, locator: &ArchiveLocator) -> Result<ArchiveRequest, ArchiveError> {
        let path = locator
            .as_str()
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| ArchiveError::Rejected(format!("not a file locator: {locator}")))?;
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Map a conversation id to a single safe path component.
fn sanitize_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".into()
    } else {
        cleaned
    }
}

impl ArchiveStore for FileArchiveStore {
    fn archive(&self, request: ArchiveRequest) -> ArchiveFuture<'_> {
        Box::pin(async move {
            let dir = self.root.join(sanitize_component(&request.conversation_id));
            tokio::fs::create_dir_all(&dir).await?;

            let path = dir.join(format!("{}.json", uuid::Uuid::new_v4()));
            let body = serde_json::to_vec_pretty(&request)?;
            tokio::fs::write(&path, &body).await?;

            debug!("Archived {} messages to {}", request.message_count, path.display());
            Ok(ArchiveLocator::new(format!("{FILE_SCHEME}{}", path.display())))
        })
    }
}

// ── HTTP ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LocatorResponse {
    locator: String,
}

/// POSTs each request as JSON to an archive service.
///
/// The service must answer with a 2xx status and a body of the form
/// `{"locator": "..."}`.
pub struct HttpArchiveStore {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpArchiveStore {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ArchiveError> {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    /// Create a store whose HTTP client gives up after `timeout`.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .user_agent("cinch-compact/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ArchiveStore for HttpArchiveStore {
    fn archive(&self, request: ArchiveRequest) -> ArchiveFuture<'_> {
        Box::pin(async move {
            let mut builder = self.client.post(&self.endpoint).json(&request);
            if let Some(token) = &self.bearer_token {
                builder = builder.header("Authorization", format!("Bearer {token}"));
            }

            let resp = builder.send().await.map_err(|e| {
                if e.is_connect() {
                    ArchiveError::Unavailable(e.to_string())
                } else {
                    ArchiveError::Http(e)
                }
            })?;

            let status = resp.status();
            let text = resp.text().await?;
            trace!("Archive service answered HTTP {status} ({} bytes)", text.len());

            if !status.is_success() {
                return Err(ArchiveError::Rejected(format!("HTTP {status}: {text}")));
            }

            let parsed: LocatorResponse = serde_json::from_str(&text)?;
            if parsed.locator.is_empty() {
                return Err(ArchiveError::Rejected("empty locator in response".into()));
            }
            Ok(ArchiveLocator::new(parsed.locator))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use chrono::Utc;

    fn request(conversation_id: &str) -> ArchiveRequest {
        ArchiveRequest {
            conversation_id: conversation_id.into(),
            execution_id: None,
            archived_at: Utc::now(),
            message_count: 1,
            transcript: "[human] hi".into(),
            messages: vec![Message::human("hi")],
        }
    }

    #[tokio::test]
    async fn memory_store_numbers_locators() {
        let store = MemoryArchiveStore::new();
        let a = store.archive(request("c")).await.unwrap();
        let b = store.archive(request("c")).await.unwrap();
        assert_eq!(a.as_str(), "memory://c/0");
        assert_eq!(b.as_str(), "memory://c/1");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn failing_memory_store_keeps_nothing() {
        let store = MemoryArchiveStore::failing();
        let err = store.archive(request("c")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Unavailable(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn sanitize_keeps_ids_to_one_component() {
        assert_eq!(sanitize_component("conv-42_a"), "conv-42_a");
        assert_eq!(sanitize_component("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_component(""), "_");
    }

    #[tokio::test]
    async fn file_store_rejects_foreign_locators() {
        let store = FileArchiveStore::new("/tmp");
        let err = store
            .load(&ArchiveLocator::new("memory://c/0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Rejected(_)));
    }
}
