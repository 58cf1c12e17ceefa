//! Compaction events and handlers.
//!
//! The engine reports every decision it makes through [`CompactionEvent`]
//! values. Callers plug in an [`EventHandler`] via
//! [`ArchiveContext::with_event_handler`](crate::archive::ArchiveContext::with_event_handler)
//! to log, count, or surface those decisions.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or callers that only want `tracing` output |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::archive::{ArchiveError, ArchiveLocator};
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Why a compaction call left the sequence untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The sequence is shorter than the configured minimum.
    TooFewMessages { count: usize },
    /// The budget still has the required headroom.
    SufficientHeadroom,
    /// The protected prefix and tail cover the whole sequence.
    NothingCompressible,
    /// No eviction unit could be selected.
    NothingSelected,
    /// The reference note would not be smaller than what it replaces.
    NoNetSaving,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::TooFewMessages { count } => write!(f, "too few messages ({count})"),
            SkipReason::SufficientHeadroom => write!(f, "sufficient headroom"),
            SkipReason::NothingCompressible => write!(f, "nothing compressible"),
            SkipReason::NothingSelected => write!(f, "no eviction unit selected"),
            SkipReason::NoNetSaving => write!(f, "archive note would not save tokens"),
        }
    }
}

/// Events emitted while compacting a conversation.
#[derive(Debug)]
pub enum CompactionEvent<'a> {
    /// Compaction was not applied.
    Skipped { reason: SkipReason },
    /// Some messages could not be sized and were counted as zero tokens.
    EstimatorAnomaly { unsized_messages: usize },
    /// Messages were archived and replaced with a reference note.
    Archived {
        locator: &'a ArchiveLocator,
        archived_count: usize,
        tokens_saved: usize,
    },
    /// The archive store failed; the sequence was returned unchanged.
    ArchiveFailed { error: &'a ArchiveError },
    /// Oversized tool results were cut down in the fallback pass.
    ToolResultsTruncated { count: usize, tokens_saved: usize },
}

// ── Handlers ───────────────────────────────────────────────────────

/// Receives [`CompactionEvent`]s.
///
/// # Example
///
/// ```ignore
/// struct CountArchives(AtomicUsize);
///
/// impl EventHandler for CountArchives {
///     fn on_event(&self, event: &CompactionEvent<'_>) {
///         if let CompactionEvent::Archived { .. } = event {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for each event. The default implementation ignores it.
    fn on_event(&self, event: &CompactionEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Forwards events to `tracing` with structured fields.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &CompactionEvent<'_>) {
        match event {
            CompactionEvent::Skipped { reason } => {
                debug!(%reason, "compaction skipped");
            }
            CompactionEvent::EstimatorAnomaly { unsized_messages } => {
                warn!(unsized_messages, "token estimator could not size some messages");
            }
            CompactionEvent::Archived {
                locator,
                archived_count,
                tokens_saved,
            } => {
                info!(
                    %locator,
                    archived_count, tokens_saved, "archived conversation history"
                );
            }
            CompactionEvent::ArchiveFailed { error } => {
                warn!(%error, "archive failed; history left uncompacted");
            }
            CompactionEvent::ToolResultsTruncated {
                count,
                tokens_saved,
            } => {
                info!(count, tokens_saved, "truncated oversized tool results");
            }
        }
    }
}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| eprintln!("{event:?}"));
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &CompactionEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches each event to several handlers in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, ProgressHandler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &CompactionEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}
