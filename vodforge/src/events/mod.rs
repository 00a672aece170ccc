//! Segment event bus.
//!
//! In-process publish/subscribe for stream events. Subscribers register per
//! event kind; `publish` dispatches to all matching subscribers
//! concurrently and waits for them with a bounded timeout, so one stuck
//! callback cannot wedge the pipeline.
//!
//! Ordering: `publish` returns only after dispatch, and each session's
//! events are published from a single task, so a subscriber observes any
//! one session's events in publication order. Cross-session ordering is
//! unspecified.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::ProgressSnapshot;

/// Kind of a stream event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    SegmentReady,
    ManifestUpdated,
    StreamCompleted,
    StreamFailed,
    ProgressUpdate,
    EncodingError,
}

/// Event payload. Opaque to the bus; subscribers downcast by kind.
#[derive(Debug, Clone)]
pub enum StreamEventPayload {
    /// A media/init segment file appeared.
    Segment {
        path: PathBuf,
        duration_secs: Option<f64>,
    },
    /// A manifest was written or rewritten.
    Manifest { path: PathBuf },
    /// Periodic progress snapshot.
    Progress(ProgressSnapshot),
    /// Terminal or non-terminal error text.
    Error { message: String },
    /// Stream finished; totals for bookkeeping.
    Completed { total_segments: u64 },
}

/// A single event on the bus.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub session_id: String,
    pub content_hash: String,
    pub timestamp: DateTime<Utc>,
    pub payload: StreamEventPayload,
}

impl StreamEvent {
    fn new(
        kind: StreamEventKind,
        session_id: impl Into<String>,
        content_hash: impl Into<String>,
        payload: StreamEventPayload,
    ) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            content_hash: content_hash.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn segment_ready(
        session_id: impl Into<String>,
        content_hash: impl Into<String>,
        path: PathBuf,
        duration_secs: Option<f64>,
    ) -> Self {
        Self::new(
            StreamEventKind::SegmentReady,
            session_id,
            content_hash,
            StreamEventPayload::Segment {
                path,
                duration_secs,
            },
        )
    }

    pub fn manifest_updated(
        session_id: impl Into<String>,
        content_hash: impl Into<String>,
        path: PathBuf,
    ) -> Self {
        Self::new(
            StreamEventKind::ManifestUpdated,
            session_id,
            content_hash,
            StreamEventPayload::Manifest { path },
        )
    }

    pub fn progress_update(
        session_id: impl Into<String>,
        content_hash: impl Into<String>,
        progress: ProgressSnapshot,
    ) -> Self {
        Self::new(
            StreamEventKind::ProgressUpdate,
            session_id,
            content_hash,
            StreamEventPayload::Progress(progress),
        )
    }

    pub fn stream_completed(
        session_id: impl Into<String>,
        content_hash: impl Into<String>,
        total_segments: u64,
    ) -> Self {
        Self::new(
            StreamEventKind::StreamCompleted,
            session_id,
            content_hash,
            StreamEventPayload::Completed { total_segments },
        )
    }

    pub fn stream_failed(
        session_id: impl Into<String>,
        content_hash: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            StreamEventKind::StreamFailed,
            session_id,
            content_hash,
            StreamEventPayload::Error {
                message: message.into(),
            },
        )
    }

    pub fn encoding_error(
        session_id: impl Into<String>,
        content_hash: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            StreamEventKind::EncodingError,
            session_id,
            content_hash,
            StreamEventPayload::Error {
                message: message.into(),
            },
        )
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Arc<dyn Fn(StreamEvent) -> HandlerFuture + Send + Sync>;

/// Default per-publish dispatch timeout.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// The in-process event bus.
pub struct SegmentEventBus {
    subscribers: RwLock<HashMap<StreamEventKind, Vec<(String, Handler)>>>,
    dispatch_timeout: Duration,
}

impl SegmentEventBus {
    pub fn new() -> Self {
        Self::with_timeout(DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(dispatch_timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            dispatch_timeout,
        }
    }

    /// Register a named subscriber for one event kind.
    pub fn subscribe<F, Fut>(&self, kind: StreamEventKind, name: impl Into<String>, handler: F)
    where
        F: Fn(StreamEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        self.subscribers
            .write()
            .entry(kind)
            .or_default()
            .push((name, handler));
    }

    /// Number of subscribers for a kind.
    pub fn subscriber_count(&self, kind: StreamEventKind) -> usize {
        self.subscribers
            .read()
            .get(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Dispatch an event to all subscribers of its kind.
    ///
    /// Subscribers run concurrently; each is given the dispatch timeout. A
    /// subscriber that exceeds it is logged and abandoned for this event,
    /// but the publisher itself is never aborted.
    pub async fn publish(&self, event: StreamEvent) {
        let handlers: Vec<(String, Handler)> = self
            .subscribers
            .read()
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(kind = ?event.kind, session_id = %event.session_id, "No subscribers for event");
            return;
        }

        let timeout = self.dispatch_timeout;
        let dispatches = handlers.into_iter().map(|(name, handler)| {
            let event = event.clone();
            let kind = event.kind;
            let session_id = event.session_id.clone();
            async move {
                if tokio::time::timeout(timeout, handler(event)).await.is_err() {
                    warn!(
                        subscriber = %name,
                        kind = ?kind,
                        session_id = %session_id,
                        "Event subscriber timed out"
                    );
                }
            }
        });

        futures::future::join_all(dispatches).await;
    }
}

impl Default for SegmentEventBus {
    fn default() -> Self {
        Self::new()
    }
}
