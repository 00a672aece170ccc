//! Session coordinator.
//!
//! The sole public entry point for transcode work. The coordinator owns no
//! state of its own beyond wiring: sessions live in the session store,
//! artifacts in the content store, processes in the registry. It validates
//! state transitions, deduplicates requests by content hash, enforces
//! admission, supervises the per-session runner task and publishes the
//! terminal bus events only after the terminal database write committed.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use abr::QualityRung;

use crate::content::{
    ContentMetadata, ContentStore, EncodingParams, SegmentIngestInfo, StreamingInfo,
    StreamingStatus, derive_content_hash,
};
use crate::database::models::TranscodeSessionDbModel;
use crate::database::repositories::SessionRepository;
use crate::domain::{SessionStatus, TranscodeRequest};
use crate::encoder::probe;
use crate::encoder::provider::ProviderCatalog;
use crate::encoder::runner::{PipelineRunner, RunContext, RunOutcome};
use crate::events::{SegmentEventBus, StreamEvent, StreamEventKind, StreamEventPayload};
use crate::health::HealthMonitor;
use crate::registry::ProcessRegistry;
use crate::utils::scratch::scratch_dir_name;
use crate::{Error, Result};

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_concurrent: usize,
    pub segment_duration_secs: u32,
    pub scratch_root: std::path::PathBuf,
    pub ffprobe_path: String,
    pub cpu_count: usize,
}

/// Result of a create-session call.
#[derive(Debug, Clone)]
pub enum CreateSessionResult {
    /// The artifact already exists; nothing was launched.
    CacheHit {
        content_hash: String,
        metadata: ContentMetadata,
        /// The most recent session that produced the artifact, if still
        /// recorded.
        session: Option<TranscodeSessionDbModel>,
    },
    /// An identical request is already encoding; attach to it.
    InFlight { session: TranscodeSessionDbModel },
    /// A new session was created and is starting.
    Created { session: TranscodeSessionDbModel },
}

impl CreateSessionResult {
    pub fn content_hash(&self) -> &str {
        match self {
            Self::CacheHit { content_hash, .. } => content_hash,
            Self::InFlight { session } | Self::Created { session } => {
                session.content_hash.as_deref().unwrap_or_default()
            }
        }
    }
}

struct ActiveSession {
    cancel_token: CancellationToken,
    content_hash: String,
}

/// The transcoding façade.
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    sessions: Arc<dyn SessionRepository>,
    content_store: Arc<ContentStore>,
    registry: Arc<ProcessRegistry>,
    bus: Arc<SegmentEventBus>,
    health: Arc<HealthMonitor>,
    runner: Arc<PipelineRunner>,
    catalog: Arc<ProviderCatalog>,
    admission: Arc<Semaphore>,
    /// content hash → session id of the encode currently producing it.
    in_flight: Arc<DashMap<String, String>>,
    /// session id → live run handle.
    active: Arc<DashMap<String, ActiveSession>>,
}

impl SessionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        sessions: Arc<dyn SessionRepository>,
        content_store: Arc<ContentStore>,
        registry: Arc<ProcessRegistry>,
        bus: Arc<SegmentEventBus>,
        health: Arc<HealthMonitor>,
        runner: Arc<PipelineRunner>,
        catalog: Arc<ProviderCatalog>,
    ) -> Arc<Self> {
        let admission = Arc::new(Semaphore::new(config.max_concurrent));
        let coordinator = Arc::new(Self {
            config,
            sessions,
            content_store,
            registry,
            bus,
            health,
            runner,
            catalog,
            admission,
            in_flight: Arc::new(DashMap::new()),
            active: Arc::new(DashMap::new()),
        });
        coordinator.wire_event_handlers();
        coordinator
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn content_store(&self) -> &Arc<ContentStore> {
        &self.content_store
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Number of sessions currently running under this coordinator.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Mark sessions left over from a previous process as failed.
    pub async fn recover_on_startup(&self) -> Result<u64> {
        let recovered = self
            .sessions
            .fail_non_terminal("recovered after restart")
            .await?;
        if recovered > 0 {
            warn!(count = recovered, "Recovered orphaned sessions from previous run");
        }
        Ok(recovered)
    }

    /// Accept a transcode request.
    pub async fn create_session(&self, request: TranscodeRequest) -> Result<CreateSessionResult> {
        request.validate()?;
        let hash = derive_content_hash(
            &request.media_id,
            request.container,
            request.quality,
            request.resolution,
        );

        // Finished artifact on disk: serve it, launch nothing.
        if let Some(metadata) = self.cache_lookup(&hash).await? {
            info!(hash = %hash, media_id = %request.media_id, "Content cache hit");
            let session = self
                .sessions
                .list_by_content_hash(&hash)
                .await?
                .into_iter()
                .find(|s| s.session_status() == SessionStatus::Complete);
            return Ok(CreateSessionResult::CacheHit {
                content_hash: hash,
                metadata,
                session,
            });
        }

        let provider = self.catalog.select(&request);
        let mut model = TranscodeSessionDbModel::from_request(&request, provider.kind());
        model.content_hash = Some(hash.clone());

        // Deduplicate concurrent identical requests: exactly one encode per
        // hash may be in flight.
        let prior = match self.in_flight.entry(hash.clone()) {
            Entry::Occupied(occupied) => Some(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(model.id.clone());
                None
            }
        };
        if let Some(existing_id) = prior {
            if let Some(existing) = self.sessions.find(&existing_id).await?
                && !existing.session_status().is_terminal()
            {
                info!(hash = %hash, session_id = %existing_id, "Attached to in-flight encode");
                return Ok(CreateSessionResult::InFlight { session: existing });
            }
            // The mapping was stale (crashed or failed run); take it over.
            self.in_flight.insert(hash.clone(), model.id.clone());
        }

        self.sessions.create(&model).await?;

        // Admission control: reject when the engine is saturated.
        let permit = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.sessions
                    .update_status(&model.id, SessionStatus::Failed, Some("resource exhausted"))
                    .await?;
                self.release_in_flight(&hash, &model.id);
                return Err(Error::resource_exhausted(format!(
                    "maximum of {} concurrent sessions reached",
                    self.config.max_concurrent
                )));
            }
        };

        self.sessions
            .update_status(&model.id, SessionStatus::Starting, None)
            .await?;
        model.status = SessionStatus::Starting.as_str().to_string();

        self.spawn_encoding(model.clone(), request, hash, permit);
        Ok(CreateSessionResult::Created { session: model })
    }

    /// Stop a session: cancel its runner, kill its processes, leave
    /// partial output for the cleanup sweep.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let session = self.sessions.get(session_id).await?;
        let from = session.session_status();
        if !from.can_transition(SessionStatus::Stopped) {
            return Err(Error::invalid_transition(
                from.as_str(),
                SessionStatus::Stopped.as_str(),
            ));
        }

        // Durable first: a client polling right after DELETE must see
        // `stopped`, never a rewind.
        self.sessions
            .update_status(session_id, SessionStatus::Stopped, None)
            .await?;

        if let Some((_, handle)) = self.active.remove(session_id) {
            handle.cancel_token.cancel();
            self.release_in_flight(&handle.content_hash, session_id);
        }
        self.registry.stop_session(session_id).await;
        self.health.unregister_session(session_id);
        info!(session_id, "Session stopped");
        Ok(())
    }

    /// Current progress for a session.
    pub async fn progress(&self, session_id: &str) -> Result<TranscodeSessionDbModel> {
        self.sessions.get(session_id).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<TranscodeSessionDbModel> {
        self.sessions.get(session_id).await
    }

    pub async fn list_sessions(&self, limit: i64) -> Result<Vec<TranscodeSessionDbModel>> {
        self.sessions.list_recent(limit).await
    }

    pub async fn list_active_sessions(&self) -> Result<Vec<TranscodeSessionDbModel>> {
        self.sessions.list_active().await
    }

    /// Stop everything in preparation for shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for session_id in ids {
            if let Err(e) = self.stop(&session_id).await {
                warn!(session_id = %session_id, error = %e, "Failed to stop session during shutdown");
            }
        }
    }

    /// Whether a cached artifact can satisfy a request for `hash`.
    async fn cache_lookup(&self, hash: &str) -> Result<Option<ContentMetadata>> {
        if !self.content_store.contains(hash) {
            return Ok(None);
        }
        let (metadata, _) = self.content_store.get(hash).await?;
        match metadata.streaming.as_ref().map(|s| s.status) {
            // A failed stream is not servable; drop it so the encode can
            // be retried under the same hash.
            Some(StreamingStatus::Failed) => {
                warn!(hash, "Removing failed streaming entry before re-encode");
                self.content_store.delete(hash).await?;
                Ok(None)
            }
            // An active stream is handled by the in-flight dedup path so
            // the caller gets the live session; an abandoned one (no
            // in-flight encode) is a crash leftover and is dropped.
            Some(StreamingStatus::Active) => {
                if !self.in_flight.contains_key(hash) {
                    warn!(hash, "Removing abandoned streaming entry");
                    self.content_store.delete(hash).await?;
                }
                Ok(None)
            }
            _ => Ok(Some(metadata)),
        }
    }

    fn release_in_flight(&self, hash: &str, session_id: &str) {
        self.in_flight
            .remove_if(hash, |_, owner| owner == session_id);
    }

    /// Launch the background task that owns this session's encode.
    fn spawn_encoding(
        &self,
        session: TranscodeSessionDbModel,
        request: TranscodeRequest,
        hash: String,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let coordinator = CoordinatorHandles {
            sessions: Arc::clone(&self.sessions),
            content_store: Arc::clone(&self.content_store),
            registry: Arc::clone(&self.registry),
            bus: Arc::clone(&self.bus),
            health: Arc::clone(&self.health),
            runner: Arc::clone(&self.runner),
            catalog: Arc::clone(&self.catalog),
            in_flight: Arc::clone(&self.in_flight),
            active: Arc::clone(&self.active),
            config: self.config.clone(),
        };

        tokio::spawn(async move {
            let session_id = session.id.clone();
            coordinator.run_session(session, request, hash).await;
            // Hold the admission permit for the whole run.
            drop(permit);
            debug!(session_id = %session_id, "Session task finished");
        });
    }

    /// Wire the standing event-bus subscribers: segment ingestion into the
    /// content store, progress persistence and health tracking.
    fn wire_event_handlers(self: &Arc<Self>) {
        let store = Arc::clone(&self.content_store);
        self.bus.subscribe(
            StreamEventKind::SegmentReady,
            "content-store-ingest",
            move |event| {
                let store = Arc::clone(&store);
                async move {
                    let StreamEventPayload::Segment { path, duration_secs } = event.payload else {
                        return;
                    };
                    let info = SegmentIngestInfo { duration_secs };
                    if let Err(e) = store.add_segment(&event.content_hash, &path, info).await {
                        warn!(
                            hash = %event.content_hash,
                            path = %path.display(),
                            error = %e,
                            "Segment ingest failed"
                        );
                    }
                }
            },
        );

        let store = Arc::clone(&self.content_store);
        self.bus.subscribe(
            StreamEventKind::ManifestUpdated,
            "content-store-manifest",
            move |event| {
                let store = Arc::clone(&store);
                async move {
                    let StreamEventPayload::Manifest { path } = event.payload else {
                        return;
                    };
                    if let Err(e) = store
                        .add_segment(&event.content_hash, &path, SegmentIngestInfo::default())
                        .await
                    {
                        warn!(hash = %event.content_hash, error = %e, "Manifest ingest failed");
                    }
                }
            },
        );

        let health = Arc::clone(&self.health);
        let segments_health = Arc::clone(&self.health);
        self.bus.subscribe(
            StreamEventKind::SegmentReady,
            "health-segments",
            move |event| {
                let health = Arc::clone(&segments_health);
                async move {
                    health.segment_produced(&event.session_id, 0.0, 0);
                }
            },
        );

        let sessions = Arc::clone(&self.sessions);
        self.bus.subscribe(
            StreamEventKind::ProgressUpdate,
            "progress-persist",
            move |event| {
                let sessions = Arc::clone(&sessions);
                let health = Arc::clone(&health);
                async move {
                    let StreamEventPayload::Progress(progress) = event.payload else {
                        return;
                    };
                    health.progress(&event.session_id, progress.fps);

                    // First observable progress moves starting → running.
                    if let Ok(Some(session)) = sessions.find(&event.session_id).await
                        && session.session_status() == SessionStatus::Starting
                        && let Err(e) = sessions
                            .update_status(&event.session_id, SessionStatus::Running, None)
                            .await
                    {
                        warn!(session_id = %event.session_id, error = %e, "Failed to mark running");
                    }
                    if let Err(e) = sessions.update_progress(&event.session_id, &progress).await {
                        warn!(session_id = %event.session_id, error = %e, "Failed to persist progress");
                    }
                }
            },
        );

        let health = Arc::clone(&self.health);
        self.bus.subscribe(
            StreamEventKind::EncodingError,
            "health-errors",
            move |event| {
                let health = Arc::clone(&health);
                async move {
                    if let StreamEventPayload::Error { message } = event.payload {
                        health.segment_failed(&event.session_id, &message);
                    }
                }
            },
        );
    }
}

/// The Arcs a session task needs, detached from the coordinator itself.
struct CoordinatorHandles {
    sessions: Arc<dyn SessionRepository>,
    content_store: Arc<ContentStore>,
    registry: Arc<ProcessRegistry>,
    bus: Arc<SegmentEventBus>,
    health: Arc<HealthMonitor>,
    runner: Arc<PipelineRunner>,
    catalog: Arc<ProviderCatalog>,
    in_flight: Arc<DashMap<String, String>>,
    active: Arc<DashMap<String, ActiveSession>>,
    config: CoordinatorConfig,
}

impl CoordinatorHandles {
    async fn run_session(
        &self,
        session: TranscodeSessionDbModel,
        request: TranscodeRequest,
        hash: String,
    ) {
        let session_id = session.id.clone();
        let provider_kind = session
            .provider_kind()
            .unwrap_or(crate::domain::ProviderKind::SoftwareEncoder);
        let scratch_dir = self
            .config
            .scratch_root
            .join(scratch_dir_name(request.container, provider_kind, &session_id));

        if let Err(e) = self
            .sessions
            .update_directory(&session_id, &scratch_dir.to_string_lossy())
            .await
        {
            warn!(session_id = %session_id, error = %e, "Failed to record scratch directory");
        }

        // Probe the source for duration (percent-complete) and resolution
        // (ladder derivation) before building the plan.
        let mut source = probe::probe_source(&self.config.ffprobe_path, &request.input_path).await;
        if let Some(total) = source.duration_secs {
            source.duration_secs = Some((total - request.seek_secs).max(0.0));
        }

        let Some(provider) = self.catalog.get(provider_kind) else {
            self.fail_session(&session_id, &hash, "provider not configured").await;
            return;
        };
        let plan = match provider.build_plan(
            &request,
            &scratch_dir,
            &source,
            self.config.segment_duration_secs,
            self.config.cpu_count,
        ) {
            Ok(plan) => plan,
            Err(e) => {
                self.fail_session(&session_id, &hash, &e.to_string()).await;
                return;
            }
        };

        // Segmented output is published live: create the streaming entry
        // up front so segment events have somewhere to land.
        if request.container.is_streaming() {
            let metadata = streaming_metadata(
                &hash,
                &request,
                plan.ladder().to_vec(),
                self.config.segment_duration_secs,
            );
            if let Err(e) = self.content_store.create_streaming(metadata).await {
                self.fail_session(&session_id, &hash, &e.to_string()).await;
                return;
            }
        }

        let cancel_token = CancellationToken::new();
        self.active.insert(
            session_id.clone(),
            ActiveSession {
                cancel_token: cancel_token.clone(),
                content_hash: hash.clone(),
            },
        );

        // A stop can land between admission and launch; once the handle is
        // registered, re-check before spawning anything.
        match self.sessions.find(&session_id).await {
            Ok(Some(current)) if current.session_status().is_terminal() => {
                self.active.remove(&session_id);
                self.release_in_flight(&hash, &session_id);
                return;
            }
            _ => {}
        }
        self.health.register_session(&session_id);

        let ctx = RunContext {
            session_id: session_id.clone(),
            content_hash: hash.clone(),
            provider: provider_kind,
            container: request.container,
            scratch_dir: scratch_dir.clone(),
            total_duration_secs: source.duration_secs,
            cancel_token,
        };

        let outcome = self.runner.run(&ctx, plan).await;
        self.active.remove(&session_id);
        self.health.unregister_session(&session_id);

        match outcome {
            Ok(RunOutcome::Completed) => {
                self.complete_session(&session_id, &request, &hash, &scratch_dir)
                    .await;
            }
            Ok(RunOutcome::Stopped) => {
                // The stop path already wrote the terminal state; make sure
                // a cancellation from elsewhere (shutdown) is recorded too.
                self.ensure_terminal(&session_id, SessionStatus::Stopped, None)
                    .await;
                if request.container.is_streaming() {
                    let _ = self
                        .content_store
                        .finalize_streaming(&hash, StreamingStatus::Failed)
                        .await;
                }
                self.release_in_flight(&hash, &session_id);
            }
            Ok(RunOutcome::Failed {
                exit_code,
                stderr_tail,
            }) => {
                let message = Error::EncoderFailed {
                    exit_code,
                    stderr_tail,
                }
                .to_string();
                self.fail_session(&session_id, &hash, &message).await;
            }
            Err(e) => {
                self.fail_session(&session_id, &hash, &e.to_string()).await;
            }
        }
    }

    /// Ingest the finished output and mark the session complete. The
    /// database write commits before `stream_completed` is published.
    async fn complete_session(
        &self,
        session_id: &str,
        request: &TranscodeRequest,
        hash: &str,
        scratch_dir: &std::path::Path,
    ) {
        // A fast encode may finish before any progress tick; the state
        // graph requires passing through running.
        if let Ok(Some(session)) = self.sessions.find(session_id).await
            && session.session_status() == SessionStatus::Starting
            && let Err(e) = self
                .sessions
                .update_status(session_id, SessionStatus::Running, None)
                .await
        {
            warn!(session_id, error = %e, "Failed to mark running before completion");
        }

        let final_dir = if request.container.is_streaming() {
            // Segments were ingested live; close the entry out and drop
            // whatever intermediates remain in the scratch dir.
            if let Err(e) = self
                .content_store
                .finalize_streaming(hash, StreamingStatus::Completed)
                .await
            {
                self.fail_session(session_id, hash, &e.to_string()).await;
                return;
            }
            let _ = tokio::fs::remove_dir_all(scratch_dir).await;
            self.content_store.content_dir(hash)
        } else {
            let metadata = flat_metadata(hash, request);
            match self.content_store.store(hash, scratch_dir, metadata).await {
                Ok(dir) => dir,
                Err(e) => {
                    self.fail_session(session_id, hash, &e.to_string()).await;
                    return;
                }
            }
        };

        let total_segments = self
            .content_store
            .get(hash)
            .await
            .ok()
            .and_then(|(m, _)| m.streaming.map(|s| s.segment_count))
            .unwrap_or(0);

        if let Err(e) = self
            .sessions
            .update_result(
                session_id,
                SessionStatus::Complete,
                hash,
                &final_dir.to_string_lossy(),
            )
            .await
        {
            error!(session_id, error = %e, "Failed to record completion");
            self.fail_session(session_id, hash, &e.to_string()).await;
            return;
        }
        self.release_in_flight(hash, session_id);

        info!(session_id, hash, "Session complete");
        self.bus
            .publish(StreamEvent::stream_completed(session_id, hash, total_segments))
            .await;
    }

    /// Record a failure and publish `stream_failed` after the write.
    async fn fail_session(&self, session_id: &str, hash: &str, message: &str) {
        error!(session_id, error = %message, "Session failed");
        self.ensure_terminal(session_id, SessionStatus::Failed, Some(message))
            .await;
        self.registry.stop_session(session_id).await;
        self.health.unregister_session(session_id);
        self.release_in_flight(hash, session_id);

        if self.content_store.contains(hash) {
            let _ = self
                .content_store
                .finalize_streaming(hash, StreamingStatus::Failed)
                .await;
        }

        self.bus
            .publish(StreamEvent::stream_failed(session_id, hash, message))
            .await;
    }

    /// Write a terminal status unless the row already carries one.
    async fn ensure_terminal(
        &self,
        session_id: &str,
        status: SessionStatus,
        message: Option<&str>,
    ) {
        match self.sessions.find(session_id).await {
            Ok(Some(session)) if !session.session_status().is_terminal() => {
                if let Err(e) = self.sessions.update_status(session_id, status, message).await {
                    error!(session_id, error = %e, "Failed to write terminal status");
                }
            }
            Ok(_) => {}
            Err(e) => error!(session_id, error = %e, "Failed to load session for terminal write"),
        }
    }

    fn release_in_flight(&self, hash: &str, session_id: &str) {
        self.in_flight
            .remove_if(hash, |_, owner| owner == session_id);
    }
}

/// Metadata for a live streaming entry.
fn streaming_metadata(
    hash: &str,
    request: &TranscodeRequest,
    ladder: Vec<QualityRung>,
    segment_duration_secs: u32,
) -> ContentMetadata {
    let top = ladder.first();
    ContentMetadata::new(hash, &request.media_id, request.container.as_str())
        .with_encoding(EncodingParams {
            codec: request.codec.clone().unwrap_or_else(|| "h264".to_string()),
            video_bitrate_kbps: top.map(|r| r.video_bitrate_kbps).filter(|b| *b > 0),
            resolution: top.map(|r| r.resolution),
        })
        .with_streaming(StreamingInfo::active(
            segment_duration_secs as f64,
            ladder,
        ))
}

/// Metadata for a flat (mp4/mkv) artifact.
fn flat_metadata(hash: &str, request: &TranscodeRequest) -> ContentMetadata {
    ContentMetadata::new(hash, &request.media_id, request.container.as_str()).with_encoding(
        EncodingParams {
            codec: request.codec.clone().unwrap_or_else(|| "h264".to_string()),
            video_bitrate_kbps: None,
            resolution: request.resolution,
        },
    )
}
