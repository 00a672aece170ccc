//! Service container for dependency injection.
//!
//! The ServiceContainer wires every component together explicitly: the
//! coordinator receives the process registry, content store, session store,
//! event bus and health monitor by reference at construction. No
//! package-level singletons exist anywhere in the engine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::api::{ApiServer, ApiServerConfig, AppState};
use crate::cleanup::{CleanupConfig, CleanupService};
use crate::config::Settings;
use crate::content::ContentStore;
use crate::coordinator::{CoordinatorConfig, SessionCoordinator};
use crate::database::repositories::{SessionRepository, SqlxSessionRepository};
use crate::encoder::provider::ProviderCatalog;
use crate::encoder::runner::{PipelineRunner, RunnerConfig};
use crate::events::SegmentEventBus;
use crate::health::{HealthMonitor, HealthMonitorConfig};
use crate::registry::ProcessRegistry;

/// Deadline for killing tracked processes at shutdown.
const SHUTDOWN_KILL_DEADLINE: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    /// Application settings.
    pub settings: Settings,
    /// Session repository.
    pub sessions: Arc<dyn SessionRepository>,
    /// Content-addressable store.
    pub content_store: Arc<ContentStore>,
    /// Process registry.
    pub registry: Arc<ProcessRegistry>,
    /// Segment event bus.
    pub bus: Arc<SegmentEventBus>,
    /// Health monitor.
    pub health_monitor: Arc<HealthMonitor>,
    /// Session coordinator (the public façade).
    pub coordinator: Arc<SessionCoordinator>,
    /// Cleanup service.
    pub cleanup: Arc<CleanupService>,
    /// API server, set once started.
    api_server: Mutex<Option<Arc<ApiServer>>>,
    /// Background task handles.
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create a new service container with the given pool and settings.
    pub async fn new(pool: SqlitePool, settings: Settings) -> Result<Self> {
        info!("Initializing service container");

        let sessions: Arc<dyn SessionRepository> =
            Arc::new(SqlxSessionRepository::new(pool.clone()));

        let content_store = Arc::new(
            ContentStore::open(
                settings.content_root(),
                settings.metadata_root(),
                settings.retention_days,
            )
            .await?,
        );

        let registry = Arc::new(ProcessRegistry::new(settings.kill_grace_period));
        let bus = Arc::new(SegmentEventBus::new());
        let health_monitor = Arc::new(HealthMonitor::new(HealthMonitorConfig::default()));

        let runner = Arc::new(PipelineRunner::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            settings.ffmpeg_path.clone(),
            settings.packager_path.clone(),
            RunnerConfig {
                kill_grace: settings.kill_grace_period,
                progress_interval: settings.progress_interval,
                ..Default::default()
            },
        ));

        let catalog = Arc::new(ProviderCatalog::new(
            &settings.ffmpeg_path,
            settings.packager_path.clone(),
        ));

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let coordinator = SessionCoordinator::new(
            CoordinatorConfig {
                max_concurrent: settings.max_concurrent_sessions,
                segment_duration_secs: settings.segment_duration_secs,
                scratch_root: settings.scratch_root().to_path_buf(),
                ffprobe_path: settings.ffprobe_path.clone(),
                cpu_count,
            },
            Arc::clone(&sessions),
            Arc::clone(&content_store),
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&health_monitor),
            runner,
            catalog,
        );

        let cleanup = Arc::new(CleanupService::new(
            CleanupConfig {
                interval: settings.cleanup_interval,
                max_total_size_bytes: settings.max_total_size_bytes,
                session_retention_days: settings.retention_days,
                orphan_age: settings.orphan_age,
                stale_session_age: settings.stale_session_age,
                scratch_root: settings.scratch_root().to_path_buf(),
                encoder_binaries: encoder_binary_names(&settings),
            },
            Arc::clone(&content_store),
            Arc::clone(&sessions),
            Arc::clone(&registry),
        ));

        Ok(Self {
            pool,
            settings,
            sessions,
            content_store,
            registry,
            bus,
            health_monitor,
            coordinator,
            cleanup,
            api_server: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Get the shared cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Run startup recovery and launch the background services.
    pub async fn initialize(&self) -> Result<()> {
        self.coordinator.recover_on_startup().await?;

        let flusher = self
            .content_store
            .start_access_flusher(self.cancellation_token.clone());
        let cleaner = Arc::clone(&self.cleanup).start(self.cancellation_token.clone());

        let mut tasks = self.tasks.lock();
        tasks.push(flusher);
        tasks.push(cleaner);

        info!("Services initialized");
        Ok(())
    }

    /// Start the API server in the background.
    pub async fn start_api_server(&self) -> Result<()> {
        let state = AppState::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.content_store),
            Arc::clone(&self.sessions),
            Arc::clone(&self.health_monitor),
        );
        let server = Arc::new(ApiServer::with_state(
            ApiServerConfig::from_settings(&self.settings),
            state,
        ));

        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                tracing::error!("API server error: {}", e);
            }
        });

        self.tasks.lock().push(handle);
        *self.api_server.lock() = Some(server);
        Ok(())
    }

    /// Graceful shutdown: stop sessions, kill processes, drain tasks.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down service container");

        // Stop accepting work first.
        if let Some(server) = self.api_server.lock().clone() {
            server.shutdown();
        }

        // Stop running sessions; their terminal writes commit here.
        self.coordinator.shutdown().await;
        self.registry.shutdown(SHUTDOWN_KILL_DEADLINE).await;

        // Cancel background tasks; the access flusher drains its queue
        // before exiting.
        self.cancellation_token.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .is_err()
            {
                warn!("Background task did not stop within deadline");
            }
        }

        self.pool.close().await;
        info!("Service container shut down");
        Ok(())
    }
}

/// Binary names the cleanup process scan treats as encoders.
fn encoder_binary_names(settings: &Settings) -> Vec<String> {
    let base_name = |path: &str| {
        std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string())
    };

    let mut names = vec![base_name(&settings.ffmpeg_path)];
    if let Some(packager) = &settings.packager_path {
        names.push(base_name(packager));
    }
    names
}
