//! Cleanup service.
//!
//! A single periodic task that reconciles the three places state can live:
//! the database, the filesystem and the OS process table. Any two of them
//! can disagree after a crash, so each cycle runs three independent
//! reconciliations plus retention enforcement:
//!
//! 1. content-store size cap (emergency eviction, oldest access first)
//! 2. session-store retention and stale-session purging
//! 3. orphaned scratch directories on disk
//! 4. encoder processes unknown to the process registry
//!
//! Stores are consulted in a fixed order (content store, session store,
//! process registry) so concurrent cycles cannot deadlock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content::ContentStore;
use crate::database::repositories::SessionRepository;
use crate::registry::ProcessRegistry;
use crate::utils::fs as fsutil;
use crate::utils::scratch::parse_scratch_dir_name;
use crate::Result;

/// Eviction stops once usage is back under this fraction of the cap.
const EVICTION_TARGET_NUM: u64 = 9;
const EVICTION_TARGET_DEN: u64 = 10;

/// Entries touched within this window are never emergency-evicted.
fn eviction_min_age() -> chrono::Duration {
    chrono::Duration::hours(1)
}

/// Cleanup configuration.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    /// Content-store cap in bytes; 0 disables eviction.
    pub max_total_size_bytes: u64,
    /// Session-store retention in days.
    pub session_retention_days: i64,
    /// Age before an unknown scratch directory is removed.
    pub orphan_age: Duration,
    /// Age before an untouched running/queued session row is failed.
    pub stale_session_age: Duration,
    /// Directory containing session scratch directories.
    pub scratch_root: PathBuf,
    /// Binary names treated as encoder processes in the OS scan.
    pub encoder_binaries: Vec<String>,
}

/// What one cleanup cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub evicted_entries: usize,
    pub evicted_bytes: u64,
    pub expired_sessions: u64,
    pub stale_sessions: usize,
    pub orphan_dirs_removed: usize,
    pub orphan_processes_killed: usize,
}

/// The periodic reconciliation service.
pub struct CleanupService {
    config: CleanupConfig,
    content_store: Arc<ContentStore>,
    sessions: Arc<dyn SessionRepository>,
    registry: Arc<ProcessRegistry>,
}

impl CleanupService {
    pub fn new(
        config: CleanupConfig,
        content_store: Arc<ContentStore>,
        sessions: Arc<dyn SessionRepository>,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        Self {
            config,
            content_store,
            sessions,
            registry,
        }
    }

    /// Start the periodic loop.
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let service = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Cleanup service shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match service.run_cycle().await {
                            Ok(report) => {
                                info!(
                                    evicted = report.evicted_entries,
                                    expired = report.expired_sessions,
                                    stale = report.stale_sessions,
                                    orphan_dirs = report.orphan_dirs_removed,
                                    orphan_procs = report.orphan_processes_killed,
                                    "Cleanup cycle complete"
                                );
                            }
                            Err(e) => warn!(error = %e, "Cleanup cycle failed"),
                        }
                    }
                }
            }
        })
    }

    /// Run one full reconciliation cycle.
    pub async fn run_cycle(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        self.enforce_size_cap(&mut report).await;
        self.evict_expired(&mut report).await;
        self.purge_sessions(&mut report).await?;
        self.remove_orphan_dirs(&mut report).await;
        self.reap_unregistered_processes(&mut report).await;

        Ok(report)
    }

    /// Emergency eviction: when total size exceeds the cap, delete oldest
    /// by last access until usage is under 90% of the cap. Entries touched
    /// within the past hour are skipped.
    async fn enforce_size_cap(&self, report: &mut CleanupReport) {
        let cap = self.config.max_total_size_bytes;
        if cap == 0 {
            return;
        }
        let mut total = self.content_store.total_size();
        if total <= cap {
            return;
        }

        let target = cap / EVICTION_TARGET_DEN * EVICTION_TARGET_NUM;
        warn!(
            total_bytes = total,
            cap_bytes = cap,
            "Content store above size cap, evicting"
        );

        let now = Utc::now();
        for meta in self.content_store.list_by_last_accessed() {
            if total <= target {
                break;
            }
            let recently_touched = now - meta.last_accessed < eviction_min_age()
                || meta
                    .streaming
                    .as_ref()
                    .and_then(|s| s.last_segment_time)
                    .is_some_and(|t| now - t < eviction_min_age());
            if recently_touched {
                continue;
            }

            match self.content_store.delete(&meta.content_hash).await {
                Ok(()) => {
                    total = total.saturating_sub(meta.size_bytes);
                    report.evicted_entries += 1;
                    report.evicted_bytes += meta.size_bytes;
                }
                Err(e) => warn!(hash = %meta.content_hash, error = %e, "Eviction failed"),
            }
        }
    }

    /// Delete content entries past their retention window.
    async fn evict_expired(&self, report: &mut CleanupReport) {
        for meta in self.content_store.list_expired() {
            match self.content_store.delete(&meta.content_hash).await {
                Ok(()) => {
                    report.evicted_entries += 1;
                    report.evicted_bytes += meta.size_bytes;
                    info!(hash = %meta.content_hash, "Expired content removed");
                }
                Err(e) => warn!(hash = %meta.content_hash, error = %e, "Expiry removal failed"),
            }
        }
    }

    /// Purge expired session rows; fail stale running/queued rows and kill
    /// whatever processes they still own.
    async fn purge_sessions(&self, report: &mut CleanupReport) -> Result<()> {
        report.expired_sessions = self
            .sessions
            .cleanup_expired(self.config.session_retention_days)
            .await?;

        let stale = self
            .sessions
            .cleanup_stale(self.config.stale_session_age.as_secs() as i64)
            .await?;
        for session_id in &stale {
            warn!(session_id = %session_id, "Stale session failed by cleanup");
            self.registry.stop_session(session_id).await;
        }
        report.stale_sessions = stale.len();
        Ok(())
    }

    /// Remove scratch directories whose session is unknown (after an age
    /// threshold) or already terminal (leftover partial output).
    async fn remove_orphan_dirs(&self, report: &mut CleanupReport) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.scratch_root).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((_, _, session_id)) = parse_scratch_dir_name(name) else {
                continue;
            };

            let remove = match self.sessions.find(&session_id).await {
                Ok(Some(session)) => session.session_status().is_terminal(),
                Ok(None) => {
                    let age = fsutil::modified_age(&path).await.unwrap_or_default();
                    age > self.config.orphan_age
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Orphan check failed");
                    false
                }
            };

            if remove {
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => {
                        info!(path = %path.display(), session_id = %session_id, "Orphaned scratch directory removed");
                        report.orphan_dirs_removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphan directory"),
                }
            }
        }
    }

    /// Scan the OS process table for encoder processes the registry does
    /// not know about; kill those whose session is unknown or terminal.
    async fn reap_unregistered_processes(&self, report: &mut CleanupReport) {
        let scratch_root = self.config.scratch_root.clone();
        let binaries = self.config.encoder_binaries.clone();

        // sysinfo refresh walks /proc; keep it off the async runtime.
        let candidates = tokio::task::spawn_blocking(move || {
            let mut system = sysinfo::System::new();
            system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

            let mut found = Vec::new();
            for (pid, process) in system.processes() {
                let name = process.name().to_string_lossy().to_string();
                if !binaries.iter().any(|b| name.contains(b.as_str())) {
                    continue;
                }
                let cmd: Vec<String> = process
                    .cmd()
                    .iter()
                    .map(|a| a.to_string_lossy().to_string())
                    .collect();
                // Only consider processes working under our scratch root.
                if !cmd
                    .iter()
                    .any(|a| a.contains(&*scratch_root.to_string_lossy()))
                {
                    continue;
                }
                found.push((pid.as_u32(), cmd));
            }
            found
        })
        .await
        .unwrap_or_default();

        for (pid, cmd) in candidates {
            if self.registry.contains(pid) {
                continue;
            }

            let session_id = session_id_from_cmdline(&cmd);
            let kill = match &session_id {
                Some(id) => match self.sessions.find(id).await {
                    Ok(Some(session)) => session.session_status().is_terminal(),
                    Ok(None) => true,
                    Err(_) => false,
                },
                // An encoder under our scratch root that we cannot map to
                // any session is exactly the crash leftover this scan is
                // hunting.
                None => true,
            };

            if kill {
                warn!(pid, session_id = ?session_id, "Killing unregistered encoder process");
                let _ = process_utils::terminate_group(pid);
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = process_utils::kill_group(pid);
                report.orphan_processes_killed += 1;

                if let Some(id) = session_id
                    && let Ok(Some(session)) = self.sessions.find(&id).await
                    && !session.session_status().is_terminal()
                {
                    let _ = self
                        .sessions
                        .update_status(
                            &id,
                            crate::domain::SessionStatus::Failed,
                            Some("orphaned encoder process reaped"),
                        )
                        .await;
                }
            }
        }
    }
}

/// Extract a session id from an encoder command line by locating a scratch
/// directory path among its arguments.
fn session_id_from_cmdline(args: &[String]) -> Option<String> {
    for arg in args {
        for component in Path::new(arg).components() {
            if let std::path::Component::Normal(part) = component
                && let Some(name) = part.to_str()
                && let Some((_, _, session_id)) = parse_scratch_dir_name(name)
            {
                return Some(session_id);
            }
        }
    }
    None
}
