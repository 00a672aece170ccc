//! Process registry.
//!
//! Tracks every external encoder process the engine has spawned, keyed by
//! pid. The registry is the single authority on "which processes are ours";
//! the cleanup service reconciles the OS process table against it.
//!
//! Records live in memory only. The table is rebuilt empty on restart,
//! which is exactly why startup recovery fails any session rows that claim
//! to be running.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::ProviderKind;
use crate::{Error, Result};

/// A tracked external process.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: u32,
    pub session_id: String,
    pub provider: ProviderKind,
    /// Rendered command line, for diagnostics and orphan matching.
    pub command: String,
    pub started_at: DateTime<Utc>,
}

/// Registry of live encoder processes.
///
/// The internal lock is only ever held for map access, never across a
/// signal, wait or any other suspension point.
pub struct ProcessRegistry {
    processes: RwLock<HashMap<u32, ProcessRecord>>,
    kill_grace: Duration,
}

impl ProcessRegistry {
    pub fn new(kill_grace: Duration) -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            kill_grace,
        }
    }

    /// Track a newly spawned process. Fails if the pid is already present.
    pub fn register(
        &self,
        pid: u32,
        session_id: impl Into<String>,
        provider: ProviderKind,
        command: impl Into<String>,
    ) -> Result<()> {
        let record = ProcessRecord {
            pid,
            session_id: session_id.into(),
            provider,
            command: command.into(),
            started_at: Utc::now(),
        };

        let mut processes = self.processes.write();
        if processes.contains_key(&pid) {
            return Err(Error::internal(format!("pid {pid} is already registered")));
        }
        debug!(pid, session_id = %record.session_id, "Process registered");
        processes.insert(pid, record);
        Ok(())
    }

    /// Remove a record. Idempotent.
    pub fn unregister(&self, pid: u32) {
        if self.processes.write().remove(&pid).is_some() {
            debug!(pid, "Process unregistered");
        }
    }

    pub fn get(&self, pid: u32) -> Option<ProcessRecord> {
        self.processes.read().get(&pid).cloned()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.read().contains_key(&pid)
    }

    /// All records for a session.
    pub fn processes_by_session(&self, session_id: &str) -> Vec<ProcessRecord> {
        self.processes
            .read()
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn list(&self) -> Vec<ProcessRecord> {
        self.processes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.read().is_empty()
    }

    /// Stop a process group: SIGTERM, wait up to the grace period, SIGKILL.
    ///
    /// A pid that is already gone is not an error. The record is removed in
    /// every case.
    pub async fn stop_process(&self, pid: u32) -> Result<()> {
        let known = self.contains(pid);
        if !known {
            debug!(pid, "Stop requested for untracked pid");
        }

        stop_group(pid, self.kill_grace).await;
        self.unregister(pid);
        Ok(())
    }

    /// Stop every process belonging to a session.
    pub async fn stop_session(&self, session_id: &str) -> usize {
        let records = self.processes_by_session(session_id);
        let count = records.len();
        for record in records {
            if let Err(e) = self.stop_process(record.pid).await {
                warn!(pid = record.pid, error = %e, "Failed to stop session process");
            }
        }
        count
    }

    /// Kill processes that exceeded `max_lifetime` or whose session is no
    /// longer known. Returns the pids that were stopped.
    pub async fn cleanup_orphaned(
        &self,
        max_lifetime: Duration,
        known_sessions: &HashSet<String>,
    ) -> Vec<u32> {
        let now = Utc::now();
        let candidates: Vec<ProcessRecord> = self
            .processes
            .read()
            .values()
            .filter(|r| {
                let age = (now - r.started_at).to_std().unwrap_or_default();
                age > max_lifetime || !known_sessions.contains(&r.session_id)
            })
            .cloned()
            .collect();

        let mut stopped = Vec::with_capacity(candidates.len());
        for record in candidates {
            info!(
                pid = record.pid,
                session_id = %record.session_id,
                "Killing orphaned encoder process"
            );
            if self.stop_process(record.pid).await.is_ok() {
                stopped.push(record.pid);
            }
        }
        stopped
    }

    /// Best-effort kill of every tracked process within a deadline.
    pub async fn shutdown(self: &Arc<Self>, deadline: Duration) {
        let records = self.list();
        if records.is_empty() {
            return;
        }
        info!(count = records.len(), "Stopping all tracked processes");

        let stops = records.into_iter().map(|record| {
            let registry = Arc::clone(self);
            async move {
                let _ = registry.stop_process(record.pid).await;
            }
        });

        if tokio::time::timeout(deadline, futures::future::join_all(stops))
            .await
            .is_err()
        {
            warn!("Registry shutdown deadline exceeded; force-killing remainder");
            for record in self.list() {
                let _ = process_utils::kill_group(record.pid);
                self.unregister(record.pid);
            }
        }
    }
}

/// SIGTERM the group, poll for exit within the grace period, then SIGKILL.
async fn stop_group(pid: u32, grace: Duration) {
    if !process_utils::process_exists(pid) {
        return;
    }

    if let Err(e) = process_utils::terminate_group(pid) {
        warn!(pid, error = %e, "Failed to signal process group");
    }

    let poll = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !process_utils::process_exists(pid) {
            debug!(pid, "Process group exited after SIGTERM");
            return;
        }
        tokio::time::sleep(poll).await;
    }

    warn!(pid, "Process group survived grace period; sending SIGKILL");
    if let Err(e) = process_utils::kill_group(pid) {
        warn!(pid, error = %e, "Failed to kill process group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProcessRegistry {
        ProcessRegistry::new(Duration::from_secs(2))
    }

    #[test]
    fn test_register_and_duplicate() {
        let reg = registry();
        reg.register(4321, "s1", ProviderKind::SoftwareEncoder, "ffmpeg -i x")
            .unwrap();
        assert!(reg.contains(4321));
        assert!(
            reg.register(4321, "s2", ProviderKind::SoftwareEncoder, "ffmpeg")
                .is_err()
        );
    }

    #[test]
    fn test_unregister_idempotent() {
        let reg = registry();
        reg.register(1, "s1", ProviderKind::SoftwareEncoder, "cmd")
            .unwrap();
        reg.unregister(1);
        reg.unregister(1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_processes_by_session() {
        let reg = registry();
        reg.register(1, "s1", ProviderKind::Pipeline, "ffmpeg").unwrap();
        reg.register(2, "s1", ProviderKind::Pipeline, "packager").unwrap();
        reg.register(3, "s2", ProviderKind::SoftwareEncoder, "ffmpeg")
            .unwrap();

        let s1 = reg.processes_by_session("s1");
        assert_eq!(s1.len(), 2);
        assert_eq!(reg.processes_by_session("s2").len(), 1);
        assert!(reg.processes_by_session("nope").is_empty());
    }

    #[tokio::test]
    async fn test_stop_missing_pid_is_ok() {
        let reg = registry();
        // Unused high pid; stop must succeed without a record.
        reg.stop_process(0x3FFF_FFF0).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_orphaned_unknown_session() {
        let reg = registry();
        reg.register(0x3FFF_FFF1, "ghost", ProviderKind::SoftwareEncoder, "ffmpeg")
            .unwrap();
        reg.register(0x3FFF_FFF2, "live", ProviderKind::SoftwareEncoder, "ffmpeg")
            .unwrap();

        let known: HashSet<String> = ["live".to_string()].into();
        let stopped = reg
            .cleanup_orphaned(Duration::from_secs(3600), &known)
            .await;

        assert_eq!(stopped, vec![0x3FFF_FFF1]);
        assert!(!reg.contains(0x3FFF_FFF1));
        assert!(reg.contains(0x3FFF_FFF2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_real_process() {
        use process_utils::ProcessGroupExt;

        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("30").own_process_group();
        let mut child = cmd.spawn().expect("spawn sleep");
        let pid = child.id().expect("pid");

        let reg = ProcessRegistry::new(Duration::from_millis(500));
        reg.register(pid, "s1", ProviderKind::SoftwareEncoder, "sleep 30")
            .unwrap();

        reg.stop_process(pid).await.unwrap();
        assert!(!reg.contains(pid));

        let status = child.wait().await.expect("wait");
        assert!(!status.success());
    }
}
