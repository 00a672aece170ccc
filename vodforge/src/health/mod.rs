//! Per-session encoding health tracking.
//!
//! The monitor keeps a small rolling window of metrics per active session,
//! classifies each session as healthy/degraded/unhealthy, rolls the
//! classification up into an overall engine status, and emits alerts when
//! thresholds are crossed.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

/// Health of a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A generated health alert.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct Alert {
    /// `<kind>_<session>_<unix_ts>`.
    pub id: String,
    pub kind: String,
    pub session_id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time health summary for the API.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct HealthReport {
    pub overall: SessionHealth,
    pub session_count: usize,
    pub degraded_count: usize,
    pub unhealthy_count: usize,
    pub alerts: Vec<Alert>,
}

/// Monitor thresholds.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// fps below this counts as a stall.
    pub min_fps: f64,
    /// Consecutive errors at which a session turns degraded.
    pub degraded_errors: u32,
    /// Consecutive errors at which a session turns unhealthy.
    pub unhealthy_errors: u32,
    /// Rolling window length for fps and encode-time averages.
    pub window: usize,
    /// Alerts retained in memory.
    pub max_alerts: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            min_fps: 10.0,
            degraded_errors: 3,
            unhealthy_errors: 5,
            window: 10,
            max_alerts: 100,
        }
    }
}

#[derive(Debug)]
struct SessionMetrics {
    fps_window: VecDeque<f64>,
    encode_time_window: VecDeque<f64>,
    consecutive_errors: u32,
    stall_count: u32,
    last_error: Option<String>,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    status: SessionHealth,
}

impl SessionMetrics {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            fps_window: VecDeque::new(),
            encode_time_window: VecDeque::new(),
            consecutive_errors: 0,
            stall_count: 0,
            last_error: None,
            started_at: now,
            last_activity: now,
            status: SessionHealth::Healthy,
        }
    }

    fn push_window(window: &mut VecDeque<f64>, value: f64, cap: usize) {
        if window.len() == cap {
            window.pop_front();
        }
        window.push_back(value);
    }

    fn avg(window: &VecDeque<f64>) -> f64 {
        if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f64>() / window.len() as f64
        }
    }
}

/// Public per-session metrics snapshot.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SessionHealthSnapshot {
    pub session_id: String,
    pub status: SessionHealth,
    pub avg_fps: f64,
    pub avg_encode_time_secs: f64,
    pub consecutive_errors: u32,
    pub stall_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Tracks encoding health across sessions.
pub struct HealthMonitor {
    sessions: DashMap<String, SessionMetrics>,
    alerts: RwLock<VecDeque<Alert>>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            alerts: RwLock::new(VecDeque::new()),
            config,
        }
    }

    /// Begin tracking a session.
    pub fn register_session(&self, session_id: &str) {
        self.sessions
            .insert(session_id.to_string(), SessionMetrics::new());
    }

    /// Stop tracking a session (terminal state reached).
    pub fn unregister_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// A segment was produced successfully.
    pub fn segment_produced(&self, session_id: &str, encode_time_secs: f64, size_bytes: u64) {
        let window = self.config.window;
        if let Some(mut metrics) = self.sessions.get_mut(session_id) {
            metrics.consecutive_errors = 0;
            metrics.last_activity = Utc::now();
            SessionMetrics::push_window(&mut metrics.encode_time_window, encode_time_secs, window);
            if metrics.status != SessionHealth::Unhealthy {
                metrics.status = SessionHealth::Healthy;
            }
            debug!(session_id, size_bytes, "Segment produced");
        }
    }

    /// A segment (or encode step) failed.
    pub fn segment_failed(&self, session_id: &str, error: &str) {
        let (status, errors) = {
            let Some(mut metrics) = self.sessions.get_mut(session_id) else {
                return;
            };
            metrics.consecutive_errors += 1;
            metrics.last_error = Some(error.to_string());
            metrics.last_activity = Utc::now();

            metrics.status = if metrics.consecutive_errors >= self.config.unhealthy_errors {
                SessionHealth::Unhealthy
            } else if metrics.consecutive_errors >= self.config.degraded_errors {
                SessionHealth::Degraded
            } else {
                metrics.status
            };
            (metrics.status, metrics.consecutive_errors)
        };

        if status == SessionHealth::Unhealthy {
            self.raise_alert(
                "encode_errors",
                session_id,
                AlertSeverity::Critical,
                format!("{errors} consecutive encode errors: {error}"),
            );
        } else if status == SessionHealth::Degraded {
            self.raise_alert(
                "encode_errors",
                session_id,
                AlertSeverity::Medium,
                format!("{errors} consecutive encode errors"),
            );
        }
    }

    /// A progress tick arrived with the given fps.
    pub fn progress(&self, session_id: &str, fps: f64) {
        let window = self.config.window;
        let stalled = {
            let Some(mut metrics) = self.sessions.get_mut(session_id) else {
                return;
            };
            metrics.last_activity = Utc::now();
            SessionMetrics::push_window(&mut metrics.fps_window, fps, window);

            if fps > 0.0 && fps < self.config.min_fps {
                metrics.stall_count += 1;
                if metrics.status == SessionHealth::Healthy {
                    metrics.status = SessionHealth::Degraded;
                }
                true
            } else {
                false
            }
        };

        if stalled {
            self.raise_alert(
                "low_fps",
                session_id,
                AlertSeverity::Low,
                format!("encode speed below {} fps", self.config.min_fps),
            );
        }
    }

    /// Health of a single session.
    pub fn session_health(&self, session_id: &str) -> Option<SessionHealth> {
        self.sessions.get(session_id).map(|m| m.status)
    }

    /// Snapshot of every tracked session.
    pub fn snapshots(&self) -> Vec<SessionHealthSnapshot> {
        self.sessions
            .iter()
            .map(|entry| SessionHealthSnapshot {
                session_id: entry.key().clone(),
                status: entry.status,
                avg_fps: SessionMetrics::avg(&entry.fps_window),
                avg_encode_time_secs: SessionMetrics::avg(&entry.encode_time_window),
                consecutive_errors: entry.consecutive_errors,
                stall_count: entry.stall_count,
                last_error: entry.last_error.clone(),
                started_at: entry.started_at,
                last_activity: entry.last_activity,
            })
            .collect()
    }

    /// Overall roll-up across sessions. No sessions means healthy.
    pub fn overall(&self) -> SessionHealth {
        let total = self.sessions.len();
        if total == 0 {
            return SessionHealth::Healthy;
        }

        let mut unhealthy = 0usize;
        let mut degraded = 0usize;
        for entry in self.sessions.iter() {
            match entry.status {
                SessionHealth::Unhealthy => unhealthy += 1,
                SessionHealth::Degraded => degraded += 1,
                SessionHealth::Healthy => {}
            }
        }

        if unhealthy * 2 > total {
            SessionHealth::Unhealthy
        } else if unhealthy * 5 > total || degraded * 2 > total {
            SessionHealth::Degraded
        } else {
            SessionHealth::Healthy
        }
    }

    /// Full report for the health endpoint.
    pub fn report(&self) -> HealthReport {
        let mut degraded_count = 0;
        let mut unhealthy_count = 0;
        for entry in self.sessions.iter() {
            match entry.status {
                SessionHealth::Degraded => degraded_count += 1,
                SessionHealth::Unhealthy => unhealthy_count += 1,
                SessionHealth::Healthy => {}
            }
        }
        HealthReport {
            overall: self.overall(),
            session_count: self.sessions.len(),
            degraded_count,
            unhealthy_count,
            alerts: self.alerts(),
        }
    }

    /// Recent alerts, newest last.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().iter().cloned().collect()
    }

    fn raise_alert(
        &self,
        kind: &str,
        session_id: &str,
        severity: AlertSeverity,
        message: String,
    ) {
        let alert = Alert {
            id: format!("{kind}_{session_id}_{}", Utc::now().timestamp()),
            kind: kind.to_string(),
            session_id: session_id.to_string(),
            severity,
            message,
            created_at: Utc::now(),
        };
        warn!(
            alert_id = %alert.id,
            severity = ?alert.severity,
            "{}",
            alert.message
        );

        let mut alerts = self.alerts.write();
        if alerts.len() == self.config.max_alerts {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthMonitorConfig::default())
    }
}
