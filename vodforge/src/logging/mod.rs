//! Logging setup.
//!
//! Console plus daily-rotated file output through `tracing`, with a
//! retention task that removes log files older than 7 days. Timestamps use
//! the server's local timezone so logs correlate with operator clocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "vodforge=info,abr=info,sqlx=warn,tower_http=info";

/// Log file base name; daily rotation appends `.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "vodforge.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Handle to the logging subsystem.
pub struct LoggingConfig {
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Get the log directory path.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Start the log retention cleanup task.
    ///
    /// Runs daily and deletes log files older than 7 days.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {
                        if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                            warn!(error = %e, "Failed to cleanup old logs");
                        }
                    }
                }
            }
        });
    }
}

/// Delete log files older than the specified number of days.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let cutoff_ts = cutoff.timestamp();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with(LOG_FILE_PREFIX) => name,
            _ => continue,
        };

        // Extract the rotation date from vodforge.log.YYYY-MM-DD.
        let date_str = filename
            .strip_prefix(LOG_FILE_PREFIX)
            .and_then(|s| s.strip_prefix('.'))
            .unwrap_or("");

        if let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            let file_ts = file_date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp())
                .unwrap_or(0);

            if file_ts < cutoff_ts {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to delete old log file");
                } else {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(())
}

/// Initialize logging.
///
/// # Arguments
/// * `log_dir` - Directory for log files
///
/// # Returns
/// Tuple of (LoggingConfig, WorkerGuard) - keep the guard alive for the app
/// lifetime.
pub fn init_logging(log_dir: &str) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = PathBuf::from(log_dir);

    std::fs::create_dir_all(&log_path)
        .map_err(|e| crate::Error::config(format!("creating log directory: {e}")))?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::internal(format!("Failed to set global default subscriber: {e}"))
        })?;

    let config = Arc::new(LoggingConfig { log_dir: log_path });

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("vodforge=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
    }

    #[tokio::test]
    async fn test_cleanup_skips_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let today = Local::now().format("%Y-%m-%d");
        let fresh = dir.path().join(format!("{LOG_FILE_PREFIX}.{today}"));
        tokio::fs::write(&fresh, b"log").await.unwrap();

        cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS)
            .await
            .unwrap();
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join(format!("{LOG_FILE_PREFIX}.2001-01-01"));
        let unrelated = dir.path().join("other.txt");
        tokio::fs::write(&old, b"log").await.unwrap();
        tokio::fs::write(&unrelated, b"keep").await.unwrap();

        cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS)
            .await
            .unwrap();
        assert!(!old.exists());
        assert!(unrelated.exists());
    }
}
