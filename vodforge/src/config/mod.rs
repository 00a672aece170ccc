//! Application configuration.
//!
//! Settings are an enumerated record: every knob the engine understands is a
//! named field loaded from a known environment variable, with a default that
//! works out of the box. There is no runtime field discovery.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// API server bind address.
    pub server_host: String,
    /// API server port.
    pub server_port: u16,
    /// Base data directory; content store, metadata and session scratch
    /// directories all live under it.
    pub data_dir: PathBuf,
    /// SQLite database URL.
    pub database_url: String,
    /// Maximum concurrently running transcode sessions.
    pub max_concurrent_sessions: usize,
    /// Content-store retention, days since last access.
    pub retention_days: i64,
    /// Content-store total size cap in bytes (0 disables the cap).
    pub max_total_size_bytes: u64,
    /// Cleanup cycle interval.
    pub cleanup_interval: Duration,
    /// ffmpeg binary path.
    pub ffmpeg_path: String,
    /// ffprobe binary path.
    pub ffprobe_path: String,
    /// Optional packager binary (e.g. Shaka Packager) for two-stage runs.
    pub packager_path: Option<String>,
    /// Grace period between SIGTERM and SIGKILL when stopping encoders.
    pub kill_grace_period: Duration,
    /// Progress snapshot cadence.
    pub progress_interval: Duration,
    /// Segment duration for DASH/HLS output.
    pub segment_duration_secs: u32,
    /// Age after which an unknown scratch directory counts as orphaned.
    pub orphan_age: Duration,
    /// Age after which an untouched running/queued session row is failed.
    pub stale_session_age: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 18200,
            data_dir: PathBuf::from("./data"),
            database_url: "sqlite:vodforge.db?mode=rwc".to_string(),
            max_concurrent_sessions: 4,
            retention_days: 30,
            max_total_size_bytes: 50 * 1024 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(5 * 60),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            packager_path: None,
            kill_grace_period: Duration::from_secs(10),
            progress_interval: Duration::from_secs(1),
            segment_duration_secs: 4,
            orphan_age: Duration::from_secs(30 * 60),
            stale_session_age: Duration::from_secs(30 * 60),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    ///
    /// Supported variables: `VODFORGE_HOST`, `VODFORGE_PORT`,
    /// `VODFORGE_DATA_DIR`, `DATABASE_URL`,
    /// `VODFORGE_MAX_CONCURRENT_SESSIONS`, `VODFORGE_RETENTION_DAYS`,
    /// `VODFORGE_MAX_TOTAL_SIZE_BYTES`, `VODFORGE_CLEANUP_INTERVAL_SECS`,
    /// `VODFORGE_FFMPEG_PATH`, `VODFORGE_FFPROBE_PATH`,
    /// `VODFORGE_PACKAGER_PATH`, `VODFORGE_KILL_GRACE_SECS`,
    /// `VODFORGE_PROGRESS_INTERVAL_MS`, `VODFORGE_SEGMENT_DURATION_SECS`,
    /// `VODFORGE_ORPHAN_AGE_SECS`, `VODFORGE_STALE_SESSION_SECS`.
    pub fn from_env_or_default() -> Self {
        let mut settings = Self::default();

        if let Some(host) = env_string("VODFORGE_HOST") {
            settings.server_host = host;
        }
        if let Some(port) = env_parse("VODFORGE_PORT") {
            settings.server_port = port;
        }
        if let Some(dir) = env_string("VODFORGE_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_string("DATABASE_URL") {
            settings.database_url = url;
        }
        if let Some(max) = env_parse("VODFORGE_MAX_CONCURRENT_SESSIONS") {
            settings.max_concurrent_sessions = max;
        }
        if let Some(days) = env_parse("VODFORGE_RETENTION_DAYS") {
            settings.retention_days = days;
        }
        if let Some(bytes) = env_parse("VODFORGE_MAX_TOTAL_SIZE_BYTES") {
            settings.max_total_size_bytes = bytes;
        }
        if let Some(secs) = env_parse::<u64>("VODFORGE_CLEANUP_INTERVAL_SECS") {
            settings.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(path) = env_string("VODFORGE_FFMPEG_PATH") {
            settings.ffmpeg_path = path;
        }
        if let Some(path) = env_string("VODFORGE_FFPROBE_PATH") {
            settings.ffprobe_path = path;
        }
        if let Some(path) = env_string("VODFORGE_PACKAGER_PATH") {
            settings.packager_path = Some(path);
        }
        if let Some(secs) = env_parse::<u64>("VODFORGE_KILL_GRACE_SECS") {
            settings.kill_grace_period = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("VODFORGE_PROGRESS_INTERVAL_MS") {
            settings.progress_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse("VODFORGE_SEGMENT_DURATION_SECS") {
            settings.segment_duration_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("VODFORGE_ORPHAN_AGE_SECS") {
            settings.orphan_age = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("VODFORGE_STALE_SESSION_SECS") {
            settings.stale_session_age = Duration::from_secs(secs);
        }

        settings
    }

    /// Root of the content-addressable store.
    pub fn content_root(&self) -> PathBuf {
        self.data_dir.join("content")
    }

    /// Root of the content metadata files.
    pub fn metadata_root(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }

    /// Directory that holds in-flight session scratch directories.
    pub fn scratch_root(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server_port, 18200);
        assert_eq!(settings.max_concurrent_sessions, 4);
        assert_eq!(settings.segment_duration_secs, 4);
        assert_eq!(settings.kill_grace_period, Duration::from_secs(10));
    }

    #[test]
    fn test_layout_roots() {
        let settings = Settings {
            data_dir: PathBuf::from("/srv/vodforge"),
            ..Default::default()
        };
        assert_eq!(settings.content_root(), PathBuf::from("/srv/vodforge/content"));
        assert_eq!(settings.metadata_root(), PathBuf::from("/srv/vodforge/metadata"));
    }
}
