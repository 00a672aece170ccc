//! Transcode session database model.

use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{Container, ProgressSnapshot, ProviderKind, SessionStatus, TranscodeRequest};

/// Transcode session database model.
///
/// One row per accepted transcode request. Timestamps are ISO 8601 strings;
/// `status` is the lowercase wire string of [`SessionStatus`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TranscodeSessionDbModel {
    pub id: String,
    pub media_id: String,
    pub provider: String,
    pub input_path: String,
    pub container: String,
    pub enable_abr: bool,
    pub seek_secs: f64,
    pub quality: i64,
    pub resolution: Option<String>,
    pub status: String,
    /// Set once the session's output is addressable; non-empty on `complete`.
    pub content_hash: Option<String>,
    /// CAS directory once complete, scratch directory while in flight.
    pub directory_path: Option<String>,
    pub error_message: Option<String>,
    pub progress_percent: f64,
    pub progress_fps: f64,
    pub progress_speed: f64,
    pub progress_bytes: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl TranscodeSessionDbModel {
    /// Create a queued session row from a validated request.
    pub fn from_request(request: &TranscodeRequest, provider: ProviderKind) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            media_id: request.media_id.clone(),
            provider: provider.as_str().to_string(),
            input_path: request.input_path.clone(),
            container: request.container.as_str().to_string(),
            enable_abr: request.enable_abr,
            seek_secs: request.seek_secs,
            quality: request.quality as i64,
            resolution: request.resolution.map(|r| r.to_string()),
            status: SessionStatus::Queued.as_str().to_string(),
            content_hash: None,
            directory_path: None,
            error_message: None,
            progress_percent: 0.0,
            progress_fps: 0.0,
            progress_speed: 0.0,
            progress_bytes: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Typed session status; unknown strings map to `Failed`.
    pub fn session_status(&self) -> SessionStatus {
        SessionStatus::from_str(&self.status).unwrap_or(SessionStatus::Failed)
    }

    /// Typed container; rows are only created from validated requests.
    pub fn container_format(&self) -> Option<Container> {
        Container::from_str(&self.container).ok()
    }

    /// Typed provider.
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        ProviderKind::parse(&self.provider)
    }

    /// Last recorded progress snapshot.
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.progress_percent,
            fps: self.progress_fps,
            speed: self.progress_speed,
            bytes: self.progress_bytes.max(0) as u64,
        }
    }
}
