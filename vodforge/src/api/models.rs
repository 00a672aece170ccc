//! API request and response models (DTOs).

use std::str::FromStr;

use abr::Resolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::content::ContentMetadata;
use crate::database::models::TranscodeSessionDbModel;
use crate::domain::{Container, SessionStatus, SpeedPriority, TranscodeRequest};

// ============================================================================
// Transcoding DTOs
// ============================================================================

/// Optional per-request encoding options.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EncodingOptions {
    /// Quality dial in [0, 100] (default: 65).
    pub quality: Option<u8>,
    /// Produce an adaptive-bitrate ladder (DASH/HLS only).
    #[serde(default, alias = "enableABR")]
    pub enable_abr: bool,
    /// Seek offset into the source in seconds.
    pub seek_secs: Option<f64>,
    /// Target resolution, e.g. "1280x720".
    pub resolution: Option<String>,
    /// Video codec override ("h264" or "h265").
    pub codec: Option<String>,
    /// Encoder speed priority.
    pub speed_priority: Option<SpeedPriority>,
    /// Source frame rate when known.
    pub frame_rate: Option<f64>,
}

/// Request body for starting a transcode.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartTranscodeRequest {
    pub media_id: String,
    /// Output container: mp4, mkv, dash or hls.
    pub container: String,
    pub input_path: String,
    #[serde(default)]
    pub encoding_options: Option<EncodingOptions>,
}

impl StartTranscodeRequest {
    /// Convert into the validated domain request.
    pub fn into_domain(self) -> Result<TranscodeRequest, ApiError> {
        let container = Container::from_str(&self.container).map_err(|_| {
            ApiError::bad_request(format!(
                "unknown container '{}', expected mp4|mkv|dash|hls",
                self.container
            ))
        })?;

        let mut request = TranscodeRequest::new(self.media_id, container, self.input_path);
        if let Some(options) = self.encoding_options {
            if let Some(quality) = options.quality {
                request.quality = quality;
            }
            request.enable_abr = options.enable_abr;
            if let Some(seek) = options.seek_secs {
                request.seek_secs = seek;
            }
            if let Some(resolution) = options.resolution {
                request.resolution = Some(
                    Resolution::parse(&resolution)
                        .map_err(|e| ApiError::bad_request(e.to_string()))?,
                );
            }
            request.codec = options.codec;
            if let Some(priority) = options.speed_priority {
                request.speed_priority = priority;
            }
            request.frame_rate = options.frame_rate;
        }

        request.validate().map_err(ApiError::from)?;
        Ok(request)
    }
}

/// Response for a started (or deduplicated) transcode.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartTranscodeResponse {
    /// Session producing (or having produced) the artifact; absent when the
    /// artifact was served from the content store and its session has been
    /// purged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub start_time: DateTime<Utc>,
    pub content_hash: String,
    /// True when no new encode was launched.
    pub deduplicated: bool,
}

/// Response for the progress endpoint.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub percent_complete: f64,
    pub fps: f64,
    pub speed: f64,
    pub bytes: u64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&TranscodeSessionDbModel> for ProgressResponse {
    fn from(session: &TranscodeSessionDbModel) -> Self {
        let progress = session.progress();
        Self {
            percent_complete: progress.percent,
            fps: progress.fps,
            speed: progress.speed,
            bytes: progress.bytes,
            status: session.session_status(),
            error_message: session.error_message.clone(),
        }
    }
}

/// Session detail.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub media_id: String,
    pub provider: String,
    pub container: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub percent_complete: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&TranscodeSessionDbModel> for SessionResponse {
    fn from(session: &TranscodeSessionDbModel) -> Self {
        Self {
            id: session.id.clone(),
            media_id: session.media_id.clone(),
            provider: session.provider.clone(),
            container: session.container.clone(),
            status: session.session_status(),
            content_hash: session.content_hash.clone(),
            error_message: session.error_message.clone(),
            percent_complete: session.progress_percent,
            created_at: session.created_at.clone(),
            updated_at: session.updated_at.clone(),
        }
    }
}

/// Session list envelope.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionResponse>,
    pub count: usize,
}

/// Supported formats for a provider.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFormatsResponse {
    pub provider_id: String,
    pub formats: Vec<Container>,
}

// ============================================================================
// Content DTOs
// ============================================================================

/// Content metadata envelope for the info endpoint.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContentInfoResponse {
    #[serde(flatten)]
    pub metadata: ContentMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_domain_defaults() {
        let dto = StartTranscodeRequest {
            media_id: "m1".to_string(),
            container: "mp4".to_string(),
            input_path: "/media/in.mkv".to_string(),
            encoding_options: None,
        };
        let request = dto.into_domain().unwrap();
        assert_eq!(request.container, Container::Mp4);
        assert_eq!(request.quality, 65);
        assert!(!request.enable_abr);
    }

    #[test]
    fn test_into_domain_rejects_unknown_container() {
        let dto = StartTranscodeRequest {
            media_id: "m1".to_string(),
            container: "avi".to_string(),
            input_path: "/in.mkv".to_string(),
            encoding_options: None,
        };
        let err = dto.into_domain().unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_into_domain_parses_options() {
        let dto = StartTranscodeRequest {
            media_id: "m1".to_string(),
            container: "dash".to_string(),
            input_path: "/in.mkv".to_string(),
            encoding_options: Some(EncodingOptions {
                quality: Some(80),
                enable_abr: true,
                resolution: Some("1920x1080".to_string()),
                ..Default::default()
            }),
        };
        let request = dto.into_domain().unwrap();
        assert_eq!(request.quality, 80);
        assert!(request.wants_abr());
        assert_eq!(request.resolution, Some(Resolution::new(1920, 1080)));
    }

    #[test]
    fn test_into_domain_rejects_bad_resolution() {
        let dto = StartTranscodeRequest {
            media_id: "m1".to_string(),
            container: "mp4".to_string(),
            input_path: "/in.mkv".to_string(),
            encoding_options: Some(EncodingOptions {
                resolution: Some("huge".to_string()),
                ..Default::default()
            }),
        };
        assert!(dto.into_domain().is_err());
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = r#"{
            "mediaId": "m1",
            "container": "hls",
            "inputPath": "/media/in.mkv",
            "encodingOptions": {"quality": 70, "enableABR": true}
        }"#;
        let dto: StartTranscodeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(dto.media_id, "m1");
        let request = dto.into_domain().unwrap();
        assert!(request.wants_abr());
        assert_eq!(request.quality, 70);
    }
}
