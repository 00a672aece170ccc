//! Content metadata records.
//!
//! One JSON document per stored hash, written atomically next to the
//! content tree. The in-memory index in [`super::store::ContentStore`] is a
//! cache of these files; the file is the source of truth.

use abr::{QualityRung, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Streaming lifecycle of a content entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StreamingStatus {
    Active,
    Completed,
    Failed,
}

/// Encoding parameters recorded for a stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EncodingParams {
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_bitrate_kbps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub resolution: Option<Resolution>,
}

/// Streaming-specific metadata, present for DASH/HLS entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StreamingInfo {
    pub segment_count: u64,
    /// Nominal segment duration in seconds.
    pub segment_duration_secs: f64,
    /// `segment_count × segment_duration_secs`, recomputed on ingest.
    pub total_duration_secs: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<Object>)]
    pub quality_profiles: Vec<QualityRung>,
    pub status: StreamingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_segment_time: Option<DateTime<Utc>>,
}

impl StreamingInfo {
    pub fn active(segment_duration_secs: f64, quality_profiles: Vec<QualityRung>) -> Self {
        Self {
            segment_count: 0,
            segment_duration_secs,
            total_duration_secs: 0.0,
            quality_profiles,
            status: StreamingStatus::Active,
            last_segment_time: None,
        }
    }
}

/// Metadata for one content-store entry, keyed by its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ContentMetadata {
    pub content_hash: String,
    pub media_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
    /// Container format of the artifact (`mp4`, `mkv`, `dash`, `hls`).
    pub format: String,
    pub access_count: u64,
    /// Retention in days since last access; 0 falls back to the store default.
    #[serde(default)]
    pub retention_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<EncodingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<StreamingInfo>,
}

impl ContentMetadata {
    pub fn new(
        content_hash: impl Into<String>,
        media_id: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            content_hash: content_hash.into(),
            media_id: media_id.into(),
            created_at: now,
            last_accessed: now,
            size_bytes: 0,
            format: format.into(),
            access_count: 0,
            retention_days: 0,
            encoding: None,
            streaming: None,
        }
    }

    pub fn with_encoding(mut self, encoding: EncodingParams) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_streaming(mut self, streaming: StreamingInfo) -> Self {
        self.streaming = Some(streaming);
        self
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    /// Record an access.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    /// Record a newly ingested segment and recompute the total duration.
    pub fn record_segment(&mut self, at: DateTime<Utc>, size_bytes: u64) {
        self.size_bytes += size_bytes;
        if let Some(streaming) = &mut self.streaming {
            streaming.segment_count += 1;
            streaming.total_duration_secs =
                streaming.segment_count as f64 * streaming.segment_duration_secs;
            streaming.last_segment_time = Some(at);
        }
    }

    /// Whether this entry has outlived its retention window.
    pub fn is_expired(&self, now: DateTime<Utc>, default_retention_days: i64) -> bool {
        let days = if self.retention_days > 0 {
            self.retention_days
        } else {
            default_retention_days
        };
        if days <= 0 {
            return false;
        }
        now - self.last_accessed > chrono::Duration::days(days)
    }
}
