//! Transcode request value object.

use abr::Resolution;
use serde::{Deserialize, Serialize};

use crate::domain::session::Container;
use crate::{Error, Result};

/// Encoder speed/quality tradeoff dial.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPriority {
    Fastest,
    #[default]
    Balanced,
    Quality,
}

impl SpeedPriority {
    /// ffmpeg `-preset` value.
    pub fn preset(&self) -> &'static str {
        match self {
            Self::Fastest => "ultrafast",
            Self::Balanced => "veryfast",
            Self::Quality => "medium",
        }
    }
}

/// A validated transcode request.
///
/// Built from the API DTO; everything downstream (hashing, arg building,
/// the runner) consumes this form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub media_id: String,
    pub container: Container,
    pub input_path: String,
    /// Quality dial in `[0, 100]`.
    pub quality: u8,
    pub enable_abr: bool,
    /// Seek offset into the source, seconds.
    pub seek_secs: f64,
    /// Target resolution; `None` keeps the source resolution.
    pub resolution: Option<Resolution>,
    /// Requested video codec; `None` selects the H.264 default.
    pub codec: Option<String>,
    pub speed_priority: SpeedPriority,
    /// Source frame rate when the caller knows it; GOP math assumes 30 fps
    /// otherwise.
    pub frame_rate: Option<f64>,
}

impl TranscodeRequest {
    pub fn new(
        media_id: impl Into<String>,
        container: Container,
        input_path: impl Into<String>,
    ) -> Self {
        Self {
            media_id: media_id.into(),
            container,
            input_path: input_path.into(),
            quality: 65,
            enable_abr: false,
            seek_secs: 0.0,
            resolution: None,
            codec: None,
            speed_priority: SpeedPriority::default(),
            frame_rate: None,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_abr(mut self, enable: bool) -> Self {
        self.enable_abr = enable;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_seek(mut self, seek_secs: f64) -> Self {
        self.seek_secs = seek_secs;
        self
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn with_speed_priority(mut self, priority: SpeedPriority) -> Self {
        self.speed_priority = priority;
        self
    }

    /// ABR output applies only to segmented streaming containers.
    pub fn wants_abr(&self) -> bool {
        self.enable_abr && self.container.is_streaming()
    }

    /// Validate fields that cannot be enforced by the type system.
    pub fn validate(&self) -> Result<()> {
        if self.media_id.trim().is_empty() {
            return Err(Error::validation("mediaId must not be empty"));
        }
        if self.input_path.trim().is_empty() {
            return Err(Error::validation("inputPath must not be empty"));
        }
        if self.quality > 100 {
            return Err(Error::validation("quality must be in [0, 100]"));
        }
        if self.seek_secs < 0.0 {
            return Err(Error::validation("seek offset must not be negative"));
        }
        if let Some(res) = &self.resolution
            && !res.is_valid()
        {
            return Err(Error::validation(format!("invalid resolution {res}")));
        }
        if let Some(codec) = &self.codec
            && !matches!(codec.as_str(), "h264" | "libx264" | "h265" | "libx265")
        {
            return Err(Error::validation(format!("unknown codec '{codec}'")));
        }
        Ok(())
    }
}
