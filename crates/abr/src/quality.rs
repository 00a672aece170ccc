//! Quality-setting interpretation.
//!
//! A request carries a single `quality` dial in `[0, 100]`. Everything the
//! encoder needs (CRF, H.264 profile, audio bitrate, dedup bucket) is a
//! deterministic function of that dial so identical requests always produce
//! identical parameters.

use serde::{Deserialize, Serialize};

/// CRF range endpoints. Lower CRF is better quality.
const CRF_BEST: u8 = 18;
const CRF_WORST: u8 = 35;

/// Coarse quality bucket used as a content-hash input.
///
/// Bucketing keeps the dedup key stable across cosmetically different
/// quality values that produce indistinguishable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBucket {
    Low,
    Med,
    High,
}

impl QualityBucket {
    /// Bucket for a quality dial value.
    pub fn from_quality(quality: u8) -> Self {
        match quality {
            0..=34 => Self::Low,
            35..=69 => Self::Med,
            _ => Self::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for QualityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map quality `[0, 100]` onto CRF `[35, 18]` linearly.
pub fn quality_to_crf(quality: u8) -> u8 {
    let quality = quality.min(100) as u32;
    let span = (CRF_WORST - CRF_BEST) as u32;
    (CRF_WORST as u32 - (quality * span + 50) / 100) as u8
}

/// H.264 profile for a quality dial value.
///
/// Low-quality targets pin to baseline for maximum device compatibility.
pub fn h264_profile(quality: u8) -> &'static str {
    if quality < 30 { "baseline" } else { "high" }
}

/// AAC-LC audio bitrate in kbps for a quality dial value.
pub fn audio_bitrate_kbps(quality: u8) -> u32 {
    if quality >= 50 { 128 } else { 96 }
}
