//! ABR ladder derivation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::quality::{audio_bitrate_kbps, h264_profile};
use crate::resolution::Resolution;

/// Scale factors for the three ladder rungs, top first.
const RUNG_FACTORS: [f64; 3] = [1.0, 2.0 / 3.0, 4.0 / 9.0];

/// Assumed frame rate when the source has not been probed.
const DEFAULT_FPS: f64 = 30.0;

/// One quality level in an ABR ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRung {
    /// Rung label, e.g. `720p`.
    pub name: String,
    pub resolution: Resolution,
    /// Target video bitrate in kbps.
    pub video_bitrate_kbps: u32,
    /// AAC audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,
    /// H.264 profile string (`baseline` or `high`).
    pub profile: String,
    /// H.264 level string, e.g. `4.0`.
    pub level: String,
}

impl QualityRung {
    /// Stable identifier used in output file naming (`v0`, `v1`, ...).
    pub fn stream_label(index: usize) -> String {
        format!("v{index}")
    }
}

/// Bits-per-pixel-per-frame target for the bitrate heuristic.
fn bits_per_pixel(quality: u8) -> f64 {
    match quality {
        0..=34 => 0.07,
        35..=69 => 0.10,
        _ => 0.13,
    }
}

/// H.264 level for a resolution at ~30 fps.
pub fn h264_level(res: Resolution) -> &'static str {
    match res.pixels() {
        p if p > 1920 * 1080 => "5.1",
        p if p > 1280 * 720 => "4.0",
        p if p > 854 * 480 => "3.1",
        _ => "3.0",
    }
}

/// Target video bitrate in kbps for a resolution at the given quality.
fn video_bitrate_kbps(res: Resolution, quality: u8) -> u32 {
    let bps = res.pixels() as f64 * DEFAULT_FPS * bits_per_pixel(quality);
    // Clamp to a sane floor so tiny rungs stay playable.
    ((bps / 1000.0) as u32).max(200)
}

/// Derive a three-rung ABR ladder from the source resolution and quality.
///
/// The top rung keeps the source resolution; lower rungs scale down by
/// fixed factors. Rungs are deterministic for identical inputs, which the
/// dedup key relies on.
pub fn build_ladder(source: Resolution, quality: u8) -> Vec<QualityRung> {
    let profile = h264_profile(quality);
    let audio_top = audio_bitrate_kbps(quality);

    let ladder: Vec<QualityRung> = RUNG_FACTORS
        .iter()
        .enumerate()
        .map(|(i, factor)| {
            let res = source.scaled(*factor);
            QualityRung {
                name: format!("{}p", res.height),
                resolution: res,
                video_bitrate_kbps: video_bitrate_kbps(res, quality),
                // Only the top rung carries the full audio bitrate.
                audio_bitrate_kbps: if i == 0 { audio_top } else { 96 },
                profile: profile.to_string(),
                level: h264_level(res).to_string(),
            }
        })
        .collect();

    debug!(
        source = %source,
        quality,
        rungs = ladder.len(),
        top_kbps = ladder[0].video_bitrate_kbps,
        "derived ABR ladder"
    );

    ladder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_has_three_rungs() {
        let ladder = build_ladder(Resolution::new(1920, 1080), 80);
        assert_eq!(ladder.len(), 3);
        assert_eq!(ladder[0].resolution, Resolution::new(1920, 1080));
        assert_eq!(ladder[1].resolution, Resolution::new(1280, 720));
        assert_eq!(ladder[2].resolution, Resolution::new(854, 480));
    }

    #[test]
    fn test_ladder_bitrates_descend() {
        let ladder = build_ladder(Resolution::new(1920, 1080), 65);
        assert!(ladder[0].video_bitrate_kbps > ladder[1].video_bitrate_kbps);
        assert!(ladder[1].video_bitrate_kbps > ladder[2].video_bitrate_kbps);
    }

    #[test]
    fn test_ladder_deterministic() {
        let a = build_ladder(Resolution::new(1280, 720), 50);
        let b = build_ladder(Resolution::new(1280, 720), 50);
        assert_eq!(a, b);
    }

    #[test]
    fn test_low_quality_pins_baseline() {
        let ladder = build_ladder(Resolution::new(1920, 1080), 20);
        assert!(ladder.iter().all(|r| r.profile == "baseline"));
    }

    #[test]
    fn test_levels() {
        assert_eq!(h264_level(Resolution::new(3840, 2160)), "5.1");
        assert_eq!(h264_level(Resolution::new(1920, 1080)), "4.0");
        assert_eq!(h264_level(Resolution::new(1280, 720)), "3.1");
        assert_eq!(h264_level(Resolution::new(854, 480)), "3.0");
        assert_eq!(h264_level(Resolution::new(640, 360)), "3.0");
    }

    #[test]
    fn test_small_source_floor() {
        let ladder = build_ladder(Resolution::new(320, 180), 10);
        assert!(ladder.iter().all(|r| r.video_bitrate_kbps >= 200));
        assert!(ladder.iter().all(|r| r.resolution.width >= 2));
    }
}
