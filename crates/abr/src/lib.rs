//! Adaptive-bitrate building blocks.
//!
//! This crate owns the pure math behind transcode parameter selection:
//! quality-to-CRF mapping, H.264 profile/level selection, ABR ladder
//! derivation from a source resolution, and classification of encoder
//! output files into the content-store layout.

pub mod ladder;
pub mod quality;
pub mod resolution;
pub mod segment;

pub use ladder::{QualityRung, build_ladder, h264_level};
pub use quality::{QualityBucket, audio_bitrate_kbps, h264_profile, quality_to_crf};
pub use resolution::{Resolution, ResolutionError};
pub use segment::SegmentKind;
