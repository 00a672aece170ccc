//! Encoder providers.
//!
//! A provider is one way of driving the external encoder:
//!
//! - `software_encoder`: plain libx264/libx265 ffmpeg run
//! - `hardware_encoder`: ffmpeg with a hardware encoder when one is present
//! - `pipeline`: ffmpeg intermediate piped into a packager (two stages)
//!
//! Providers are a closed set (a tagged variant), not open-world plugins.
//! The capability surface is narrow: describe yourself, say what formats
//! you support, and produce an [`EncodePlan`] for the runner to execute.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::domain::{Container, ProviderKind, TranscodeRequest};
use crate::encoder::args::{
    EncoderArgs, build_encoder_args, build_intermediate_args, build_packager_args,
};
use crate::encoder::probe::SourceInfo;
use crate::{Error, Result};

/// Hardware H.264 encoders recognised in `ffmpeg -encoders` output, in
/// preference order.
const HW_ENCODERS: [&str; 3] = ["h264_nvenc", "h264_qsv", "h264_vaapi"];

/// Provider description exposed through the API.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: ProviderKind,
    pub name: &'static str,
    pub description: &'static str,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// What the runner should execute for one session.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodePlan {
    /// One encoder process writing final output into the scratch dir.
    Single { encoder: EncoderArgs },
    /// Encoder writes an intermediate, then the packager segments it.
    TwoStage {
        encoder: EncoderArgs,
        packager_args: Vec<String>,
        output_target: PathBuf,
    },
}

impl EncodePlan {
    /// Primary output artifact of the whole plan.
    pub fn output_target(&self) -> &Path {
        match self {
            Self::Single { encoder } => &encoder.output_target,
            Self::TwoStage { output_target, .. } => output_target,
        }
    }

    pub fn ladder(&self) -> &[abr::QualityRung] {
        match self {
            Self::Single { encoder } | Self::TwoStage { encoder, .. } => &encoder.ladder,
        }
    }
}

/// One encoder provider.
#[derive(Debug, Clone)]
pub struct EncoderProvider {
    kind: ProviderKind,
    ffmpeg_path: String,
    packager_path: Option<String>,
    version: Option<String>,
    hw_encoder: Option<&'static str>,
}

impl EncoderProvider {
    fn new(
        kind: ProviderKind,
        ffmpeg_path: impl Into<String>,
        packager_path: Option<String>,
    ) -> Self {
        let ffmpeg_path = ffmpeg_path.into();
        let version = detect_version(&ffmpeg_path);
        let hw_encoder = if kind == ProviderKind::HardwareEncoder {
            detect_hw_encoder(&ffmpeg_path)
        } else {
            None
        };

        Self {
            kind,
            ffmpeg_path,
            packager_path,
            version,
            hw_encoder,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    pub fn packager_path(&self) -> Option<&str> {
        self.packager_path.as_deref()
    }

    /// Whether this provider can actually run on this machine.
    pub fn is_available(&self) -> bool {
        match self.kind {
            ProviderKind::SoftwareEncoder => self.version.is_some(),
            ProviderKind::HardwareEncoder => self.version.is_some() && self.hw_encoder.is_some(),
            ProviderKind::Pipeline => self.version.is_some() && self.packager_path.is_some(),
        }
    }

    pub fn info(&self) -> ProviderInfo {
        let (name, description) = match self.kind {
            ProviderKind::SoftwareEncoder => (
                "Software encoder",
                "CPU transcoding via libx264/libx265",
            ),
            ProviderKind::HardwareEncoder => (
                "Hardware encoder",
                "GPU-accelerated H.264 encoding when available",
            ),
            ProviderKind::Pipeline => (
                "Packaging pipeline",
                "Encoder output segmented by an external packager",
            ),
        };
        ProviderInfo {
            id: self.kind,
            name,
            description,
            available: self.is_available(),
            version: self.version.clone(),
        }
    }

    /// Container formats this provider can produce.
    pub fn supported_formats(&self) -> Vec<Container> {
        match self.kind {
            ProviderKind::SoftwareEncoder => {
                vec![Container::Mp4, Container::Mkv, Container::Dash, Container::Hls]
            }
            ProviderKind::HardwareEncoder => vec![Container::Mp4, Container::Mkv],
            ProviderKind::Pipeline => vec![Container::Dash, Container::Hls],
        }
    }

    /// Build the execution plan for a request.
    pub fn build_plan(
        &self,
        request: &TranscodeRequest,
        scratch_dir: &Path,
        source: &SourceInfo,
        segment_duration_secs: u32,
        cpu_count: usize,
    ) -> Result<EncodePlan> {
        if !self.supported_formats().contains(&request.container) {
            return Err(Error::validation(format!(
                "provider {} does not support container {}",
                self.kind, request.container
            )));
        }

        match self.kind {
            ProviderKind::SoftwareEncoder => Ok(EncodePlan::Single {
                encoder: build_encoder_args(
                    request,
                    scratch_dir,
                    source,
                    segment_duration_secs,
                    cpu_count,
                )?,
            }),
            ProviderKind::HardwareEncoder => {
                let mut encoder = build_encoder_args(
                    request,
                    scratch_dir,
                    source,
                    segment_duration_secs,
                    cpu_count,
                )?;
                if let Some(hw) = self.hw_encoder {
                    swap_video_codec(&mut encoder.args, hw);
                }
                Ok(EncodePlan::Single { encoder })
            }
            ProviderKind::Pipeline => {
                let intermediate = scratch_dir.join("intermediate.mp4");
                let encoder = build_intermediate_args(
                    request,
                    &intermediate,
                    source,
                    segment_duration_secs,
                    cpu_count,
                )?;
                let packager_args = build_packager_args(
                    &intermediate,
                    scratch_dir,
                    request.container,
                    segment_duration_secs,
                )?;
                let output_target = scratch_dir.join(match request.container {
                    Container::Dash => "manifests/manifest.mpd",
                    _ => "manifests/master.m3u8",
                });
                Ok(EncodePlan::TwoStage {
                    encoder,
                    packager_args,
                    output_target,
                })
            }
        }
    }
}

/// Replace the `-c:v` value with a hardware encoder.
fn swap_video_codec(args: &mut [String], encoder: &str) {
    let mut set_next = false;
    for arg in args.iter_mut() {
        if set_next {
            *arg = encoder.to_string();
            return;
        }
        if arg == "-c:v" {
            set_next = true;
        }
    }
}

/// Detect the ffmpeg version line.
fn detect_version(path: &str) -> Option<String> {
    process_utils::std_command(path)
        .arg("-version")
        .output()
        .ok()
        .and_then(|output| {
            String::from_utf8(output.stdout)
                .ok()
                .and_then(|s| s.lines().next().map(|l| l.to_string()))
        })
}

/// Detect a usable hardware H.264 encoder.
fn detect_hw_encoder(path: &str) -> Option<&'static str> {
    let output = process_utils::std_command(path)
        .args(["-hide_banner", "-encoders"])
        .output()
        .ok()?;
    let listing = String::from_utf8(output.stdout).ok()?;
    HW_ENCODERS
        .iter()
        .find(|name| listing.contains(*name))
        .copied()
}

/// The closed set of providers configured for this process.
pub struct ProviderCatalog {
    providers: Vec<EncoderProvider>,
}

impl ProviderCatalog {
    pub fn new(ffmpeg_path: &str, packager_path: Option<String>) -> Self {
        let providers = vec![
            EncoderProvider::new(ProviderKind::SoftwareEncoder, ffmpeg_path, None),
            EncoderProvider::new(ProviderKind::HardwareEncoder, ffmpeg_path, None),
            EncoderProvider::new(ProviderKind::Pipeline, ffmpeg_path, packager_path),
        ];
        for provider in &providers {
            debug!(
                provider = %provider.kind(),
                available = provider.is_available(),
                "Provider registered"
            );
        }
        Self { providers }
    }

    pub fn all(&self) -> &[EncoderProvider] {
        &self.providers
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&EncoderProvider> {
        self.providers.iter().find(|p| p.kind() == kind)
    }

    /// Choose the provider for a request.
    ///
    /// Streaming containers prefer the packager pipeline when it is
    /// available; everything else prefers hardware and falls back to
    /// software.
    pub fn select(&self, request: &TranscodeRequest) -> &EncoderProvider {
        let preferred = if request.container.is_streaming() {
            ProviderKind::Pipeline
        } else {
            ProviderKind::HardwareEncoder
        };

        if let Some(provider) = self.get(preferred)
            && provider.is_available()
            && provider.supported_formats().contains(&request.container)
        {
            return provider;
        }

        self.get(ProviderKind::SoftwareEncoder)
            .expect("software provider always present")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ProviderCatalog {
        // Nonexistent binaries: every provider is unavailable, which also
        // exercises the software fallback in select().
        ProviderCatalog::new("/nonexistent/ffmpeg", None)
    }

    #[test]
    fn test_catalog_has_all_kinds() {
        let catalog = catalog();
        assert_eq!(catalog.all().len(), 3);
        for kind in ProviderKind::all() {
            assert!(catalog.get(kind).is_some());
        }
    }

    #[test]
    fn test_select_falls_back_to_software() {
        let catalog = catalog();
        let request = TranscodeRequest::new("m1", Container::Dash, "/in.mkv");
        assert_eq!(
            catalog.select(&request).kind(),
            ProviderKind::SoftwareEncoder
        );

        let request = TranscodeRequest::new("m1", Container::Mp4, "/in.mkv");
        assert_eq!(
            catalog.select(&request).kind(),
            ProviderKind::SoftwareEncoder
        );
    }

    #[test]
    fn test_supported_formats() {
        let catalog = catalog();
        let software = catalog.get(ProviderKind::SoftwareEncoder).unwrap();
        assert!(software.supported_formats().contains(&Container::Dash));

        let pipeline = catalog.get(ProviderKind::Pipeline).unwrap();
        assert!(!pipeline.supported_formats().contains(&Container::Mp4));
    }

    #[test]
    fn test_plan_rejects_unsupported_container() {
        let catalog = catalog();
        let pipeline = catalog.get(ProviderKind::Pipeline).unwrap();
        let request = TranscodeRequest::new("m1", Container::Mp4, "/in.mkv");
        assert!(
            pipeline
                .build_plan(&request, Path::new("/s"), &SourceInfo::default(), 4, 8)
                .is_err()
        );
    }

    #[test]
    fn test_two_stage_plan() {
        let catalog = ProviderCatalog::new("/nonexistent/ffmpeg", Some("packager".to_string()));
        let pipeline = catalog.get(ProviderKind::Pipeline).unwrap();
        let request = TranscodeRequest::new("m1", Container::Dash, "/in.mkv").with_abr(true);

        let plan = pipeline
            .build_plan(&request, Path::new("/scratch"), &SourceInfo::default(), 4, 8)
            .unwrap();

        match plan {
            EncodePlan::TwoStage {
                encoder,
                packager_args,
                output_target,
            } => {
                assert_eq!(
                    encoder.output_target,
                    PathBuf::from("/scratch/intermediate.mp4")
                );
                assert!(!packager_args.is_empty());
                assert_eq!(
                    output_target,
                    PathBuf::from("/scratch/manifests/manifest.mpd")
                );
            }
            other => panic!("expected two-stage plan, got {other:?}"),
        }
    }

    #[test]
    fn test_swap_video_codec() {
        let mut args: Vec<String> = vec!["-c:v".into(), "libx264".into(), "-crf".into(), "24".into()];
        swap_video_codec(&mut args, "h264_nvenc");
        assert_eq!(args[1], "h264_nvenc");
    }

    #[test]
    fn test_provider_info_shape() {
        let catalog = catalog();
        let info = catalog.get(ProviderKind::SoftwareEncoder).unwrap().info();
        assert_eq!(info.id, ProviderKind::SoftwareEncoder);
        assert!(!info.available);
    }
}
