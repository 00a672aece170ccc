//! Session status state machine and related value types.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a transcode session.
///
/// Transitions follow `queued → starting → running → (complete | failed |
/// stopped)`, with `failed` and `stopped` also reachable from the earlier
/// states. Terminal states are never left.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumString, utoipa::ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Queued,
    Starting,
    Running,
    Complete,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether this state has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Stopped)
    }

    /// Whether a transition to `to` is allowed by the state graph.
    pub fn can_transition(&self, to: SessionStatus) -> bool {
        match (self, to) {
            (Self::Queued, Self::Starting) => true,
            (Self::Queued, Self::Failed | Self::Stopped) => true,
            (Self::Starting, Self::Running) => true,
            (Self::Starting, Self::Failed | Self::Stopped) => true,
            (Self::Running, Self::Complete | Self::Failed | Self::Stopped) => true,
            _ => false,
        }
    }
}

/// Output container format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumString, utoipa::ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Mkv,
    Dash,
    Hls,
}

impl Container {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Dash => "dash",
            Self::Hls => "hls",
        }
    }

    /// Segmented streaming containers publish output incrementally.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Dash | Self::Hls)
    }

    /// Manifest file name for streaming containers.
    pub fn manifest_name(&self) -> Option<&'static str> {
        match self {
            Self::Dash => Some("manifest.mpd"),
            Self::Hls => Some("master.m3u8"),
            _ => None,
        }
    }
}

/// Encoder provider implementations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    SoftwareEncoder,
    HardwareEncoder,
    Pipeline,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoftwareEncoder => "software_encoder",
            Self::HardwareEncoder => "hardware_encoder",
            Self::Pipeline => "pipeline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "software_encoder" => Some(Self::SoftwareEncoder),
            "hardware_encoder" => Some(Self::HardwareEncoder),
            "pipeline" => Some(Self::Pipeline),
            _ => None,
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::SoftwareEncoder, Self::HardwareEncoder, Self::Pipeline]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last observed encoding progress for a session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProgressSnapshot {
    /// Percent complete in `[0, 100]`; 0 when total duration is unknown.
    pub percent: f64,
    /// Encoder frames per second.
    pub fps: f64,
    /// Encode speed as a realtime multiple (1.0 = realtime).
    pub speed: f64,
    /// Output bytes written so far.
    pub bytes: u64,
}
