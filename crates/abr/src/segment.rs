//! Classification of encoder output files.
//!
//! ffmpeg's DASH/HLS muxers and Shaka Packager produce a flat directory of
//! manifests, init segments and media chunks. The content store files each
//! of them into a dedicated subdirectory; classification is by file name
//! only, since that is all a `segment_ready` event carries.

use std::path::Path;

/// The kind of file an encoder emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// DASH `.mpd` or HLS `.m3u8` playlist.
    Manifest,
    /// Initialization segment (no media samples).
    Init,
    /// Video media segment.
    Video,
    /// Audio media segment.
    Audio,
    /// Media segment whose track cannot be determined from the name.
    Media,
}

impl SegmentKind {
    /// Content-store subdirectory for this kind.
    pub fn subdir(&self) -> &'static str {
        match self {
            Self::Manifest => "manifests",
            Self::Init => "init",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Media => "segments",
        }
    }

    /// Classify a file by name.
    pub fn classify(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        match path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .as_deref()
        {
            Some("mpd") | Some("m3u8") => return Self::Manifest,
            _ => {}
        }

        if name.contains("init") {
            return Self::Init;
        }
        if name.contains("audio") || name.starts_with("a_") {
            return Self::Audio;
        }
        if name.contains("video") || name.starts_with("v_") || name.contains("chunk-stream") {
            return Self::Video;
        }
        Self::Media
    }
}
