//! FFmpeg output parsing.
//!
//! ffmpeg reports progress on stderr in a stable `key=value` line format;
//! these helpers pull out the fields the runner needs and detect the
//! "Opening '...' for writing" lines that mark new output files.

use std::path::PathBuf;

use crate::domain::ProgressSnapshot;

/// Parse time string in HH:MM:SS.ms format to seconds.
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse the size field (e.g. `size=    1024kB`) into bytes.
pub fn parse_size(line: &str) -> Option<u64> {
    let size_start = line.find("size=")?;
    let size_str = &line[size_start + 5..].trim_start();
    let end = size_str.find(['k', 'K'])?;
    let size: u64 = size_str[..end].trim().parse().ok()?;
    Some(size * 1024)
}

/// Parse the speed multiplier (e.g. `speed=1.00x`).
pub fn parse_speed(line: &str) -> Option<f64> {
    let speed_start = line.find("speed=")?;
    let speed_str = &line[speed_start + 6..];
    let end = speed_str.find('x')?;
    speed_str[..end].trim().parse().ok()
}

/// Parse the fps field (e.g. `fps= 25`).
pub fn parse_fps(line: &str) -> Option<f64> {
    let fps_start = line.find("fps=")?;
    let fps_str = &line[fps_start + 4..];
    let end = fps_str
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.' && *c != ' ')
        .map(|(i, _)| i)
        .unwrap_or(fps_str.len());
    fps_str[..end].trim().parse().ok()
}

/// Parse the time field (e.g. `time=00:01:30.50`) into seconds.
pub fn parse_time_field(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let end = time_str.find(' ').unwrap_or(time_str.len());
    parse_time(&time_str[..end])
}

/// Parsed fields of one ffmpeg progress line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EncodeProgressLine {
    pub out_time_secs: f64,
    pub fps: f64,
    pub speed: f64,
    pub bytes: u64,
}

impl EncodeProgressLine {
    /// Convert to a session progress snapshot, computing percent complete
    /// against the (probed) total duration when one is known.
    pub fn to_snapshot(&self, total_duration_secs: Option<f64>) -> ProgressSnapshot {
        let percent = match total_duration_secs {
            Some(total) if total > 0.0 => (self.out_time_secs / total * 100.0).clamp(0.0, 100.0),
            _ => 0.0,
        };
        ProgressSnapshot {
            percent,
            fps: self.fps,
            speed: self.speed,
            bytes: self.bytes,
        }
    }
}

/// Parse an ffmpeg progress line.
///
/// Requires `time=` plus at least one other progress marker to avoid
/// matching unrelated stderr output.
pub fn parse_progress(line: &str) -> Option<EncodeProgressLine> {
    if !line.contains("time=") || !(line.contains("frame=") || line.contains("size=")) {
        return None;
    }

    Some(EncodeProgressLine {
        out_time_secs: parse_time_field(line).unwrap_or(0.0),
        fps: parse_fps(line).unwrap_or(0.0),
        speed: parse_speed(line).unwrap_or(0.0),
        bytes: parse_size(line).unwrap_or(0),
    })
}

/// Whether a line announces a new output file.
pub fn is_output_open(line: &str) -> bool {
    line.contains("Opening") && line.contains("for writing")
}

/// Parse the path out of an ffmpeg `Opening '...' for writing` message.
pub fn parse_opened_path(line: &str) -> Option<PathBuf> {
    if let Some(start) = line.find("Opening '") {
        let rest = &line[start + "Opening '".len()..];
        let end = rest.find('\'')?;
        return Some(PathBuf::from(rest[..end].to_string()));
    }

    if let Some(start) = line.find("Opening \"") {
        let rest = &line[start + "Opening \"".len()..];
        let end = rest.find('"')?;
        return Some(PathBuf::from(rest[..end].to_string()));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRESS_LINE: &str = "frame=  100 fps= 25 q=-1.0 size=    1024kB time=00:00:04.00 bitrate=2097.2kbits/s speed=1.00x";

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("00:00:10.50"), Some(10.5));
        assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_time("invalid"), None);
        assert_eq!(parse_time("00:00"), None);
    }

    #[test]
    fn test_parse_progress_line() {
        let progress = parse_progress(PROGRESS_LINE).unwrap();
        assert_eq!(progress.bytes, 1024 * 1024);
        assert_eq!(progress.out_time_secs, 4.0);
        assert_eq!(progress.fps, 25.0);
        assert_eq!(progress.speed, 1.0);
    }

    #[test]
    fn test_parse_progress_requires_markers() {
        assert!(parse_progress("time=00:00:10.00").is_none());
        assert!(parse_progress("frame=100 fps=25").is_none());
        assert!(parse_progress("Stream mapping:").is_none());
    }

    #[test]
    fn test_parse_progress_without_speed() {
        let line = "frame=  100 fps=25 q=-1.0 size=    512kB time=00:00:10.00 bitrate=419.4kbits/s";
        let progress = parse_progress(line).unwrap();
        assert_eq!(progress.bytes, 512 * 1024);
        assert_eq!(progress.speed, 0.0);
    }

    #[test]
    fn test_percent_from_duration() {
        let progress = parse_progress(PROGRESS_LINE).unwrap();
        let snapshot = progress.to_snapshot(Some(16.0));
        assert_eq!(snapshot.percent, 25.0);

        // Unknown duration degrades to zero percent, not garbage.
        let snapshot = progress.to_snapshot(None);
        assert_eq!(snapshot.percent, 0.0);

        // Past-the-end timestamps clamp.
        let snapshot = progress.to_snapshot(Some(2.0));
        assert_eq!(snapshot.percent, 100.0);
    }

    #[test]
    fn test_output_open_detection() {
        assert!(is_output_open("Opening 'seg_001.m4s' for writing"));
        assert!(is_output_open("[dash @ 0x55] Opening 'manifest.mpd' for writing"));
        assert!(!is_output_open("frame=100 fps=25"));
        assert!(!is_output_open("Opening input"));
    }

    #[test]
    fn test_parse_opened_path() {
        assert_eq!(
            parse_opened_path("Opening 'chunk-stream0-00001.m4s' for writing")
                .unwrap()
                .to_string_lossy(),
            "chunk-stream0-00001.m4s"
        );
        assert_eq!(
            parse_opened_path("[hls] Opening \"/out/seg_3.ts\" for writing")
                .unwrap()
                .to_string_lossy(),
            "/out/seg_3.ts"
        );
        assert!(parse_opened_path("no path here").is_none());
    }
}
