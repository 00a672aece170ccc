//! Source probing via ffprobe.
//!
//! Probing is best-effort: a failure degrades percent-complete reporting
//! and ladder derivation but never blocks an encode.

use std::process::Stdio;
use std::time::Duration;

use abr::Resolution;
use tracing::{debug, warn};

/// Probed facts about an input file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceInfo {
    pub duration_secs: Option<f64>,
    pub resolution: Option<Resolution>,
}

/// Timeout for a single ffprobe invocation.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe duration and video resolution of an input.
pub async fn probe_source(ffprobe_path: &str, input_path: &str) -> SourceInfo {
    SourceInfo {
        duration_secs: probe_duration(ffprobe_path, input_path).await,
        resolution: probe_resolution(ffprobe_path, input_path).await,
    }
}

/// Probe the container duration in seconds.
pub async fn probe_duration(ffprobe_path: &str, input_path: &str) -> Option<f64> {
    let output = run_ffprobe(
        ffprobe_path,
        &[
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            input_path,
        ],
    )
    .await?;
    parse_probe_duration(&output)
}

/// Probe the resolution of the first video stream.
pub async fn probe_resolution(ffprobe_path: &str, input_path: &str) -> Option<Resolution> {
    let output = run_ffprobe(
        ffprobe_path,
        &[
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
            input_path,
        ],
    )
    .await?;
    parse_probe_resolution(&output)
}

async fn run_ffprobe(ffprobe_path: &str, args: &[&str]) -> Option<String> {
    let mut cmd = process_utils::tokio_command(ffprobe_path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let result = tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await;
    match result {
        Ok(Ok(output)) if output.status.success() => {
            String::from_utf8(output.stdout).ok()
        }
        Ok(Ok(output)) => {
            debug!(status = ?output.status, "ffprobe reported failure");
            None
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to spawn ffprobe");
            None
        }
        Err(_) => {
            warn!("ffprobe timed out");
            None
        }
    }
}

fn parse_probe_duration(output: &str) -> Option<f64> {
    let duration: f64 = output.trim().parse().ok()?;
    (duration.is_finite() && duration > 0.0).then_some(duration)
}

fn parse_probe_resolution(output: &str) -> Option<Resolution> {
    // ffprobe may emit a trailing separator (`1920x1080x`).
    let line = output.trim().trim_end_matches('x');
    Resolution::parse(line).ok()
}
