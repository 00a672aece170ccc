//! Encoder argument building.
//!
//! A pure function of (request, output location, probed source facts) to
//! the ffmpeg argument vector. No process state, no filesystem access;
//! identical inputs produce identical argument lists, which keeps encodes
//! reproducible for a given content hash.

use std::path::{Path, PathBuf};

use abr::{QualityRung, Resolution, build_ladder, h264_level, h264_profile, quality_to_crf};

use crate::domain::{Container, SpeedPriority, TranscodeRequest};
use crate::encoder::probe::SourceInfo;
use crate::{Error, Result};

/// Fragment duration for CMAF output, seconds.
const FRAGMENT_DURATION_SECS: u32 = 2;

/// Assumed frame rate for GOP math when the source rate is unknown.
const ASSUMED_FPS: f64 = 30.0;

/// Fallback source resolution when probing fails and the request does not
/// pin one.
const FALLBACK_RESOLUTION: Resolution = Resolution {
    width: 1280,
    height: 720,
};

/// A fully built encoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderArgs {
    /// Arguments for the encoder binary (binary path excluded).
    pub args: Vec<String>,
    /// ABR ladder used, single rung for non-ABR requests.
    pub ladder: Vec<QualityRung>,
    /// Primary output artifact: the media file, or the manifest for
    /// segmented containers.
    pub output_target: PathBuf,
}

/// Resource hints scaled from machine shape and the speed dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResourceHints {
    threads: usize,
    probesize: &'static str,
    analyzeduration: &'static str,
    muxing_queue_size: usize,
}

fn resource_hints(cpu_count: usize, stream_count: usize, priority: SpeedPriority) -> ResourceHints {
    let cpu_count = cpu_count.max(1);
    let threads = match priority {
        SpeedPriority::Fastest => cpu_count,
        SpeedPriority::Balanced => (cpu_count * 3 / 4).max(1),
        SpeedPriority::Quality => (cpu_count / 2).max(1),
    };
    let (probesize, analyzeduration) = match priority {
        SpeedPriority::Fastest => ("1M", "1M"),
        SpeedPriority::Balanced => ("5M", "5M"),
        SpeedPriority::Quality => ("10M", "10M"),
    };
    ResourceHints {
        threads,
        probesize,
        analyzeduration,
        muxing_queue_size: 1024 * stream_count.max(1),
    }
}

/// Resolve the requested codec to an ffmpeg encoder name.
fn video_codec(request: &TranscodeRequest) -> Result<&'static str> {
    match request.codec.as_deref() {
        None | Some("h264") | Some("libx264") => Ok("libx264"),
        Some("h265") | Some("libx265") => Ok("libx265"),
        Some(other) => Err(Error::validation(format!("unknown codec '{other}'"))),
    }
}

/// The ladder for a request: three rungs for ABR, one otherwise.
fn request_ladder(request: &TranscodeRequest, source: &SourceInfo) -> Result<Vec<QualityRung>> {
    let source_res = match request.resolution {
        Some(res) if !res.is_valid() => {
            return Err(Error::validation(format!("invalid resolution {res}")));
        }
        Some(res) => res,
        None => source.resolution.unwrap_or(FALLBACK_RESOLUTION),
    };

    if request.wants_abr() {
        Ok(build_ladder(source_res, request.quality))
    } else {
        Ok(vec![QualityRung {
            name: format!("{}p", source_res.height),
            resolution: source_res,
            video_bitrate_kbps: 0,
            audio_bitrate_kbps: abr::audio_bitrate_kbps(request.quality),
            profile: h264_profile(request.quality).to_string(),
            level: h264_level(source_res).to_string(),
        }])
    }
}

/// GOP length in frames: one keyframe per segment boundary.
fn gop_frames(request: &TranscodeRequest, segment_duration_secs: u32) -> u32 {
    let fps = request.frame_rate.unwrap_or(ASSUMED_FPS);
    (segment_duration_secs as f64 * fps).round() as u32
}

/// Build the ffmpeg invocation for a request.
///
/// `output_dir` is the session scratch directory; every output path in the
/// argument list stays inside it.
pub fn build_encoder_args(
    request: &TranscodeRequest,
    output_dir: &Path,
    source: &SourceInfo,
    segment_duration_secs: u32,
    cpu_count: usize,
) -> Result<EncoderArgs> {
    request.validate()?;
    let codec = video_codec(request)?;
    let ladder = request_ladder(request, source)?;
    let hints = resource_hints(cpu_count, ladder.len() + 1, request.speed_priority);
    let crf = quality_to_crf(request.quality);
    let gop = gop_frames(request, segment_duration_secs);

    let mut args: Vec<String> = Vec::new();

    // 1. Global behavior
    args.extend(["-y".into(), "-hide_banner".into(), "-nostdin".into()]);
    args.extend(["-probesize".into(), hints.probesize.into()]);
    args.extend(["-analyzeduration".into(), hints.analyzeduration.into()]);

    // 2. Input, with optional seek before -i for fast keyframe seeking
    if request.seek_secs > 0.0 {
        args.extend(["-ss".into(), format!("{:.3}", request.seek_secs)]);
    }
    args.extend(["-i".into(), request.input_path.clone()]);

    // 3. Stream mapping and per-rung video parameters
    if request.wants_abr() {
        for _ in &ladder {
            args.extend(["-map".into(), "0:v:0".into()]);
        }
        if request.container == Container::Hls {
            // HLS variant streams pair audio with each rendition.
            for _ in &ladder {
                args.extend(["-map".into(), "0:a:0".into()]);
            }
        } else {
            args.extend(["-map".into(), "0:a:0".into()]);
        }
        for (i, rung) in ladder.iter().enumerate() {
            args.extend([
                format!("-filter:v:{i}"),
                format!("scale={}:{}", rung.resolution.width, rung.resolution.height),
                format!("-b:v:{i}"),
                format!("{}k", rung.video_bitrate_kbps),
                format!("-maxrate:v:{i}"),
                format!("{}k", rung.video_bitrate_kbps * 11 / 10),
                format!("-bufsize:v:{i}"),
                format!("{}k", rung.video_bitrate_kbps * 2),
                format!("-profile:v:{i}"),
                rung.profile.clone(),
                format!("-level:v:{i}"),
                rung.level.clone(),
            ]);
        }
    } else {
        args.extend(["-map".into(), "0:v:0".into(), "-map".into(), "0:a:0?".into()]);
        let rung = &ladder[0];
        if request.resolution.is_some() {
            args.extend([
                "-vf".into(),
                format!("scale={}:{}", rung.resolution.width, rung.resolution.height),
            ]);
        }
        args.extend(["-crf".into(), crf.to_string()]);
        if codec == "libx264" {
            args.extend([
                "-profile:v".into(),
                rung.profile.clone(),
                "-level:v".into(),
                rung.level.clone(),
            ]);
        }
    }

    // 4. Codec selection and rate control
    args.extend(["-c:v".into(), codec.into()]);
    args.extend(["-preset".into(), request.speed_priority.preset().into()]);

    // 5. Keyframe alignment: key frames at exact segment boundaries
    args.extend([
        "-g".into(),
        gop.to_string(),
        "-keyint_min".into(),
        gop.to_string(),
        "-sc_threshold".into(),
        "0".into(),
        "-flags".into(),
        "+cgop".into(),
        "-force_key_frames".into(),
        format!("expr:gte(t,n_forced*{segment_duration_secs})"),
    ]);

    // 6. Audio normalisation: stereo downmix, AAC-LC
    let audio_kbps = ladder[0].audio_bitrate_kbps;
    args.extend([
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{audio_kbps}k"),
        "-ac".into(),
        "2".into(),
    ]);

    // 7. Resource hints
    args.extend(["-threads".into(), hints.threads.to_string()]);
    args.extend([
        "-max_muxing_queue_size".into(),
        hints.muxing_queue_size.to_string(),
    ]);

    // 8. Container specialisation and output target
    let output_target = match request.container {
        Container::Mp4 => {
            args.extend([
                "-movflags".into(),
                "+faststart+frag_keyframe+empty_moov".into(),
                "-f".into(),
                "mp4".into(),
            ]);
            output_dir.join("output.mp4")
        }
        Container::Mkv => {
            args.extend(["-f".into(), "matroska".into()]);
            output_dir.join("output.mkv")
        }
        Container::Dash => {
            args.extend([
                "-f".into(),
                "dash".into(),
                "-seg_duration".into(),
                segment_duration_secs.to_string(),
                "-frag_duration".into(),
                FRAGMENT_DURATION_SECS.to_string(),
                "-use_template".into(),
                "1".into(),
                "-use_timeline".into(),
                "1".into(),
                "-init_seg_name".into(),
                "init-stream$RepresentationID$.m4s".into(),
                "-media_seg_name".into(),
                "chunk-stream$RepresentationID$-$Number%05d$.m4s".into(),
                "-adaptation_sets".into(),
                "id=0,streams=v id=1,streams=a".into(),
            ]);
            output_dir.join("manifest.mpd")
        }
        Container::Hls => {
            args.extend([
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                segment_duration_secs.to_string(),
                "-hls_playlist_type".into(),
                "event".into(),
                "-hls_segment_type".into(),
                "fmp4".into(),
                "-hls_flags".into(),
                "independent_segments".into(),
                "-hls_fmp4_init_filename".into(),
                "stream_%v_init.mp4".into(),
                "-hls_segment_filename".into(),
                output_dir
                    .join("stream_%v_seg_%05d.m4s")
                    .to_string_lossy()
                    .into_owned(),
                "-master_pl_name".into(),
                "master.m3u8".into(),
            ]);
            if request.wants_abr() {
                let var_map = (0..ladder.len())
                    .map(|i| format!("v:{i},a:{i}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                args.extend(["-var_stream_map".into(), var_map]);
            } else {
                args.extend(["-var_stream_map".into(), "v:0,a:0".into()]);
            }
            output_dir.join("master.m3u8")
        }
    };

    match request.container {
        Container::Hls => {
            args.push(output_dir.join("stream_%v.m3u8").to_string_lossy().into_owned());
        }
        _ => args.push(output_target.to_string_lossy().into_owned()),
    }

    Ok(EncoderArgs {
        args,
        ladder,
        output_target,
    })
}

/// Stage-one arguments for the two-stage pipeline: encode an intermediate
/// CMAF-compatible fragmented MP4 the packager can consume.
pub fn build_intermediate_args(
    request: &TranscodeRequest,
    intermediate_path: &Path,
    source: &SourceInfo,
    segment_duration_secs: u32,
    cpu_count: usize,
) -> Result<EncoderArgs> {
    let mut mp4_request = request.clone();
    mp4_request.container = Container::Mp4;
    mp4_request.enable_abr = false;

    let output_dir = intermediate_path
        .parent()
        .ok_or_else(|| Error::storage("intermediate path has no parent"))?;
    let mut built = build_encoder_args(
        &mp4_request,
        output_dir,
        source,
        segment_duration_secs,
        cpu_count,
    )?;

    // Point the muxer at the requested intermediate file.
    let target = intermediate_path.to_string_lossy().into_owned();
    if let Some(last) = built.args.last_mut() {
        *last = target.clone();
    }
    built.output_target = intermediate_path.to_path_buf();
    Ok(built)
}

/// Stage-two arguments for Shaka Packager: segment an intermediate MP4
/// into DASH/HLS output inside the scratch directory.
pub fn build_packager_args(
    intermediate_path: &Path,
    output_dir: &Path,
    container: Container,
    segment_duration_secs: u32,
) -> Result<Vec<String>> {
    if !container.is_streaming() {
        return Err(Error::validation(format!(
            "packager output requires a streaming container, got {container}"
        )));
    }

    let input = intermediate_path.to_string_lossy();
    let mut args = vec![
        format!(
            "in={input},stream=video,init_segment={},segment_template={}",
            output_dir.join("init/video_init.mp4").to_string_lossy(),
            output_dir.join("video/video_$Number%05d$.m4s").to_string_lossy(),
        ),
        format!(
            "in={input},stream=audio,init_segment={},segment_template={}",
            output_dir.join("init/audio_init.mp4").to_string_lossy(),
            output_dir.join("audio/audio_$Number%05d$.m4s").to_string_lossy(),
        ),
        "--segment_duration".to_string(),
        segment_duration_secs.to_string(),
    ];

    match container {
        Container::Dash => {
            args.extend([
                "--generate_static_live_mpd".to_string(),
                "--mpd_output".to_string(),
                output_dir
                    .join("manifests/manifest.mpd")
                    .to_string_lossy()
                    .into_owned(),
            ]);
        }
        Container::Hls => {
            args.extend([
                "--hls_master_playlist_output".to_string(),
                output_dir
                    .join("manifests/master.m3u8")
                    .to_string_lossy()
                    .into_owned(),
            ]);
        }
        _ => unreachable!("checked above"),
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_1080p() -> SourceInfo {
        SourceInfo {
            duration_secs: Some(600.0),
            resolution: Some(Resolution::new(1920, 1080)),
        }
    }

    fn has_pair(args: &[String], key: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == key && w[1] == value)
    }

    #[test]
    fn test_mp4_args() {
        let request = TranscodeRequest::new("m1", Container::Mp4, "/in.mkv").with_quality(65);
        let built =
            build_encoder_args(&request, Path::new("/scratch"), &source_1080p(), 4, 8).unwrap();

        assert!(has_pair(&built.args, "-c:v", "libx264"));
        assert!(has_pair(&built.args, "-crf", "24"));
        assert!(has_pair(&built.args, "-movflags", "+faststart+frag_keyframe+empty_moov"));
        assert!(has_pair(&built.args, "-c:a", "aac"));
        assert!(has_pair(&built.args, "-ac", "2"));
        assert_eq!(built.output_target, PathBuf::from("/scratch/output.mp4"));
        assert_eq!(built.ladder.len(), 1);
    }

    #[test]
    fn test_keyframe_alignment() {
        let request = TranscodeRequest::new("m1", Container::Dash, "/in.mkv");
        let built =
            build_encoder_args(&request, Path::new("/scratch"), &source_1080p(), 4, 8).unwrap();

        // 4 s segments at the assumed 30 fps.
        assert!(has_pair(&built.args, "-g", "120"));
        assert!(has_pair(&built.args, "-keyint_min", "120"));
        assert!(has_pair(&built.args, "-sc_threshold", "0"));
        assert!(has_pair(&built.args, "-flags", "+cgop"));
        assert!(has_pair(
            &built.args,
            "-force_key_frames",
            "expr:gte(t,n_forced*4)"
        ));
    }

    #[test]
    fn test_gop_uses_request_frame_rate() {
        let mut request = TranscodeRequest::new("m1", Container::Dash, "/in.mkv");
        request.frame_rate = Some(60.0);
        let built =
            build_encoder_args(&request, Path::new("/scratch"), &source_1080p(), 4, 8).unwrap();
        assert!(has_pair(&built.args, "-g", "240"));
    }

    #[test]
    fn test_dash_abr_ladder() {
        let request = TranscodeRequest::new("m1", Container::Dash, "/in.mkv")
            .with_quality(80)
            .with_abr(true);
        let built =
            build_encoder_args(&request, Path::new("/scratch"), &source_1080p(), 4, 8).unwrap();

        assert_eq!(built.ladder.len(), 3);
        assert!(has_pair(&built.args, "-f", "dash"));
        assert!(has_pair(&built.args, "-frag_duration", "2"));
        // One scale filter per rung.
        assert!(has_pair(&built.args, "-filter:v:0", "scale=1920:1080"));
        assert!(has_pair(&built.args, "-filter:v:1", "scale=1280:720"));
        assert!(has_pair(&built.args, "-filter:v:2", "scale=854:480"));
        assert_eq!(built.output_target, PathBuf::from("/scratch/manifest.mpd"));
    }

    #[test]
    fn test_hls_abr_var_stream_map() {
        let request = TranscodeRequest::new("m1", Container::Hls, "/in.mkv")
            .with_quality(80)
            .with_abr(true);
        let built =
            build_encoder_args(&request, Path::new("/scratch"), &source_1080p(), 4, 8).unwrap();

        assert!(has_pair(&built.args, "-f", "hls"));
        assert!(has_pair(&built.args, "-hls_segment_type", "fmp4"));
        assert!(has_pair(&built.args, "-var_stream_map", "v:0,a:0 v:1,a:1 v:2,a:2"));
        assert_eq!(built.output_target, PathBuf::from("/scratch/master.m3u8"));
    }

    #[test]
    fn test_low_quality_pins_baseline() {
        let request = TranscodeRequest::new("m1", Container::Mp4, "/in.mkv").with_quality(20);
        let built =
            build_encoder_args(&request, Path::new("/scratch"), &source_1080p(), 4, 8).unwrap();
        assert!(has_pair(&built.args, "-profile:v", "baseline"));
        assert!(has_pair(&built.args, "-crf", "32"));
    }

    #[test]
    fn test_seek_before_input() {
        let request = TranscodeRequest::new("m1", Container::Mp4, "/in.mkv").with_seek(12.5);
        let built =
            build_encoder_args(&request, Path::new("/scratch"), &source_1080p(), 4, 8).unwrap();

        let ss = built.args.iter().position(|a| a == "-ss").unwrap();
        let input = built.args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(built.args[ss + 1], "12.500");
    }

    #[test]
    fn test_unknown_codec_rejected() {
        let request = TranscodeRequest::new("m1", Container::Mp4, "/in.mkv").with_codec("vp8");
        assert!(matches!(
            build_encoder_args(&request, Path::new("/s"), &source_1080p(), 4, 8),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_resource_hints_scale_with_priority() {
        let fastest = resource_hints(8, 2, SpeedPriority::Fastest);
        let balanced = resource_hints(8, 2, SpeedPriority::Balanced);
        let quality = resource_hints(8, 2, SpeedPriority::Quality);

        assert_eq!(fastest.threads, 8);
        assert_eq!(balanced.threads, 6);
        assert_eq!(quality.threads, 4);
        assert_eq!(fastest.probesize, "1M");
        assert_eq!(quality.analyzeduration, "10M");
        assert_eq!(balanced.muxing_queue_size, 2048);

        // Never zero threads on tiny machines.
        assert_eq!(resource_hints(1, 1, SpeedPriority::Quality).threads, 1);
    }

    #[test]
    fn test_determinism() {
        let request = TranscodeRequest::new("m1", Container::Dash, "/in.mkv").with_abr(true);
        let a = build_encoder_args(&request, Path::new("/s"), &source_1080p(), 4, 8).unwrap();
        let b = build_encoder_args(&request, Path::new("/s"), &source_1080p(), 4, 8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_intermediate_args_target_file() {
        let request = TranscodeRequest::new("m1", Container::Dash, "/in.mkv").with_abr(true);
        let built = build_intermediate_args(
            &request,
            Path::new("/scratch/intermediate.mp4"),
            &source_1080p(),
            4,
            8,
        )
        .unwrap();

        assert!(has_pair(&built.args, "-f", "mp4"));
        assert_eq!(
            built.args.last().unwrap(),
            "/scratch/intermediate.mp4"
        );
    }

    #[test]
    fn test_packager_args() {
        let args = build_packager_args(
            Path::new("/scratch/intermediate.mp4"),
            Path::new("/scratch"),
            Container::Dash,
            4,
        )
        .unwrap();

        assert!(args[0].starts_with("in=/scratch/intermediate.mp4,stream=video"));
        assert!(args.iter().any(|a| a.ends_with("manifests/manifest.mpd")));
        assert!(has_pair(&args, "--segment_duration", "4"));

        assert!(build_packager_args(
            Path::new("/i.mp4"),
            Path::new("/s"),
            Container::Mp4,
            4
        )
        .is_err());
    }
}
