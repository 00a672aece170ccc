//! Pipeline runner: external encoder process supervision.
//!
//! One runner invocation owns one session's encoder processes from spawn to
//! exit. It registers pids with the process registry, parses stderr
//! progress, publishes segment/manifest/progress events on the bus and
//! reacts to cooperative cancellation within one progress tick.
//!
//! Terminal events (`stream_completed` / `stream_failed`) are *not*
//! published here: the coordinator owns the terminal state write and must
//! commit it to the session store before anything is announced externally.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use abr::SegmentKind;

use crate::domain::{Container, ProviderKind};
use crate::encoder::parser;
use crate::encoder::provider::EncodePlan;
use crate::encoder::reader::StderrRecords;
use crate::events::{SegmentEventBus, StreamEvent};
use crate::registry::ProcessRegistry;
use crate::{Error, Result};

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Grace period between a graceful stop request and a group kill.
    pub kill_grace: Duration,
    /// Minimum interval between progress events.
    pub progress_interval: Duration,
    /// Stderr lines retained for failure diagnostics.
    pub stderr_tail_lines: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_secs(10),
            progress_interval: Duration::from_secs(1),
            stderr_tail_lines: 40,
        }
    }
}

/// Everything the runner needs to know about one session run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: String,
    pub content_hash: String,
    pub provider: ProviderKind,
    pub container: Container,
    pub scratch_dir: PathBuf,
    /// Probed media duration (minus seek), for percent-complete.
    pub total_duration_secs: Option<f64>,
    pub cancel_token: CancellationToken,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// A stop was requested and honored.
    Stopped,
    Failed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Supervises encoder (and packager) processes for sessions.
pub struct PipelineRunner {
    registry: Arc<ProcessRegistry>,
    bus: Arc<SegmentEventBus>,
    ffmpeg_path: String,
    packager_path: Option<String>,
    config: RunnerConfig,
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        bus: Arc<SegmentEventBus>,
        ffmpeg_path: impl Into<String>,
        packager_path: Option<String>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            ffmpeg_path: ffmpeg_path.into(),
            packager_path,
            config,
        }
    }

    /// Execute an encode plan to completion, stop or failure.
    pub async fn run(&self, ctx: &RunContext, plan: EncodePlan) -> Result<RunOutcome> {
        tokio::fs::create_dir_all(&ctx.scratch_dir)
            .await
            .map_err(|e| Error::storage(format!("creating scratch dir: {e}")))?;

        match plan {
            EncodePlan::Single { encoder } => {
                // Files are only announced live for segmented output; a
                // plain mp4/mkv is ingested whole by the coordinator.
                let announce = ctx.container.is_streaming();
                let outcome = self
                    .run_encoder_stage(ctx, &encoder.args, announce)
                    .await?;
                if outcome.is_completed() && announce {
                    self.sweep_outputs(ctx).await;
                }
                Ok(outcome)
            }
            EncodePlan::TwoStage {
                encoder,
                packager_args,
                ..
            } => {
                // Stage 1 writes the intermediate; its output is not
                // publishable content, so nothing is announced.
                let outcome = self.run_encoder_stage(ctx, &encoder.args, false).await?;
                if !outcome.is_completed() {
                    return Ok(outcome);
                }

                info!(
                    session_id = %ctx.session_id,
                    "Intermediate encode complete, starting packager stage"
                );
                let outcome = self.run_packager_stage(ctx, &packager_args).await?;
                if outcome.is_completed() {
                    self.sweep_outputs(ctx).await;
                }
                Ok(outcome)
            }
        }
    }

    /// Run the ffmpeg stage: spawn, monitor stderr, wait for exit.
    async fn run_encoder_stage(
        &self,
        ctx: &RunContext,
        args: &[String],
        announce_files: bool,
    ) -> Result<RunOutcome> {
        let mut cmd = process_utils::tokio_command(&self.ffmpeg_path);
        cmd.args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::internal(format!("Failed to spawn ffmpeg: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::internal("ffmpeg exited before pid was known"))?;
        let command_line = format!("{} {}", self.ffmpeg_path, args.join(" "));
        self.registry
            .register(pid, &ctx.session_id, ctx.provider, &command_line)?;
        info!(session_id = %ctx.session_id, pid, "Encoder process started");

        let stdin = child.stdin.take();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::internal("Failed to capture ffmpeg stderr"))?;

        let exit_rx = self.spawn_exit_waiter(child, pid, stdin, ctx.cancel_token.clone());

        // Monitor stderr on this task so events stay in order.
        let mut reader = StderrRecords::new(stderr);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.config.stderr_tail_lines);
        let mut announced: HashSet<PathBuf> = HashSet::new();
        let mut active_output: Option<PathBuf> = None;
        let mut last_progress = Instant::now() - self.config.progress_interval;

        loop {
            match reader.next_record().await {
                Ok(Some(line)) => {
                    if tail.len() == self.config.stderr_tail_lines {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());

                    if let Some(progress) = parser::parse_progress(&line) {
                        if last_progress.elapsed() >= self.config.progress_interval {
                            last_progress = Instant::now();
                            let snapshot = progress.to_snapshot(ctx.total_duration_secs);
                            self.bus
                                .publish(StreamEvent::progress_update(
                                    &ctx.session_id,
                                    &ctx.content_hash,
                                    snapshot,
                                ))
                                .await;
                        }
                    } else if announce_files
                        && parser::is_output_open(&line)
                        && let Some(opened) = parser::parse_opened_path(&line)
                    {
                        // A new output opening means the previous one is
                        // fully written and safe to publish.
                        let opened = absolutize(&ctx.scratch_dir, opened);
                        if let Some(done) = active_output.replace(opened) {
                            self.announce_file(ctx, &done, &mut announced).await;
                        }
                    } else if line.contains("Error") || line.contains("error") {
                        warn!(session_id = %ctx.session_id, line = %line, "Encoder error output");
                        self.bus
                            .publish(StreamEvent::encoding_error(
                                &ctx.session_id,
                                &ctx.content_hash,
                                line.clone(),
                            ))
                            .await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(session_id = %ctx.session_id, error = %e, "Error reading encoder output");
                    break;
                }
            }
        }

        // The stream closed, so the process is exiting; collect its status.
        let exit_code = exit_rx.await.ok().flatten();
        self.registry.unregister(pid);

        if announce_files
            && let Some(done) = active_output.take()
            && !ctx.cancel_token.is_cancelled()
        {
            self.announce_file(ctx, &done, &mut announced).await;
        }

        Ok(self.outcome_from_exit(ctx, exit_code, &tail))
    }

    /// Run the packager stage of a two-stage plan.
    async fn run_packager_stage(&self, ctx: &RunContext, args: &[String]) -> Result<RunOutcome> {
        let packager = self
            .packager_path
            .as_deref()
            .ok_or_else(|| Error::config("packager binary not configured"))?;

        for subdir in ["manifests", "init", "video", "audio", "segments"] {
            let _ = tokio::fs::create_dir_all(ctx.scratch_dir.join(subdir)).await;
        }

        let mut cmd = process_utils::tokio_command(packager);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::internal(format!("Failed to spawn packager: {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::internal("packager exited before pid was known"))?;
        self.registry.register(
            pid,
            &ctx.session_id,
            ctx.provider,
            format!("{packager} {}", args.join(" ")),
        )?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::internal("Failed to capture packager stderr"))?;
        let exit_rx = self.spawn_exit_waiter(child, pid, None, ctx.cancel_token.clone());

        let mut reader = StderrRecords::new(stderr);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.config.stderr_tail_lines);
        while let Ok(Some(line)) = reader.next_record().await {
            if tail.len() == self.config.stderr_tail_lines {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        let exit_code = exit_rx.await.ok().flatten();
        self.registry.unregister(pid);

        Ok(self.outcome_from_exit(ctx, exit_code, &tail))
    }

    /// Spawn the task that waits for process exit and honors cancellation:
    /// graceful stop first (ffmpeg reads `q` on stdin), group kill after
    /// the grace period.
    fn spawn_exit_waiter(
        &self,
        mut child: Child,
        pid: u32,
        mut stdin: Option<tokio::process::ChildStdin>,
        cancel_token: CancellationToken,
    ) -> tokio::sync::oneshot::Receiver<Option<i32>> {
        let (exit_tx, exit_rx) = tokio::sync::oneshot::channel::<Option<i32>>();
        let grace = self.config.kill_grace;

        tokio::spawn(async move {
            let exit_code = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(exit_status) => exit_status.code(),
                        Err(e) => {
                            error!(pid, error = %e, "Error waiting for encoder process");
                            Some(-1)
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    debug!(pid, "Stop requested, attempting graceful shutdown");
                    if let Some(mut stdin) = stdin.take() {
                        let _ = stdin.write_all(b"q").await;
                        let _ = stdin.flush().await;
                        let _ = stdin.shutdown().await;
                    } else {
                        let _ = process_utils::terminate_group(pid);
                    }

                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(Ok(exit_status)) => exit_status.code(),
                        Ok(Err(e)) => {
                            error!(pid, error = %e, "Error waiting after stop request");
                            Some(-1)
                        }
                        Err(_) => {
                            warn!(pid, "Process survived grace period, killing group");
                            let _ = process_utils::kill_group(pid);
                            let _ = child.kill().await;
                            child.wait().await.ok().and_then(|s| s.code())
                        }
                    }
                }
            };
            let _ = exit_tx.send(exit_code);
        });

        exit_rx
    }

    fn outcome_from_exit(
        &self,
        ctx: &RunContext,
        exit_code: Option<i32>,
        tail: &VecDeque<String>,
    ) -> RunOutcome {
        if ctx.cancel_token.is_cancelled() {
            info!(session_id = %ctx.session_id, "Run stopped on request");
            return RunOutcome::Stopped;
        }
        match exit_code {
            Some(0) => RunOutcome::Completed,
            code => {
                let stderr_tail = tail.iter().cloned().collect::<Vec<_>>().join("\n");
                warn!(
                    session_id = %ctx.session_id,
                    exit_code = ?code,
                    "Encoder process failed"
                );
                RunOutcome::Failed {
                    exit_code: code,
                    stderr_tail,
                }
            }
        }
    }

    /// Publish the right event for one finished output file.
    async fn announce_file(&self, ctx: &RunContext, path: &Path, announced: &mut HashSet<PathBuf>) {
        if !announced.insert(path.to_path_buf()) {
            // ffmpeg reopens manifests repeatedly; only re-announce those.
            if SegmentKind::classify(path) != SegmentKind::Manifest {
                return;
            }
        }

        match SegmentKind::classify(path) {
            SegmentKind::Manifest => {
                self.bus
                    .publish(StreamEvent::manifest_updated(
                        &ctx.session_id,
                        &ctx.content_hash,
                        path.to_path_buf(),
                    ))
                    .await;
            }
            _ => {
                self.bus
                    .publish(StreamEvent::segment_ready(
                        &ctx.session_id,
                        &ctx.content_hash,
                        path.to_path_buf(),
                        None,
                    ))
                    .await;
            }
        }
    }

    /// Announce output files that never appeared on stderr (packager
    /// output, the final segment of a stream). Segments go first so a
    /// manifest never references a file that is not yet addressable.
    async fn sweep_outputs(&self, ctx: &RunContext) {
        let mut media = Vec::new();
        let mut manifests = Vec::new();
        let mut stack = vec![ctx.scratch_dir.clone()];

        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.file_name().and_then(|n| n.to_str()) == Some("intermediate.mp4") {
                    continue;
                }
                match SegmentKind::classify(&path) {
                    SegmentKind::Manifest => manifests.push(path),
                    _ => media.push(path),
                }
            }
        }

        let mut announced = HashSet::new();
        for path in media {
            self.announce_file(ctx, &path, &mut announced).await;
        }
        for path in manifests {
            self.announce_file(ctx, &path, &mut announced).await;
        }
    }
}

/// Resolve a path ffmpeg printed relative to the scratch directory.
fn absolutize(scratch_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        scratch_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{StreamEventKind, StreamEventPayload};

    fn test_ctx(cancel: CancellationToken) -> RunContext {
        RunContext {
            session_id: "s1".to_string(),
            content_hash: "ab".repeat(32),
            provider: ProviderKind::SoftwareEncoder,
            container: Container::Dash,
            scratch_dir: PathBuf::from("/tmp/vodforge-test-scratch"),
            total_duration_secs: Some(60.0),
            cancel_token: cancel,
        }
    }

    fn runner_with_bus() -> (PipelineRunner, Arc<SegmentEventBus>) {
        let bus = Arc::new(SegmentEventBus::new());
        let registry = Arc::new(ProcessRegistry::new(Duration::from_millis(200)));
        let runner = PipelineRunner::new(
            registry,
            Arc::clone(&bus),
            "/nonexistent/ffmpeg",
            None,
            RunnerConfig::default(),
        );
        (runner, bus)
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize(Path::new("/scratch"), PathBuf::from("seg.m4s")),
            PathBuf::from("/scratch/seg.m4s")
        );
        assert_eq!(
            absolutize(Path::new("/scratch"), PathBuf::from("/abs/seg.m4s")),
            PathBuf::from("/abs/seg.m4s")
        );
    }

    #[test]
    fn test_outcome_mapping() {
        let (runner, _bus) = runner_with_bus();
        let ctx = test_ctx(CancellationToken::new());
        let tail: VecDeque<String> = VecDeque::from(["boom".to_string()]);

        assert_eq!(
            runner.outcome_from_exit(&ctx, Some(0), &tail),
            RunOutcome::Completed
        );
        assert!(matches!(
            runner.outcome_from_exit(&ctx, Some(1), &tail),
            RunOutcome::Failed { exit_code: Some(1), ref stderr_tail } if stderr_tail == "boom"
        ));

        // A requested stop overrides the exit code.
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let ctx = test_ctx(cancelled);
        assert_eq!(
            runner.outcome_from_exit(&ctx, Some(255), &tail),
            RunOutcome::Stopped
        );
    }

    #[tokio::test]
    async fn test_announce_dedups_segments_not_manifests() {
        let (runner, bus) = runner_with_bus();
        let ctx = test_ctx(CancellationToken::new());

        let events: Arc<parking_lot::Mutex<Vec<StreamEventKind>>> = Arc::default();
        let log = Arc::clone(&events);
        bus.subscribe(StreamEventKind::SegmentReady, "t", move |e| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(e.kind);
            }
        });
        let log = Arc::clone(&events);
        bus.subscribe(StreamEventKind::ManifestUpdated, "t", move |e| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(e.kind);
            }
        });

        let mut announced = HashSet::new();
        let seg = PathBuf::from("/s/chunk-stream0-00001.m4s");
        let mpd = PathBuf::from("/s/manifest.mpd");

        runner.announce_file(&ctx, &seg, &mut announced).await;
        runner.announce_file(&ctx, &seg, &mut announced).await;
        runner.announce_file(&ctx, &mpd, &mut announced).await;
        runner.announce_file(&ctx, &mpd, &mut announced).await;

        let seen = events.lock().clone();
        assert_eq!(
            seen,
            vec![
                StreamEventKind::SegmentReady,
                StreamEventKind::ManifestUpdated,
                StreamEventKind::ManifestUpdated,
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let (runner, _bus) = runner_with_bus();
        let ctx = test_ctx(CancellationToken::new());
        let plan = EncodePlan::Single {
            encoder: crate::encoder::args::EncoderArgs {
                args: vec!["-i".into(), "/in.mkv".into(), "/tmp/out.mp4".into()],
                ladder: Vec::new(),
                output_target: PathBuf::from("/tmp/out.mp4"),
            },
        };
        assert!(runner.run(&ctx, plan).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_real_process_completes() {
        // Use /bin/echo as a stand-in encoder: exits 0 immediately.
        let bus = Arc::new(SegmentEventBus::new());
        let registry = Arc::new(ProcessRegistry::new(Duration::from_millis(200)));
        let runner = PipelineRunner::new(
            Arc::clone(&registry),
            bus,
            "/bin/echo",
            None,
            RunnerConfig::default(),
        );

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_ctx(CancellationToken::new());
        ctx.container = Container::Mp4;
        ctx.scratch_dir = dir.path().to_path_buf();

        let plan = EncodePlan::Single {
            encoder: crate::encoder::args::EncoderArgs {
                args: vec!["done".into()],
                ladder: Vec::new(),
                output_target: dir.path().join("output.mp4"),
            },
        };

        let outcome = runner.run(&ctx, plan).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let bus = Arc::new(SegmentEventBus::new());
        let registry = Arc::new(ProcessRegistry::new(Duration::from_millis(200)));
        let runner = PipelineRunner::new(
            Arc::clone(&registry),
            bus,
            "/bin/sleep",
            None,
            RunnerConfig {
                kill_grace: Duration::from_millis(300),
                ..Default::default()
            },
        );

        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut ctx = test_ctx(cancel.clone());
        ctx.container = Container::Mp4;
        ctx.scratch_dir = dir.path().to_path_buf();

        let plan = EncodePlan::Single {
            encoder: crate::encoder::args::EncoderArgs {
                args: vec!["30".into()],
                ladder: Vec::new(),
                output_target: dir.path().join("output.mp4"),
            },
        };

        let cancel_after = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_after.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = runner.run(&ctx, plan).await.unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        // Graceful stop + grace period, not the full 30 s sleep.
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(registry.is_empty());
    }
}
