//! Integration tests for the transcoding engine.
//!
//! These tests drive the real coordinator, runner, content store, event
//! bus and SQLite session store. The external encoder is a shell script
//! that mimics ffmpeg's observable behavior (progress lines on stderr,
//! "Opening ... for writing" announcements, output files on disk), so the
//! whole pipeline runs without ffmpeg installed.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use vodforge::cleanup::{CleanupConfig, CleanupService};
use vodforge::content::{ContentStore, derive_content_hash};
use vodforge::coordinator::{
    CoordinatorConfig, CreateSessionResult, SessionCoordinator,
};
use vodforge::database::repositories::{SessionRepository, SqlxSessionRepository};
use vodforge::database::{init_pool, run_migrations};
use vodforge::domain::{Container, SessionStatus, TranscodeRequest};
use vodforge::encoder::provider::ProviderCatalog;
use vodforge::encoder::runner::{PipelineRunner, RunnerConfig};
use vodforge::events::{SegmentEventBus, StreamEventKind};
use vodforge::health::HealthMonitor;
use vodforge::registry::ProcessRegistry;
use vodforge::{Error, Result};

/// Script header shared by all fake encoders: answer the availability
/// probes the provider catalog issues at construction.
const SCRIPT_HEADER: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then echo "ffmpeg version 6.0-fake"; exit 0; fi
if [ "$2" = "-encoders" ]; then exit 0; fi
for a in "$@"; do last="$a"; done
"#;

/// Writes the single output file, with two progress ticks.
const MP4_BODY: &str = r#"echo "frame=   50 fps= 25 q=-1.0 size=     32kB time=00:00:02.00 bitrate=131.1kbits/s speed=1.00x" >&2
printf 'fakevideo' > "$last"
echo "frame=  100 fps= 25 q=-1.0 size=     64kB time=00:00:04.00 bitrate=131.1kbits/s speed=1.00x" >&2
exit 0
"#;

/// Produces two DASH segments and a manifest, announcing them the way
/// ffmpeg's dash muxer does.
const DASH_BODY: &str = r#"dir=$(dirname "$last")
printf 'seg-one' > "$dir/chunk-stream0-00001.m4s"
echo "Opening '$dir/chunk-stream0-00001.m4s' for writing" >&2
echo "frame=   60 fps= 30 q=-1.0 size=     64kB time=00:00:04.00 bitrate=131.1kbits/s speed=1.00x" >&2
printf 'seg-two' > "$dir/chunk-stream0-00002.m4s"
echo "Opening '$dir/chunk-stream0-00002.m4s' for writing" >&2
echo "frame=  120 fps= 30 q=-1.0 size=    128kB time=00:00:08.00 bitrate=131.1kbits/s speed=1.00x" >&2
printf '<MPD/>' > "$last"
echo "Opening '$last' for writing" >&2
exit 0
"#;

/// Hangs until killed; used for cancellation and admission tests.
const SLEEP_BODY: &str = r#"sleep 30
exit 0
"#;

/// ffprobe stand-in: fixed duration and resolution.
const FFPROBE_SCRIPT: &str = r#"#!/bin/sh
case "$*" in
  *format=duration*) echo "8.000000";;
  *width,height*) echo "1920x1080";;
esac
exit 0
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Fixture {
    coordinator: Arc<SessionCoordinator>,
    sessions: Arc<SqlxSessionRepository>,
    content_store: Arc<ContentStore>,
    registry: Arc<ProcessRegistry>,
    bus: Arc<SegmentEventBus>,
    data_dir: PathBuf,
    _tmp: tempfile::TempDir,
}

impl Fixture {
    /// Build the full stack around a fake encoder script.
    async fn new(encoder_body: &str, max_concurrent: usize) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();

        let encoder = write_script(
            tmp.path(),
            "fake-ffmpeg",
            &format!("{SCRIPT_HEADER}{encoder_body}"),
        );
        let ffprobe = write_script(tmp.path(), "fake-ffprobe", FFPROBE_SCRIPT);

        // File-backed so every pool connection sees the same database; the
        // session tasks and the test body query concurrently.
        let db_url = format!("sqlite:{}?mode=rwc", tmp.path().join("sessions.db").display());
        let pool = init_pool(&db_url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let sessions = Arc::new(SqlxSessionRepository::new(pool));

        let content_store = Arc::new(
            ContentStore::open(data_dir.join("content"), data_dir.join("metadata"), 30)
                .await
                .unwrap(),
        );
        let registry = Arc::new(ProcessRegistry::new(Duration::from_millis(500)));
        let bus = Arc::new(SegmentEventBus::new());
        let health = Arc::new(HealthMonitor::default());
        let runner = Arc::new(PipelineRunner::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            encoder.to_string_lossy().into_owned(),
            None,
            RunnerConfig {
                kill_grace: Duration::from_millis(500),
                progress_interval: Duration::ZERO,
                ..Default::default()
            },
        ));
        let catalog = Arc::new(ProviderCatalog::new(&encoder.to_string_lossy(), None));

        let coordinator = SessionCoordinator::new(
            CoordinatorConfig {
                max_concurrent,
                segment_duration_secs: 4,
                scratch_root: data_dir.clone(),
                ffprobe_path: ffprobe.to_string_lossy().into_owned(),
                cpu_count: 4,
            },
            sessions.clone() as Arc<dyn SessionRepository>,
            Arc::clone(&content_store),
            Arc::clone(&registry),
            Arc::clone(&bus),
            health,
            runner,
            catalog,
        );

        Self {
            coordinator,
            sessions,
            content_store,
            registry,
            bus,
            data_dir,
            _tmp: tmp,
        }
    }

    /// Wait for a session to reach a terminal state.
    async fn wait_terminal(&self, session_id: &str) -> Result<SessionStatus> {
        for _ in 0..200 {
            let session = self.sessions.get(session_id).await?;
            let status = session.session_status();
            if status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("session {session_id} never reached a terminal state");
    }
}

fn mp4_request(media_id: &str) -> TranscodeRequest {
    TranscodeRequest::new(media_id, Container::Mp4, "/media/source.mkv").with_quality(65)
}

mod happy_path {
    use super::*;

    #[tokio::test]
    async fn test_mp4_session_completes_into_cas() {
        let fixture = Fixture::new(MP4_BODY, 4).await;

        let result = fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = result else {
            panic!("expected a new session");
        };
        assert_eq!(session.session_status(), SessionStatus::Starting);

        let status = fixture.wait_terminal(&session.id).await.unwrap();
        assert_eq!(status, SessionStatus::Complete);

        // The session row carries the hash and final CAS directory.
        let finished = fixture.sessions.get(&session.id).await.unwrap();
        let hash = finished.content_hash.clone().expect("hash recorded");
        assert_eq!(hash, derive_content_hash("m1", Container::Mp4, 65, None));
        assert!(finished.progress_percent > 0.0);

        // The artifact is addressable and holds the encoder's output.
        let (metadata, dir) = fixture.content_store.get(&hash).await.unwrap();
        assert_eq!(metadata.media_id, "m1");
        assert!(metadata.size_bytes > 0);
        let served = tokio::fs::read(dir.join("output.mp4")).await.unwrap();
        assert_eq!(served, b"fakevideo");

        // No processes left behind.
        assert!(fixture.registry.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_event_published_exactly_once() {
        let fixture = Fixture::new(MP4_BODY, 4).await;

        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completed);
        fixture
            .bus
            .subscribe(StreamEventKind::StreamCompleted, "test", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        let counter = Arc::clone(&failed);
        fixture
            .bus
            .subscribe(StreamEventKind::StreamFailed, "test", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });

        let result = fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = result else {
            panic!("expected a new session");
        };
        fixture.wait_terminal(&session.id).await.unwrap();

        // Give the terminal publish a moment to dispatch.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_request_is_cache_hit() {
        let fixture = Fixture::new(MP4_BODY, 4).await;

        let result = fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = result else {
            panic!("expected a new session");
        };
        fixture.wait_terminal(&session.id).await.unwrap();

        match fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap()
        {
            CreateSessionResult::CacheHit {
                content_hash,
                session: prior,
                ..
            } => {
                assert_eq!(content_hash, derive_content_hash("m1", Container::Mp4, 65, None));
                assert_eq!(prior.unwrap().id, session.id);
            }
            other => panic!("expected cache hit, got {other:?}"),
        }

        let stats = fixture.content_store.stats();
        assert_eq!(stats.total_count, 1);
    }
}

mod dedup {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_identical_requests_launch_one_encode() {
        let fixture = Fixture::new(SLEEP_BODY, 4).await;

        let first = fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session: created } = first else {
            panic!("expected a new session");
        };

        // Identical request while the first is encoding.
        let second = fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap();
        match second {
            CreateSessionResult::InFlight { session } => {
                assert_eq!(session.id, created.id);
                assert_eq!(session.content_hash, created.content_hash);
            }
            other => panic!("expected in-flight dedup, got {other:?}"),
        }

        // Exactly one encoder process exists.
        for _ in 0..100 {
            if fixture.registry.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(fixture.registry.len(), 1);

        fixture.coordinator.stop(&created.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_different_quality_bucket_is_new_session() {
        let fixture = Fixture::new(SLEEP_BODY, 4).await;

        let first = fixture
            .coordinator
            .create_session(mp4_request("m1").with_quality(65))
            .await
            .unwrap();
        let second = fixture
            .coordinator
            .create_session(mp4_request("m1").with_quality(90))
            .await
            .unwrap();

        let (CreateSessionResult::Created { session: a }, CreateSessionResult::Created { session: b }) =
            (first, second)
        else {
            panic!("expected two distinct sessions");
        };
        assert_ne!(a.content_hash, b.content_hash);

        fixture.coordinator.stop(&a.id).await.unwrap();
        fixture.coordinator.stop(&b.id).await.unwrap();
    }
}

mod admission {
    use super::*;

    #[tokio::test]
    async fn test_admission_rejects_when_saturated() {
        let fixture = Fixture::new(SLEEP_BODY, 1).await;

        let first = fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = first else {
            panic!("expected a new session");
        };

        // A different media id, so dedup does not apply.
        let err = fixture
            .coordinator
            .create_session(mp4_request("m2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));

        // Capacity frees once the first session stops.
        fixture.coordinator.stop(&session.id).await.unwrap();
        fixture.wait_terminal(&session.id).await.unwrap();
        for _ in 0..100 {
            if fixture.coordinator.active_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // The admission permit is released when the session task exits,
        // just after the active entry disappears.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let third = fixture
            .coordinator
            .create_session(mp4_request("m3"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = third else {
            panic!("expected the third request to be admitted");
        };
        fixture.coordinator.stop(&session.id).await.unwrap();
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn test_stop_kills_encoder_and_keeps_stopped_state() {
        let fixture = Fixture::new(SLEEP_BODY, 4).await;

        let completed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completed);
        fixture
            .bus
            .subscribe(StreamEventKind::StreamCompleted, "test", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });

        let result = fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = result else {
            panic!("expected a new session");
        };

        // Wait until the encoder process is actually up, then stop.
        for _ in 0..100 {
            if fixture.registry.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        fixture.coordinator.stop(&session.id).await.unwrap();

        let status = fixture.wait_terminal(&session.id).await.unwrap();
        assert_eq!(status, SessionStatus::Stopped);

        // The encoder process must be gone within the grace period.
        for _ in 0..100 {
            if fixture.registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(fixture.registry.is_empty());

        // No completion event for a stopped session, and the status never
        // rewinds.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert_eq!(
            fixture.sessions.get(&session.id).await.unwrap().session_status(),
            SessionStatus::Stopped
        );

        // Stopping again conflicts.
        assert!(matches!(
            fixture.coordinator.stop(&session.id).await,
            Err(Error::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_partial_output_collected_by_cleanup() {
        let fixture = Fixture::new(SLEEP_BODY, 4).await;

        let result = fixture
            .coordinator
            .create_session(mp4_request("m1"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = result else {
            panic!("expected a new session");
        };

        // Let the runner create the scratch directory.
        for _ in 0..100 {
            if fixture.registry.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let scratch = fixture
            .sessions
            .get(&session.id)
            .await
            .unwrap()
            .directory_path
            .map(PathBuf::from)
            .expect("scratch directory recorded");
        assert!(scratch.exists());

        fixture.coordinator.stop(&session.id).await.unwrap();
        fixture.wait_terminal(&session.id).await.unwrap();

        // The next cleanup cycle removes the terminal session's leftovers.
        let cleanup = CleanupService::new(
            CleanupConfig {
                interval: Duration::from_secs(300),
                max_total_size_bytes: 0,
                session_retention_days: 30,
                orphan_age: Duration::from_secs(1800),
                stale_session_age: Duration::from_secs(1800),
                scratch_root: fixture.data_dir.clone(),
                encoder_binaries: vec![],
            },
            Arc::clone(&fixture.content_store),
            fixture.sessions.clone() as Arc<dyn SessionRepository>,
            Arc::clone(&fixture.registry),
        );
        let report = cleanup.run_cycle().await.unwrap();
        assert!(report.orphan_dirs_removed >= 1);
        assert!(!scratch.exists());
    }
}

mod streaming {
    use super::*;

    fn dash_request(media_id: &str) -> TranscodeRequest {
        TranscodeRequest::new(media_id, Container::Dash, "/media/source.mkv")
            .with_quality(80)
            .with_abr(true)
    }

    #[tokio::test]
    async fn test_dash_segments_flow_into_cas() {
        let fixture = Fixture::new(DASH_BODY, 4).await;

        let result = fixture
            .coordinator
            .create_session(dash_request("show-1"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = result else {
            panic!("expected a new session");
        };

        let status = fixture.wait_terminal(&session.id).await.unwrap();
        assert_eq!(status, SessionStatus::Complete);

        let hash = fixture
            .sessions
            .get(&session.id)
            .await
            .unwrap()
            .content_hash
            .expect("hash recorded");

        let (metadata, dir) = fixture.content_store.get(&hash).await.unwrap();
        let streaming = metadata.streaming.expect("streaming metadata");
        assert_eq!(streaming.segment_count, 2);
        assert_eq!(
            streaming.status,
            vodforge::content::StreamingStatus::Completed
        );
        assert_eq!(streaming.total_duration_secs, 8.0);
        assert_eq!(streaming.quality_profiles.len(), 3);

        // Segments were classified into the video tree, the manifest into
        // manifests/.
        assert!(dir.join("video/chunk-stream0-00001.m4s").exists());
        assert!(dir.join("video/chunk-stream0-00002.m4s").exists());
        let manifest = tokio::fs::read(dir.join("manifests/manifest.mpd"))
            .await
            .unwrap();
        assert_eq!(manifest, b"<MPD/>");

        // The scratch directory is gone after completion.
        let scratch: Vec<_> = std::fs::read_dir(&fixture.data_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("dash_"))
            .collect();
        assert!(scratch.is_empty());
    }

    #[tokio::test]
    async fn test_segment_events_precede_completion() {
        let fixture = Fixture::new(DASH_BODY, 4).await;

        let order: Arc<parking_lot::Mutex<Vec<StreamEventKind>>> = Arc::default();
        for kind in [
            StreamEventKind::SegmentReady,
            StreamEventKind::ManifestUpdated,
            StreamEventKind::StreamCompleted,
            StreamEventKind::StreamFailed,
        ] {
            let log = Arc::clone(&order);
            fixture.bus.subscribe(kind, "order", move |event| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(event.kind);
                }
            });
        }

        let result = fixture
            .coordinator
            .create_session(dash_request("show-2"))
            .await
            .unwrap();
        let CreateSessionResult::Created { session } = result else {
            panic!("expected a new session");
        };
        fixture.wait_terminal(&session.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let seen = order.lock().clone();
        let completed_at = seen
            .iter()
            .position(|k| *k == StreamEventKind::StreamCompleted)
            .expect("stream_completed observed");

        // stream_completed is the last event, after every segment.
        assert_eq!(completed_at, seen.len() - 1);
        assert!(!seen.contains(&StreamEventKind::StreamFailed));
        assert!(
            seen.iter()
                .filter(|k| **k == StreamEventKind::SegmentReady)
                .count()
                >= 2
        );
    }
}

mod recovery {
    use super::*;

    #[tokio::test]
    async fn test_orphan_row_without_process_fails_on_recovery() {
        let fixture = Fixture::new(MP4_BODY, 4).await;

        // Simulate a crash leftover: a running row with no live process.
        let request = mp4_request("m-crashed");
        let model = vodforge::database::models::TranscodeSessionDbModel::from_request(
            &request,
            vodforge::domain::ProviderKind::SoftwareEncoder,
        );
        fixture.sessions.create(&model).await.unwrap();
        fixture
            .sessions
            .update_status(&model.id, SessionStatus::Starting, None)
            .await
            .unwrap();
        fixture
            .sessions
            .update_status(&model.id, SessionStatus::Running, None)
            .await
            .unwrap();

        let recovered = fixture.coordinator.recover_on_startup().await.unwrap();
        assert_eq!(recovered, 1);

        let session = fixture.sessions.get(&model.id).await.unwrap();
        assert_eq!(session.session_status(), SessionStatus::Failed);
        assert_eq!(
            session.error_message.as_deref(),
            Some("recovered after restart")
        );
    }

    #[tokio::test]
    async fn test_session_accounting_invariant() {
        let fixture = Fixture::new(MP4_BODY, 4).await;

        let mut created = Vec::new();
        for i in 0..3 {
            match fixture
                .coordinator
                .create_session(mp4_request(&format!("m{i}")))
                .await
                .unwrap()
            {
                CreateSessionResult::Created { session } => created.push(session.id),
                other => panic!("expected created, got {other:?}"),
            }
        }
        for id in &created {
            fixture.wait_terminal(id).await.unwrap();
        }

        let all = fixture.sessions.list_recent(100).await.unwrap();
        let terminal = all
            .iter()
            .filter(|s| s.session_status().is_terminal())
            .count();
        assert!(terminal <= all.len());
        assert_eq!(all.len(), 3);
        assert_eq!(terminal, 3);
    }
}

mod cleanup_scenarios {
    use super::*;
    use vodforge::utils::scratch::scratch_dir_name;

    /// Scratch dir with no DB row converges to removal in one cycle.
    #[tokio::test]
    async fn test_unknown_scratch_dir_removed() {
        let fixture = Fixture::new(MP4_BODY, 4).await;

        let orphan = fixture.data_dir.join(scratch_dir_name(
            Container::Dash,
            vodforge::domain::ProviderKind::Pipeline,
            "no-such-session",
        ));
        std::fs::create_dir_all(&orphan).unwrap();
        std::fs::write(orphan.join("chunk.m4s"), b"junk").unwrap();

        let cleanup = CleanupService::new(
            CleanupConfig {
                interval: Duration::from_secs(300),
                max_total_size_bytes: 0,
                session_retention_days: 30,
                // Zero threshold: any unknown directory counts at once.
                orphan_age: Duration::ZERO,
                stale_session_age: Duration::from_secs(1800),
                scratch_root: fixture.data_dir.clone(),
                encoder_binaries: vec![],
            },
            Arc::clone(&fixture.content_store),
            fixture.sessions.clone() as Arc<dyn SessionRepository>,
            Arc::clone(&fixture.registry),
        );

        let report = cleanup.run_cycle().await.unwrap();
        assert_eq!(report.orphan_dirs_removed, 1);
        assert!(!orphan.exists());
    }

    /// A tracked process whose session vanished is killed in one cycle.
    #[tokio::test]
    async fn test_registry_orphan_killed() {
        let fixture = Fixture::new(SLEEP_BODY, 4).await;

        use process_utils_spawn::spawn_sleep;
        let (pid, mut child) = spawn_sleep();
        fixture
            .registry
            .register(
                pid,
                "ghost-session",
                vodforge::domain::ProviderKind::SoftwareEncoder,
                "sleep 30",
            )
            .unwrap();

        let stopped = fixture
            .registry
            .cleanup_orphaned(Duration::from_secs(3600), &Default::default())
            .await;
        assert_eq!(stopped, vec![pid]);

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    mod process_utils_spawn {
        pub fn spawn_sleep() -> (u32, tokio::process::Child) {
            use process_utils::ProcessGroupExt;
            let mut cmd = tokio::process::Command::new("sleep");
            cmd.arg("30").own_process_group();
            let child = cmd.spawn().expect("spawn sleep");
            let pid = child.id().expect("pid");
            (pid, child)
        }
    }
}
