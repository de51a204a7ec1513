//! Engine scenarios against shell-script recorders.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use streamkeeper_db::{StateDb, WatcherDispatch};
use streamkeeper_protocol::validation::validate_capture;
use streamkeeper_protocol::{
    CaptureOptions, CaptureRequest, CaptureSpec, ErrorCode, FileQuery, Job, JobId, JobStatus,
    JobUpdate, LiveState, WatcherKey, WatcherRequest, WatcherStatus,
};
use streamkeeper_sentinel::{Engine, EngineConfig, EngineError, EngineMode, StaticProbe};
use streamkeeper_worker::{
    process_group_alive, CommandLauncher, StoredObject, UploadError, UploadSink,
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(20);

fn recorder(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("recorder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn config(temp: &TempDir, binary: PathBuf) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.recordings_dir = temp.path().join("recordings");
    config.database_path = temp.path().join("state.sqlite3");
    config.job_log_dir = Some(temp.path().join("logs"));
    config.recorder.binary = binary;
    config.recorder.kill_grace_secs = 1;
    config.retry.base_delay_ms = 10;
    config.file_index.ttl_secs = 0;
    config
}

async fn start(config: EngineConfig, probe: Arc<StaticProbe>, mode: EngineMode) -> Engine {
    Engine::start_with(config, Arc::new(CommandLauncher::new()), probe, None, mode)
        .await
        .unwrap()
}

fn capture_spec(config: &EngineConfig, room_id: &str) -> CaptureSpec {
    validate_capture(&CaptureRequest::for_room(room_id), &config.validation_limits()).unwrap()
}

/// Write a STARTED row as a crashed engine would have left it.
async fn seed_started(
    db: &StateDb,
    spec: &CaptureSpec,
    pid: Option<i32>,
    identity: Option<String>,
) -> JobId {
    let job_id = JobId::new();
    db.insert_job(&job_id, spec).await.unwrap();
    db.transition_job(
        &job_id,
        &[JobStatus::Pending],
        JobStatus::Started,
        JobUpdate {
            started_at: Some(chrono::Utc::now()),
            pid,
            pid_identity: identity,
            bump_attempt: true,
            ..JobUpdate::default()
        },
    )
    .await
    .unwrap();
    job_id
}

/// Sink that refuses files whose name starts with `bad`.
#[derive(Default)]
struct PickySink {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl UploadSink for PickySink {
    fn name(&self) -> &str {
        "picky"
    }

    async fn put(&self, file: &Path, key: &str) -> Result<StoredObject, UploadError> {
        let name = file.file_name().unwrap().to_string_lossy().into_owned();
        self.seen.lock().unwrap().push(name.clone());
        if name.starts_with("bad") {
            return Err(UploadError::Client {
                status: 403,
                body: "denied".into(),
            });
        }
        Ok(StoredObject {
            location: format!("mem://{}", key),
            bucket: None,
            key: key.to_string(),
        })
    }
}

async fn wait_for_job(engine: &Engine, job_id: &JobId, done: impl Fn(&Job) -> bool) -> Job {
    let deadline = Instant::now() + WAIT;
    loop {
        let job = engine.get_job(job_id).await.unwrap();
        if done(&job) {
            return job;
        }
        assert!(Instant::now() < deadline, "job {} stuck in {}", job_id, job.status);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn terminal(job: &Job) -> bool {
    job.status.is_terminal()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn manual_capture_succeeds_with_its_file() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "printf data > \"$PWD/clip.mp4\"");
    let engine = start(config(&temp, bin), Arc::new(StaticProbe::new()), EngineMode::Embedded).await;

    let job = engine
        .submit_recording(&CaptureRequest::for_room("123").with_duration(5))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let done = wait_for_job(&engine, &job.job_id, terminal).await;
    assert_eq!(done.status, JobStatus::Success);
    assert_eq!(done.result.returncode, Some(0));
    assert_eq!(done.result.files.len(), 1);
    assert!(done.result.files[0].ends_with("clip.mp4"));
    assert!(done.result.started_at.is_some());
    assert!(done.result.error_code.is_none());
    assert_eq!(done.attempts, 1);

    let page = engine
        .list_files(&FileQuery {
            room_id: Some("123".into()),
            ..FileQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].name, "clip.mp4");

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_input_is_rejected_without_side_effects() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "exit 0");
    let engine = start(config(&temp, bin), Arc::new(StaticProbe::new()), EngineMode::Embedded).await;

    let both = CaptureRequest {
        room_id: Some("1".into()),
        url: Some("https://www.tiktok.com/@someone/live".into()),
        ..CaptureRequest::default()
    };
    assert!(matches!(
        engine.submit_recording(&both).await,
        Err(EngineError::Validation(_))
    ));

    let too_fast = WatcherRequest {
        room_id: Some("1".into()),
        poll_interval: Some(5),
        ..WatcherRequest::default()
    };
    assert!(matches!(
        engine.register_watcher(&too_fast).await,
        Err(EngineError::Validation(_))
    ));

    let bad_page = FileQuery {
        page: 0,
        ..FileQuery::default()
    };
    assert!(matches!(
        engine.list_files(&bad_page).await,
        Err(EngineError::Validation(_))
    ));

    let stats = engine.queue_stats().await.unwrap();
    assert_eq!(stats.outstanding(), 0);
    assert!(engine.list_watchers(true).await.unwrap().is_empty());

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revoking_a_running_capture_kills_its_tree() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "sleep 60 & sleep 60; wait");
    let engine = start(config(&temp, bin), Arc::new(StaticProbe::new()), EngineMode::Embedded).await;

    let job = engine
        .submit_recording(&CaptureRequest::for_room("7"))
        .await
        .unwrap();
    let running = wait_for_job(&engine, &job.job_id, |j| j.status == JobStatus::Started).await;
    let pid = running.pid.expect("running job records its pid");

    engine.revoke_job(&job.job_id).await.unwrap();
    let done = wait_for_job(&engine, &job.job_id, terminal).await;
    assert_eq!(done.status, JobStatus::Revoked);
    assert!(!process_group_alive(pid));

    assert!(matches!(
        engine.revoke_job(&job.job_id).await,
        Err(EngineError::Conflict(_))
    ));

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_revoked_pending_job_never_starts() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "sleep 60");
    let mut config = config(&temp, bin);
    config.workers.heavy = 1;
    let engine = start(config, Arc::new(StaticProbe::new()), EngineMode::Embedded).await;

    let first = engine
        .submit_recording(&CaptureRequest::for_room("1"))
        .await
        .unwrap();
    wait_for_job(&engine, &first.job_id, |j| j.status == JobStatus::Started).await;

    let second = engine
        .submit_recording(&CaptureRequest::for_room("2"))
        .await
        .unwrap();
    engine.revoke_job(&second.job_id).await.unwrap();

    engine.revoke_job(&first.job_id).await.unwrap();
    wait_for_job(&engine, &first.job_id, terminal).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = engine.get_job(&second.job_id).await.unwrap();
    assert_eq!(second.status, JobStatus::Revoked);
    assert_eq!(second.attempts, 0);
    assert!(second.result.started_at.is_none());

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_recorder_fails_without_consuming_an_attempt() {
    let temp = TempDir::new().unwrap();
    let engine = start(
        config(&temp, temp.path().join("no-such-recorder")),
        Arc::new(StaticProbe::new()),
        EngineMode::Embedded,
    )
    .await;

    let job = engine
        .submit_recording(&CaptureRequest::for_room("1"))
        .await
        .unwrap();
    let done = wait_for_job(&engine, &job.job_id, terminal).await;
    assert_eq!(done.status, JobStatus::Failure);
    assert_eq!(done.result.error_code, Some(ErrorCode::DependencyMissing));
    assert_eq!(done.attempts, 0);
    assert!(done.result.started_at.is_some());
    assert!(done.pid.is_none());

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn network_timeouts_retry_until_attempts_run_out() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "echo 'connection timed out' >&2; exit 4");
    let mut config = config(&temp, bin);
    config.retry.max_attempts = 2;
    let engine = start(config, Arc::new(StaticProbe::new()), EngineMode::Embedded).await;

    let job = engine
        .submit_recording(&CaptureRequest::for_room("1"))
        .await
        .unwrap();
    let done = wait_for_job(&engine, &job.job_id, terminal).await;
    assert_eq!(done.status, JobStatus::Failure);
    assert_eq!(done.result.error_code, Some(ErrorCode::NetworkTimeout));
    assert_eq!(done.result.returncode, Some(4));
    assert_eq!(done.attempts, 2);

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn offline_exit_is_terminal_at_once() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "echo 'not live' >&2; exit 5");
    let engine = start(config(&temp, bin), Arc::new(StaticProbe::new()), EngineMode::Embedded).await;

    let job = engine
        .submit_recording(&CaptureRequest::for_room("1"))
        .await
        .unwrap();
    let done = wait_for_job(&engine, &job.job_id, terminal).await;
    assert_eq!(done.status, JobStatus::Failure);
    assert_eq!(done.result.error_code, Some(ErrorCode::LiveOffline));
    assert_eq!(done.attempts, 1);

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watcher_going_live_dispatches_one_capture() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "printf data > \"$PWD/live.mp4\"");
    let probe = Arc::new(StaticProbe::new());
    let key = WatcherKey::from("555");
    probe.set(&key, LiveState::Live);
    let engine = start(config(&temp, bin), Arc::clone(&probe), EngineMode::Serve).await;

    let watcher = engine
        .register_watcher(&WatcherRequest {
            room_id: Some("555".into()),
            poll_interval: Some(10),
            ..WatcherRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(watcher.key, key);
    assert_eq!(watcher.status, WatcherStatus::Active);

    let deadline = Instant::now() + WAIT;
    let job = loop {
        let jobs = engine.list_recent_jobs(10).await.unwrap();
        if let Some(job) = jobs.into_iter().next() {
            break job;
        }
        assert!(Instant::now() < deadline, "watcher never dispatched");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert_eq!(job.watcher_key.as_ref(), Some(&key));

    let done = wait_for_job(&engine, &job.job_id, terminal).await;
    assert_eq!(done.status, JobStatus::Success);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.list_recent_jobs(10).await.unwrap().len(), 1);

    let listed = engine.list_watchers(false).await.unwrap();
    assert!(listed[0].last_run_at.is_some());

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watcher_lifecycle() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "exit 0");
    let engine = start(config(&temp, bin), Arc::new(StaticProbe::new()), EngineMode::Serve).await;

    let request = WatcherRequest {
        room_id: Some("42".into()),
        ..WatcherRequest::default()
    };
    let watcher = engine.register_watcher(&request).await.unwrap();
    assert!(matches!(
        engine.register_watcher(&request).await,
        Err(EngineError::Conflict(_))
    ));
    wait_until(|| engine.is_armed(&watcher.key)).await;

    let paused = engine.pause_watcher(&watcher.key).await.unwrap();
    assert_eq!(paused.status, WatcherStatus::Paused);
    wait_until(|| !engine.is_armed(&watcher.key)).await;

    let resumed = engine.resume_watcher(&watcher.key).await.unwrap();
    assert_eq!(resumed.status, WatcherStatus::Active);
    wait_until(|| engine.is_armed(&watcher.key)).await;

    engine.delete_watcher(&watcher.key).await.unwrap();
    assert!(matches!(
        engine.delete_watcher(&watcher.key).await,
        Err(EngineError::NotFound(_))
    ));
    wait_until(|| !engine.is_armed(&watcher.key)).await;

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn startup_recovers_what_a_dead_process_left_behind() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "printf x > \"$PWD/out.mp4\"");
    let config = config(&temp, bin);

    let queued = JobId::new();
    let interrupted = {
        let db = StateDb::open(&config.database_path).await.unwrap();
        let spec = capture_spec(&config, "1");
        let interrupted = seed_started(&db, &spec, None, None).await;
        db.insert_job(&queued, &spec).await.unwrap();
        db.close().await;
        interrupted
    };

    let engine = start(config, Arc::new(StaticProbe::new()), EngineMode::Serve).await;

    let failed = engine.get_job(&interrupted).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failure);
    assert_eq!(failed.result.error_code, Some(ErrorCode::Interrupted));

    let done = wait_for_job(&engine, &queued, terminal).await;
    assert_eq!(done.status, JobStatus::Success);

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_retry_does_not_inherit_files_from_the_failed_attempt() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("first-attempt-done");
    let bin = recorder(
        temp.path(),
        &format!(
            "if [ -f '{m}' ]; then exit 0; fi\ntouch '{m}'\nprintf data > \"$PWD/part1.mp4\"\nexit 4",
            m = marker.display()
        ),
    );
    let engine = start(config(&temp, bin), Arc::new(StaticProbe::new()), EngineMode::Embedded).await;

    let job = engine
        .submit_recording(&CaptureRequest::for_room("8"))
        .await
        .unwrap();
    let done = wait_for_job(&engine, &job.job_id, terminal).await;
    assert_eq!(done.attempts, 2);
    assert_eq!(done.status, JobStatus::Failure);
    assert_eq!(done.result.error_code, Some(ErrorCode::ArtifactMissing));
    assert!(done.result.files.is_empty());

    engine.shutdown().await;
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recovery_only_kills_the_capture_it_recorded() {
    use std::os::unix::process::CommandExt;
    use streamkeeper_worker::process_identity;

    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "exit 0");
    let config = config(&temp, bin);

    let spawn_group = || {
        std::process::Command::new("sleep")
            .arg("60")
            .process_group(0)
            .spawn()
            .unwrap()
    };
    let mut bystander = spawn_group();
    let mut leftover = spawn_group();
    let bystander_pid = bystander.id() as i32;
    let leftover_identity = process_identity(leftover.id()).unwrap();

    let (reused, unrecorded, owned) = {
        let db = StateDb::open(&config.database_path).await.unwrap();
        let spec = capture_spec(&config, "1");
        let stale = Some("old-boot:12345".to_string());
        let reused = seed_started(&db, &spec, Some(bystander_pid), stale).await;
        let unrecorded = seed_started(&db, &spec, Some(bystander_pid), None).await;
        let owned =
            seed_started(&db, &spec, Some(leftover.id() as i32), Some(leftover_identity)).await;
        db.close().await;
        (reused, unrecorded, owned)
    };

    let engine = start(config, Arc::new(StaticProbe::new()), EngineMode::Serve).await;

    for job_id in [&reused, &unrecorded, &owned] {
        let job = engine.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failure);
        assert_eq!(job.result.error_code, Some(ErrorCode::Interrupted));
    }
    assert!(bystander.try_wait().unwrap().is_none(), "unrelated process was signalled");
    assert!(!leftover.wait().unwrap().success());

    bystander.kill().unwrap();
    bystander.wait().unwrap();
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleting_a_watcher_revokes_its_queued_capture() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "exit 0");
    let config = config(&temp, bin);
    let spec = capture_spec(&config, "77");
    let engine = start(config.clone(), Arc::new(StaticProbe::new()), EngineMode::Embedded).await;

    let watcher = engine
        .register_watcher(&WatcherRequest {
            room_id: Some("77".into()),
            ..WatcherRequest::default()
        })
        .await
        .unwrap();

    let db = StateDb::open(&config.database_path).await.unwrap();
    let queued = match db
        .insert_watcher_job(&JobId::new(), &watcher.key, &spec)
        .await
        .unwrap()
    {
        WatcherDispatch::Created(job) => job.job_id,
        other => panic!("unexpected dispatch {other:?}"),
    };
    db.close().await;

    engine.delete_watcher(&watcher.key).await.unwrap();

    let job = engine.get_job(&queued).await.unwrap();
    assert_eq!(job.status, JobStatus::Revoked);
    assert_eq!(job.attempts, 0);
    assert_eq!(engine.queue_stats().await.unwrap().outstanding(), 0);
    assert!(engine.list_watchers(false).await.unwrap().is_empty());

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleting_a_watcher_stops_its_running_capture() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "sleep 60 & sleep 60; wait");
    let probe = Arc::new(StaticProbe::new());
    let key = WatcherKey::from("78");
    probe.set(&key, LiveState::Live);
    let engine = start(config(&temp, bin), Arc::clone(&probe), EngineMode::Serve).await;

    engine
        .register_watcher(&WatcherRequest {
            room_id: Some("78".into()),
            ..WatcherRequest::default()
        })
        .await
        .unwrap();

    let deadline = Instant::now() + WAIT;
    let running = loop {
        let jobs = engine.list_recent_jobs(10).await.unwrap();
        if let Some(job) = jobs.into_iter().find(|j| j.status == JobStatus::Started) {
            break job;
        }
        assert!(Instant::now() < deadline, "watcher capture never started");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    let pid = running.pid.expect("running job records its pid");

    engine.delete_watcher(&key).await.unwrap();
    let done = wait_for_job(&engine, &running.job_id, terminal).await;
    assert_eq!(done.status, JobStatus::Revoked);
    assert!(!process_group_alive(pid));
    assert_eq!(engine.queue_stats().await.unwrap().outstanding(), 0);
    wait_until(|| !engine.is_armed(&key)).await;

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watchers_are_rearmed_once_after_a_restart() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(temp.path(), "exit 0");
    let config = config(&temp, bin);
    let key = WatcherKey::from("91");

    let first = start(config.clone(), Arc::new(StaticProbe::new()), EngineMode::Serve).await;
    first
        .register_watcher(&WatcherRequest {
            room_id: Some("91".into()),
            ..WatcherRequest::default()
        })
        .await
        .unwrap();
    wait_until(|| first.is_armed(&key)).await;
    first.shutdown().await;

    let probe = Arc::new(StaticProbe::new());
    let engine = start(config, Arc::clone(&probe), EngineMode::Serve).await;
    wait_until(|| engine.is_armed(&key)).await;
    wait_until(|| probe.checks(&key) >= 1).await;

    let report = engine.recover().await.unwrap();
    assert_eq!(report.rearmed, 1);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(engine.is_armed(&key));
    assert_eq!(probe.checks(&key), 1, "a second poll loop was started");

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn uploads_follow_success_and_record_each_file() {
    let temp = TempDir::new().unwrap();
    let bin = recorder(
        temp.path(),
        "case \"$* \" in *'-room_id 3 '*) printf c > \"$PWD/partial.mp4\"; exit 5;; esac\n\
         printf a > \"$PWD/good.mp4\"; printf b > \"$PWD/bad.mp4\"",
    );
    let mut config = config(&temp, bin);
    config.upload.max_attempts = Some(1);
    let sink = Arc::new(PickySink::default());
    let engine = Engine::start_with(
        config,
        Arc::new(CommandLauncher::new()),
        Arc::new(StaticProbe::new()),
        Some(Arc::clone(&sink) as Arc<dyn UploadSink>),
        EngineMode::Embedded,
    )
    .await
    .unwrap();

    let with_upload = |room: &str| CaptureRequest {
        options: CaptureOptions {
            upload: true,
            ..CaptureOptions::default()
        },
        ..CaptureRequest::for_room(room)
    };

    let uploaded = engine.submit_recording(&with_upload("1")).await.unwrap();
    let skipped = engine
        .submit_recording(&CaptureRequest::for_room("2"))
        .await
        .unwrap();
    let failed = engine.submit_recording(&with_upload("3")).await.unwrap();

    let uploaded = wait_for_job(&engine, &uploaded.job_id, terminal).await;
    assert_eq!(uploaded.status, JobStatus::Success);
    assert_eq!(uploaded.result.uploads.len(), 2);
    let good = uploaded
        .result
        .uploads
        .iter()
        .find(|u| u.file.ends_with("good.mp4"))
        .unwrap();
    assert!(good.ok);
    assert!(good.location.as_deref().unwrap().starts_with("mem://"));
    let bad = uploaded
        .result
        .uploads
        .iter()
        .find(|u| u.file.ends_with("bad.mp4"))
        .unwrap();
    assert!(!bad.ok);
    assert!(bad.error.is_some());

    let skipped = wait_for_job(&engine, &skipped.job_id, terminal).await;
    assert_eq!(skipped.status, JobStatus::Success);
    assert!(skipped.result.uploads.is_empty());

    let failed = wait_for_job(&engine, &failed.job_id, terminal).await;
    assert_eq!(failed.status, JobStatus::Failure);
    assert!(failed.result.uploads.is_empty());

    let mut seen = sink.seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["bad.mp4".to_string(), "good.mp4".to_string()]);

    engine.shutdown().await;
}
