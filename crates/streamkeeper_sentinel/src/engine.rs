//! Engine facade.
//!
//! Owns the store handle, both worker lanes, the poll scheduler and the file
//! index, and exposes the operations callers use: submit, register, delete,
//! revoke, query. Validation and conflict errors come back synchronously;
//! everything that happens after a job id is issued is observed through
//! [`Engine::get_job`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use streamkeeper_db::StateDb;
use streamkeeper_protocol::defaults::{INTERRUPTED_MESSAGE, REVOKED_BY_USER_MESSAGE};
use streamkeeper_protocol::validation::validate_watcher;
use streamkeeper_protocol::{
    CaptureRequest, ErrorCode, FilePage, FileQuery, Job, JobId, JobRef, JobStatus, JobUpdate,
    QueueStats, Watcher, WatcherKey, WatcherRef, WatcherRequest,
};
use streamkeeper_worker::{
    kill_orphaned_capture, CancellationToken, CaptureLauncher, Supervisor, UploadSink,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::file_index::FileIndex;
use crate::metrics::{MetricsSnapshot, METRICS};
use crate::pool::{shared, spawn_heavy_lane, spawn_light_lane, ActiveJobs, ControlTask};
use crate::probe::LiveStatusProbe;
use crate::registry::WatcherRegistry;
use crate::runner::CaptureRunner;
use crate::scheduler::PollScheduler;

/// Lost races tolerated by a single revoke before giving up.
const REVOKE_ATTEMPTS: usize = 5;

/// How long shutdown waits for lane workers and poll loops.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Long-running process: recovers the store, arms watchers, reconciles.
    Serve,
    /// One-shot use from the CLI. Runs captures it submits itself and leaves
    /// watchers and leftover jobs to the serving process.
    Embedded,
}

/// What startup recovery found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// STARTED jobs written FAILURE/INTERRUPTED
    pub interrupted: usize,
    /// Leftover process groups that were still alive and got killed
    pub killed: usize,
    /// PENDING/RETRY jobs put back on the capture lane
    pub requeued: usize,
    pub rearmed: usize,
}

pub struct Engine {
    config: EngineConfig,
    mode: EngineMode,
    db: StateDb,
    registry: WatcherRegistry,
    dispatcher: Dispatcher,
    scheduler: Arc<PollScheduler>,
    active: ActiveJobs,
    files: FileIndex,
    control: mpsc::UnboundedSender<ControlTask>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Start a serving engine: recovery, watcher re-arm and periodic reconcile.
    pub async fn start(
        config: EngineConfig,
        launcher: Arc<dyn CaptureLauncher>,
        probe: Arc<dyn LiveStatusProbe>,
        upload_sink: Option<Arc<dyn UploadSink>>,
    ) -> anyhow::Result<Self> {
        Self::start_with(config, launcher, probe, upload_sink, EngineMode::Serve).await
    }

    pub async fn start_with(
        config: EngineConfig,
        launcher: Arc<dyn CaptureLauncher>,
        probe: Arc<dyn LiveStatusProbe>,
        upload_sink: Option<Arc<dyn UploadSink>>,
        mode: EngineMode,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.recordings_dir).with_context(|| {
            format!(
                "Failed to create recordings directory {}",
                config.recordings_dir.display()
            )
        })?;
        let db = StateDb::open(&config.database_path)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

        let shutdown = CancellationToken::new();
        let active = ActiveJobs::new();
        let (heavy_tx, heavy_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let registry = WatcherRegistry::new(db.clone());
        let dispatcher = Dispatcher::new(db.clone(), config.validation_limits(), heavy_tx.clone());
        let supervisor = Supervisor::new(config.supervisor_config(), launcher);
        let runner = Arc::new(CaptureRunner::new(
            db.clone(),
            supervisor,
            upload_sink,
            config.upload_strategy(),
            config.retry.clone(),
            active.clone(),
            heavy_tx,
            shutdown.clone(),
        ));
        let scheduler = Arc::new(PollScheduler::new(
            registry.clone(),
            dispatcher.clone(),
            probe,
            config.poll.clone(),
            shutdown.clone(),
        ));

        let mut handles = spawn_heavy_lane(
            config.workers.heavy,
            runner,
            shared(heavy_rx),
            shutdown.clone(),
        );
        handles.extend(spawn_light_lane(
            config.workers.light,
            Arc::clone(&scheduler),
            shared(control_rx),
            shutdown.clone(),
        ));

        let files = FileIndex::new(
            config.recordings_dir.clone(),
            Duration::from_secs(config.file_index.ttl_secs),
            config.file_index.default_page_size,
            config.file_index.max_page_size,
        );

        info!(
            mode = ?mode,
            heavy = config.workers.heavy,
            light = config.workers.light,
            max_children = config.workers.max_children,
            recordings = %config.recordings_dir.display(),
            "Engine started"
        );

        let engine = Self {
            config,
            mode,
            db,
            registry,
            dispatcher,
            scheduler,
            active,
            files,
            control: control_tx,
            shutdown,
            handles: Mutex::new(handles),
        };

        if mode == EngineMode::Serve {
            let report = engine.recover().await.context("Startup recovery failed")?;
            info!(
                interrupted = report.interrupted,
                killed = report.killed,
                requeued = report.requeued,
                rearmed = report.rearmed,
                "Recovery complete"
            );
            engine.spawn_reconcile();
        }

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Bring the store back to a consistent state after a restart.
    ///
    /// STARTED jobs belong to a dead process: their process group is killed
    /// if its leader is provably the recorder that was started, and the job
    /// is failed as interrupted. Queued jobs go
    /// back on the capture lane and active watchers are re-armed.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for job in self.db.list_jobs_with_status(&[JobStatus::Started]).await? {
            if self.active.contains(&job.job_id) {
                continue;
            }
            match (job.pid, job.pid_identity.clone()) {
                (Some(pid), Some(identity)) => {
                    let grace = self.config.kill_grace();
                    let killed = tokio::task::spawn_blocking(move || {
                        kill_orphaned_capture(pid, &identity, grace)
                    })
                    .await
                    .unwrap_or(false);
                    if killed {
                        report.killed += 1;
                        warn!(job_id = %job.job_id, pid, "Killed leftover capture process group");
                    }
                }
                (Some(pid), None) => {
                    debug!(job_id = %job.job_id, pid, "No process identity recorded, leaving pid alone");
                }
                (None, _) => {}
            }

            let update = JobUpdate::error(ErrorCode::Interrupted, INTERRUPTED_MESSAGE);
            match self
                .db
                .transition_job(&job.job_id, &[JobStatus::Started], JobStatus::Failure, update)
                .await
            {
                Ok(_) => {
                    METRICS.inc_jobs_failed();
                    report.interrupted += 1;
                    warn!(job_id = %job.job_id, "Capture interrupted by restart");
                }
                Err(e) if e.is_stale_write() => {
                    debug!(job_id = %job.job_id, "Interrupted job already settled: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        for job in self
            .db
            .list_jobs_with_status(&[JobStatus::Pending, JobStatus::Retry])
            .await?
        {
            if self.dispatcher.enqueue(job.job_id) {
                report.requeued += 1;
            }
        }

        for watcher in self.registry.list_active().await? {
            if self.send_control(ControlTask::Arm(watcher)) {
                report.rearmed += 1;
            }
        }

        Ok(report)
    }

    fn spawn_reconcile(&self) {
        let interval = Duration::from_secs(self.config.poll.reconcile_interval_secs.max(1));
        let registry = self.registry.clone();
        let scheduler = Arc::clone(&self.scheduler);
        let control = self.control.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                match registry.list_active().await {
                    Ok(watchers) => {
                        for watcher in watchers {
                            if !scheduler.is_armed(&watcher.key) {
                                debug!(watcher_key = %watcher.key, "Reconcile arming watcher");
                                let _ = control.send(ControlTask::Arm(watcher));
                            }
                        }
                    }
                    Err(e) => warn!("Reconcile failed to list watchers: {}", e),
                }
            }
        });

        if let Ok(mut handles) = self.handles.lock() {
            handles.push(handle);
        }
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Validate and enqueue a manual capture. Returns a PENDING job.
    pub async fn submit_recording(&self, request: &CaptureRequest) -> Result<JobRef> {
        self.dispatcher.submit(request).await
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        Ok(self.db.get_job(job_id).await?)
    }

    pub async fn list_recent_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        Ok(self.db.list_recent_jobs(limit).await?)
    }

    /// Cancel a job.
    ///
    /// A queued job is written REVOKED here and never starts. A running job
    /// is signalled; the capture worker kills its process tree and writes
    /// REVOKED once the process is gone.
    pub async fn revoke_job(&self, job_id: &JobId) -> Result<()> {
        for _ in 0..REVOKE_ATTEMPTS {
            let job = self.db.get_job(job_id).await?;
            match job.status {
                status if status.is_terminal() => {
                    return Err(EngineError::conflict(format!(
                        "job {} is already {}",
                        job_id, status
                    )));
                }
                JobStatus::Started => {
                    if self.active.cancel(job_id) {
                        info!(job_id = %job_id, "Revoke signalled to running capture");
                        return Ok(());
                    }
                    return Err(EngineError::conflict(format!(
                        "job {} is running in another process",
                        job_id
                    )));
                }
                status => {
                    // A worker may have claimed it but not yet written STARTED.
                    self.active.cancel(job_id);
                    let update = JobUpdate {
                        error_message: Some(REVOKED_BY_USER_MESSAGE.to_string()),
                        ended_at: Some(Utc::now()),
                        ..JobUpdate::default()
                    };
                    match self
                        .db
                        .transition_job(job_id, &[status], JobStatus::Revoked, update)
                        .await
                    {
                        Ok(_) => {
                            METRICS.inc_jobs_revoked();
                            info!(job_id = %job_id, from = %status, "Job revoked");
                            return Ok(());
                        }
                        Err(e) if e.is_stale_write() => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Err(EngineError::conflict(format!(
            "job {} kept changing state during revoke",
            job_id
        )))
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(self.db.queue_stats().await?)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        METRICS.snapshot()
    }

    // ========================================================================
    // Watchers
    // ========================================================================

    pub async fn register_watcher(&self, request: &WatcherRequest) -> Result<WatcherRef> {
        let spec = validate_watcher(request, self.dispatcher.limits())?;
        let watcher = self.registry.register(&spec).await?;
        let reference = WatcherRef {
            key: watcher.key.clone(),
            status: watcher.status,
        };
        self.arm(watcher);
        Ok(reference)
    }

    /// Delete a watcher and cancel its outstanding capture.
    ///
    /// The row is marked deleted before the loop is told to stop, and the
    /// store refuses watcher dispatches for deleted rows, so no further job
    /// can appear for the key once this returns.
    pub async fn delete_watcher(&self, key: &WatcherKey) -> Result<()> {
        if self.registry.get(key).await?.is_none() {
            return Err(EngineError::not_found(format!("watcher {}", key)));
        }
        if let Some(job) = self.db.outstanding_job_for_watcher(key).await? {
            if job.status == JobStatus::Started && !self.active.contains(&job.job_id) {
                return Err(EngineError::conflict(format!(
                    "watcher {} has capture {} running in another process",
                    key, job.job_id
                )));
            }
        }

        self.registry.delete(key).await?;
        self.send_control(ControlTask::Disarm(key.clone()));

        if let Some(job) = self.db.outstanding_job_for_watcher(key).await? {
            match self.revoke_job(&job.job_id).await {
                Ok(()) => info!(watcher_key = %key, job_id = %job.job_id, "Outstanding capture cancelled"),
                Err(e) => warn!(watcher_key = %key, job_id = %job.job_id, "Could not cancel capture: {}", e),
            }
        }
        Ok(())
    }

    pub async fn pause_watcher(&self, key: &WatcherKey) -> Result<WatcherRef> {
        let watcher = self.registry.pause(key).await?;
        self.send_control(ControlTask::Disarm(key.clone()));
        Ok(WatcherRef {
            key: watcher.key,
            status: watcher.status,
        })
    }

    pub async fn resume_watcher(&self, key: &WatcherKey) -> Result<WatcherRef> {
        let watcher = self.registry.resume(key).await?;
        let reference = WatcherRef {
            key: watcher.key.clone(),
            status: watcher.status,
        };
        self.arm(watcher);
        Ok(reference)
    }

    pub async fn list_watchers(&self, include_deleted: bool) -> Result<Vec<Watcher>> {
        self.registry.list(include_deleted).await
    }

    pub fn is_armed(&self, key: &WatcherKey) -> bool {
        self.scheduler.is_armed(key)
    }

    /// Loops are only run by a serving engine; others leave it to reconcile.
    fn arm(&self, watcher: Watcher) {
        if self.mode == EngineMode::Serve {
            self.send_control(ControlTask::Arm(watcher));
        }
    }

    fn send_control(&self, task: ControlTask) -> bool {
        match self.control.send(task) {
            Ok(()) => true,
            Err(_) => {
                warn!("Control lane closed");
                false
            }
        }
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub async fn list_files(&self, query: &FileQuery) -> Result<FilePage> {
        Ok(self.files.list(query).await?)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop polling, cancel running captures and wait for the lanes to drain.
    ///
    /// Captures cut short here end as FAILURE/INTERRUPTED; queued jobs stay
    /// queued in the store for the next start.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Engine shutting down");
        self.shutdown.cancel();

        let cancelled = self.active.cancel_all();
        if cancelled > 0 {
            info!(count = cancelled, "Cancelling running captures");
        }

        self.scheduler.stop_all(SHUTDOWN_TIMEOUT).await;

        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Workers did not stop within {:?}", SHUTDOWN_TIMEOUT);
        }

        self.db.close().await;
        info!("Engine stopped");
    }
}
