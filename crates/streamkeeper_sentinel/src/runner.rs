//! Capture execution on the heavy lane.
//!
//! One call to [`CaptureRunner::execute`] drives a job from PENDING or RETRY
//! through STARTED to its next state. Deliveries are at-least-once: every
//! write is a compare-and-set, and a delivery that finds the job in any
//! other state does nothing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use streamkeeper_db::StateDb;
use streamkeeper_protocol::defaults::{INTERRUPTED_MESSAGE, REVOKED_BY_USER_MESSAGE};
use streamkeeper_protocol::{ErrorCode, Job, JobId, JobStatus, JobUpdate, UploadRecord};
use streamkeeper_worker::{
    upload_files, CancellationToken, CaptureFailure, CaptureOutcome, RetryStrategy, Supervisor,
    SupervisorError, UploadSink, Verdict,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::metrics::METRICS;
use crate::pool::{ActiveJobs, CaptureTask};

/// Wait before re-offering a job when every child slot is taken.
const ADMISSION_RETRY_DELAY: Duration = Duration::from_secs(1);

const RUNNABLE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Retry];

pub struct CaptureRunner {
    db: StateDb,
    supervisor: Supervisor,
    upload_sink: Option<Arc<dyn UploadSink>>,
    upload_strategy: RetryStrategy,
    retry: RetryConfig,
    active: ActiveJobs,
    heavy: mpsc::UnboundedSender<CaptureTask>,
    shutdown: CancellationToken,
}

impl CaptureRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: StateDb,
        supervisor: Supervisor,
        upload_sink: Option<Arc<dyn UploadSink>>,
        upload_strategy: RetryStrategy,
        retry: RetryConfig,
        active: ActiveJobs,
        heavy: mpsc::UnboundedSender<CaptureTask>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            supervisor,
            upload_sink,
            upload_strategy,
            retry,
            active,
            heavy,
            shutdown,
        }
    }

    /// Re-offer `job_id` to the capture lane after `delay`.
    ///
    /// The timer is dropped on shutdown; the job stays queued in the store
    /// and is picked up again by startup recovery.
    pub fn schedule(&self, job_id: JobId, delay: Duration) {
        let heavy = self.heavy.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = heavy.send(CaptureTask { job_id });
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }

    pub async fn execute(&self, job_id: &JobId) {
        if let Err(e) = self.try_execute(job_id).await {
            error!(job_id = %job_id, "Capture execution failed: {:#}", e);
        }
    }

    async fn try_execute(&self, job_id: &JobId) -> Result<()> {
        let Some(job) = self.db.find_job(job_id).await? else {
            warn!(job_id = %job_id, "Queued job no longer exists");
            return Ok(());
        };
        if !RUNNABLE.contains(&job.status) {
            debug!(job_id = %job_id, status = %job.status, "Skipping delivery");
            return Ok(());
        }
        if job.status == JobStatus::Retry {
            if let Some(at) = job.next_attempt_at {
                if let Ok(remaining) = (at - Utc::now()).to_std() {
                    if !remaining.is_zero() {
                        self.schedule(job_id.clone(), remaining);
                        return Ok(());
                    }
                }
            }
        }

        let Some(slot) = self.supervisor.try_reserve() else {
            debug!(job_id = %job_id, "All child slots busy, deferring");
            self.schedule(job_id.clone(), ADMISSION_RETRY_DELAY);
            return Ok(());
        };
        let Some(cancel) = self.active.claim(job_id) else {
            debug!(job_id = %job_id, "Job already running in this process");
            return Ok(());
        };

        let result = self.run(job, slot, &cancel).await;
        self.active.release(job_id);
        result
    }

    async fn run(
        &self,
        job: Job,
        slot: streamkeeper_worker::ChildSlot,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let job_id = job.job_id.clone();
        if cancel.is_cancelled() {
            debug!(job_id = %job_id, "Revoked before start");
            return Ok(());
        }

        let supervisor = self.supervisor.clone();
        let spec = job.request.clone();
        let spawn_id = job_id.clone();
        let attempt = job.attempts + 1;
        let spawned = tokio::task::spawn_blocking(move || {
            supervisor.spawn(slot, &spawn_id, attempt, &spec)
        })
        .await
        .map_err(|e| anyhow!("spawn task panicked: {}", e))?;

        let running = match spawned {
            Ok(running) => running,
            Err(SupervisorError::Spawn(err)) => {
                warn!(job_id = %job_id, "Cannot start recorder: {}", err);
                let failure = CaptureFailure::from_spawn(&err);
                self.fail_unspawned(&job_id, failure.code(), failure.message()).await;
                return Ok(());
            }
            Err(other) => {
                error!(job_id = %job_id, "Cannot prepare capture: {}", other);
                let message = other.to_string();
                self.fail_unspawned(&job_id, ErrorCode::InternalError, &message).await;
                return Ok(());
            }
        };

        let started = self
            .db
            .transition_job(
                &job_id,
                &RUNNABLE,
                JobStatus::Started,
                JobUpdate {
                    pid: Some(running.pid() as i32),
                    pid_identity: running.identity().map(str::to_string),
                    started_at: Some(running.started_at()),
                    bump_attempt: true,
                    ..JobUpdate::default()
                },
            )
            .await;
        let job = match started {
            Ok(job) => job,
            Err(e) => {
                info!(job_id = %job_id, "Job changed before start ({}), killing capture", e);
                tokio::task::spawn_blocking(move || running.abort()).await.ok();
                return Ok(());
            }
        };
        METRICS.inc_jobs_started();
        info!(job_id = %job_id, pid = running.pid(), attempt = job.attempts, "Job started");

        let outcome = match running.wait_async(cancel.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let update = JobUpdate::error(ErrorCode::InternalError, e.to_string());
                if self.write(&job_id, &[JobStatus::Started], JobStatus::Failure, update).await {
                    METRICS.inc_jobs_failed();
                }
                return Ok(());
            }
        };

        self.record_outcome(&job, outcome, cancel).await;
        Ok(())
    }

    async fn record_outcome(&self, job: &Job, outcome: CaptureOutcome, cancel: &CancellationToken) {
        let base = JobUpdate {
            returncode: outcome.returncode,
            files: Some(outcome.file_strings()),
            ended_at: Some(outcome.ended_at),
            ..JobUpdate::default()
        };

        match outcome.verdict() {
            Verdict::Revoked => self.finish_cancelled(job, base).await,
            Verdict::Success => {
                let uploads = if job.request.options.upload {
                    self.upload(job, &outcome.files).await
                } else {
                    None
                };
                if cancel.is_cancelled() {
                    return self.finish_cancelled(job, base).await;
                }
                let update = JobUpdate { uploads, ..base };
                if self
                    .write(&job.job_id, &[JobStatus::Started], JobStatus::Success, update)
                    .await
                {
                    METRICS.inc_jobs_succeeded();
                    info!(job_id = %job.job_id, files = outcome.files.len(), "Job succeeded");
                }
            }
            Verdict::Failed(failure) => self.finish_failed(job, failure, base).await,
        }
    }

    async fn finish_failed(&self, job: &Job, failure: CaptureFailure, base: JobUpdate) {
        let update = JobUpdate {
            error_code: Some(failure.code()),
            error_message: Some(failure.message().to_string()),
            ..base
        };

        let retry = failure.is_transient()
            && job.attempts < self.retry.max_attempts
            && !self.shutdown.is_cancelled();
        if retry {
            let delay = self.retry.delay_for(job.attempts);
            let next = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            let update = JobUpdate {
                next_attempt_at: Some(next),
                ..update
            };
            if self
                .write(&job.job_id, &[JobStatus::Started], JobStatus::Retry, update)
                .await
            {
                METRICS.inc_jobs_retried();
                info!(
                    job_id = %job.job_id,
                    attempt = job.attempts,
                    delay_secs = delay.as_secs(),
                    code = %failure.code(),
                    "Transient failure, scheduling retry"
                );
                self.schedule(job.job_id.clone(), delay);
            }
            return;
        }

        if self
            .write(&job.job_id, &[JobStatus::Started], JobStatus::Failure, update)
            .await
        {
            METRICS.inc_jobs_failed();
            warn!(
                job_id = %job.job_id,
                attempt = job.attempts,
                code = %failure.code(),
                "Job failed: {}",
                failure.message()
            );
        }
    }

    /// A job whose process never came up still passes through STARTED, without
    /// consuming an attempt, before it fails.
    async fn fail_unspawned(&self, job_id: &JobId, code: ErrorCode, message: &str) {
        let started = JobUpdate {
            started_at: Some(Utc::now()),
            bump_attempt: false,
            ..JobUpdate::default()
        };
        if !self.write(job_id, &RUNNABLE, JobStatus::Started, started).await {
            return;
        }
        let update = JobUpdate::error(code, message);
        if self.write(job_id, &[JobStatus::Started], JobStatus::Failure, update).await {
            METRICS.inc_jobs_failed();
            warn!(job_id = %job_id, code = %code, "Job failed before its process started");
        }
    }

    /// Terminal write for a capture stopped by revoke or shutdown.
    async fn finish_cancelled(&self, job: &Job, base: JobUpdate) {
        if self.shutdown.is_cancelled() {
            let update = JobUpdate {
                error_code: Some(ErrorCode::Interrupted),
                error_message: Some(INTERRUPTED_MESSAGE.to_string()),
                ..base
            };
            if self
                .write(&job.job_id, &[JobStatus::Started], JobStatus::Failure, update)
                .await
            {
                METRICS.inc_jobs_failed();
                info!(job_id = %job.job_id, "Capture interrupted by shutdown");
            }
            return;
        }

        let update = JobUpdate {
            error_message: Some(REVOKED_BY_USER_MESSAGE.to_string()),
            ..base
        };
        if self
            .write(&job.job_id, &[JobStatus::Started], JobStatus::Revoked, update)
            .await
        {
            METRICS.inc_jobs_revoked();
            info!(job_id = %job.job_id, "Job revoked");
        }
    }

    async fn upload(&self, job: &Job, files: &[PathBuf]) -> Option<Vec<UploadRecord>> {
        let Some(sink) = self.upload_sink.as_ref() else {
            debug!(job_id = %job.job_id, "Upload requested but no sink configured");
            return None;
        };
        let records = upload_files(
            sink.as_ref(),
            files,
            &job.request.target,
            self.upload_strategy,
        )
        .await;
        let ok = records.iter().filter(|r| r.ok).count() as u64;
        METRICS.record_uploads(ok, records.len() as u64 - ok);
        Some(records)
    }

    /// Compare-and-set write. Lost races are logged, not raised.
    async fn write(
        &self,
        job_id: &JobId,
        expected: &[JobStatus],
        to: JobStatus,
        update: JobUpdate,
    ) -> bool {
        match self.db.transition_job(job_id, expected, to, update).await {
            Ok(_) => true,
            Err(e) if e.is_stale_write() => {
                info!(job_id = %job_id, to = %to, "Write skipped: {}", e);
                false
            }
            Err(e) => {
                error!(job_id = %job_id, to = %to, "Failed to record job state: {}", e);
                false
            }
        }
    }
}
