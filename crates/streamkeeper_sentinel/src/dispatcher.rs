//! Job Dispatcher: validate, persist as PENDING, enqueue on the capture lane.

use std::sync::Arc;

use streamkeeper_db::{StateDb, WatcherDispatch};
use streamkeeper_protocol::validation::validate_capture;
use streamkeeper_protocol::{CaptureRequest, JobId, JobRef, ValidationLimits, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::METRICS;
use crate::pool::CaptureTask;

#[derive(Clone)]
pub struct Dispatcher {
    db: StateDb,
    limits: Arc<ValidationLimits>,
    heavy: mpsc::UnboundedSender<CaptureTask>,
}

impl Dispatcher {
    pub fn new(
        db: StateDb,
        limits: ValidationLimits,
        heavy: mpsc::UnboundedSender<CaptureTask>,
    ) -> Self {
        Self {
            db,
            limits: Arc::new(limits),
            heavy,
        }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Validate and record a manual capture request.
    ///
    /// Invalid input fails before a job id exists. The returned job is
    /// PENDING and already queued.
    pub async fn submit(&self, request: &CaptureRequest) -> Result<JobRef> {
        let spec = validate_capture(request, &self.limits)?;
        let job_id = JobId::new();
        let job = self.db.insert_job(&job_id, &spec).await?;

        METRICS.inc_jobs_submitted();
        info!(job_id = %job_id, target = %spec.target.as_str(), "Capture submitted");
        self.enqueue(job_id);

        Ok(JobRef {
            job_id: job.job_id,
            status: job.status,
        })
    }

    /// Dispatch a capture for a watcher that just went live.
    ///
    /// Ignored when the watcher already has an outstanding job or is no
    /// longer active.
    pub async fn dispatch_for_watcher(&self, watcher: &Watcher) -> Result<WatcherDispatch> {
        let job_id = JobId::new();
        let spec = watcher.spec().capture_spec();
        let outcome = self
            .db
            .insert_watcher_job(&job_id, &watcher.key, &spec)
            .await?;

        match &outcome {
            WatcherDispatch::Created(job) => {
                METRICS.inc_jobs_submitted();
                info!(job_id = %job.job_id, watcher_key = %watcher.key, "Watcher dispatched capture");
                self.enqueue(job.job_id.clone());
            }
            WatcherDispatch::Outstanding(existing) => {
                debug!(watcher_key = %watcher.key, job_id = %existing, "Capture already outstanding");
            }
            WatcherDispatch::Inactive => {
                debug!(watcher_key = %watcher.key, "Watcher inactive, nothing dispatched");
            }
        }
        Ok(outcome)
    }

    /// Put a persisted job on the capture lane.
    pub fn enqueue(&self, job_id: JobId) -> bool {
        match self.heavy.send(CaptureTask { job_id }) {
            Ok(()) => true,
            Err(mpsc::error::SendError(task)) => {
                warn!(job_id = %task.job_id, "Capture lane closed; job stays queued in the store");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use streamkeeper_protocol::{CaptureOptions, JobStatus, Target, WatcherSpec};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, StateDb, Dispatcher, mpsc::UnboundedReceiver<CaptureTask>) {
        let temp = TempDir::new().unwrap();
        let db = StateDb::open(temp.path().join("state.sqlite3")).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(db.clone(), ValidationLimits::default(), tx);
        (temp, db, dispatcher, rx)
    }

    #[tokio::test]
    async fn valid_submission_is_pending_and_queued() {
        let (_temp, db, dispatcher, mut rx) = setup().await;
        let job = dispatcher
            .submit(&CaptureRequest::for_room("42").with_duration(5))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(db.get_job(&job.job_id).await.unwrap().status, JobStatus::Pending);
        assert_eq!(rx.recv().await.unwrap().job_id, job.job_id);
    }

    #[tokio::test]
    async fn invalid_submission_issues_no_job() {
        let (_temp, db, dispatcher, mut rx) = setup().await;
        let request = CaptureRequest {
            room_id: Some("42".into()),
            url: Some("https://www.tiktok.com/@x/live".into()),
            ..CaptureRequest::default()
        };
        let err = dispatcher.submit(&request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let too_long = CaptureRequest::for_room("42").with_duration(86_401);
        assert!(dispatcher.submit(&too_long).await.is_err());

        assert_eq!(db.queue_stats().await.unwrap().pending, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn watcher_dispatch_is_idempotent_while_outstanding() {
        let (_temp, db, dispatcher, mut rx) = setup().await;
        let watcher = db
            .insert_watcher(&WatcherSpec {
                target: Target::RoomId("9".into()),
                poll_interval_secs: 10,
                options: CaptureOptions::default(),
            })
            .await
            .unwrap();

        let first = dispatcher.dispatch_for_watcher(&watcher).await.unwrap();
        let second = dispatcher.dispatch_for_watcher(&watcher).await.unwrap();
        let WatcherDispatch::Created(job) = first else {
            panic!("expected a new job");
        };
        assert_eq!(second, WatcherDispatch::Outstanding(job.job_id.clone()));
        assert_eq!(rx.recv().await.unwrap().job_id, job.job_id);
        assert!(rx.try_recv().is_err());
    }
}
