//! Worker lanes.
//!
//! Two message lanes with disjoint worker tasks:
//! - heavy: [`CaptureTask`]s, each holding a worker for the whole capture
//! - light: [`ControlTask`]s that arm and disarm watcher poll loops
//!
//! Workers of one lane share a single receiver and take turns pulling from
//! it, so a long capture never delays a control task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use streamkeeper_protocol::{JobId, Watcher, WatcherKey};
use streamkeeper_worker::CancellationToken;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::runner::CaptureRunner;
use crate::scheduler::PollScheduler;

/// Run (or re-run) the capture for a persisted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTask {
    pub job_id: JobId,
}

#[derive(Debug, Clone)]
pub enum ControlTask {
    Arm(Watcher),
    Disarm(WatcherKey),
}

pub type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>>;

pub fn shared<T>(rx: mpsc::UnboundedReceiver<T>) -> SharedReceiver<T> {
    Arc::new(tokio::sync::Mutex::new(rx))
}

/// Next task for this worker, or `None` on shutdown or a closed lane.
async fn next_task<T>(rx: &SharedReceiver<T>, shutdown: &CancellationToken) -> Option<T> {
    let mut rx = tokio::select! {
        guard = rx.lock() => guard,
        _ = shutdown.cancelled() => return None,
    };
    tokio::select! {
        task = rx.recv() => task,
        _ = shutdown.cancelled() => None,
    }
}

/// Cancellation tokens of the captures this process is running.
#[derive(Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `job_id` for this process. `None` if another worker holds it.
    pub fn claim(&self, job_id: &JobId) -> Option<CancellationToken> {
        let mut map = self.inner.lock().ok()?;
        if map.contains_key(job_id) {
            return None;
        }
        let token = CancellationToken::new();
        map.insert(job_id.clone(), token.clone());
        Some(token)
    }

    pub fn release(&self, job_id: &JobId) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(job_id);
        }
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.inner
            .lock()
            .map(|map| map.contains_key(job_id))
            .unwrap_or(false)
    }

    /// Signal the job's capture to stop. False if this process does not run it.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.inner.lock() {
            Ok(map) => match map.get(job_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        match self.inner.lock() {
            Ok(map) => {
                for token in map.values() {
                    token.cancel();
                }
                map.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn `count` capture workers sharing `rx`.
pub fn spawn_heavy_lane(
    count: usize,
    runner: Arc<CaptureRunner>,
    rx: SharedReceiver<CaptureTask>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|worker| {
            let runner = Arc::clone(&runner);
            let rx = Arc::clone(&rx);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                debug!(worker, "Capture worker started");
                while let Some(task) = next_task(&rx, &shutdown).await {
                    runner.execute(&task.job_id).await;
                }
                debug!(worker, "Capture worker stopped");
            })
        })
        .collect()
}

/// Spawn `count` control workers sharing `rx`.
pub fn spawn_light_lane(
    count: usize,
    scheduler: Arc<PollScheduler>,
    rx: SharedReceiver<ControlTask>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|worker| {
            let scheduler = Arc::clone(&scheduler);
            let rx = Arc::clone(&rx);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                while let Some(task) = next_task(&rx, &shutdown).await {
                    match task {
                        ControlTask::Arm(watcher) => {
                            let key = watcher.key.clone();
                            if scheduler.arm(watcher) {
                                info!(worker, watcher_key = %key, "Poll loop armed");
                            }
                        }
                        ControlTask::Disarm(key) => {
                            if scheduler.disarm(&key) {
                                info!(worker, watcher_key = %key, "Poll loop disarmed");
                            }
                        }
                    }
                }
            })
        })
        .collect()
}
