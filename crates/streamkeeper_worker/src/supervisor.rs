//! Subprocess Supervisor: one external capture process per job.
//!
//! The supervisor turns a validated [`CaptureSpec`] into a recorder
//! invocation, spawns it through a [`CaptureLauncher`], enforces the
//! wall-clock ceiling, and reports what the process left behind. It does not
//! touch the job store; the caller records STARTED between [`Supervisor::spawn`]
//! and [`RunningCapture::wait`], and the terminal state from the
//! [`CaptureOutcome`].
//!
//! The only state shared between jobs is the running-child counter used for
//! admission control.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use streamkeeper_protocol::{CaptureSpec, ErrorCode, JobId, Target};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancellationToken;
use crate::error::{CaptureFailure, SupervisorError};
use crate::launcher::{process_identity, CaptureCommand, CaptureHandle, CaptureLauncher};

/// Poll interval for exit, ceiling and cancellation checks.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Supervisor configuration (plain data)
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub recorder_binary: PathBuf,
    /// Arguments placed before the generated ones.
    pub extra_args: Vec<String>,
    pub recordings_dir: PathBuf,
    /// Base directory that cookie references are resolved against.
    pub cookies_dir: Option<PathBuf>,
    pub job_log_dir: Option<PathBuf>,
    /// Ceiling base for captures without a requested duration.
    pub default_duration: Duration,
    /// Added to the duration before the process tree is killed.
    pub grace: Duration,
    /// Time between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    pub max_children: usize,
}

/// How a capture process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    Exited,
    TimedOut,
    Cancelled,
}

/// Everything observed about one finished capture.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub end: CaptureEnd,
    pub returncode: Option<i32>,
    /// Files present under the job's output directory at completion.
    pub files: Vec<PathBuf>,
    pub stderr_tail: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub limit_secs: u64,
}

/// Classification of a [`CaptureOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failed(CaptureFailure),
    Revoked,
}

impl CaptureOutcome {
    pub fn verdict(&self) -> Verdict {
        match self.end {
            CaptureEnd::Cancelled => Verdict::Revoked,
            CaptureEnd::TimedOut => Verdict::Failed(CaptureFailure::timed_out(self.limit_secs)),
            CaptureEnd::Exited => match self.returncode {
                Some(0) if !self.files.is_empty() => Verdict::Success,
                Some(0) => Verdict::Failed(CaptureFailure::new(
                    ErrorCode::ArtifactMissing,
                    "Recorder exited 0 but produced no files",
                )),
                Some(code) => Verdict::Failed(CaptureFailure::from_exit_code(code, &self.stderr_tail)),
                None => Verdict::Failed(CaptureFailure::new(
                    ErrorCode::InternalError,
                    "Recorder exit status unavailable",
                )),
            },
        }
    }

    pub fn file_strings(&self) -> Vec<String> {
        self.files.iter().map(|p| p.display().to_string()).collect()
    }
}

/// Reservation of one child-process slot. Released on drop.
#[derive(Debug)]
pub struct ChildSlot {
    running: Arc<AtomicUsize>,
}

impl Drop for ChildSlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    launcher: Arc<dyn CaptureLauncher>,
    running: Arc<AtomicUsize>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, launcher: Arc<dyn CaptureLauncher>) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Number of capture processes currently alive.
    pub fn running_children(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Reserve a child slot, or `None` when the worker is at capacity.
    pub fn try_reserve(&self) -> Option<ChildSlot> {
        let max = self.config.max_children.max(1);
        let mut current = self.running.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return None;
            }
            match self.running.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(ChildSlot {
                        running: Arc::clone(&self.running),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// `<recordings>/<target>/<job_id>/attempt-<n>/`
    ///
    /// Every attempt writes into a fresh directory so that files left by a
    /// failed attempt never count as output of a later one.
    pub fn output_dir(&self, job_id: &JobId, attempt: u32, target: &Target) -> PathBuf {
        self.config
            .recordings_dir
            .join(target.slug())
            .join(job_id.as_str())
            .join(format!("attempt-{}", attempt))
    }

    /// Wall-clock ceiling for a capture.
    pub fn time_limit(&self, spec: &CaptureSpec) -> Duration {
        let base = spec
            .duration
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_duration);
        base + self.config.grace
    }

    /// Build the recorder invocation for a job.
    pub fn build_command(&self, job_id: &JobId, attempt: u32, spec: &CaptureSpec) -> CaptureCommand {
        let output_dir = self.output_dir(job_id, attempt, &spec.target);
        let mut args = self.config.extra_args.clone();

        args.push("-mode".into());
        args.push("manual".into());
        match &spec.target {
            Target::RoomId(room_id) => {
                args.push("-room_id".into());
                args.push(room_id.clone());
            }
            Target::Url(url) => {
                args.push("-url".into());
                args.push(url.clone());
            }
        }
        args.push("-output".into());
        args.push(output_dir.display().to_string());

        if let Some(duration) = spec.duration {
            args.push("-duration".into());
            args.push(duration.to_string());
        }
        if let Some(proxy) = &spec.options.proxy {
            args.push("-proxy".into());
            args.push(proxy.clone());
        }
        if let Some(cookies) = &spec.options.cookies {
            let path = match &self.config.cookies_dir {
                Some(dir) => dir.join(cookies),
                None => PathBuf::from(cookies),
            };
            args.push("-cookies".into());
            args.push(path.display().to_string());
        }
        if let Some(template) = &spec.output_template {
            args.push("-output_template".into());
            args.push(template.clone());
        }

        CaptureCommand {
            job_id: job_id.clone(),
            program: self.config.recorder_binary.clone(),
            args,
            working_dir: output_dir,
            log_dir: self.config.job_log_dir.clone(),
        }
    }

    /// Create the output directory and start the capture process.
    ///
    /// Blocking; call from a blocking context.
    pub fn spawn(
        &self,
        slot: ChildSlot,
        job_id: &JobId,
        attempt: u32,
        spec: &CaptureSpec,
    ) -> Result<RunningCapture, SupervisorError> {
        let command = self.build_command(job_id, attempt, spec);
        std::fs::create_dir_all(&command.working_dir).map_err(|source| {
            SupervisorError::OutputDir {
                path: command.working_dir.clone(),
                source,
            }
        })?;

        let handle = self.launcher.launch(&command)?;
        let identity = process_identity(handle.pid());
        let limit = self.time_limit(spec);

        info!(
            job_id = %job_id,
            pid = handle.pid(),
            attempt,
            limit_secs = limit.as_secs(),
            "Capture started"
        );

        Ok(RunningCapture {
            job_id: job_id.clone(),
            handle,
            identity,
            output_dir: command.working_dir,
            limit,
            kill_grace: self.config.kill_grace,
            started: Instant::now(),
            started_at: Utc::now(),
            _slot: slot,
        })
    }
}

/// A spawned capture owned by one worker.
pub struct RunningCapture {
    job_id: JobId,
    handle: Box<dyn CaptureHandle>,
    identity: Option<String>,
    output_dir: PathBuf,
    limit: Duration,
    kill_grace: Duration,
    started: Instant,
    started_at: DateTime<Utc>,
    _slot: ChildSlot,
}

impl RunningCapture {
    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    /// See [`process_identity`].
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Block until the process exits, the ceiling passes, or `cancel` fires.
    ///
    /// The process tree is reaped on every path.
    pub fn wait(mut self, cancel: &CancellationToken) -> Result<CaptureOutcome, SupervisorError> {
        loop {
            if cancel.is_cancelled() {
                info!(job_id = %self.job_id, pid = self.pid(), "Cancelling capture");
                let code = self.handle.terminate(self.kill_grace)?;
                return Ok(self.finish(CaptureEnd::Cancelled, Some(code)));
            }
            if let Some(code) = self.handle.try_wait()? {
                self.handle.reap_descendants();
                return Ok(self.finish(CaptureEnd::Exited, Some(code)));
            }
            if self.started.elapsed() >= self.limit {
                warn!(
                    job_id = %self.job_id,
                    pid = self.pid(),
                    limit_secs = self.limit.as_secs(),
                    "Capture exceeded wall-clock limit, killing process tree"
                );
                let code = self.handle.terminate(self.kill_grace)?;
                return Ok(self.finish(CaptureEnd::TimedOut, Some(code)));
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Async wrapper around [`wait`](Self::wait) on the blocking pool.
    pub async fn wait_async(
        self,
        cancel: CancellationToken,
    ) -> Result<CaptureOutcome, SupervisorError> {
        tokio::task::spawn_blocking(move || self.wait(&cancel))
            .await
            .map_err(|e| SupervisorError::Join(e.to_string()))?
    }

    /// Kill a capture that must not run (its STARTED write was refused).
    pub fn abort(mut self) {
        match self.handle.terminate(Duration::ZERO) {
            Ok(code) => debug!(job_id = %self.job_id, returncode = code, "Capture aborted"),
            Err(e) => warn!(job_id = %self.job_id, "Failed to abort capture: {}", e),
        }
    }

    fn finish(&mut self, end: CaptureEnd, returncode: Option<i32>) -> CaptureOutcome {
        let files = list_output_files(&self.output_dir);
        let outcome = CaptureOutcome {
            end,
            returncode,
            files,
            stderr_tail: self.handle.stderr_tail(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            limit_secs: self.limit.as_secs(),
        };
        info!(
            job_id = %self.job_id,
            returncode = ?returncode,
            files = outcome.files.len(),
            end = ?end,
            "Capture finished"
        );
        outcome
    }
}

/// Regular files under `dir`, sorted by path.
pub fn list_output_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
