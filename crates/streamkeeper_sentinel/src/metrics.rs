//! In-memory counters for engine health.
//!
//! Lock-free atomics, bumped from any task; read through [`Metrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // Job counters
    pub jobs_submitted: AtomicU64,
    pub jobs_started: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_retried: AtomicU64,
    pub jobs_revoked: AtomicU64,

    // Watcher counters
    pub watchers_armed: AtomicU64,
    pub polls: AtomicU64,
    pub probe_errors: AtomicU64,

    // File index
    pub scans: AtomicU64,

    // Uploads
    pub uploads_ok: AtomicU64,
    pub uploads_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_started: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_revoked: AtomicU64::new(0),
            watchers_armed: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            probe_errors: AtomicU64::new(0),
            scans: AtomicU64::new(0),
            uploads_ok: AtomicU64::new(0),
            uploads_failed: AtomicU64::new(0),
        }
    }

    counter! {
        inc_jobs_submitted => jobs_submitted,
        inc_jobs_started => jobs_started,
        inc_jobs_succeeded => jobs_succeeded,
        inc_jobs_failed => jobs_failed,
        inc_jobs_retried => jobs_retried,
        inc_jobs_revoked => jobs_revoked,
        inc_watchers_armed => watchers_armed,
        inc_polls => polls,
        inc_probe_errors => probe_errors,
        inc_scans => scans,
    }

    /// Record per-file upload results
    pub fn record_uploads(&self, ok: u64, failed: u64) {
        self.uploads_ok.fetch_add(ok, Ordering::Relaxed);
        self.uploads_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_revoked: self.jobs_revoked.load(Ordering::Relaxed),
            watchers_armed: self.watchers_armed.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            probe_errors: self.probe_errors.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            uploads_ok: self.uploads_ok.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_revoked: u64,
    pub watchers_armed: u64,
    pub polls: u64,
    pub probe_errors: u64,
    pub scans: u64,
    pub uploads_ok: u64,
    pub uploads_failed: u64,
}
