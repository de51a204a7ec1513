//! Poll Scheduler: one timer-driven task per active watcher.
//!
//! Each loop re-reads its watcher row at the top of every tick and exits as
//! soon as the row is no longer active, so a delete or pause is honoured
//! even when the disarm signal is lost (e.g. issued by another process).
//! Backoff state lives in the task and starts from the base interval every
//! time a loop is armed, including after a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use streamkeeper_db::WatcherDispatch;
use streamkeeper_protocol::{LiveState, Watcher, WatcherKey, WatcherStatus};
use streamkeeper_worker::CancellationToken;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::dispatcher::Dispatcher;
use crate::metrics::METRICS;
use crate::probe::{LiveStatusProbe, ProbeError};
use crate::registry::WatcherRegistry;

/// Interval bookkeeping for one watcher.
///
/// Consecutive offline results stretch the interval by `multiplier` up to
/// `max_backoff`; any state change resets it to `base`. Errors back off
/// separately (doubling, capped at `error_cap`).
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    multiplier: f64,
    max_backoff: Duration,
    error_cap: Duration,
    current: Duration,
    offline_streak: u32,
    errors: u32,
}

impl PollBackoff {
    pub fn new(base: Duration, config: &PollConfig) -> Self {
        Self {
            base,
            multiplier: config.offline_multiplier.max(1.0),
            max_backoff: Duration::from_secs(config.max_backoff_secs).max(base),
            error_cap: Duration::from_secs(config.error_backoff_cap_secs).max(base),
            current: base,
            offline_streak: 0,
            errors: 0,
        }
    }

    pub fn on_offline(&mut self) -> Duration {
        self.errors = 0;
        if self.offline_streak > 0 {
            self.current = self.current.mul_f64(self.multiplier).min(self.max_backoff);
        } else {
            self.current = self.base;
        }
        self.offline_streak += 1;
        self.current
    }

    pub fn on_live(&mut self) -> Duration {
        self.errors = 0;
        self.offline_streak = 0;
        self.current = self.base;
        self.current
    }

    pub fn on_error(&mut self) -> Duration {
        self.errors += 1;
        let factor = 2u32.saturating_pow(self.errors);
        self.base.saturating_mul(factor).min(self.error_cap)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.errors
    }
}

enum Tick {
    Sleep(Duration),
    Stop,
}

struct LoopHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PollScheduler {
    registry: WatcherRegistry,
    dispatcher: Dispatcher,
    probe: Arc<dyn LiveStatusProbe>,
    config: PollConfig,
    loops: Mutex<HashMap<WatcherKey, LoopHandle>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl PollScheduler {
    pub fn new(
        registry: WatcherRegistry,
        dispatcher: Dispatcher,
        probe: Arc<dyn LiveStatusProbe>,
        config: PollConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            probe,
            config,
            loops: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Start a loop for `watcher` unless one is already running for its key.
    pub fn arm(self: &Arc<Self>, watcher: Watcher) -> bool {
        if watcher.status != WatcherStatus::Active || self.shutdown.is_cancelled() {
            return false;
        }
        let Ok(mut loops) = self.loops.lock() else {
            return false;
        };
        if let Some(existing) = loops.get(&watcher.key) {
            if !existing.task.is_finished() && !existing.cancel.is_cancelled() {
                return false;
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let key = watcher.key.clone();
        let base = Duration::from_secs(watcher.poll_interval_secs);
        let task = tokio::spawn(Arc::clone(self).run_loop(key.clone(), base, generation, cancel.clone()));
        loops.insert(
            key,
            LoopHandle {
                generation,
                cancel,
                task,
            },
        );
        METRICS.inc_watchers_armed();
        true
    }

    /// Stop the loop for `key` before its next tick.
    pub fn disarm(&self, key: &WatcherKey) -> bool {
        let handle = self.loops.lock().ok().and_then(|mut loops| loops.remove(key));
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, key: &WatcherKey) -> bool {
        self.loops
            .lock()
            .map(|loops| {
                loops
                    .get(key)
                    .map(|h| !h.task.is_finished() && !h.cancel.is_cancelled())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Cancel every loop and wait for in-flight ticks to finish.
    pub async fn stop_all(&self, timeout: Duration) {
        let handles: Vec<LoopHandle> = match self.loops.lock() {
            Ok(mut loops) => loops.drain().map(|(_, h)| h).collect(),
            Err(_) => Vec::new(),
        };
        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            if tokio::time::timeout(timeout, handle.task).await.is_err() {
                warn!("Poll loop did not stop within {:?}", timeout);
            }
        }
    }

    async fn run_loop(self: Arc<Self>, key: WatcherKey, base: Duration, generation: u64, cancel: CancellationToken) {
        debug!(watcher_key = %key, interval_secs = base.as_secs(), "Poll loop running");
        let mut backoff = PollBackoff::new(base, &self.config);
        let mut last_state: Option<LiveState> = None;

        loop {
            if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                break;
            }
            let delay = match self.tick(&key, &mut backoff, &mut last_state).await {
                Tick::Sleep(delay) => delay,
                Tick::Stop => break,
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.forget(&key, generation);
        debug!(watcher_key = %key, "Poll loop stopped");
    }

    async fn tick(&self, key: &WatcherKey, backoff: &mut PollBackoff, last_state: &mut Option<LiveState>) -> Tick {
        let watcher = match self.registry.get(key).await {
            Ok(Some(watcher)) if watcher.status == WatcherStatus::Active => watcher,
            Ok(_) => {
                debug!(watcher_key = %key, "Watcher no longer active");
                return Tick::Stop;
            }
            Err(e) => {
                warn!(watcher_key = %key, "Failed to read watcher: {}", e);
                return Tick::Sleep(backoff.on_error());
            }
        };

        METRICS.inc_polls();
        let timeout = Duration::from_secs(self.config.probe_timeout_secs.max(1));
        let state = tokio::time::timeout(timeout, self.probe.check(&watcher.target))
            .await
            .unwrap_or(Err(ProbeError::Timeout(timeout)));

        match state {
            Ok(LiveState::Offline) => {
                *last_state = Some(LiveState::Offline);
                Tick::Sleep(backoff.on_offline())
            }
            Ok(LiveState::Live) => {
                if *last_state != Some(LiveState::Live) {
                    match self.dispatcher.dispatch_for_watcher(&watcher).await {
                        Ok(WatcherDispatch::Created(job)) => {
                            if let Err(e) = self.registry.touch(key, Utc::now()).await {
                                warn!(watcher_key = %key, job_id = %job.job_id, "Failed to record last run: {}", e);
                            }
                        }
                        Ok(WatcherDispatch::Outstanding(_)) => {}
                        Ok(WatcherDispatch::Inactive) => return Tick::Stop,
                        Err(e) => {
                            warn!(watcher_key = %key, "Dispatch failed: {}", e);
                            return Tick::Sleep(backoff.on_error());
                        }
                    }
                }
                *last_state = Some(LiveState::Live);
                Tick::Sleep(backoff.on_live())
            }
            Err(e) => {
                METRICS.inc_probe_errors();
                let delay = backoff.on_error();
                let errors = backoff.consecutive_errors();
                warn!(watcher_key = %key, errors, "Live-status check failed: {}", e);

                if errors >= self.config.max_consecutive_errors.max(1) {
                    warn!(watcher_key = %key, errors, "Too many consecutive probe errors, pausing watcher");
                    if let Err(e) = self.registry.pause(key).await {
                        warn!(watcher_key = %key, "Failed to pause watcher: {}", e);
                    }
                    return Tick::Stop;
                }
                Tick::Sleep(delay)
            }
        }
    }

    fn forget(&self, key: &WatcherKey, generation: u64) {
        if let Ok(mut loops) = self.loops.lock() {
            if loops.get(key).map(|h| h.generation) == Some(generation) {
                loops.remove(key);
                info!(watcher_key = %key, "Poll loop exited");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PollConfig {
        PollConfig {
            offline_multiplier: 1.5,
            max_backoff_secs: 60,
            error_backoff_cap_secs: 50,
            ..PollConfig::default()
        }
    }

    #[test]
    fn offline_backoff_is_monotonic_and_capped() {
        let mut backoff = PollBackoff::new(Duration::from_secs(10), &config());
        let mut previous = Duration::ZERO;
        let mut delays = Vec::new();
        for _ in 0..12 {
            let delay = backoff.on_offline();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
            delays.push(delay);
        }
        assert_eq!(delays[0], Duration::from_secs(10));
        assert_eq!(delays[1], Duration::from_secs(15));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn live_resets_to_base() {
        let mut backoff = PollBackoff::new(Duration::from_secs(10), &config());
        for _ in 0..5 {
            backoff.on_offline();
        }
        assert_eq!(backoff.on_live(), Duration::from_secs(10));
        assert_eq!(backoff.on_offline(), Duration::from_secs(10));
        assert_eq!(backoff.on_offline(), Duration::from_secs(15));
    }

    #[test]
    fn errors_double_and_cap() {
        let mut backoff = PollBackoff::new(Duration::from_secs(10), &config());
        assert_eq!(backoff.on_error(), Duration::from_secs(20));
        assert_eq!(backoff.on_error(), Duration::from_secs(40));
        assert_eq!(backoff.on_error(), Duration::from_secs(50));
        assert_eq!(backoff.consecutive_errors(), 3);
        backoff.on_offline();
        assert_eq!(backoff.consecutive_errors(), 0);
    }

    #[test]
    fn ceiling_never_undercuts_base() {
        let mut backoff = PollBackoff::new(Duration::from_secs(120), &config());
        assert_eq!(backoff.on_offline(), Duration::from_secs(120));
        assert_eq!(backoff.on_offline(), Duration::from_secs(120));
    }
}
