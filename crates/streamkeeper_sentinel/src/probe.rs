//! Live-status capability used by the poll scheduler.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use streamkeeper_protocol::{LiveState, Target, WatcherKey};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// The check did not answer in time; treated as a network timeout.
    #[error("Live-status check timed out after {0:?}")]
    Timeout(Duration),

    #[error("Live-status check failed: {0}")]
    Failed(String),
}

/// Answers "is this target live right now?".
#[async_trait]
pub trait LiveStatusProbe: Send + Sync {
    async fn check(&self, target: &Target) -> Result<LiveState, ProbeError>;
}

/// Runs an external checker: `<command> <args> --room-id X | --url U`.
///
/// Exit 0 means live, 1 means offline, anything else is an error.
pub struct CommandProbe {
    command: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl LiveStatusProbe for CommandProbe {
    async fn check(&self, target: &Target) -> Result<LiveState, ProbeError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        match target {
            Target::RoomId(room_id) => cmd.arg("--room-id").arg(room_id),
            Target::Url(url) => cmd.arg("--url").arg(url),
        };

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(|e| ProbeError::Failed(format!("{}: {}", self.command.display(), e)))?;

        match output.status.code() {
            Some(0) => Ok(LiveState::Live),
            Some(1) => Ok(LiveState::Offline),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(watcher_key = %target.key(), ?code, "Probe failed: {}", stderr.trim());
                Err(ProbeError::Failed(format!(
                    "checker exited with {:?}: {}",
                    code,
                    streamkeeper_worker::error::excerpt(&stderr)
                )))
            }
        }
    }
}

/// Probe answering from an in-memory table; unknown targets are offline.
///
/// Used when no checker is configured, and to drive watchers by hand.
#[derive(Default)]
pub struct StaticProbe {
    states: Mutex<HashMap<WatcherKey, Result<LiveState, String>>>,
    checks: Mutex<HashMap<WatcherKey, usize>>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &WatcherKey, state: LiveState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(key.clone(), Ok(state));
        }
    }

    /// Number of checks answered for `key`.
    pub fn checks(&self, key: &WatcherKey) -> usize {
        self.checks
            .lock()
            .map(|checks| checks.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Make checks for `key` fail until the next [`set`](Self::set).
    pub fn fail(&self, key: &WatcherKey, message: impl Into<String>) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(key.clone(), Err(message.into()));
        }
    }
}

#[async_trait]
impl LiveStatusProbe for StaticProbe {
    async fn check(&self, target: &Target) -> Result<LiveState, ProbeError> {
        if let Ok(mut checks) = self.checks.lock() {
            *checks.entry(target.key()).or_insert(0) += 1;
        }
        let states = self
            .states
            .lock()
            .map_err(|_| ProbeError::Failed("probe state poisoned".into()))?;
        match states.get(&target.key()) {
            Some(Ok(state)) => Ok(*state),
            Some(Err(message)) => Err(ProbeError::Failed(message.clone())),
            None => Ok(LiveState::Offline),
        }
    }
}
