//! Engine configuration.
//!
//! Loaded from `<home>/config.toml` (or an explicit path), every field
//! defaulted, then overridden from `STREAMKEEPER_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use streamkeeper_protocol::defaults::{
    CAPTURE_GRACE_SECS, DEFAULT_ALLOWED_HOSTS, DEFAULT_CAPTURE_DURATION_SECS,
    DEFAULT_DATABASE_FILE, DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_RECORDER_BINARY,
    DEFAULT_RECORDINGS_DIR, MAX_DURATION_SECS, MAX_PAGE_SIZE, MAX_POLL_INTERVAL_SECS,
    MIN_POLL_INTERVAL_SECS,
};
use streamkeeper_protocol::ValidationLimits;
use streamkeeper_worker::{RetryStrategy, SupervisorConfig};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the recordings tree
    pub recordings_dir: PathBuf,
    /// SQLite state database
    pub database_path: PathBuf,
    /// Base directory for cookie references
    pub cookies_dir: Option<PathBuf>,
    /// Per-job recorder logs; `<home>/logs/jobs` when unset
    pub job_log_dir: Option<PathBuf>,
    pub recorder: RecorderConfig,
    pub limits: LimitsConfig,
    pub workers: WorkersConfig,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    pub file_index: FileIndexConfig,
    pub upload: UploadConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub binary: PathBuf,
    /// Prepended to every generated argument list
    pub extra_args: Vec<String>,
    pub grace_secs: u64,
    pub default_duration_secs: u64,
    /// Between SIGTERM and SIGKILL
    pub kill_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_duration_secs: u64,
    pub min_poll_interval_secs: u64,
    pub max_poll_interval_secs: u64,
    pub default_poll_interval_secs: u64,
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Control-lane tasks (watcher arm/disarm)
    pub light: usize,
    /// Capture-lane tasks
    pub heavy: usize,
    /// Capture processes alive at once
    pub max_children: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Capture attempts per job, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub offline_multiplier: f64,
    pub max_backoff_secs: u64,
    pub error_backoff_cap_secs: u64,
    pub max_consecutive_errors: u32,
    pub probe_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileIndexConfig {
    pub ttl_secs: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub token: Option<String>,
    /// Copy recordings here instead of (or without) an HTTP endpoint
    pub mirror_dir: Option<PathBuf>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// External live-status checker
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let home = streamkeeper_logging::streamkeeper_home();
        Self {
            recordings_dir: home.join(DEFAULT_RECORDINGS_DIR),
            database_path: home.join(DEFAULT_DATABASE_FILE),
            cookies_dir: None,
            job_log_dir: None,
            recorder: RecorderConfig::default(),
            limits: LimitsConfig::default(),
            workers: WorkersConfig::default(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            file_index: FileIndexConfig::default(),
            upload: UploadConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_RECORDER_BINARY),
            extra_args: Vec::new(),
            grace_secs: CAPTURE_GRACE_SECS,
            default_duration_secs: DEFAULT_CAPTURE_DURATION_SECS,
            kill_grace_secs: 10,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: MAX_DURATION_SECS,
            min_poll_interval_secs: MIN_POLL_INTERVAL_SECS,
            max_poll_interval_secs: MAX_POLL_INTERVAL_SECS,
            default_poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            light: 2,
            heavy: 4,
            max_children: 4,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 4_000,
            max_delay_ms: 300_000,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            offline_multiplier: 1.5,
            max_backoff_secs: 900,
            error_backoff_cap_secs: 300,
            max_consecutive_errors: 5,
            probe_timeout_secs: 30,
            reconcile_interval_secs: 30,
        }
    }
}

impl Default for FileIndexConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): base * 4^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 4u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

impl EngineConfig {
    /// Load from `path`, or from `<home>/config.toml` when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = streamkeeper_logging::streamkeeper_home().join(CONFIG_FILE_NAME);
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None if default_path.exists() => Some(default_path),
            None => None,
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("STREAMKEEPER_RECORDINGS_DIR") {
            self.recordings_dir = PathBuf::from(dir);
        }
        if let Some(db) = get("STREAMKEEPER_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(bin) = get("STREAMKEEPER_RECORDER_BIN") {
            self.recorder.binary = PathBuf::from(bin);
        }
        if let Some(endpoint) = get("STREAMKEEPER_UPLOAD_ENDPOINT") {
            self.upload.endpoint = Some(endpoint);
        }
        if let Some(bucket) = get("STREAMKEEPER_UPLOAD_BUCKET") {
            self.upload.bucket = Some(bucket);
        }
        if let Some(token) = get("STREAMKEEPER_UPLOAD_TOKEN") {
            self.upload.token = Some(token);
        }
    }

    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_duration_secs: self.limits.max_duration_secs,
            min_poll_interval_secs: self.limits.min_poll_interval_secs,
            max_poll_interval_secs: self.limits.max_poll_interval_secs,
            default_poll_interval_secs: self.limits.default_poll_interval_secs,
            allowed_hosts: self.limits.allowed_hosts.clone(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            recorder_binary: self.recorder.binary.clone(),
            extra_args: self.recorder.extra_args.clone(),
            recordings_dir: self.recordings_dir.clone(),
            cookies_dir: self.cookies_dir.clone(),
            job_log_dir: Some(
                self.job_log_dir
                    .clone()
                    .unwrap_or_else(streamkeeper_logging::jobs_log_dir),
            ),
            default_duration: Duration::from_secs(self.recorder.default_duration_secs),
            grace: Duration::from_secs(self.recorder.grace_secs),
            kill_grace: Duration::from_secs(self.recorder.kill_grace_secs),
            max_children: self.workers.max_children,
        }
    }

    pub fn upload_strategy(&self) -> RetryStrategy {
        let defaults = RetryStrategy::default();
        RetryStrategy::new(
            self.upload.max_attempts.unwrap_or(defaults.max_attempts),
            self.upload
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
        )
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.recorder.kill_grace_secs)
    }
}
