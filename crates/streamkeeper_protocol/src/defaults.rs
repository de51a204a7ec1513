//! Canonical default values shared across control and data plane.

pub const DEFAULT_HOME_DIR_NAME: &str = ".streamkeeper";
pub const DEFAULT_DATABASE_FILE: &str = "streamkeeper.sqlite3";
pub const DEFAULT_RECORDINGS_DIR: &str = "recordings";
pub const DEFAULT_RECORDER_BINARY: &str = "tiktok-live-recorder";

pub const MIN_POLL_INTERVAL_SECS: u64 = 10;
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Hard ceiling on a requested capture duration (24 hours).
pub const MAX_DURATION_SECS: u64 = 86_400;
/// Wall-clock ceiling for captures without a requested duration.
pub const DEFAULT_CAPTURE_DURATION_SECS: u64 = 3600;
/// Added on top of the duration before the process tree is killed.
pub const CAPTURE_GRACE_SECS: u64 = 300;

pub const MAX_URL_LEN: usize = 500;
pub const MAX_PROXY_LEN: usize = 200;
pub const MAX_COOKIES_PATH_LEN: usize = 200;
pub const MAX_OUTPUT_TEMPLATE_LEN: usize = 100;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &["tiktok.com", "vm.tiktok.com", "m.tiktok.com"];

pub const REVOKED_BY_USER_MESSAGE: &str = "Revoked by user";
pub const INTERRUPTED_MESSAGE: &str = "Capture process was running when the engine stopped";
