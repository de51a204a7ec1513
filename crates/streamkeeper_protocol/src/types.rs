//! Requests, jobs, watchers and file listing types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::ids::{JobId, WatcherKey};
use crate::status::{JobStatus, WatcherStatus};

/// What to capture: a numeric room id or a broadcast URL, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    RoomId(String),
    Url(String),
}

impl Target {
    /// Identity key of a watcher for this target.
    pub fn key(&self) -> WatcherKey {
        WatcherKey::new(self.as_str())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::RoomId(id) => id,
            Target::Url(url) => url,
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self {
            Target::RoomId(id) => Some(id),
            Target::Url(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Target::Url(url) => Some(url),
            Target::RoomId(_) => None,
        }
    }

    /// Filesystem-safe directory name for this target's recordings.
    ///
    /// Room ids are used as-is; URLs keep their last non-empty path segment
    /// (usually `@user` or `live`) with unsafe characters replaced.
    pub fn slug(&self) -> String {
        match self {
            Target::RoomId(id) => id.clone(),
            Target::Url(url) => {
                let tail = url
                    .trim_end_matches('/')
                    .rsplit('/')
                    .find(|segment| !segment.is_empty() && !segment.contains(':'))
                    .unwrap_or("url");
                let slug: String = tail
                    .chars()
                    .map(|ch| {
                        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '@' {
                            ch
                        } else {
                            '_'
                        }
                    })
                    .take(64)
                    .collect();
                if slug.is_empty() {
                    "url".to_string()
                } else {
                    slug
                }
            }
        }
    }
}

/// Options forwarded to the capture process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Cookie file reference, relative to the configured cookies directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    /// Push produced files to the configured upload sink after success.
    #[serde(default)]
    pub upload: bool,
}

/// Raw capture submission, as received from the request layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Requested capture length in seconds.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub output_template: Option<String>,
    #[serde(default)]
    pub options: CaptureOptions,
}

impl CaptureRequest {
    pub fn for_room(room_id: impl Into<String>) -> Self {
        Self {
            room_id: Some(room_id.into()),
            ..Self::default()
        }
    }

    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration = Some(secs);
        self
    }
}

/// A validated capture request. This is what gets persisted with a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSpec {
    pub target: Target,
    pub duration: Option<u64>,
    pub output_template: Option<String>,
    pub options: CaptureOptions,
}

/// Raw watcher registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherRequest {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Seconds between live checks; falls back to the default interval.
    #[serde(default)]
    pub poll_interval: Option<u64>,
    #[serde(default)]
    pub options: CaptureOptions,
}

/// A validated watcher registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherSpec {
    pub target: Target,
    pub poll_interval_secs: u64,
    pub options: CaptureOptions,
}

impl WatcherSpec {
    pub fn key(&self) -> WatcherKey {
        self.target.key()
    }

    /// Capture spec used for every job this watcher dispatches.
    pub fn capture_spec(&self) -> CaptureSpec {
        CaptureSpec {
            target: self.target.clone(),
            duration: None,
            output_template: None,
            options: self.options.clone(),
        }
    }
}

/// A registered watcher row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watcher {
    pub id: i64,
    pub key: WatcherKey,
    pub target: Target,
    pub poll_interval_secs: u64,
    pub status: WatcherStatus,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub options: CaptureOptions,
}

impl Watcher {
    pub fn spec(&self) -> WatcherSpec {
        WatcherSpec {
            target: self.target.clone(),
            poll_interval_secs: self.poll_interval_secs,
            options: self.options.clone(),
        }
    }
}

/// Outcome of pushing one file to object storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadRecord {
    pub fn failed(file: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Result payload of a job.
///
/// Later writes merge into earlier ones. The only field that is ever cleared
/// is the error pair, when a retried job finally succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub returncode: Option<i32>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub uploads: Vec<UploadRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

/// Snapshot of a job as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Set when a watcher dispatched the job.
    pub watcher_key: Option<WatcherKey>,
    pub request: CaptureSpec,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    /// Process group of the running capture, while STARTED.
    pub pid: Option<i32>,
    /// Start identity of the `pid` process; recovery only kills a match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_identity: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub result: JobResult,
}

/// Partial update merged into a job by the state store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub returncode: Option<i32>,
    pub files: Option<Vec<String>>,
    pub uploads: Option<Vec<UploadRecord>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub pid: Option<i32>,
    pub pid_identity: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Count this write as a new attempt.
    pub bump_attempt: bool,
}

impl JobUpdate {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code),
            error_message: Some(message.into()),
            ended_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Returned by a successful watcher registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherRef {
    pub key: WatcherKey,
    pub status: WatcherStatus,
}

/// Result of one live-status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveState {
    Live,
    Offline,
}

/// A produced recording file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

/// Filters and paging for a file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default)]
    pub page_size: Option<usize>,
}

fn default_page() -> usize {
    1
}

impl Default for FileQuery {
    fn default() -> Self {
        Self {
            room_id: None,
            url: None,
            from: None,
            to: None,
            page: 1,
            page_size: None,
        }
    }
}

/// One page of a file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePage {
    pub items: Vec<FileEntry>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub started: u64,
    pub retry: u64,
    pub success: u64,
    pub failure: u64,
    pub revoked: u64,
}

impl QueueStats {
    pub fn record(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Started => self.started += count,
            JobStatus::Retry => self.retry += count,
            JobStatus::Success => self.success += count,
            JobStatus::Failure => self.failure += count,
            JobStatus::Revoked => self.revoked += count,
        }
    }

    pub fn outstanding(&self) -> u64 {
        self.pending + self.started + self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_key_prefers_room_id() {
        let room = Target::RoomId("42".into());
        assert_eq!(room.key().as_str(), "42");
        let url = Target::Url("https://www.tiktok.com/@someone/live".into());
        assert_eq!(url.key().as_str(), "https://www.tiktok.com/@someone/live");
    }

    #[test]
    fn url_slug_is_filesystem_safe() {
        let url = Target::Url("https://www.tiktok.com/@some.one/live/".into());
        assert_eq!(url.slug(), "live");
        let url = Target::Url("https://vm.tiktok.com/ZM?x=1".into());
        assert_eq!(url.slug(), "ZM_x_1");
        assert_eq!(Target::RoomId("7".into()).slug(), "7");
    }

    #[test]
    fn capture_request_accepts_partial_json() {
        let req: CaptureRequest =
            serde_json::from_str(r#"{"room_id":"42","duration":5}"#).unwrap();
        assert_eq!(req.room_id.as_deref(), Some("42"));
        assert_eq!(req.duration, Some(5));
        assert!(!req.options.upload);

        let query: FileQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page, 1);
    }

    #[test]
    fn queue_stats_count_outstanding() {
        let mut stats = QueueStats::default();
        stats.record(JobStatus::Pending, 2);
        stats.record(JobStatus::Retry, 1);
        stats.record(JobStatus::Success, 5);
        assert_eq!(stats.outstanding(), 3);
    }
}
