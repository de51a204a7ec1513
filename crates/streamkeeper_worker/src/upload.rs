//! Upload Sink Adapter: push finished recordings to object storage.
//!
//! Uploads run only after a successful capture and never change the job's
//! outcome. Each file is retried on its own; the per-file result ends up in
//! the job's `uploads` list.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use streamkeeper_protocol::{Target, UploadRecord};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub location: String,
    pub bucket: Option<String>,
    pub key: String,
}

/// Upload errors, classified for retry decisions.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Rejected by the store (4xx). Not retried.
    #[error("Upload rejected with status {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Upload failed with status {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Upload transport error: {0}")]
    Network(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Server { .. } | UploadError::Network(_))
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Network(err.to_string())
    }
}

/// Destination for recorded files.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn put(&self, file: &Path, key: &str) -> Result<StoredObject, UploadError>;
}

/// Per-file retry policy with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Total attempts per file, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryStrategy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the attempt following `attempt` (1-based): base * 2^(attempt-1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    pub fn should_retry(&self, attempt: u32, error: &UploadError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

/// `<target>/<YYYY>/<MM>/<DD>/<filename>`
pub fn object_key(target: &Target, file: &Path, now: DateTime<Utc>) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    format!("{}/{}/{}", target.slug(), now.format("%Y/%m/%d"), name)
}

/// Upload each file, retrying per file. Never fails as a whole.
pub async fn upload_files(
    sink: &dyn UploadSink,
    files: &[PathBuf],
    target: &Target,
    strategy: RetryStrategy,
) -> Vec<UploadRecord> {
    let mut records = Vec::with_capacity(files.len());
    for file in files {
        let key = object_key(target, file, Utc::now());
        records.push(upload_one(sink, file, &key, strategy).await);
    }
    records
}

async fn upload_one(
    sink: &dyn UploadSink,
    file: &Path,
    key: &str,
    strategy: RetryStrategy,
) -> UploadRecord {
    let shown = file.display().to_string();
    let size = tokio::fs::metadata(file).await.ok().map(|m| m.len());
    let mut attempt = 1;

    loop {
        match sink.put(file, key).await {
            Ok(stored) => {
                info!(sink = sink.name(), file = %shown, location = %stored.location, "Uploaded recording");
                return UploadRecord {
                    file: shown,
                    location: Some(stored.location),
                    bucket: stored.bucket,
                    key: Some(stored.key),
                    size,
                    uploaded_at: Some(Utc::now()),
                    ok: true,
                    error: None,
                };
            }
            Err(err) if strategy.should_retry(attempt, &err) => {
                let delay = strategy.backoff(attempt);
                warn!(
                    sink = sink.name(),
                    file = %shown,
                    attempt,
                    "Upload failed, retrying in {:?}: {}",
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(sink = sink.name(), file = %shown, attempt, "Upload gave up: {}", err);
                let mut record = UploadRecord::failed(shown, err.to_string());
                record.key = Some(key.to_string());
                record.size = size;
                return record;
            }
        }
    }
}

/// `PUT <endpoint>/<bucket>/<key>` with an optional bearer token.
pub struct HttpObjectSink {
    client: reqwest::Client,
    endpoint: String,
    bucket: Option<String>,
    token: Option<String>,
}

impl HttpObjectSink {
    pub fn new(endpoint: impl Into<String>, bucket: Option<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket,
            token,
        }
    }

    fn object_url(&self, key: &str) -> String {
        match &self.bucket {
            Some(bucket) => format!("{}/{}/{}", self.endpoint, bucket, key),
            None => format!("{}/{}", self.endpoint, key),
        }
    }
}

#[async_trait]
impl UploadSink for HttpObjectSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn put(&self, file: &Path, key: &str) -> Result<StoredObject, UploadError> {
        let io_err = |source| UploadError::Io {
            path: file.to_path_buf(),
            source,
        };
        let handle = tokio::fs::File::open(file).await.map_err(io_err)?;
        let len = handle.metadata().await.map_err(io_err)?.len();

        let url = self.object_url(key);
        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(reqwest::Body::from(handle));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(url = %url, bytes = len, "PUT accepted");
            return Ok(StoredObject {
                location: url,
                bucket: self.bucket.clone(),
                key: key.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if status.is_client_error() {
            Err(UploadError::Client {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(UploadError::Server {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Copies recordings into a local directory laid out like the object store.
pub struct MirrorSink {
    root: PathBuf,
}

impl MirrorSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl UploadSink for MirrorSink {
    fn name(&self) -> &str {
        "mirror"
    }

    async fn put(&self, file: &Path, key: &str) -> Result<StoredObject, UploadError> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| UploadError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::copy(file, &dest)
            .await
            .map_err(|source| UploadError::Io {
                path: file.to_path_buf(),
                source,
            })?;
        Ok(StoredObject {
            location: dest.display().to_string(),
            bucket: None,
            key: key.to_string(),
        })
    }
}
