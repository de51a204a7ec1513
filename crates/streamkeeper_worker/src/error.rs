//! Worker error types.

use std::path::PathBuf;
use streamkeeper_protocol::ErrorCode;
use thiserror::Error;

/// Longest stderr excerpt carried into a job error message.
const MAX_STDERR_EXCERPT: usize = 500;

/// The capture process could not be started at all.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Capture binary not found: {program}")]
    MissingBinary { program: PathBuf },

    #[error("Failed to spawn {program}: {source}")]
    Io {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while supervising a running capture.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lost track of capture process: {0}")]
    Wait(#[from] std::io::Error),

    #[error("Supervisor task failed: {0}")]
    Join(String),
}

/// Classified capture failure, persisted as the job's error code and message.
///
/// Exit code conventions for the recorder:
/// - 0: Success
/// - 4: Network timeout (retry eligible)
/// - 1, 2, 3, 5, 127, other: Permanent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureFailure {
    /// Retrying will not help (bad target, offline, missing dependency)
    #[error("Permanent failure {code}: {message}")]
    Permanent { code: ErrorCode, message: String },

    /// May succeed on retry
    #[error("Transient failure {code}: {message}")]
    Transient { code: ErrorCode, message: String },
}

impl CaptureFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        if code.is_transient() {
            CaptureFailure::Transient { code, message }
        } else {
            CaptureFailure::Permanent { code, message }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureFailure::Transient { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CaptureFailure::Permanent { code, .. } | CaptureFailure::Transient { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CaptureFailure::Permanent { message, .. }
            | CaptureFailure::Transient { message, .. } => message,
        }
    }

    /// Classify a nonzero exit using the recorder's exit code convention.
    pub fn from_exit_code(code: i32, stderr: &str) -> Self {
        let message = if stderr.trim().is_empty() {
            format!("Recorder exited with code {}", code)
        } else {
            format!("Recorder exited with code {}: {}", code, excerpt(stderr))
        };
        Self::new(ErrorCode::from_returncode(code), message)
    }

    /// The process ran past its wall-clock ceiling and was killed.
    pub fn timed_out(limit_secs: u64) -> Self {
        Self::new(
            ErrorCode::NetworkTimeout,
            format!("Capture exceeded its {}s wall-clock limit and was killed", limit_secs),
        )
    }

    pub fn from_spawn(err: &SpawnError) -> Self {
        Self::new(ErrorCode::DependencyMissing, err.to_string())
    }
}

/// Keep the tail of `stderr`; the last lines usually carry the reason.
pub fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= MAX_STDERR_EXCERPT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_STDERR_EXCERPT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("(truncated) ...{}", &trimmed[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_four_is_transient() {
        let err = CaptureFailure::from_exit_code(4, "connection reset");
        assert!(err.is_transient());
        assert_eq!(err.code(), ErrorCode::NetworkTimeout);
        assert!(err.message().contains("connection reset"));
    }

    #[test]
    fn other_exit_codes_are_permanent() {
        for (rc, code) in [
            (1, ErrorCode::RecorderExitNonzero),
            (2, ErrorCode::InvalidTargetUrl),
            (5, ErrorCode::LiveOffline),
            (127, ErrorCode::DependencyMissing),
            (137, ErrorCode::RecorderExitNonzero),
        ] {
            let err = CaptureFailure::from_exit_code(rc, "");
            assert!(!err.is_transient(), "rc {rc}");
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn long_stderr_keeps_the_tail() {
        let stderr = format!("{}END", "x".repeat(2000));
        let err = CaptureFailure::from_exit_code(1, &stderr);
        assert!(err.message().len() < 600);
        assert!(err.message().ends_with("END"));
        assert!(err.message().contains("truncated"));
    }

    #[test]
    fn timeout_is_network_timeout() {
        let err = CaptureFailure::timed_out(305);
        assert!(err.is_transient());
        assert!(err.message().contains("305s"));
    }
}
