//! Error codes shared by the control and data plane.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Machine-readable error codes persisted in job results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input
    ValidationError,
    InvalidUrl,
    InvalidRoomId,
    ProxyError,
    CookiesInvalid,

    // Capture process
    RecorderExitNonzero,
    InvalidTargetUrl,
    InvalidTargetRoom,
    NetworkTimeout,
    LiveOffline,
    DependencyMissing,
    ArtifactMissing,

    // Engine
    Interrupted,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::InvalidRoomId => "INVALID_ROOM_ID",
            ErrorCode::ProxyError => "PROXY_ERROR",
            ErrorCode::CookiesInvalid => "COOKIES_INVALID",
            ErrorCode::RecorderExitNonzero => "RECORDER_EXIT_NONZERO",
            ErrorCode::InvalidTargetUrl => "INVALID_TARGET_URL",
            ErrorCode::InvalidTargetRoom => "INVALID_TARGET_ROOM",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::LiveOffline => "LIVE_OFFLINE",
            ErrorCode::DependencyMissing => "DEPENDENCY_MISSING",
            ErrorCode::ArtifactMissing => "ARTIFACT_MISSING",
            ErrorCode::Interrupted => "INTERRUPTED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Map a capture process return code to an error code.
    ///
    /// Recorder convention: 1 generic, 2 bad URL, 3 bad room, 4 network
    /// timeout, 5 target offline, 127 missing binary/dependency.
    pub fn from_returncode(code: i32) -> Self {
        match code {
            2 => ErrorCode::InvalidTargetUrl,
            3 => ErrorCode::InvalidTargetRoom,
            4 => ErrorCode::NetworkTimeout,
            5 => ErrorCode::LiveOffline,
            127 => ErrorCode::DependencyMissing,
            _ => ErrorCode::RecorderExitNonzero,
        }
    }

    /// Only network timeouts are eligible for RETRY.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::NetworkTimeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = match s {
            "VALIDATION_ERROR" => ErrorCode::ValidationError,
            "INVALID_URL" => ErrorCode::InvalidUrl,
            "INVALID_ROOM_ID" => ErrorCode::InvalidRoomId,
            "PROXY_ERROR" => ErrorCode::ProxyError,
            "COOKIES_INVALID" => ErrorCode::CookiesInvalid,
            "RECORDER_EXIT_NONZERO" => ErrorCode::RecorderExitNonzero,
            "INVALID_TARGET_URL" => ErrorCode::InvalidTargetUrl,
            "INVALID_TARGET_ROOM" => ErrorCode::InvalidTargetRoom,
            "NETWORK_TIMEOUT" => ErrorCode::NetworkTimeout,
            "LIVE_OFFLINE" => ErrorCode::LiveOffline,
            "DEPENDENCY_MISSING" => ErrorCode::DependencyMissing,
            "ARTIFACT_MISSING" => ErrorCode::ArtifactMissing,
            "INTERRUPTED" => ErrorCode::Interrupted,
            "INTERNAL_ERROR" => ErrorCode::InternalError,
            _ => return Err(format!("Invalid error code: '{}'", s)),
        };
        Ok(code)
    }
}

/// Input rejected before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ErrorCode, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            field,
            message: message.into(),
        }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, field, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returncode_mapping_follows_recorder_convention() {
        assert_eq!(ErrorCode::from_returncode(1), ErrorCode::RecorderExitNonzero);
        assert_eq!(ErrorCode::from_returncode(4), ErrorCode::NetworkTimeout);
        assert_eq!(ErrorCode::from_returncode(5), ErrorCode::LiveOffline);
        assert_eq!(ErrorCode::from_returncode(127), ErrorCode::DependencyMissing);
        assert_eq!(ErrorCode::from_returncode(-9), ErrorCode::RecorderExitNonzero);
    }

    #[test]
    fn only_network_timeout_is_transient() {
        assert!(ErrorCode::NetworkTimeout.is_transient());
        assert!(!ErrorCode::LiveOffline.is_transient());
        assert!(!ErrorCode::DependencyMissing.is_transient());
    }

    #[test]
    fn codes_parse_from_their_string_form() {
        for code in [ErrorCode::ArtifactMissing, ErrorCode::Interrupted, ErrorCode::ProxyError] {
            assert_eq!(code.as_str().parse::<ErrorCode>().unwrap(), code);
        }
    }
}
