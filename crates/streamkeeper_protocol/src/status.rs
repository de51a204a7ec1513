//! Job and watcher status machines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a capture job.
///
/// ```text
/// PENDING -> STARTED -> SUCCESS | FAILURE | REVOKED
///                    -> RETRY -> STARTED
/// ```
///
/// FAILURE and SUCCESS are only reachable from STARTED, even for a job whose
/// process never spawned. Revocation is accepted from every non-terminal
/// state; a RETRY job is waiting to be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
}

impl JobStatus {
    pub const NON_TERMINAL: [JobStatus; 3] = [JobStatus::Pending, JobStatus::Started, JobStatus::Retry];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Started => "STARTED",
            JobStatus::Retry => "RETRY",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Revoked => "REVOKED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure | JobStatus::Revoked)
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Re-writing the same non-terminal state is allowed so that partial
    /// results can be merged while a job runs.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Started)
                | (Pending, Revoked)
                | (Started, Success)
                | (Started, Failure)
                | (Started, Retry)
                | (Started, Revoked)
                | (Retry, Started)
                | (Retry, Revoked)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "STARTED" => Ok(JobStatus::Started),
            "RETRY" => Ok(JobStatus::Retry),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILURE" => Ok(JobStatus::Failure),
            "REVOKED" => Ok(JobStatus::Revoked),
            _ => Err(format!("Invalid job status: '{}'", s)),
        }
    }
}

/// Watcher registration status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatcherStatus {
    #[default]
    Active,
    Paused,
    Deleted,
}

impl WatcherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherStatus::Active => "active",
            WatcherStatus::Paused => "paused",
            WatcherStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for WatcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WatcherStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(WatcherStatus::Active),
            "paused" => Ok(WatcherStatus::Paused),
            "deleted" => Ok(WatcherStatus::Deleted),
            _ => Err(format!("Invalid watcher status: '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [JobStatus::Success, JobStatus::Failure, JobStatus::Revoked] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Pending,
                JobStatus::Started,
                JobStatus::Retry,
                JobStatus::Success,
                JobStatus::Failure,
                JobStatus::Revoked,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn started_precedes_success() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Success));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Retry));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Started));
        assert!(JobStatus::Started.can_transition_to(JobStatus::Success));
        assert!(JobStatus::Retry.can_transition_to(JobStatus::Started));
        assert!(!JobStatus::Retry.can_transition_to(JobStatus::Success));
    }

    #[test]
    fn failure_requires_a_start() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failure));
        assert!(!JobStatus::Retry.can_transition_to(JobStatus::Failure));
        assert!(JobStatus::Started.can_transition_to(JobStatus::Failure));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Revoked));
        assert!(JobStatus::Retry.can_transition_to(JobStatus::Revoked));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [JobStatus::Pending, JobStatus::Retry, JobStatus::Revoked] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!("paused".parse::<WatcherStatus>().unwrap(), WatcherStatus::Paused);
        assert!("gone".parse::<WatcherStatus>().is_err());
    }
}
