//! Shared data model for streamkeeper.
//!
//! Everything that crosses a crate boundary lives here: identifiers, the job
//! and watcher status machines, request and result payloads, the error code
//! taxonomy and input validation.

pub mod defaults;
pub mod error;
pub mod ids;
pub mod status;
pub mod types;
pub mod validation;

pub use error::{ErrorCode, ValidationError};
pub use ids::{IdParseError, JobId, WatcherKey};
pub use status::{JobStatus, WatcherStatus};
pub use types::{
    CaptureOptions, CaptureRequest, CaptureSpec, FileEntry, FilePage, FileQuery, Job, JobRef,
    JobResult, JobUpdate, LiveState, QueueStats, Target, UploadRecord, Watcher,
    WatcherRef, WatcherRequest, WatcherSpec,
};
pub use validation::ValidationLimits;
