//! Streamkeeper Worker
//!
//! Runs capture jobs as supervised external processes:
//! - [`launcher`]: spawns the recorder in its own process group and owns its pipes
//! - [`supervisor`]: builds the command line, enforces the ceiling, classifies exits
//! - [`upload`]: optional post-capture upload of produced files

pub mod cancel;
pub mod error;
pub mod launcher;
pub mod supervisor;
pub mod upload;

pub use cancel::CancellationToken;
pub use error::{CaptureFailure, SpawnError, SupervisorError};
pub use launcher::{
    kill_orphaned_capture, process_group_alive, process_identity, CaptureCommand, CaptureHandle,
    CaptureLauncher, CommandLauncher,
};
pub use supervisor::{
    list_output_files, CaptureEnd, CaptureOutcome, ChildSlot, RunningCapture, Supervisor,
    SupervisorConfig, Verdict,
};
pub use upload::{
    object_key, upload_files, HttpObjectSink, MirrorSink, RetryStrategy, StoredObject,
    UploadError, UploadSink,
};
