//! Streamkeeper control plane.
//!
//! Turns capture requests and watcher registrations into supervised capture
//! jobs. [`Engine`] is the entry point; the modules below are its parts and
//! are public for tests and embedding.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod file_index;
pub mod metrics;
pub mod pool;
pub mod probe;
pub mod registry;
pub mod runner;
pub mod scheduler;

pub use config::EngineConfig;
pub use engine::{Engine, EngineMode, RecoveryReport};
pub use error::{EngineError, Result};
pub use file_index::FileIndex;
pub use metrics::{MetricsSnapshot, METRICS};
pub use probe::{CommandProbe, LiveStatusProbe, ProbeError, StaticProbe};
pub use registry::WatcherRegistry;
pub use scheduler::{PollBackoff, PollScheduler};
