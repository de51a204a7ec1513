//! SQLite persistence for streamkeeper.
//!
//! One database file holds two tables: `sk_watchers` (the watcher registry)
//! and `sk_jobs` (the job state store). Every status change is a
//! compare-and-set against the current row, so concurrent writers for the
//! same job or watcher never overwrite each other.
//!
//! # Usage
//!
//! ```rust,ignore
//! use streamkeeper_db::StateDb;
//!
//! let db = StateDb::open("~/.streamkeeper/streamkeeper.sqlite3").await?;
//! let job = db.get_job(&job_id).await?;
//! let watchers = db.list_active_watchers().await?;
//! ```

mod error;
mod jobs;
mod schema;
mod watchers;

pub use error::{Result, StoreError};
pub use jobs::WatcherDispatch;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Handle to the streamkeeper database. Clone is cheap and shares the pool.
#[derive(Clone)]
pub struct StateDb {
    pool: SqlitePool,
}

impl StateDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Close the database connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl StateDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}
