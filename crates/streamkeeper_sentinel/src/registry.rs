//! Watcher Registry: the only writer of watcher status.
//!
//! Rows live in the state database, so the registry survives restarts and
//! is shared by every process using the same database file.

use chrono::{DateTime, Utc};
use streamkeeper_db::StateDb;
use streamkeeper_protocol::{Watcher, WatcherKey, WatcherSpec, WatcherStatus};
use tracing::info;

use crate::error::{EngineError, Result};

#[derive(Clone)]
pub struct WatcherRegistry {
    db: StateDb,
}

impl WatcherRegistry {
    pub fn new(db: StateDb) -> Self {
        Self { db }
    }

    /// Fails with `Conflict` if an active or paused watcher owns the key.
    pub async fn register(&self, spec: &WatcherSpec) -> Result<Watcher> {
        let watcher = self.db.insert_watcher(spec).await?;
        info!(watcher_key = %watcher.key, interval = watcher.poll_interval_secs, "Watcher registered");
        Ok(watcher)
    }

    /// Mark the watcher deleted. A second delete reports `NotFound`.
    pub async fn delete(&self, key: &WatcherKey) -> Result<()> {
        if !self.db.mark_watcher_deleted(key).await? {
            return Err(EngineError::not_found(format!("watcher {}", key)));
        }
        info!(watcher_key = %key, "Watcher deleted");
        Ok(())
    }

    /// Active -> paused. Pausing a paused watcher is a no-op.
    pub async fn pause(&self, key: &WatcherKey) -> Result<Watcher> {
        self.db
            .set_watcher_status(key, &[WatcherStatus::Active], WatcherStatus::Paused)
            .await?;
        self.existing(key).await
    }

    /// Paused -> active. Resuming an active watcher is a no-op.
    pub async fn resume(&self, key: &WatcherKey) -> Result<Watcher> {
        self.db
            .set_watcher_status(key, &[WatcherStatus::Paused], WatcherStatus::Active)
            .await?;
        self.existing(key).await
    }

    /// The live (active or paused) watcher for `key`, if any.
    pub async fn get(&self, key: &WatcherKey) -> Result<Option<Watcher>> {
        Ok(self.db.get_watcher(key).await?)
    }

    /// Used at startup and by the reconcile pass to re-arm loops.
    pub async fn list_active(&self) -> Result<Vec<Watcher>> {
        Ok(self.db.list_active_watchers().await?)
    }

    pub async fn list(&self, include_deleted: bool) -> Result<Vec<Watcher>> {
        Ok(self.db.list_watchers(include_deleted).await?)
    }

    /// Record a dispatch for an active watcher.
    pub async fn touch(&self, key: &WatcherKey, at: DateTime<Utc>) -> Result<bool> {
        Ok(self.db.touch_watcher(key, at).await?)
    }

    async fn existing(&self, key: &WatcherKey) -> Result<Watcher> {
        self.db
            .get_watcher(key)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("watcher {}", key)))
    }
}
