//! Watcher registry table.

use crate::error::{is_unique_violation, Result, StoreError};
use crate::StateDb;
use chrono::{DateTime, Utc};
use sqlx::Row;
use streamkeeper_protocol::{
    CaptureOptions, Target, Watcher, WatcherKey, WatcherSpec, WatcherStatus,
};

impl StateDb {
    /// Insert an active watcher. Fails with `Conflict` if a live row owns the key.
    pub async fn insert_watcher(&self, spec: &WatcherSpec) -> Result<Watcher> {
        let key = spec.key();
        let options_json = serde_json::to_string(&spec.options)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sk_watchers
                (watcher_key, room_id, url, poll_interval_secs, status, options_json, created_at)
            VALUES (?, ?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(key.as_str())
        .bind(spec.target.room_id())
        .bind(spec.target.url())
        .bind(spec.poll_interval_secs as i64)
        .bind(&options_json)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::conflict(format!(
                    "watcher already registered for {}",
                    key
                )));
            }
            Err(err) => return Err(err.into()),
        }

        self.get_watcher(&key)
            .await?
            .ok_or_else(|| StoreError::invalid_state(format!("watcher {} vanished after insert", key)))
    }

    /// The active or paused watcher owning `key`.
    pub async fn get_watcher(&self, key: &WatcherKey) -> Result<Option<Watcher>> {
        let row = sqlx::query(
            "SELECT * FROM sk_watchers WHERE watcher_key = ? AND status IN ('active', 'paused')",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.row_to_watcher(&row)).transpose()
    }

    /// Atomically move the live watcher for `key` from one of `from` to `to`.
    ///
    /// Returns false when no row matched.
    pub async fn set_watcher_status(
        &self,
        key: &WatcherKey,
        from: &[WatcherStatus],
        to: WatcherStatus,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let allowed: Vec<String> = from.iter().map(|s| format!("'{}'", s.as_str())).collect();
        let sql = format!(
            "UPDATE sk_watchers SET status = ? WHERE watcher_key = ? AND status IN ({})",
            allowed.join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(key.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    /// Mark the watcher deleted. Returns false if there was nothing to delete.
    pub async fn mark_watcher_deleted(&self, key: &WatcherKey) -> Result<bool> {
        self.set_watcher_status(
            key,
            &[WatcherStatus::Active, WatcherStatus::Paused],
            WatcherStatus::Deleted,
        )
        .await
    }

    /// Record a dispatch. Only active watchers are touched.
    pub async fn touch_watcher(&self, key: &WatcherKey, at: DateTime<Utc>) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE sk_watchers SET last_run_at = ? WHERE watcher_key = ? AND status = 'active'",
        )
        .bind(at.timestamp_millis())
        .bind(key.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    /// Active watchers, oldest registration first.
    pub async fn list_active_watchers(&self) -> Result<Vec<Watcher>> {
        let rows = sqlx::query("SELECT * FROM sk_watchers WHERE status = 'active' ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| self.row_to_watcher(row)).collect()
    }

    /// Active and paused watchers, plus deleted history when asked.
    pub async fn list_watchers(&self, include_deleted: bool) -> Result<Vec<Watcher>> {
        let sql = if include_deleted {
            "SELECT * FROM sk_watchers ORDER BY id ASC"
        } else {
            "SELECT * FROM sk_watchers WHERE status IN ('active', 'paused') ORDER BY id ASC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(|row| self.row_to_watcher(row)).collect()
    }

    fn row_to_watcher(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Watcher> {
        let room_id: Option<String> = row.get("room_id");
        let url: Option<String> = row.get("url");
        let target = match (room_id, url) {
            (Some(room_id), None) => Target::RoomId(room_id),
            (None, Some(url)) => Target::Url(url),
            _ => {
                return Err(StoreError::invalid_state(format!(
                    "watcher {} has no single target",
                    row.get::<i64, _>("id")
                )))
            }
        };

        let status: String = row.get("status");
        let status = status
            .parse::<WatcherStatus>()
            .map_err(StoreError::invalid_state)?;

        let options_json: String = row.get("options_json");
        let options: CaptureOptions = serde_json::from_str(&options_json)?;

        Ok(Watcher {
            id: row.get("id"),
            key: WatcherKey::new(row.get::<String, _>("watcher_key")),
            target,
            poll_interval_secs: row.get::<i64, _>("poll_interval_secs") as u64,
            status,
            created_at: Self::millis_to_datetime(row.get("created_at")),
            last_run_at: row
                .get::<Option<i64>, _>("last_run_at")
                .map(Self::millis_to_datetime),
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_db() -> (TempDir, StateDb) {
        let temp = TempDir::new().unwrap();
        let db = StateDb::open(temp.path().join("watchers.sqlite3")).await.unwrap();
        (temp, db)
    }

    fn spec(room: &str) -> WatcherSpec {
        WatcherSpec {
            target: Target::RoomId(room.into()),
            poll_interval_secs: 30,
            options: CaptureOptions {
                proxy: Some("http://127.0.0.1:8080".into()),
                cookies: None,
                upload: true,
            },
        }
    }

    #[tokio::test]
    async fn duplicate_live_key_conflicts() {
        let (_temp, db) = open_db().await;
        let watcher = db.insert_watcher(&spec("42")).await.unwrap();
        assert_eq!(watcher.status, WatcherStatus::Active);
        assert_eq!(watcher.options.proxy.as_deref(), Some("http://127.0.0.1:8080"));

        let err = db.insert_watcher(&spec("42")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn paused_watcher_still_owns_key() {
        let (_temp, db) = open_db().await;
        let key = WatcherKey::from("42");
        db.insert_watcher(&spec("42")).await.unwrap();
        assert!(db
            .set_watcher_status(&key, &[WatcherStatus::Active], WatcherStatus::Paused)
            .await
            .unwrap());

        assert!(db.insert_watcher(&spec("42")).await.is_err());
        assert!(db.list_active_watchers().await.unwrap().is_empty());
        assert_eq!(db.list_watchers(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_frees_key_once() {
        let (_temp, db) = open_db().await;
        let key = WatcherKey::from("42");
        db.insert_watcher(&spec("42")).await.unwrap();

        assert!(db.mark_watcher_deleted(&key).await.unwrap());
        assert!(!db.mark_watcher_deleted(&key).await.unwrap());
        assert!(db.get_watcher(&key).await.unwrap().is_none());

        // Re-registering after delete is allowed; history is kept.
        db.insert_watcher(&spec("42")).await.unwrap();
        assert_eq!(db.list_watchers(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn touch_only_updates_active_rows() {
        let (_temp, db) = open_db().await;
        let key = WatcherKey::from("42");
        db.insert_watcher(&spec("42")).await.unwrap();

        let now = Utc::now();
        assert!(db.touch_watcher(&key, now).await.unwrap());
        let watcher = db.get_watcher(&key).await.unwrap().unwrap();
        assert_eq!(
            watcher.last_run_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );

        db.mark_watcher_deleted(&key).await.unwrap();
        assert!(!db.touch_watcher(&key, now).await.unwrap());
    }
}
