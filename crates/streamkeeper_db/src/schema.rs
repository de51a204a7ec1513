//! Schema creation. All CREATE statements live here.

use crate::error::Result;
use crate::StateDb;
use tracing::info;

impl StateDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        self.create_watcher_tables().await?;
        self.create_job_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_watcher_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sk_watchers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                watcher_key TEXT NOT NULL,
                room_id TEXT,
                url TEXT,
                poll_interval_secs INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                options_json TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                last_run_at INTEGER,
                CHECK ((room_id IS NULL) <> (url IS NULL))
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Deleted rows are kept as history; only live rows own the key.
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS ix_sk_watchers_live_key
               ON sk_watchers(watcher_key)
               WHERE status IN ('active', 'paused')"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_job_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sk_jobs (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'PENDING',
                watcher_key TEXT,
                request_json TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                submitted_at INTEGER NOT NULL,
                started_at INTEGER,
                ended_at INTEGER,
                returncode INTEGER,
                files_json TEXT,
                uploads_json TEXT,
                error_code TEXT,
                error_message TEXT,
                pid INTEGER,
                pid_identity TEXT,
                next_attempt_at INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_sk_jobs_status ON sk_jobs(status, submitted_at)",
        )
        .execute(&self.pool)
        .await?;

        // At most one outstanding job per watcher key.
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS ix_sk_jobs_outstanding_key
               ON sk_jobs(watcher_key)
               WHERE watcher_key IS NOT NULL AND status IN ('PENDING', 'STARTED', 'RETRY')"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
