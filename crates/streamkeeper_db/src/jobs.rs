//! Job state store.

use crate::error::{is_unique_violation, Result, StoreError};
use crate::StateDb;
use sqlx::Row;
use streamkeeper_protocol::{
    CaptureSpec, ErrorCode, Job, JobId, JobResult, JobStatus, JobUpdate, QueueStats,
    UploadRecord, WatcherKey,
};
use tracing::debug;

/// A lost compare-and-set is re-evaluated this many times before giving up.
const MAX_CAS_ATTEMPTS: usize = 5;

const OUTSTANDING_SQL: &str = "('PENDING', 'STARTED', 'RETRY')";

/// Outcome of a watcher-triggered insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherDispatch {
    /// A new PENDING job was recorded.
    Created(Job),
    /// The watcher already has a non-terminal job.
    Outstanding(JobId),
    /// The watcher is paused, deleted or unknown.
    Inactive,
}

fn status_list(statuses: &[JobStatus]) -> String {
    let quoted: Vec<String> = statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    format!("({})", quoted.join(", "))
}

impl StateDb {
    // ========================================================================
    // Creation
    // ========================================================================

    /// Record a manual submission as PENDING.
    pub async fn insert_job(&self, job_id: &JobId, spec: &CaptureSpec) -> Result<Job> {
        let request_json = serde_json::to_string(spec)?;
        sqlx::query(
            r#"
            INSERT INTO sk_jobs (job_id, status, request_json, submitted_at)
            VALUES (?, 'PENDING', ?, ?)
            "#,
        )
        .bind(job_id.as_str())
        .bind(&request_json)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;

        self.get_job(job_id).await
    }

    /// Record a watcher-triggered submission as PENDING.
    ///
    /// Single statement: the row is only inserted while the watcher is
    /// active and no other job for the key is outstanding.
    pub async fn insert_watcher_job(
        &self,
        job_id: &JobId,
        key: &WatcherKey,
        spec: &CaptureSpec,
    ) -> Result<WatcherDispatch> {
        let request_json = serde_json::to_string(spec)?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sk_jobs (job_id, status, watcher_key, request_json, submitted_at)
            SELECT ?, 'PENDING', ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM sk_watchers WHERE watcher_key = ? AND status = 'active'
            )
            "#,
        )
        .bind(job_id.as_str())
        .bind(key.as_str())
        .bind(&request_json)
        .bind(Self::now_millis())
        .bind(key.as_str())
        .execute(&self.pool)
        .await;

        let inserted = match result {
            Ok(done) => done.rows_affected() == 1,
            Err(err) if is_unique_violation(&err) => false,
            Err(err) => return Err(err.into()),
        };

        if inserted {
            return Ok(WatcherDispatch::Created(self.get_job(job_id).await?));
        }

        match self.outstanding_job_for_watcher(key).await? {
            Some(job) => Ok(WatcherDispatch::Outstanding(job.job_id)),
            None => Ok(WatcherDispatch::Inactive),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn find_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM sk_jobs WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_job(&row)).transpose()
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.find_job(job_id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("job {}", job_id)))
    }

    /// The non-terminal job dispatched for a watcher, if any.
    pub async fn outstanding_job_for_watcher(&self, key: &WatcherKey) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT * FROM sk_jobs WHERE watcher_key = ? AND status IN {} LIMIT 1",
            OUTSTANDING_SQL
        );
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_job(&row)).transpose()
    }

    /// Jobs in any of the given states, oldest submission first.
    pub async fn list_jobs_with_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM sk_jobs WHERE status IN {} ORDER BY submitted_at ASC",
            status_list(statuses)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(|row| self.row_to_job(row)).collect()
    }

    /// Most recent jobs first.
    pub async fn list_recent_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM sk_jobs ORDER BY submitted_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| self.row_to_job(row)).collect()
    }

    /// Count of jobs per status.
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM sk_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let status = status
                .parse::<JobStatus>()
                .map_err(StoreError::invalid_state)?;
            stats.record(status, row.get::<i64, _>("n") as u64);
        }
        Ok(stats)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Move a job to `to`, merging `update` into its result.
    ///
    /// The write only lands if the job is currently in one of `expected` and
    /// the edge exists in the state machine. Writes against a terminal job
    /// fail with [`StoreError::TerminalState`].
    pub async fn transition_job(
        &self,
        job_id: &JobId,
        expected: &[JobStatus],
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<Job> {
        let files_json = update.files.as_ref().map(serde_json::to_string).transpose()?;
        let uploads_json = update
            .uploads
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error_code = update.error_code.map(|c| c.as_str());

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get_job(job_id).await?;
            let from = current.status;

            if from.is_terminal() {
                return Err(StoreError::TerminalState {
                    job_id: job_id.to_string(),
                    status: from,
                });
            }
            if !expected.contains(&from) || !from.can_transition_to(to) {
                return Err(StoreError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from,
                    to,
                });
            }

            let rows = sqlx::query(
                r#"
                UPDATE sk_jobs SET
                    status = ?,
                    attempts = attempts + ?,
                    started_at = COALESCE(?, started_at),
                    ended_at = COALESCE(?, ended_at),
                    returncode = COALESCE(?, returncode),
                    files_json = COALESCE(?, files_json),
                    uploads_json = COALESCE(?, uploads_json),
                    error_code = CASE WHEN ? = 'SUCCESS' THEN NULL ELSE COALESCE(?, error_code) END,
                    error_message = CASE WHEN ? = 'SUCCESS' THEN NULL ELSE COALESCE(?, error_message) END,
                    pid = COALESCE(?, pid),
                    pid_identity = COALESCE(?, pid_identity),
                    next_attempt_at = COALESCE(?, next_attempt_at)
                WHERE job_id = ? AND status = ?
                "#,
            )
            .bind(to.as_str())
            .bind(update.bump_attempt as i64)
            .bind(update.started_at.map(|t| t.timestamp_millis()))
            .bind(update.ended_at.map(|t| t.timestamp_millis()))
            .bind(update.returncode)
            .bind(&files_json)
            .bind(&uploads_json)
            .bind(to.as_str())
            .bind(error_code)
            .bind(to.as_str())
            .bind(&update.error_message)
            .bind(update.pid)
            .bind(&update.pid_identity)
            .bind(update.next_attempt_at.map(|t| t.timestamp_millis()))
            .bind(job_id.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

            if rows == 1 {
                debug!(job_id = %job_id, from = %from, to = %to, "Job transition");
                return self.get_job(job_id).await;
            }
            debug!(job_id = %job_id, from = %from, "Job changed underneath transition, re-reading");
        }

        Err(StoreError::invalid_state(format!(
            "job {} kept changing during transition to {}",
            job_id, to
        )))
    }

    fn row_to_job(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
        let job_id: String = row.get("job_id");
        let job_id = JobId::parse(&job_id)
            .map_err(|e| StoreError::invalid_state(format!("Bad job id in store: {}", e)))?;

        let status: String = row.get("status");
        let status = status.parse::<JobStatus>().map_err(StoreError::invalid_state)?;

        let request_json: String = row.get("request_json");
        let request: CaptureSpec = serde_json::from_str(&request_json)?;

        let files: Vec<String> = match row.get::<Option<String>, _>("files_json") {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        let uploads: Vec<UploadRecord> = match row.get::<Option<String>, _>("uploads_json") {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        let error_code = row
            .get::<Option<String>, _>("error_code")
            .map(|code| code.parse::<ErrorCode>().map_err(StoreError::invalid_state))
            .transpose()?;

        Ok(Job {
            job_id,
            status,
            watcher_key: row
                .get::<Option<String>, _>("watcher_key")
                .map(WatcherKey::new),
            request,
            attempts: row.get::<i64, _>("attempts") as u32,
            submitted_at: Self::millis_to_datetime(row.get("submitted_at")),
            pid: row.get::<Option<i64>, _>("pid").map(|pid| pid as i32),
            pid_identity: row.get("pid_identity"),
            next_attempt_at: row
                .get::<Option<i64>, _>("next_attempt_at")
                .map(Self::millis_to_datetime),
            result: JobResult {
                returncode: row.get::<Option<i64>, _>("returncode").map(|rc| rc as i32),
                files,
                uploads,
                started_at: row
                    .get::<Option<i64>, _>("started_at")
                    .map(Self::millis_to_datetime),
                ended_at: row
                    .get::<Option<i64>, _>("ended_at")
                    .map(Self::millis_to_datetime),
                error_code,
                error_message: row.get("error_message"),
            },
        })
    }
}
