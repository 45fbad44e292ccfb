//! SQLite store for processing jobs.
//!
//! Every write goes through a status transition guarded by the current
//! status in the `WHERE` clause, so concurrent workers sharing the database
//! can never move a row backwards or out of a terminal state.

use super::models::{Job, JobStatus};
use super::schema::{migrate_v1_to_v2, JOBS_SCHEMA_SQL, JOBS_SCHEMA_VERSION};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Trait for job storage operations.
pub trait JobStore: Send + Sync {
    /// Register a new pending job. Returns false if the id already exists.
    fn register(&self, id: &str, source_key: &str) -> Result<bool>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<Job>>;

    // === State Transitions (atomic) ===

    /// Atomically claim a job for processing (PENDING → PROCESSING).
    /// Returns true if claimed, false if already claimed or not pending.
    fn try_claim(&self, id: &str) -> Result<bool>;

    /// Refresh the lease of a job that is being processed.
    /// Returns false if the job is no longer processing, i.e. the lease is lost.
    fn heartbeat(&self, id: &str) -> Result<bool>;

    /// Mark a processing job as completed (PROCESSING → COMPLETED).
    /// Returns false if the job was not processing.
    fn complete(&self, id: &str) -> Result<bool>;

    /// Mark a processing job as failed (PROCESSING → FAILED).
    /// Returns false if the job was not processing.
    fn fail(&self, id: &str, message: &str) -> Result<bool>;

    // === Queries ===

    /// List job ids with the given status, oldest first.
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<String>>;

    /// Fail every processing job whose lease is older than `older_than_secs`.
    /// Returns the ids that were transitioned.
    fn fail_stale_processing(&self, older_than_secs: i64, message: &str) -> Result<Vec<String>>;
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open or create a jobs database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open jobs database: {:?}", db_path))?;
        let store = Self::new_with_connection(conn)?;
        info!("Opened jobs database at {:?}", db_path);
        Ok(store)
    }

    /// Create an in-memory database (tests, dry runs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new_with_connection(conn)
    }

    fn new_with_connection(conn: Connection) -> Result<Self> {
        let conn = Self::init(conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: Connection) -> Result<Connection> {
        // Concurrent workers may share one database file.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrate_v1_to_v2(&conn)?;
        conn.execute_batch(JOBS_SCHEMA_SQL)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", JOBS_SCHEMA_VERSION))?;
        Ok(conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("jobs database connection lock poisoned"))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let raw_status: String = row.get("status")?;
        let status = JobStatus::from_db_str(&raw_status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown job status code {:?}", raw_status).into(),
            )
        })?;

        Ok(Job {
            id: row.get("id")?,
            source_key: row.get("source_key")?,
            status,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            claimed_at: row.get("claimed_at")?,
            finished_at: row.get("finished_at")?,
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl JobStore for SqliteJobStore {
    fn register(&self, id: &str, source_key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Self::now();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO processing_jobs (id, source_key, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![id, source_key, JobStatus::Pending.as_db_str(), now],
        )?;
        Ok(inserted == 1)
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                "SELECT * FROM processing_jobs WHERE id = ?1",
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn try_claim(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Self::now();
        let updated = conn.execute(
            r#"
            UPDATE processing_jobs
               SET status = ?2, claimed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = ?4
            "#,
            params![
                id,
                JobStatus::Processing.as_db_str(),
                now,
                JobStatus::Pending.as_db_str()
            ],
        )?;
        debug!("Claim of job {}: {}", id, updated == 1);
        Ok(updated == 1)
    }

    fn heartbeat(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE processing_jobs SET updated_at = ?2 WHERE id = ?1 AND status = ?3",
            params![id, Self::now(), JobStatus::Processing.as_db_str()],
        )?;
        Ok(updated == 1)
    }

    fn complete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Self::now();
        let updated = conn.execute(
            r#"
            UPDATE processing_jobs
               SET status = ?2, error_message = NULL, updated_at = ?3, finished_at = ?3
             WHERE id = ?1 AND status = ?4
            "#,
            params![
                id,
                JobStatus::Completed.as_db_str(),
                now,
                JobStatus::Processing.as_db_str()
            ],
        )?;
        Ok(updated == 1)
    }

    fn fail(&self, id: &str, message: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Self::now();
        let updated = conn.execute(
            r#"
            UPDATE processing_jobs
               SET status = ?2, error_message = ?3, updated_at = ?4, finished_at = ?4
             WHERE id = ?1 AND status = ?5
            "#,
            params![
                id,
                JobStatus::Failed.as_db_str(),
                message,
                now,
                JobStatus::Processing.as_db_str()
            ],
        )?;
        Ok(updated == 1)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM processing_jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let ids = stmt
            .query_map(params![status.as_db_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn fail_stale_processing(&self, older_than_secs: i64, message: &str) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let now = Self::now();
        let cutoff = now - older_than_secs;
        let processing = JobStatus::Processing.as_db_str();

        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM processing_jobs WHERE status = ?1 AND updated_at < ?2 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![processing, cutoff], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut failed = Vec::with_capacity(stale.len());
        for id in stale {
            let updated = tx.execute(
                r#"
                UPDATE processing_jobs
                   SET status = ?2, error_message = ?3, updated_at = ?4, finished_at = ?4
                 WHERE id = ?1 AND status = ?5 AND updated_at < ?6
                "#,
                params![
                    id,
                    JobStatus::Failed.as_db_str(),
                    message,
                    now,
                    processing,
                    cutoff
                ],
            )?;
            if updated == 1 {
                failed.push(id);
            }
        }
        tx.commit()?;

        Ok(failed)
    }
}
