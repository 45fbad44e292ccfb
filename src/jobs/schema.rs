//! Database schema for processing jobs.
//!
//! - processing_jobs: one row per uploaded track

/// Current schema version, stored in `PRAGMA user_version`.
pub const JOBS_SCHEMA_VERSION: i32 = 2;

/// SQL schema for the jobs database.
///
/// `status` holds the legacy codes: '0' (pending), 'processing', 'completed', 'failed'.
pub const JOBS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processing_jobs (
    id TEXT PRIMARY KEY,
    source_key TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT '0',
    error_message TEXT,

    -- Timestamps (Unix seconds)
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    claimed_at INTEGER,
    finished_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_processing_jobs_status ON processing_jobs(status);
CREATE INDEX IF NOT EXISTS idx_processing_jobs_status_updated ON processing_jobs(status, updated_at);
"#;

/// Migrate a v1 database (no lease columns) to v2.
///
/// v1 only tracked `created_at`; rows keep their creation time as the
/// initial `updated_at`.
pub fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= JOBS_SCHEMA_VERSION {
        return Ok(());
    }

    let mut stmt = conn.prepare("PRAGMA table_info(processing_jobs)")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;

    // Fresh database, the table is created by JOBS_SCHEMA_SQL.
    if columns.is_empty() {
        return Ok(());
    }

    if !columns.iter().any(|c| c == "updated_at") {
        conn.execute_batch(
            r#"
            ALTER TABLE processing_jobs ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0;
            UPDATE processing_jobs SET updated_at = created_at;
            "#,
        )?;
    }
    if !columns.iter().any(|c| c == "claimed_at") {
        conn.execute_batch("ALTER TABLE processing_jobs ADD COLUMN claimed_at INTEGER;")?;
    }
    if !columns.iter().any(|c| c == "finished_at") {
        conn.execute_batch("ALTER TABLE processing_jobs ADD COLUMN finished_at INTEGER;")?;
    }

    Ok(())
}
