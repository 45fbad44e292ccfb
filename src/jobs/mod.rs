//! Processing job records.
//!
//! One row per uploaded track. Rows move along
//! `Pending → Processing → {Completed, Failed}` and never back.

mod models;
mod schema;
mod store;

pub use models::{Job, JobStatus};
pub use schema::{JOBS_SCHEMA_SQL, JOBS_SCHEMA_VERSION};
pub use store::{JobStore, SqliteJobStore};

use crate::config::{AppConfig, DbType};
use anyhow::{bail, Result};
use std::sync::Arc;

/// Open the job store selected by the configuration.
pub fn open_job_store(config: &AppConfig) -> Result<Arc<dyn JobStore>> {
    match config.db_type {
        DbType::Sqlite => Ok(Arc::new(SqliteJobStore::new(&config.db_path)?)),
        DbType::Mysql | DbType::Postgresql => bail!(
            "db_type '{}' needs a server-backed job store, which this build does not include; use 'sqlite'",
            config.db_type
        ),
    }
}
