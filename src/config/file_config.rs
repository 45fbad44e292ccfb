use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub s3_bucket: Option<String>,
    pub db_type: Option<String>,
    pub storage_root: Option<String>,
    pub staging_dir: Option<String>,
    pub raw_prefix: Option<String>,
    pub processed_prefix: Option<String>,
    pub failed_prefix: Option<String>,
    pub segment_duration_sec: Option<u32>,
    pub metrics_port: Option<u16>,

    // Sections
    pub db: Option<DbConfig>,
    pub codec: Option<CodecConfig>,
    pub retry: Option<RetryConfig>,
    pub scheduler: Option<SchedulerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DbConfig {
    /// SQLite database file.
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CodecConfig {
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub processing_lease_secs: Option<u64>,
    /// 0 disables the per-job timeout.
    pub job_timeout_secs: Option<u64>,
    pub register_uploads: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
