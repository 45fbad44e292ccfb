mod file_config;

pub use file_config::{CodecConfig, DbConfig, FileConfig, RetryConfig, SchedulerConfig};

use crate::assets::{
    AssetLayout, DEFAULT_FAILED_PREFIX, DEFAULT_PROCESSED_PREFIX, DEFAULT_RAW_PREFIX,
};
use crate::codec::FfmpegSettings;
use crate::pipeline::{PipelineConfig, RetryPolicy};
use crate::scheduler::SchedulerSettings;
use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Relational backend holding the job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DbType {
    #[default]
    Sqlite,
    Mysql,
    Postgresql,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DbType::Sqlite => "sqlite",
            DbType::Mysql => "mysql",
            DbType::Postgresql => "postgresql",
        })
    }
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub s3_bucket: Option<String>,
    pub db_type: DbType,
    pub db_path: Option<PathBuf>,
    pub storage_root: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub segment_duration_sec: Option<u32>,
    pub metrics_port: u16,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub max_concurrent_jobs: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub register_uploads: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub s3_bucket: String,
    pub db_type: DbType,
    pub db_path: PathBuf,
    pub storage_root: PathBuf,
    pub staging_dir: PathBuf,
    pub layout: AssetLayout,
    pub segment_duration_secs: u32,
    /// `None` disables the metrics endpoint.
    pub metrics_port: Option<u16>,

    // Component settings (with defaults)
    pub codec: FfmpegSettings,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerSettings,
    pub poll_interval: Duration,
    pub job_timeout: Option<Duration>,
}

const DEFAULT_SEGMENT_DURATION_SECS: u32 = 10;
const DEFAULT_CODEC_TIMEOUT_SECS: u64 = 600;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_PROCESSING_LEASE_SECS: u64 = 3600;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let s3_bucket = file
            .s3_bucket
            .or_else(|| cli.s3_bucket.clone())
            .ok_or_else(|| {
                anyhow!("s3_bucket must be specified via --s3-bucket or in config file")
            })?;
        if s3_bucket.is_empty()
            || s3_bucket.contains('/')
            || s3_bucket.starts_with('.')
            || s3_bucket.contains('\\')
        {
            bail!("Invalid bucket name: {:?}", s3_bucket);
        }

        let db_type = match file.db_type {
            Some(s) => parse_db_type(&s).ok_or_else(|| {
                anyhow!("Unknown db_type {:?} (expected sqlite, mysql or postgresql)", s)
            })?,
            None => cli.db_type,
        };

        let storage_root = file
            .storage_root
            .map(PathBuf::from)
            .or_else(|| cli.storage_root.clone())
            .ok_or_else(|| {
                anyhow!("storage_root must be specified via --storage-root or in config file")
            })?;

        // Validate storage_root exists
        if !storage_root.exists() {
            bail!("Storage root does not exist: {:?}", storage_root);
        }
        if !storage_root.is_dir() {
            bail!("storage_root is not a directory: {:?}", storage_root);
        }

        let db_path = file
            .db
            .and_then(|db| db.path)
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| storage_root.join("track_processor.db"));

        let staging_dir = file
            .staging_dir
            .map(PathBuf::from)
            .or_else(|| cli.staging_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("track-processor"));

        let layout = AssetLayout::new(
            file.raw_prefix.as_deref().unwrap_or(DEFAULT_RAW_PREFIX),
            file.processed_prefix
                .as_deref()
                .unwrap_or(DEFAULT_PROCESSED_PREFIX),
            file.failed_prefix.as_deref().unwrap_or(DEFAULT_FAILED_PREFIX),
        );
        if layout.raw_prefix() == layout.processed_prefix()
            || layout.processed_prefix() == layout.failed_prefix()
            || layout.raw_prefix() == layout.failed_prefix()
        {
            bail!("raw, processed and failed prefixes must differ");
        }

        let segment_duration_secs = file
            .segment_duration_sec
            .or(cli.segment_duration_sec)
            .unwrap_or(DEFAULT_SEGMENT_DURATION_SECS);
        if segment_duration_secs == 0 {
            bail!("segment_duration_sec must be greater than 0");
        }

        let metrics_port = match file.metrics_port.unwrap_or(cli.metrics_port) {
            0 => None,
            port => Some(port),
        };

        // Codec settings - merge file config with CLI and defaults
        let codec_file = file.codec.unwrap_or_default();
        let defaults = FfmpegSettings::default();
        let codec_timeout_secs = codec_file
            .timeout_secs
            .unwrap_or(DEFAULT_CODEC_TIMEOUT_SECS);
        if codec_timeout_secs == 0 {
            bail!("codec timeout_secs must be greater than 0");
        }
        let codec = FfmpegSettings {
            ffmpeg_path: codec_file
                .ffmpeg_path
                .map(PathBuf::from)
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: codec_file
                .ffprobe_path
                .map(PathBuf::from)
                .or_else(|| cli.ffprobe_path.clone())
                .unwrap_or(defaults.ffprobe_path),
            timeout: Duration::from_secs(codec_timeout_secs),
        };

        let retry_file = file.retry.unwrap_or_default();
        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: retry_file
                .max_attempts
                .unwrap_or(retry_defaults.max_attempts),
            initial_backoff: retry_file
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.initial_backoff),
            max_backoff: retry_file
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_backoff),
            backoff_multiplier: retry_file
                .backoff_multiplier
                .unwrap_or(retry_defaults.backoff_multiplier),
        };
        if retry.max_attempts == 0 {
            bail!("retry max_attempts must be at least 1");
        }
        if !(retry.backoff_multiplier.is_finite() && retry.backoff_multiplier >= 1.0) {
            bail!("retry backoff_multiplier must be >= 1.0");
        }
        if retry.max_backoff < retry.initial_backoff {
            bail!("retry max_backoff_ms must not be below initial_backoff_ms");
        }

        let scheduler_file = file.scheduler.unwrap_or_default();
        let scheduler = SchedulerSettings {
            max_concurrent_jobs: scheduler_file
                .max_concurrent_jobs
                .or(cli.max_concurrent_jobs)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS),
            processing_lease: Duration::from_secs(
                scheduler_file
                    .processing_lease_secs
                    .unwrap_or(DEFAULT_PROCESSING_LEASE_SECS),
            ),
            register_uploads: scheduler_file
                .register_uploads
                .unwrap_or(cli.register_uploads),
        };
        if scheduler.max_concurrent_jobs == 0 {
            bail!("max_concurrent_jobs must be at least 1");
        }
        if scheduler.processing_lease.is_zero() {
            bail!("processing_lease_secs must be greater than 0");
        }
        // A normalize pass runs up to two codec calls with no heartbeat in between.
        if codec.timeout * 3 >= scheduler.processing_lease {
            bail!(
                "processing_lease_secs ({}) must exceed three codec timeouts ({}s)",
                scheduler.processing_lease.as_secs(),
                codec.timeout.as_secs()
            );
        }

        let poll_interval = Duration::from_secs(
            scheduler_file
                .poll_interval_secs
                .or(cli.poll_interval_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        );
        if poll_interval.is_zero() {
            bail!("poll_interval_secs must be greater than 0");
        }

        let job_timeout = match scheduler_file.job_timeout_secs {
            None | Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };
        if let Some(timeout) = job_timeout {
            if timeout >= scheduler.processing_lease {
                bail!("job_timeout_secs must be shorter than processing_lease_secs");
            }
        }

        Ok(Self {
            s3_bucket,
            db_type,
            db_path,
            storage_root,
            staging_dir,
            layout,
            segment_duration_secs,
            metrics_port,
            codec,
            retry,
            scheduler,
            poll_interval,
            job_timeout,
        })
    }

    /// Settings handed to every pipeline run.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            layout: self.layout.clone(),
            segment_duration_secs: self.segment_duration_secs,
            retry: self.retry.clone(),
            job_timeout: self.job_timeout,
            heartbeat_interval: (self.scheduler.processing_lease / 6).max(Duration::from_secs(1)),
            ..PipelineConfig::default()
        }
    }
}

/// Parses a db type string. Uses clap's ValueEnum trait for parsing.
fn parse_db_type(s: &str) -> Option<DbType> {
    DbType::from_str(s, true).ok()
}
