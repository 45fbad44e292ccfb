use anyhow::{bail, Context, Result};
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use mwonya_track_processor::config::{AppConfig, CliConfig, DbType, FileConfig};
use mwonya_track_processor::jobs::{open_job_store, JobStatus, JobStore};
use mwonya_track_processor::scheduler::intake;
use mwonya_track_processor::{
    metrics, FfmpegCodec, FsObjectStore, Pipeline, Scheduler, StagingArea,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "track-processor", version = VERSION)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Bucket holding raw uploads and processed assets.
    #[clap(long)]
    pub s3_bucket: Option<String>,

    /// Job database backend.
    #[clap(long, value_enum, default_value_t = DbType::Sqlite)]
    pub db_type: DbType,

    /// Path to the SQLite job database.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Directory that contains the bucket directory.
    #[clap(long, value_parser = parse_path)]
    pub storage_root: Option<PathBuf>,

    /// Directory for per-job working files.
    #[clap(long, value_parser = parse_path)]
    pub staging_dir: Option<PathBuf>,

    /// Target HLS segment length in seconds.
    #[clap(long)]
    pub segment_duration_sec: Option<u32>,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 0)]
    pub metrics_port: u16,

    #[clap(long)]
    pub ffmpeg_path: Option<PathBuf>,

    #[clap(long)]
    pub ffprobe_path: Option<PathBuf>,

    /// Maximum number of jobs processed at once.
    #[clap(long)]
    pub max_concurrent_jobs: Option<usize>,

    /// Seconds between scheduler ticks in `run` mode.
    #[clap(long)]
    pub poll_interval_secs: Option<u64>,

    /// Register jobs for new uploads under the raw prefix on every tick.
    #[clap(long)]
    pub register_uploads: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll for pending jobs until interrupted.
    Run,

    /// Process every pending job once, then exit.
    Drain,

    /// Register a pending job for an upload under the raw prefix.
    Register {
        /// File name of the upload, relative to the raw prefix.
        filename: String,
        /// Job id to use instead of the file stem.
        #[clap(long)]
        id: Option<String>,
    },

    /// Register jobs for every upload that has none yet.
    Scan,

    /// Fail processing jobs whose lease has expired.
    Reclaim,

    /// Show a single job.
    Status { id: String },

    /// List job ids with the given status.
    List {
        /// pending, processing, completed or failed.
        #[clap(long, default_value = "pending")]
        status: String,
    },
}

impl CliArgs {
    fn cli_config(&self) -> CliConfig {
        CliConfig {
            s3_bucket: self.s3_bucket.clone(),
            db_type: self.db_type,
            db_path: self.db_path.clone(),
            storage_root: self.storage_root.clone(),
            staging_dir: self.staging_dir.clone(),
            segment_duration_sec: self.segment_duration_sec,
            metrics_port: self.metrics_port,
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            max_concurrent_jobs: self.max_concurrent_jobs,
            poll_interval_secs: self.poll_interval_secs,
            register_uploads: self.register_uploads,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.cli_config(), file_config)?;

    info!("Track processor {} ({:?})", VERSION, cli_args.command);
    info!(
        "Opening {} job database at {:?}...",
        config.db_type, config.db_path
    );
    let job_store = open_job_store(&config)?;

    match cli_args.command {
        Command::Status { id } => show_status(job_store.as_ref(), &id),
        Command::List { status } => list_jobs(job_store.as_ref(), &status),
        Command::Register { filename, id } => {
            let created =
                intake::register_upload(job_store.as_ref(), &config.layout, &filename, id.as_deref())?;
            if created {
                println!("Registered {}", config.layout.raw_key(&filename));
            } else {
                println!("Job already exists");
            }
            Ok(())
        }
        Command::Scan => {
            let object_store = open_object_store(&config).await?;
            let count =
                intake::register_uploads(&object_store, job_store.as_ref(), &config.layout).await?;
            println!("Registered {} new uploads", count);
            Ok(())
        }
        Command::Reclaim => {
            let scheduler = build_scheduler(&config, job_store).await?;
            let count = scheduler.reclaim_stale().await?;
            println!("Reclaimed {} stale jobs", count);
            Ok(())
        }
        Command::Drain => {
            let shutdown = shutdown_on_ctrl_c();
            let scheduler = build_scheduler(&config, job_store).await?;
            let summary = scheduler.tick(&shutdown).await?;
            println!(
                "{} succeeded, {} failed, {} skipped",
                summary.succeeded, summary.failed, summary.skipped
            );
            Ok(())
        }
        Command::Run => {
            let shutdown = shutdown_on_ctrl_c();
            let scheduler = build_scheduler(&config, job_store).await?;

            if let Some(port) = config.metrics_port {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_metrics(port, shutdown).await {
                        error!("Metrics server failed: {:#}", e);
                    }
                });
            }

            scheduler.run(config.poll_interval, shutdown).await;
            Ok(())
        }
    }
}

async fn open_object_store(config: &AppConfig) -> Result<FsObjectStore> {
    let object_store = FsObjectStore::new(&config.storage_root, &config.s3_bucket);
    object_store
        .init()
        .await
        .with_context(|| format!("Failed to open bucket {:?}", object_store.bucket_dir()))?;
    Ok(object_store)
}

async fn build_scheduler(config: &AppConfig, job_store: Arc<dyn JobStore>) -> Result<Scheduler> {
    metrics::init_metrics();

    let object_store = Arc::new(open_object_store(config).await?);

    let staging = Arc::new(StagingArea::new(&config.staging_dir));
    staging.init().await?;
    info!("Staging jobs under {:?}", staging.root());

    let codec = Arc::new(FfmpegCodec::new(config.codec.clone()));
    codec
        .check_available()
        .await
        .context("ffmpeg and ffprobe must be installed and executable")?;

    let pipeline = Arc::new(Pipeline::new(
        job_store,
        object_store,
        codec,
        staging,
        config.pipeline_config(),
    ));
    Ok(Scheduler::new(pipeline, config.scheduler.clone()))
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing in-flight jobs...");
                token.cancel();
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });
    shutdown
}

async fn serve_metrics(port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics::metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;

    info!("Metrics available at port {}!", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

fn show_status(job_store: &dyn JobStore, id: &str) -> Result<()> {
    let Some(job) = job_store.get(id)? else {
        bail!("No job with id {}", id);
    };

    println!("id:          {}", job.id);
    println!("source:      {}", job.source_key);
    println!("status:      {}", job.status);
    println!("created_at:  {}", job.created_at);
    println!("updated_at:  {}", job.updated_at);
    if let Some(claimed_at) = job.claimed_at {
        println!("claimed_at:  {}", claimed_at);
    }
    if let Some(finished_at) = job.finished_at {
        println!("finished_at: {}", finished_at);
    }
    if let Some(message) = job.error_message {
        println!("error:       {}", message);
    }
    Ok(())
}

fn list_jobs(job_store: &dyn JobStore, status: &str) -> Result<()> {
    let Some(status) = JobStatus::parse(status) else {
        bail!(
            "Unknown status {:?} (expected pending, processing, completed or failed)",
            status
        );
    };
    for id in job_store.list_by_status(status)? {
        println!("{}", id);
    }
    Ok(())
}
