//! Pipeline wiring for tests
//!
//! Each harness gets its own in-memory job database, object store and
//! staging directory, so tests never share state.

use super::fixtures::{FakeCodec, FlakyJobStore, FlakyObjectStore};
use mwonya_track_processor::assets::AssetLayout;
use mwonya_track_processor::jobs::{Job, JobStore};
use mwonya_track_processor::pipeline::{Pipeline, PipelineConfig, RetryPolicy, RunOutcome};
use mwonya_track_processor::scheduler::{Scheduler, SchedulerSettings};
use mwonya_track_processor::storage::ObjectStore;
use mwonya_track_processor::StagingArea;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Retries fast enough to keep tests quick.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

pub struct TestHarnessBuilder {
    codec: FakeCodec,
    object_store: FlakyObjectStore,
    segment_duration_secs: u32,
    job_timeout: Option<Duration>,
    retry: RetryPolicy,
    staging_root: Option<PathBuf>,
}

impl TestHarnessBuilder {
    pub fn codec(mut self, codec: FakeCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn object_store(mut self, object_store: FlakyObjectStore) -> Self {
        self.object_store = object_store;
        self
    }

    pub fn segment_duration_secs(mut self, secs: u32) -> Self {
        self.segment_duration_secs = secs;
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stage jobs under `root` instead of a fresh temp directory.
    pub fn staging_root(mut self, root: PathBuf) -> Self {
        self.staging_root = Some(root);
        self
    }

    pub fn build(self) -> TestHarness {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let staging_root = self
            .staging_root
            .unwrap_or_else(|| temp_dir.path().join("staging"));
        std::fs::create_dir_all(temp_dir.path().join("staging"))
            .expect("Failed to create staging dir");

        let job_store = Arc::new(FlakyJobStore::in_memory());
        let object_store = Arc::new(self.object_store);
        let codec = Arc::new(self.codec);
        let staging = Arc::new(StagingArea::new(staging_root));

        let config = PipelineConfig {
            segment_duration_secs: self.segment_duration_secs,
            retry: self.retry,
            job_timeout: self.job_timeout,
            heartbeat_interval: Duration::from_millis(20),
            ..PipelineConfig::default()
        };

        let pipeline = Arc::new(Pipeline::new(
            job_store.clone(),
            object_store.clone(),
            codec.clone(),
            staging.clone(),
            config,
        ));

        TestHarness {
            job_store,
            object_store,
            codec,
            staging,
            pipeline,
            _temp_dir: temp_dir,
        }
    }
}

/// A pipeline over fakes, plus direct access to every collaborator.
pub struct TestHarness {
    pub job_store: Arc<FlakyJobStore>,
    pub object_store: Arc<FlakyObjectStore>,
    pub codec: Arc<FakeCodec>,
    pub staging: Arc<StagingArea>,
    pub pipeline: Arc<Pipeline>,

    // Keeps the staging directory alive until drop
    _temp_dir: TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder {
            codec: FakeCodec::new(),
            object_store: FlakyObjectStore::new(),
            segment_duration_secs: 10,
            job_timeout: None,
            retry: fast_retry(),
            staging_root: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn layout(&self) -> &AssetLayout {
        &self.pipeline.config().layout
    }

    /// Put `data` under the raw prefix and register a pending job for it.
    pub async fn upload(&self, job_id: &str, filename: &str, data: Vec<u8>) -> Job {
        let source_key = self.layout().raw_key(filename);
        self.object_store
            .put(&source_key, data)
            .await
            .expect("Failed to store upload");
        assert!(
            self.job_store
                .register(job_id, &source_key)
                .expect("Failed to register job"),
            "job {} already registered",
            job_id
        );
        self.job(job_id)
    }

    pub fn job(&self, job_id: &str) -> Job {
        self.job_store
            .get(job_id)
            .expect("Failed to load job")
            .unwrap_or_else(|| panic!("job {} not found", job_id))
    }

    pub async fn run(&self, job: &Job) -> RunOutcome {
        self.try_run(job).await.expect("job store error")
    }

    pub async fn try_run(&self, job: &Job) -> anyhow::Result<RunOutcome> {
        self.pipeline.run(job, &CancellationToken::new()).await
    }

    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.object_store.get(key).await.ok()
    }

    /// Entries currently in the staging root.
    pub fn staging_entries(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.staging.root()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn scheduler(&self, settings: SchedulerSettings) -> Scheduler {
        Scheduler::new(self.pipeline.clone(), settings)
    }
}
