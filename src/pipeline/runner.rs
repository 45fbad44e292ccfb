//! Drives one job from claim to cleanup.

use super::error::{ErrorClass, PipelineError, Stage};
use super::retry_policy::RetryPolicy;
use crate::assets::hls::render_master_playlist;
use crate::assets::{AssetLayout, LoudnessTarget, MetadataInput, TrackMetadata, QUALITY_PROFILES};
use crate::codec::{CodecError, MediaCodec, SegmentedRendition};
use crate::jobs::{Job, JobStore};
use crate::metrics::{self, InFlightGuard};
use crate::staging::{StagingArea, WorkingSet};
use crate::storage::ObjectStore;
use anyhow::{Context, Result};
use futures::future::try_join_all;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub layout: AssetLayout,
    pub segment_duration_secs: u32,
    pub loudness_target: LoudnessTarget,
    pub retry: RetryPolicy,
    /// Wall-clock limit for one run, after the claim.
    pub job_timeout: Option<Duration>,
    /// How often a running job refreshes its processing lease.
    pub heartbeat_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            layout: AssetLayout::default(),
            segment_duration_secs: 10,
            loudness_target: LoudnessTarget::default(),
            retry: RetryPolicy::default(),
            job_timeout: None,
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { message: String },
    /// Another worker owns the job; nothing was done.
    AlreadyClaimed,
}

struct StageFailure {
    stage: Stage,
    error: PipelineError,
}

/// Per-run cancellation: the caller's shutdown, the optional job timeout,
/// and loss of the processing lease.
struct JobCancellation {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    lease_lost: Arc<AtomicBool>,
    timeout: Option<Duration>,
    timer: Option<JoinHandle<()>>,
    lease_keeper: Option<JoinHandle<()>>,
}

impl JobCancellation {
    fn start(shutdown: &CancellationToken, timeout: Option<Duration>) -> Self {
        let token = shutdown.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));

        let timer = timeout.map(|limit| {
            let token = token.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        timed_out.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                }
            })
        });

        Self {
            token,
            timed_out,
            lease_lost: Arc::new(AtomicBool::new(false)),
            timeout,
            timer,
            lease_keeper: None,
        }
    }

    /// Refresh the lease every `every` while the run is active. Cancels the
    /// run as soon as the row is no longer ours.
    fn keep_lease(&mut self, job_store: Arc<dyn JobStore>, job_id: &str, every: Duration) {
        let token = self.token.clone();
        let lease_lost = self.lease_lost.clone();
        let job_id = job_id.to_string();
        let every = every.max(Duration::from_millis(1));

        self.lease_keeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately and the claim just set the lease.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => match job_store.heartbeat(&job_id) {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!("Job {} lost its processing lease, cancelling", job_id);
                            lease_lost.store(true, Ordering::SeqCst);
                            token.cancel();
                            break;
                        }
                        Err(e) => warn!("Heartbeat for job {} failed: {:#}", job_id, e),
                    },
                }
            }
        }));
    }

    fn lose_lease(&self) {
        self.lease_lost.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    /// Stop the timer and the lease keeper. Called before finalizing.
    fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(keeper) = self.lease_keeper.take() {
            keeper.abort();
        }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn message(&self) -> String {
        if self.lease_lost.load(Ordering::SeqCst) {
            return "processing cancelled: processing lease lost".to_string();
        }
        match self.timeout {
            Some(limit) if self.timed_out.load(Ordering::SeqCst) => format!(
                "processing cancelled: job exceeded {}s timeout",
                limit.as_secs()
            ),
            _ => "processing cancelled: shutdown requested".to_string(),
        }
    }
}

impl Drop for JobCancellation {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn cancellable<T, Fut>(cancel: &CancellationToken, fut: Fut) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<T, PipelineError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result,
    }
}

/// Processes jobs end to end.
pub struct Pipeline {
    job_store: Arc<dyn JobStore>,
    object_store: Arc<dyn ObjectStore>,
    codec: Arc<dyn MediaCodec>,
    staging: Arc<StagingArea>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        object_store: Arc<dyn ObjectStore>,
        codec: Arc<dyn MediaCodec>,
        staging: Arc<StagingArea>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            job_store,
            object_store,
            codec,
            staging,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.job_store
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }

    /// Run `job` through every stage.
    ///
    /// Returns `Err` only when the job store itself fails; every processing
    /// failure ends as [`RunOutcome::Failed`] with the job row updated.
    pub async fn run(&self, job: &Job, shutdown: &CancellationToken) -> Result<RunOutcome> {
        let claimed = self
            .job_store
            .try_claim(&job.id)
            .with_context(|| format!("Failed to claim job {}", job.id))?;
        if !claimed {
            info!("Job {} is already claimed, skipping", job.id);
            metrics::record_job_outcome("already_claimed");
            return Ok(RunOutcome::AlreadyClaimed);
        }

        let _in_flight = InFlightGuard::new();
        let started = Instant::now();
        let mut cancel = JobCancellation::start(shutdown, self.config.job_timeout);
        cancel.keep_lease(
            self.job_store.clone(),
            &job.id,
            self.config.heartbeat_interval,
        );
        info!("Processing job {} from {}", job.id, job.source_key);

        let working_set = match self.staging.acquire(&job.id).await {
            Ok(working_set) => working_set,
            Err(e) => {
                let failure = StageFailure {
                    stage: Stage::Stage,
                    error: e.into(),
                };
                metrics::record_stage_failure(Stage::Stage.as_str(), ErrorClass::Fatal.as_str());
                cancel.stop();
                return self.finalize_failure(job, failure, &cancel, false).await;
            }
        };

        let mut fetched = false;
        let result = self
            .process(job, &working_set, &cancel, &mut fetched)
            .await;
        cancel.stop();
        let outcome = match result {
            Ok(()) => self.finalize_success(job).await,
            Err(failure) => self.finalize_failure(job, failure, &cancel, fetched).await,
        };

        self.staging.release(&working_set);
        if let Ok(outcome) = &outcome {
            info!(
                "Job {} finished in {:.1}s: {:?}",
                job.id,
                started.elapsed().as_secs_f64(),
                outcome
            );
        }
        outcome
    }

    async fn process(
        &self,
        job: &Job,
        working_set: &WorkingSet,
        cancel: &JobCancellation,
        fetched: &mut bool,
    ) -> Result<(), StageFailure> {
        let token = cancel.token();
        let source_path = working_set.source_path(job.original_filename());
        let master_path = working_set.master_path();
        let target = self.config.loudness_target;

        self.stage(job, Stage::Fetch, cancel, async {
            let store = &self.object_store;
            let key = job.source_key.as_str();
            let data = self
                .config
                .retry
                .run("fetch", token, move || async move {
                    store
                        .get(key)
                        .await
                        .map_err(|e| PipelineError::storage("get", key, e))
                })
                .await?;
            *fetched = true;

            if let Some(parent) = source_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&source_path, data).await?;
            debug!("Fetched {} to {}", key, source_path.display());
            Ok::<_, PipelineError>(())
        })
        .await?;

        let (measurement, master_info) = self
            .stage(
                job,
                Stage::Normalize,
                cancel,
                cancellable(token, async {
                    let measurement = self.codec.measure_loudness(&source_path, &target).await?;
                    info!(
                        "Job {} measured {:.2} LUFS, {:.2} dBTP",
                        job.id, measurement.integrated_lufs, measurement.true_peak_dbtp
                    );
                    let master = self
                        .codec
                        .normalize_and_encode(&source_path, &measurement, &target, &master_path)
                        .await?;
                    let info = self.codec.probe(&master).await?;
                    Ok::<_, PipelineError>((measurement, info))
                }),
            )
            .await?;

        let renditions = self
            .stage(
                job,
                Stage::Segment,
                cancel,
                cancellable(token, self.segment_all(&master_path, working_set)),
            )
            .await?;

        let rendition_counts: Vec<_> = renditions
            .iter()
            .map(|r| (r.profile, r.segments.len()))
            .collect();
        let metadata = TrackMetadata::build(
            &self.config.layout,
            MetadataInput {
                job_id: &job.id,
                source_key: &job.source_key,
                original_filename: job.original_filename(),
                master_info: &master_info,
                measurement: &measurement,
                target: &target,
                segment_duration_secs: self.config.segment_duration_secs,
                renditions: &rendition_counts,
            },
        );

        self.stage(job, Stage::Publish, cancel, async {
            tokio::fs::write(working_set.metadata_path(), metadata.to_json()?).await?;
            self.publish(job, working_set, &renditions, token).await
        })
        .await
    }

    /// Segment the master for every profile concurrently. All or nothing.
    async fn segment_all(
        &self,
        master_path: &Path,
        working_set: &WorkingSet,
    ) -> Result<Vec<SegmentedRendition>, PipelineError> {
        let segment_duration = self.config.segment_duration_secs;
        let renditions = try_join_all(QUALITY_PROFILES.iter().map(|profile| {
            let out_dir = working_set.rendition_dir(profile);
            async move {
                let rendition = self
                    .codec
                    .segment(master_path, profile, segment_duration, &out_dir)
                    .await
                    .map_err(|source| PipelineError::Rendition {
                        profile: profile.name,
                        source,
                    })?;
                if rendition.segments.is_empty() {
                    return Err(PipelineError::Rendition {
                        profile: profile.name,
                        source: CodecError::InvalidOutput("no segments produced".to_string()),
                    });
                }
                debug!(
                    "Rendition {} produced {} segments",
                    profile.name,
                    rendition.segments.len()
                );
                Ok(rendition)
            }
        }))
        .await?;

        tokio::fs::write(
            working_set.master_playlist_path(),
            render_master_playlist(&QUALITY_PROFILES),
        )
        .await?;
        Ok(renditions)
    }

    /// Upload leaf-first so that the master playlist only appears once
    /// everything it references exists. Rolls back on failure.
    async fn publish(
        &self,
        job: &Job,
        working_set: &WorkingSet,
        renditions: &[SegmentedRendition],
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let layout = &self.config.layout;
        let mut uploads: Vec<(String, PathBuf)> = Vec::new();

        for rendition in renditions {
            for segment in &rendition.segments {
                uploads.push((
                    layout.segment_key(&job.id, &rendition.profile, segment.index),
                    segment.path.clone(),
                ));
            }
        }
        for rendition in renditions {
            uploads.push((
                layout.rendition_playlist_key(&job.id, &rendition.profile),
                rendition.playlist_path.clone(),
            ));
        }
        uploads.push((layout.master_key(&job.id), working_set.master_path()));
        uploads.push((layout.metadata_key(&job.id), working_set.metadata_path()));
        uploads.push((
            layout.master_playlist_key(&job.id),
            working_set.master_playlist_path(),
        ));

        let mut written = Vec::with_capacity(uploads.len());
        if let Err(err) = self.upload_all(uploads, &mut written, cancel).await {
            warn!("Publishing for job {} failed: {}", job.id, err);
            self.rollback(job, &written).await;
            return Err(err);
        }

        info!("Published {} objects for job {}", written.len(), job.id);
        Ok(())
    }

    async fn upload_all(
        &self,
        uploads: Vec<(String, PathBuf)>,
        written: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        for (key, path) in uploads {
            // Reading the staged file is local I/O and is never retried.
            let data = tokio::fs::read(&path).await?;
            let store = &self.object_store;
            let (key_ref, data_ref) = (key.as_str(), &data);
            self.config
                .retry
                .run("publish", cancel, move || async move {
                    store
                        .put(key_ref, data_ref.clone())
                        .await
                        .map_err(|e| PipelineError::storage("put", key_ref, e))
                })
                .await?;
            written.push(key);
        }
        Ok(())
    }

    /// Clean up after a job whose worker lost its lease: remove anything
    /// published under its prefix and keep a copy of the source.
    pub async fn clean_up_abandoned(&self, job: &Job) -> Result<(), PipelineError> {
        self.rollback(job, &[]).await;
        self.copy_to_failed(job).await
    }

    /// Delete whatever this run wrote under the job prefix. Errors are logged.
    async fn rollback(&self, job: &Job, written: &[String]) {
        let mut keys: Vec<String> = written.to_vec();
        let prefix = self.config.layout.job_prefix(&job.id);
        match self.object_store.list(&prefix).await {
            Ok(listed) => keys.extend(listed),
            Err(e) => warn!("Listing {} for rollback failed: {}", prefix, e),
        }
        keys.sort();
        keys.dedup();

        // Rollback runs even when the job was cancelled.
        let cleanup = CancellationToken::new();
        let mut failures = 0;
        for key in keys.iter().rev() {
            let store = &self.object_store;
            let key_ref = key.as_str();
            let result = self
                .config
                .retry
                .run("rollback", &cleanup, move || async move {
                    store
                        .delete(key_ref)
                        .await
                        .map_err(|e| PipelineError::storage("delete", key_ref, e))
                })
                .await;
            if let Err(e) = result {
                failures += 1;
                warn!("Rollback of {} failed: {}", key, e);
            }
        }

        if failures > 0 {
            error!(
                target: "alerts",
                "Rollback for job {} left {} of {} objects under {}",
                job.id,
                failures,
                keys.len(),
                prefix
            );
        } else {
            info!("Rolled back {} objects for job {}", keys.len(), job.id);
        }
    }

    /// Refresh the lease, run one stage, and record its timing.
    async fn stage<T, Fut>(
        &self,
        job: &Job,
        stage: Stage,
        cancel: &JobCancellation,
        fut: Fut,
    ) -> Result<T, StageFailure>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let cancelled = StageFailure {
            stage,
            error: PipelineError::Cancelled,
        };
        if cancel.token().is_cancelled() {
            return Err(cancelled);
        }
        match self.job_store.heartbeat(&job.id) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Job {} is no longer processing, stopping before {}", job.id, stage);
                cancel.lose_lease();
                return Err(cancelled);
            }
            Err(e) => warn!("Heartbeat for job {} failed: {:#}", job.id, e),
        }

        debug!("Job {} entering stage {}", job.id, stage);
        let started = Instant::now();
        let result = fut.await;
        metrics::record_stage_duration(stage.as_str(), started.elapsed());

        result.map_err(|error| {
            metrics::record_stage_failure(stage.as_str(), error.class().as_str());
            StageFailure { stage, error }
        })
    }

    async fn finalize_success(&self, job: &Job) -> Result<RunOutcome> {
        let completed = self
            .job_store
            .complete(&job.id)
            .map_err(|e| self.finalize_error(job, e))?;

        if !completed {
            // The lease expired and the row was failed elsewhere. The assets
            // just published must not outlive it.
            let mut message = format!("job {} lost its processing lease before completing", job.id);
            error!(target: "alerts", "{}", message);
            self.rollback(job, &[]).await;
            if let Err(e) = self.copy_to_failed(job).await {
                warn!("Copying failed source for job {}: {}", job.id, e);
                message.push_str(&format!("; failed-source copy failed: {}", e));
            }
            metrics::record_job_outcome("failed");
            return Ok(RunOutcome::Failed { message });
        }

        info!("Job {} completed", job.id);
        metrics::record_job_outcome("completed");
        Ok(RunOutcome::Completed)
    }

    async fn finalize_failure(
        &self,
        job: &Job,
        failure: StageFailure,
        cancel: &JobCancellation,
        fetched: bool,
    ) -> Result<RunOutcome> {
        let StageFailure { stage, error: err } = failure;
        let mut message = match err {
            PipelineError::Cancelled => cancel.message(),
            _ => err.to_string(),
        };

        if err.class() == ErrorClass::Fatal {
            error!(target: "alerts", "Job {} failed at {}: {}", job.id, stage, message);
        } else {
            error!("Job {} failed at {}: {}", job.id, stage, message);
        }

        if fetched {
            if let Err(e) = self.copy_to_failed(job).await {
                warn!("Copying failed source for job {}: {}", job.id, e);
                message.push_str(&format!("; failed-source copy failed: {}", e));
            }
        }

        let failed = self
            .job_store
            .fail(&job.id, &message)
            .map_err(|e| self.finalize_error(job, e))?;
        if !failed {
            warn!("Job {} was no longer processing when marking it failed", job.id);
        }

        metrics::record_job_outcome("failed");
        Ok(RunOutcome::Failed { message })
    }

    /// The job store could not record the outcome. The row stays
    /// processing until its lease is reclaimed.
    fn finalize_error(&self, job: &Job, source: anyhow::Error) -> anyhow::Error {
        let err = PipelineError::JobStore(source);
        metrics::record_stage_failure(Stage::Finalize.as_str(), err.class().as_str());
        error!(target: "alerts", "Job {} failed at {}: {}", job.id, Stage::Finalize, err);
        anyhow::Error::new(err).context(format!("Failed to finalize job {}", job.id))
    }

    async fn copy_to_failed(&self, job: &Job) -> Result<(), PipelineError> {
        let failed_key = self.config.layout.failed_key(job.original_filename());
        let store = &self.object_store;
        let (src, dst) = (job.source_key.as_str(), failed_key.as_str());

        self.config
            .retry
            .run("failed_copy", &CancellationToken::new(), move || async move {
                store
                    .copy(src, dst)
                    .await
                    .map_err(|e| PipelineError::storage("copy", dst, e))
            })
            .await?;

        info!("Copied failed source {} to {}", src, dst);
        Ok(())
    }
}
