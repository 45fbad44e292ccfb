//! Pending job dispatch, lease expiry and the polling daemon.

pub mod intake;

use crate::jobs::{JobStatus, JobStore};
use crate::metrics;
use crate::pipeline::{Pipeline, RunOutcome};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Message stored on jobs whose processing lease expired.
pub const STALE_LEASE_MESSAGE: &str = "processing lease expired (worker lost)";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent_jobs: usize,
    /// A processing row without a heartbeat for this long is considered lost.
    pub processing_lease: Duration,
    /// Scan the raw prefix for new uploads on every tick.
    pub register_uploads: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            processing_lease: Duration::from_secs(3600),
            register_uploads: false,
        }
    }
}

/// Counts from one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Claimed elsewhere, or no longer pending when its turn came.
    pub skipped: usize,
}

enum Disposition {
    Succeeded,
    Failed,
    Skipped,
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, settings: SchedulerSettings) -> Self {
        Self { pipeline, settings }
    }

    fn job_store(&self) -> &dyn JobStore {
        self.pipeline.job_store().as_ref()
    }

    /// Run every currently pending job, at most `max_concurrent_jobs` at a time.
    pub async fn drain_pending(&self, shutdown: &CancellationToken) -> Result<DrainSummary> {
        let pending = self
            .job_store()
            .list_by_status(JobStatus::Pending)
            .context("Failed to list pending jobs")?;
        if pending.is_empty() {
            debug!("No pending jobs");
            return Ok(DrainSummary::default());
        }

        info!(
            "Draining {} pending jobs ({} at a time)",
            pending.len(),
            self.settings.max_concurrent_jobs
        );

        let dispositions: Vec<Disposition> = stream::iter(pending)
            .map(|id| async move { self.run_one(&id, shutdown).await })
            .buffer_unordered(self.settings.max_concurrent_jobs.max(1))
            .collect()
            .await;

        let mut summary = DrainSummary::default();
        for disposition in dispositions {
            match disposition {
                Disposition::Succeeded => summary.succeeded += 1,
                Disposition::Failed => summary.failed += 1,
                Disposition::Skipped => summary.skipped += 1,
            }
        }

        info!(
            "Drain finished: {} succeeded, {} failed, {} skipped",
            summary.succeeded, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    async fn run_one(&self, id: &str, shutdown: &CancellationToken) -> Disposition {
        if shutdown.is_cancelled() {
            return Disposition::Skipped;
        }

        let job = match self.job_store().get(id) {
            Ok(Some(job)) if job.status == JobStatus::Pending => job,
            Ok(Some(job)) => {
                debug!("Job {} is {} now, skipping", id, job.status);
                return Disposition::Skipped;
            }
            Ok(None) => {
                warn!("Job {} disappeared before it could run", id);
                return Disposition::Skipped;
            }
            Err(e) => {
                error!("Failed to load job {}: {:#}", id, e);
                return Disposition::Failed;
            }
        };

        match self.pipeline.run(&job, shutdown).await {
            Ok(RunOutcome::Completed) => Disposition::Succeeded,
            Ok(RunOutcome::Failed { .. }) => Disposition::Failed,
            Ok(RunOutcome::AlreadyClaimed) => Disposition::Skipped,
            Err(e) => {
                error!(target: "alerts", "Job {} aborted: {:#}", id, e);
                Disposition::Failed
            }
        }
    }

    /// Fail processing jobs whose lease has expired, then remove whatever
    /// their lost worker published and keep a copy of each source. Returns
    /// how many were reclaimed.
    pub async fn reclaim_stale(&self) -> Result<usize> {
        let lease_secs = self.settings.processing_lease.as_secs() as i64;
        let reclaimed = self
            .job_store()
            .fail_stale_processing(lease_secs, STALE_LEASE_MESSAGE)
            .context("Failed to reclaim stale jobs")?;

        for id in &reclaimed {
            warn!(
                "Job {} had no heartbeat for {}s, marked failed",
                id, lease_secs
            );
            let job = match self.job_store().get(id) {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed to load reclaimed job {}: {:#}", id, e);
                    continue;
                }
            };
            if let Err(e) = self.pipeline.clean_up_abandoned(&job).await {
                warn!("Cleaning up reclaimed job {} failed: {}", id, e);
            }
        }
        metrics::record_stale_reclaimed(reclaimed.len());
        Ok(reclaimed.len())
    }

    /// One daemon tick: intake, lease expiry, then a drain.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<DrainSummary> {
        if self.settings.register_uploads {
            let store = self.pipeline.object_store().as_ref();
            if let Err(e) =
                intake::register_uploads(store, self.job_store(), &self.pipeline.config().layout)
                    .await
            {
                error!("Upload registration failed: {:#}", e);
            }
        }

        if let Err(e) = self.reclaim_stale().await {
            error!("{:#}", e);
        }

        self.drain_pending(shutdown).await
    }

    /// Poll for work until `shutdown` is cancelled.
    pub async fn run(&self, poll_interval: Duration, shutdown: CancellationToken) {
        info!(
            "Scheduler starting (poll_interval={}s, max_concurrent_jobs={}, lease={}s)",
            poll_interval.as_secs(),
            self.settings.max_concurrent_jobs,
            self.settings.processing_lease.as_secs()
        );

        loop {
            if let Err(e) = self.tick(&shutdown).await {
                error!("Scheduler tick failed: {:#}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }
}
