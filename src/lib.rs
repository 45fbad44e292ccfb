//! Mwonya Track Processor Library
//!
//! Turns raw audio uploads into a loudness-normalized AAC master, HLS
//! renditions and a metadata document, tracking each upload as a job row.

pub mod assets;
pub mod codec;
pub mod config;
pub mod jobs;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod staging;
pub mod storage;

// Re-export commonly used types for convenience
pub use codec::{FfmpegCodec, MediaCodec};
pub use jobs::{Job, JobStatus, JobStore, SqliteJobStore};
pub use pipeline::{Pipeline, PipelineConfig, RunOutcome};
pub use scheduler::{DrainSummary, Scheduler, SchedulerSettings};
pub use staging::StagingArea;
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectStore};
