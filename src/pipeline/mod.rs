//! Track processing pipeline.
//!
//! A run claims a pending job, works in a private staging directory and
//! walks the stages in order:
//!
//! 1. fetch the raw upload
//! 2. measure loudness, then normalize and encode the AAC master
//! 3. segment the master into every HLS rendition (all or nothing)
//! 4. publish segments, playlists, master and metadata, leaf-first
//! 5. finalize the job row
//!
//! Any failure is turned into a `Failed` transition, with the source copied
//! aside for inspection when it was fetched. The staging directory is
//! released on every path.

mod error;
mod retry_policy;
mod runner;

pub use error::{ErrorClass, PipelineError, Stage};
pub use retry_policy::RetryPolicy;
pub use runner::{Pipeline, PipelineConfig, RunOutcome};
