//! Media codec capability.
//!
//! The pipeline only needs four operations from a codec: probe a file,
//! measure its loudness, normalize + encode the master, and cut a master
//! into HLS segments for a rendition. [`FfmpegCodec`] provides them by
//! driving the ffmpeg/ffprobe binaries.

mod ffmpeg;
mod loudnorm;

pub use ffmpeg::{FfmpegCodec, FfmpegSettings};
pub use loudnorm::{measure_filter, normalize_filter, parse_loudnorm_stats};

use crate::assets::{LoudnessTarget, QualityProfile};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while invoking the codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The codec rejected the input. Holds its diagnostic output verbatim.
    #[error("{diagnostic}")]
    Failed { diagnostic: String },

    #[error("codec invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Basic stream information.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioInfo {
    pub duration_secs: f64,
    pub codec: String,
    pub sample_rate_hz: Option<u32>,
    pub channels: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

/// Result of the loudness measurement pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoudnessMeasurement {
    pub integrated_lufs: f64,
    pub range_lu: f64,
    pub true_peak_dbtp: f64,
    pub threshold_lufs: f64,
    pub target_offset_lu: f64,
}

/// One HLS segment written to the working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFile {
    pub index: usize,
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// A rendition's playlist and segments on local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedRendition {
    pub profile: QualityProfile,
    pub playlist_path: PathBuf,
    pub segments: Vec<SegmentFile>,
}

/// Operations the pipeline needs from a media codec.
///
/// Implementations must bound every invocation in time.
#[async_trait]
pub trait MediaCodec: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<AudioInfo, CodecError>;

    /// First loudness pass: measure without altering anything.
    async fn measure_loudness(
        &self,
        input: &Path,
        target: &LoudnessTarget,
    ) -> Result<LoudnessMeasurement, CodecError>;

    /// Second pass: apply a linear correction computed from `measured` and
    /// encode the AAC master into `output`.
    async fn normalize_and_encode(
        &self,
        input: &Path,
        measured: &LoudnessMeasurement,
        target: &LoudnessTarget,
        output: &Path,
    ) -> Result<PathBuf, CodecError>;

    /// Cut `input` into `segment_duration_secs` HLS segments for `profile`,
    /// writing `playlist.m3u8` and `segment_<n>.ts` into `out_dir`.
    async fn segment(
        &self,
        input: &Path,
        profile: &QualityProfile,
        segment_duration_secs: u32,
        out_dir: &Path,
    ) -> Result<SegmentedRendition, CodecError>;
}
