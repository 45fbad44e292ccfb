//! ffmpeg `loudnorm` filter arguments and measurement parsing.

use super::{CodecError, LoudnessMeasurement};
use crate::assets::LoudnessTarget;
use serde::Deserialize;

/// Stats block printed by `loudnorm=print_format=json`. ffmpeg emits every
/// value as a string.
#[derive(Debug, Deserialize)]
struct LoudnormStats {
    input_i: String,
    input_lra: String,
    input_tp: String,
    input_thresh: String,
    target_offset: String,
}

/// Filter for the measurement pass.
pub fn measure_filter(target: &LoudnessTarget) -> String {
    format!(
        "loudnorm=I={}:LRA={}:TP={}:print_format=json",
        target.lufs, target.lra, target.true_peak_dbfs
    )
}

/// Filter for the correction pass, fed with the first pass' measurement.
pub fn normalize_filter(target: &LoudnessTarget, measured: &LoudnessMeasurement) -> String {
    format!(
        "loudnorm=I={}:LRA={}:TP={}:measured_I={}:measured_LRA={}:measured_TP={}:measured_thresh={}:offset={}:linear=true:print_format=summary",
        target.lufs,
        target.lra,
        target.true_peak_dbfs,
        measured.integrated_lufs,
        measured.range_lu,
        measured.true_peak_dbtp,
        measured.threshold_lufs,
        measured.target_offset_lu,
    )
}

/// Extract the measurement from ffmpeg's stderr.
///
/// The stats are the last `{ ... }` block of the output.
pub fn parse_loudnorm_stats(stderr: &str) -> Result<LoudnessMeasurement, CodecError> {
    let end = stderr
        .rfind('}')
        .ok_or_else(|| CodecError::InvalidOutput("no loudnorm stats in output".to_string()))?;
    let start = stderr[..end]
        .rfind('{')
        .ok_or_else(|| CodecError::InvalidOutput("no loudnorm stats in output".to_string()))?;

    let stats: LoudnormStats = serde_json::from_str(&stderr[start..=end])
        .map_err(|e| CodecError::InvalidOutput(format!("loudnorm JSON parse error: {}", e)))?;

    Ok(LoudnessMeasurement {
        integrated_lufs: parse_stat("input_i", &stats.input_i)?,
        range_lu: parse_stat("input_lra", &stats.input_lra)?,
        true_peak_dbtp: parse_stat("input_tp", &stats.input_tp)?,
        threshold_lufs: parse_stat("input_thresh", &stats.input_thresh)?,
        target_offset_lu: parse_stat("target_offset", &stats.target_offset)?,
    })
}

fn parse_stat(name: &str, value: &str) -> Result<f64, CodecError> {
    // Silent input measures as "-inf", which cannot drive a linear correction.
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            CodecError::InvalidOutput(format!("loudnorm {} is not a finite number: {}", name, value))
        })
}
