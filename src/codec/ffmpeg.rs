//! [`MediaCodec`] backed by the ffmpeg and ffprobe binaries.

use super::loudnorm::{measure_filter, normalize_filter, parse_loudnorm_stats};
use super::{
    AudioInfo, CodecError, LoudnessMeasurement, MediaCodec, SegmentFile, SegmentedRendition,
};
use crate::assets::hls::{
    parse_media_playlist, parse_segment_index, PlaylistEntry, PLAYLIST_FILE_NAME,
};
use crate::assets::{LoudnessTarget, QualityProfile, OUTPUT_CHANNELS};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Where the binaries live and how long a single invocation may take.
#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub timeout: Duration,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            timeout: Duration::from_secs(600),
        }
    }
}

pub struct FfmpegCodec {
    settings: FfmpegSettings,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    bit_rate: Option<String>,
}

impl FfmpegCodec {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }

    /// Check that both binaries can be executed.
    pub async fn check_available(&self) -> Result<(), CodecError> {
        for program in [&self.settings.ffprobe_path, &self.settings.ffmpeg_path] {
            self.run(program, &["-version".to_string()]).await?;
        }
        Ok(())
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<Output, CodecError> {
        debug!("Running {} {}", program.display(), args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.settings.timeout, child)
            .await
            .map_err(|_| CodecError::Timeout(self.settings.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let diagnostic = if stderr.is_empty() {
                format!("{} exited with {}", program.display(), output.status)
            } else {
                stderr
            };
            return Err(CodecError::Failed { diagnostic });
        }

        Ok(output)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
        "-show_streams".into(),
        path_arg(input),
    ]
}

pub(crate) fn measure_args(input: &Path, target: &LoudnessTarget) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-i".into(),
        path_arg(input),
        "-vn".into(),
        "-af".into(),
        measure_filter(target),
        "-f".into(),
        "null".into(),
        "-".into(),
    ]
}

pub(crate) fn normalize_args(
    input: &Path,
    measured: &LoudnessMeasurement,
    target: &LoudnessTarget,
    output: &Path,
) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        path_arg(input),
        "-vn".into(),
        "-af".into(),
        normalize_filter(target, measured),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", target.bitrate_kbps),
        "-ar".into(),
        target.sample_rate_hz.to_string(),
        "-ac".into(),
        target.channels.to_string(),
        "-movflags".into(),
        "+faststart".into(),
        path_arg(output),
    ]
}

pub(crate) fn segment_args(
    input: &Path,
    profile: &QualityProfile,
    segment_duration_secs: u32,
    out_dir: &Path,
) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        path_arg(input),
        "-vn".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", profile.bitrate_kbps),
        "-ar".into(),
        profile.sample_rate_hz.to_string(),
        "-ac".into(),
        OUTPUT_CHANNELS.to_string(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        segment_duration_secs.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-start_number".into(),
        "0".into(),
        "-hls_segment_filename".into(),
        path_arg(&out_dir.join("segment_%d.ts")),
        path_arg(&out_dir.join(PLAYLIST_FILE_NAME)),
    ]
}

fn parse_probe_output(stdout: &[u8]) -> Result<AudioInfo, CodecError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| CodecError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let audio_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .ok_or_else(|| CodecError::InvalidOutput("No audio stream found".to_string()))?;

    let duration_secs: f64 = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse().ok())
        .filter(|d: &f64| d.is_finite() && *d > 0.0)
        .ok_or_else(|| CodecError::InvalidOutput("missing or zero duration".to_string()))?;

    // Prefer the stream bitrate, fall back to the container's
    let bitrate_kbps = audio_stream
        .bit_rate
        .as_ref()
        .or(probe.format.bit_rate.as_ref())
        .and_then(|b| b.parse::<u64>().ok())
        .map(|b| (b / 1000) as u32);

    Ok(AudioInfo {
        duration_secs,
        codec: audio_stream
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        sample_rate_hz: audio_stream
            .sample_rate
            .as_ref()
            .and_then(|sr| sr.parse().ok()),
        channels: audio_stream.channels,
        bitrate_kbps,
    })
}

#[async_trait]
impl MediaCodec for FfmpegCodec {
    async fn probe(&self, input: &Path) -> Result<AudioInfo, CodecError> {
        let output = self
            .run(&self.settings.ffprobe_path, &probe_args(input))
            .await?;
        parse_probe_output(&output.stdout)
    }

    async fn measure_loudness(
        &self,
        input: &Path,
        target: &LoudnessTarget,
    ) -> Result<LoudnessMeasurement, CodecError> {
        let output = self
            .run(&self.settings.ffmpeg_path, &measure_args(input, target))
            .await?;
        parse_loudnorm_stats(&String::from_utf8_lossy(&output.stderr))
    }

    async fn normalize_and_encode(
        &self,
        input: &Path,
        measured: &LoudnessMeasurement,
        target: &LoudnessTarget,
        output: &Path,
    ) -> Result<PathBuf, CodecError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.run(
            &self.settings.ffmpeg_path,
            &normalize_args(input, measured, target, output),
        )
        .await?;

        let size = tokio::fs::metadata(output).await?.len();
        if size == 0 {
            return Err(CodecError::InvalidOutput(format!(
                "empty master written to {}",
                output.display()
            )));
        }
        Ok(output.to_path_buf())
    }

    async fn segment(
        &self,
        input: &Path,
        profile: &QualityProfile,
        segment_duration_secs: u32,
        out_dir: &Path,
    ) -> Result<SegmentedRendition, CodecError> {
        tokio::fs::create_dir_all(out_dir).await?;

        self.run(
            &self.settings.ffmpeg_path,
            &segment_args(input, profile, segment_duration_secs, out_dir),
        )
        .await?;

        let playlist_path = out_dir.join(PLAYLIST_FILE_NAME);
        let contents = tokio::fs::read_to_string(&playlist_path).await?;
        let entries = parse_media_playlist(&contents)
            .map_err(|e| CodecError::InvalidOutput(format!("{} playlist: {}", profile.name, e)))?;
        if entries.is_empty() {
            return Err(CodecError::InvalidOutput(format!(
                "{} playlist has no segments",
                profile.name
            )));
        }

        let segments = segment_files(out_dir, entries)?;
        for segment in &segments {
            if !tokio::fs::try_exists(&segment.path).await? {
                return Err(CodecError::InvalidOutput(format!(
                    "segment {} listed but not written",
                    segment.path.display()
                )));
            }
        }

        Ok(SegmentedRendition {
            profile: *profile,
            playlist_path,
            segments,
        })
    }
}

/// Map playlist entries to segment files. Published keys are derived from
/// the index, so every URI must be `segment_<n>.ts` with `n` counting from 0.
pub(crate) fn segment_files(
    out_dir: &Path,
    entries: Vec<PlaylistEntry>,
) -> Result<Vec<SegmentFile>, CodecError> {
    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| match parse_segment_index(&entry.uri) {
            Some(index) if index == position => Ok(SegmentFile {
                index,
                path: out_dir.join(&entry.uri),
                duration_secs: entry.duration_secs,
            }),
            _ => Err(CodecError::InvalidOutput(format!(
                "unexpected segment {:?} at position {}",
                entry.uri, position
            ))),
        })
        .collect()
}
