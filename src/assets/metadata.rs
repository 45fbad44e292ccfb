//! `metadata.json` document published next to the processed assets.

use super::layout::AssetLayout;
use super::profiles::{LoudnessTarget, QualityProfile};
use crate::codec::{AudioInfo, LoudnessMeasurement};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TrackMetadata {
    pub track_id: String,
    pub source_key: String,
    pub original_filename: String,
    pub duration_secs: f64,
    pub loudness: LoudnessSummary,
    pub master: MasterSummary,
    pub hls: HlsSummary,
    /// RFC 3339.
    pub processed_at: String,
    pub processor_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoudnessSummary {
    pub measured: LoudnessMeasurement,
    pub target: LoudnessTarget,
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterSummary {
    pub key: String,
    pub codec: &'static str,
    pub container: &'static str,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HlsSummary {
    pub master_playlist: String,
    pub segment_duration_secs: u32,
    pub renditions: Vec<RenditionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenditionSummary {
    pub name: &'static str,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
    pub playlist: String,
    pub segment_count: usize,
}

/// Everything the metadata document is built from.
pub struct MetadataInput<'a> {
    pub job_id: &'a str,
    pub source_key: &'a str,
    pub original_filename: &'a str,
    pub master_info: &'a AudioInfo,
    pub measurement: &'a LoudnessMeasurement,
    pub target: &'a LoudnessTarget,
    pub segment_duration_secs: u32,
    /// Profile and number of segments produced for it.
    pub renditions: &'a [(QualityProfile, usize)],
}

impl TrackMetadata {
    pub fn build(layout: &AssetLayout, input: MetadataInput<'_>) -> Self {
        let renditions = input
            .renditions
            .iter()
            .map(|(profile, segment_count)| RenditionSummary {
                name: profile.name,
                bitrate_kbps: profile.bitrate_kbps,
                sample_rate_hz: profile.sample_rate_hz,
                playlist: layout.rendition_playlist_key(input.job_id, profile),
                segment_count: *segment_count,
            })
            .collect();

        Self {
            track_id: input.job_id.to_string(),
            source_key: input.source_key.to_string(),
            original_filename: input.original_filename.to_string(),
            duration_secs: input.master_info.duration_secs,
            loudness: LoudnessSummary {
                measured: *input.measurement,
                target: *input.target,
            },
            master: MasterSummary {
                key: layout.master_key(input.job_id),
                codec: "aac",
                container: "m4a",
                bitrate_kbps: input.target.bitrate_kbps,
                sample_rate_hz: input.target.sample_rate_hz,
                channels: input.target.channels,
            },
            hls: HlsSummary {
                master_playlist: layout.master_playlist_key(input.job_id),
                segment_duration_secs: input.segment_duration_secs,
                renditions,
            },
            processed_at: chrono::Utc::now().to_rfc3339(),
            processor_version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
