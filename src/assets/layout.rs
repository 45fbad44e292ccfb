//! Object key layout for raw, processed and failed tracks.
//!
//! ```text
//! <raw>/<original filename>
//! <processed>/<job>/<job>.m4a
//! <processed>/<job>/playlist.m3u8
//! <processed>/<job>/metadata.json
//! <processed>/<job>/{low|med|high}/playlist.m3u8
//! <processed>/<job>/{low|med|high}/segment_<n>.ts
//! <failed>/<original filename>
//! ```

use super::hls::{segment_file_name, PLAYLIST_FILE_NAME};
use super::profiles::QualityProfile;

pub const DEFAULT_RAW_PREFIX: &str = "tracks/";
pub const DEFAULT_PROCESSED_PREFIX: &str = "mwonya_audio_tracks/";
pub const DEFAULT_FAILED_PREFIX: &str = "failedprocessing_tracks/";

pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Key naming scheme shared with everything that reads processed tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLayout {
    raw_prefix: String,
    processed_prefix: String,
    failed_prefix: String,
}

impl Default for AssetLayout {
    fn default() -> Self {
        Self::new(
            DEFAULT_RAW_PREFIX,
            DEFAULT_PROCESSED_PREFIX,
            DEFAULT_FAILED_PREFIX,
        )
    }
}

impl AssetLayout {
    pub fn new(raw_prefix: &str, processed_prefix: &str, failed_prefix: &str) -> Self {
        Self {
            raw_prefix: normalize_prefix(raw_prefix),
            processed_prefix: normalize_prefix(processed_prefix),
            failed_prefix: normalize_prefix(failed_prefix),
        }
    }

    /// Raw prefix with its trailing slash (empty for the bucket root).
    pub fn raw_prefix(&self) -> &str {
        &self.raw_prefix
    }

    pub fn processed_prefix(&self) -> &str {
        &self.processed_prefix
    }

    pub fn failed_prefix(&self) -> &str {
        &self.failed_prefix
    }

    pub fn raw_key(&self, original_filename: &str) -> String {
        format!("{}{}", self.raw_prefix, original_filename)
    }

    /// Prefix owning every processed asset of a job, with trailing slash.
    pub fn job_prefix(&self, job_id: &str) -> String {
        format!("{}{}/", self.processed_prefix, job_id)
    }

    pub fn master_key(&self, job_id: &str) -> String {
        format!("{}{}.m4a", self.job_prefix(job_id), job_id)
    }

    pub fn master_playlist_key(&self, job_id: &str) -> String {
        format!("{}{}", self.job_prefix(job_id), PLAYLIST_FILE_NAME)
    }

    pub fn metadata_key(&self, job_id: &str) -> String {
        format!("{}{}", self.job_prefix(job_id), METADATA_FILE_NAME)
    }

    pub fn rendition_prefix(&self, job_id: &str, profile: &QualityProfile) -> String {
        format!("{}{}/", self.job_prefix(job_id), profile.dir_name)
    }

    pub fn rendition_playlist_key(&self, job_id: &str, profile: &QualityProfile) -> String {
        format!(
            "{}{}",
            self.rendition_prefix(job_id, profile),
            PLAYLIST_FILE_NAME
        )
    }

    pub fn segment_key(&self, job_id: &str, profile: &QualityProfile, index: usize) -> String {
        format!(
            "{}{}",
            self.rendition_prefix(job_id, profile),
            segment_file_name(index)
        )
    }

    pub fn failed_key(&self, original_filename: &str) -> String {
        format!("{}{}", self.failed_prefix, original_filename)
    }
}

/// Strip stray slashes and keep exactly one trailing `/`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
