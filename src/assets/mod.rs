//! Output asset conventions: key layout, rendition presets, HLS playlists
//! and the metadata document.

pub mod hls;
mod layout;
mod metadata;
mod profiles;

pub use layout::{
    AssetLayout, DEFAULT_FAILED_PREFIX, DEFAULT_PROCESSED_PREFIX, DEFAULT_RAW_PREFIX,
    METADATA_FILE_NAME,
};
pub use metadata::{MetadataInput, TrackMetadata};
pub use profiles::{
    LoudnessTarget, QualityProfile, HIGH, LOW, MEDIUM, OUTPUT_CHANNELS, QUALITY_PROFILES,
};
