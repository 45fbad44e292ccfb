//! Shared constants for end-to-end tests
//!
//! When test data changes (job ids, file names, prefixes), update only this file.

// ============================================================================
// Jobs
// ============================================================================

/// A well-formed three minute upload
pub const TRACK_1_ID: &str = "trk-001";
pub const TRACK_1_FILE: &str = "trk-001.mp3";

/// An upload the codec cannot decode
pub const CORRUPT_TRACK_ID: &str = "trk-002";
pub const CORRUPT_TRACK_FILE: &str = "trk-002.wav";

/// A short upload used for segmentation checks
pub const SHORT_TRACK_ID: &str = "trk-003";
pub const SHORT_TRACK_FILE: &str = "trk-003.flac";

pub const THREE_MINUTES_SECS: f64 = 180.0;

// ============================================================================
// Object keys (default layout)
// ============================================================================

pub const RAW_PREFIX: &str = "tracks/";
pub const PROCESSED_PREFIX: &str = "mwonya_audio_tracks/";
pub const FAILED_PREFIX: &str = "failedprocessing_tracks/";

/// Rendition directory names under a job prefix
pub const RENDITION_DIRS: [&str; 3] = ["low", "med", "high"];

/// Diagnostic the fake codec reports for corrupt input
pub const CORRUPT_DIAGNOSTIC: &str =
    "[mp3 @ 0x5581] Header missing\nError while decoding stream #0:0: Invalid data found when processing input";
