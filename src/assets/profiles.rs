//! Encoding presets: the master loudness target and the HLS renditions.

use serde::Serialize;

/// A fixed bitrate/sample-rate HLS rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityProfile {
    pub name: &'static str,
    /// Directory under the job prefix.
    pub dir_name: &'static str,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
}

impl QualityProfile {
    /// `BANDWIDTH` attribute for the master playlist, in bits per second.
    pub fn bandwidth_bps(&self) -> u64 {
        self.bitrate_kbps as u64 * 1000
    }
}

pub const LOW: QualityProfile = QualityProfile {
    name: "low",
    dir_name: "low",
    bitrate_kbps: 48,
    sample_rate_hz: 24_000,
};

pub const MEDIUM: QualityProfile = QualityProfile {
    name: "medium",
    dir_name: "med",
    bitrate_kbps: 64,
    sample_rate_hz: 32_000,
};

pub const HIGH: QualityProfile = QualityProfile {
    name: "high",
    dir_name: "high",
    bitrate_kbps: 128,
    sample_rate_hz: 44_100,
};

/// All renditions, lowest bitrate first.
pub const QUALITY_PROFILES: [QualityProfile; 3] = [LOW, MEDIUM, HIGH];

/// Audio channels for every output.
pub const OUTPUT_CHANNELS: u32 = 2;

/// Loudness and encoding target for the master file (EBU R128 style).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoudnessTarget {
    /// Integrated loudness, LUFS.
    pub lufs: f64,
    /// Loudness range, LU.
    pub lra: f64,
    /// True-peak ceiling, dBFS.
    pub true_peak_dbfs: f64,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
    pub channels: u32,
}

impl Default for LoudnessTarget {
    fn default() -> Self {
        Self {
            lufs: -14.0,
            lra: 11.0,
            true_peak_dbfs: -1.5,
            bitrate_kbps: 128,
            sample_rate_hz: 44_100,
            channels: OUTPUT_CHANNELS,
        }
    }
}
