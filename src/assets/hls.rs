//! HLS playlist rendering and parsing.
//!
//! Only the subset the processor writes is understood: VOD media playlists
//! with `#EXTINF` entries, and a master playlist with one
//! `#EXT-X-STREAM-INF` per rendition.

use super::profiles::QualityProfile;
use thiserror::Error;

pub const PLAYLIST_FILE_NAME: &str = "playlist.m3u8";

/// Leftover durations shorter than this are encoder rounding, not a segment.
const SEGMENT_EPSILON_SECS: f64 = 1e-3;

/// AAC-LC.
const AUDIO_CODECS: &str = "mp4a.40.2";

#[derive(Debug, Error, PartialEq)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,

    #[error("invalid #EXTINF duration on line {line}: {value:?}")]
    InvalidDuration { line: usize, value: String },

    #[error("#EXTINF on line {0} is not followed by a segment URI")]
    DanglingEntry(usize),
}

/// One segment reference of a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub duration_secs: f64,
    pub uri: String,
}

pub fn segment_file_name(index: usize) -> String {
    format!("segment_{}.ts", index)
}

/// Inverse of [`segment_file_name`].
pub fn parse_segment_index(uri: &str) -> Option<usize> {
    uri.strip_prefix("segment_")?
        .strip_suffix(".ts")?
        .parse()
        .ok()
}

/// Split `total_secs` into fixed-length segments; the last one holds the remainder.
pub fn plan_segments(total_secs: f64, segment_secs: f64) -> Vec<f64> {
    if !(total_secs > 0.0 && segment_secs > 0.0) || !total_secs.is_finite() {
        return Vec::new();
    }

    let mut durations = Vec::new();
    let mut remaining = total_secs;
    while remaining > SEGMENT_EPSILON_SECS {
        let duration = remaining.min(segment_secs);
        durations.push(duration);
        remaining -= duration;
    }
    durations
}

pub fn render_media_playlist(entries: &[PlaylistEntry]) -> String {
    let target = entries
        .iter()
        .map(|e| e.duration_secs.ceil() as u64)
        .max()
        .unwrap_or(1)
        .max(1);

    let mut playlist = String::new();
    playlist.push_str("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:3\n");
    playlist.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", target));
    playlist.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    playlist.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    for entry in entries {
        playlist.push_str(&format!("#EXTINF:{:.6},\n", entry.duration_secs));
        playlist.push_str(&entry.uri);
        playlist.push('\n');
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

pub fn parse_media_playlist(contents: &str) -> Result<Vec<PlaylistEntry>, PlaylistError> {
    let mut lines = contents
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, l)| !l.is_empty());

    match lines.next() {
        Some((_, "#EXTM3U")) => {}
        _ => return Err(PlaylistError::MissingHeader),
    }

    let mut entries = Vec::new();
    let mut pending: Option<(usize, f64)> = None;
    for (index, line) in lines {
        let line_no = index + 1;
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some((previous, _)) = pending {
                return Err(PlaylistError::DanglingEntry(previous));
            }
            let value = rest.split(',').next().unwrap_or("").trim();
            let duration = value
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or_else(|| PlaylistError::InvalidDuration {
                    line: line_no,
                    value: value.to_string(),
                })?;
            pending = Some((line_no, duration));
        } else if line.starts_with('#') {
            continue;
        } else if let Some((_, duration_secs)) = pending.take() {
            entries.push(PlaylistEntry {
                duration_secs,
                uri: line.to_string(),
            });
        }
    }

    if let Some((line, _)) = pending {
        return Err(PlaylistError::DanglingEntry(line));
    }
    Ok(entries)
}

/// Master playlist referencing each rendition's `playlist.m3u8`.
pub fn render_master_playlist(profiles: &[QualityProfile]) -> String {
    let mut playlist = String::new();
    playlist.push_str("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:3\n");
    for profile in profiles {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},CODECS=\"{}\"\n",
            profile.bandwidth_bps(),
            AUDIO_CODECS
        ));
        playlist.push_str(&format!("{}/{}\n", profile.dir_name, PLAYLIST_FILE_NAME));
    }
    playlist
}
