//! Test doubles for the codec and the object store.

use super::constants::CORRUPT_DIAGNOSTIC;
use async_trait::async_trait;
use mwonya_track_processor::assets::hls::{
    plan_segments, render_media_playlist, segment_file_name, PlaylistEntry, PLAYLIST_FILE_NAME,
};
use mwonya_track_processor::assets::{LoudnessTarget, QualityProfile};
use mwonya_track_processor::codec::{
    AudioInfo, CodecError, LoudnessMeasurement, MediaCodec, SegmentFile, SegmentedRendition,
};
use mwonya_track_processor::jobs::{Job, JobStatus, JobStore, SqliteJobStore};
use mwonya_track_processor::storage::{MemoryObjectStore, ObjectStore, StorageError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const CORRUPT_MARKER: &[u8] = b"CORRUPT";

/// Bytes the fake codec accepts as an audio file of `duration_secs`.
pub fn fake_audio(duration_secs: f64) -> Vec<u8> {
    let mut data = format!("FAKEAUDIO duration={:.3}\n", duration_secs).into_bytes();
    data.extend((0..256u32).map(|i| (i % 251) as u8));
    data
}

/// Bytes the fake codec fails to normalize.
pub fn corrupt_audio() -> Vec<u8> {
    let mut data = CORRUPT_MARKER.to_vec();
    data.extend_from_slice(b"\x00\xff\x13garbage");
    data
}

fn read_duration(contents: &[u8]) -> Option<f64> {
    let text = String::from_utf8_lossy(contents);
    let start = text.find("duration=")? + "duration=".len();
    text[start..]
        .split_whitespace()
        .next()
        .and_then(|value| value.parse().ok())
}

// ============================================================================
// FakeCodec
// ============================================================================

/// A [`MediaCodec`] that writes small text files instead of audio.
///
/// Segmentation follows the real encoder's fixed-length split, so playlists
/// and segment counts match what ffmpeg would produce.
#[derive(Default)]
pub struct FakeCodec {
    failing_rendition: Option<&'static str>,
    vanishing_segment: Option<&'static str>,
    normalize_delay: Option<Duration>,
    measure_calls: AtomicUsize,
    normalize_calls: AtomicUsize,
    segment_calls: AtomicUsize,
    /// Codec operations in the order they were called.
    calls: Mutex<Vec<&'static str>>,
    normalized_with: Mutex<Option<LoudnessMeasurement>>,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `segment` fail for the rendition with this profile name.
    pub fn with_failing_rendition(mut self, profile_name: &'static str) -> Self {
        self.failing_rendition = Some(profile_name);
        self
    }

    /// Report the first segment of this rendition but remove its file.
    pub fn with_vanishing_segment(mut self, profile_name: &'static str) -> Self {
        self.vanishing_segment = Some(profile_name);
        self
    }

    /// Make the normalize pass take this long.
    pub fn with_normalize_delay(mut self, delay: Duration) -> Self {
        self.normalize_delay = Some(delay);
        self
    }

    pub fn measure_calls(&self) -> usize {
        self.measure_calls.load(Ordering::SeqCst)
    }

    pub fn normalize_calls(&self) -> usize {
        self.normalize_calls.load(Ordering::SeqCst)
    }

    pub fn segment_calls(&self) -> usize {
        self.segment_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// The measurement handed to the last normalize call.
    pub fn normalized_with(&self) -> Option<LoudnessMeasurement> {
        *self.normalized_with.lock().unwrap()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    async fn read_input(input: &Path) -> Result<Vec<u8>, CodecError> {
        Ok(tokio::fs::read(input).await?)
    }
}

#[async_trait]
impl MediaCodec for FakeCodec {
    async fn probe(&self, input: &Path) -> Result<AudioInfo, CodecError> {
        self.record("probe");
        let contents = Self::read_input(input).await?;
        let duration_secs = read_duration(&contents).ok_or_else(|| CodecError::Failed {
            diagnostic: format!("{}: Invalid data found when processing input", input.display()),
        })?;
        Ok(AudioInfo {
            duration_secs,
            codec: "aac".to_string(),
            sample_rate_hz: Some(44_100),
            channels: Some(2),
            bitrate_kbps: Some(128),
        })
    }

    async fn measure_loudness(
        &self,
        input: &Path,
        target: &LoudnessTarget,
    ) -> Result<LoudnessMeasurement, CodecError> {
        self.measure_calls.fetch_add(1, Ordering::SeqCst);
        self.record("measure");
        Self::read_input(input).await?;
        Ok(LoudnessMeasurement {
            integrated_lufs: -20.3,
            range_lu: 6.1,
            true_peak_dbtp: -3.2,
            threshold_lufs: -30.5,
            target_offset_lu: target.lufs - -20.3,
        })
    }

    async fn normalize_and_encode(
        &self,
        input: &Path,
        measured: &LoudnessMeasurement,
        _target: &LoudnessTarget,
        output: &Path,
    ) -> Result<PathBuf, CodecError> {
        self.normalize_calls.fetch_add(1, Ordering::SeqCst);
        self.record("normalize");
        *self.normalized_with.lock().unwrap() = Some(*measured);
        if let Some(delay) = self.normalize_delay {
            tokio::time::sleep(delay).await;
        }

        let contents = Self::read_input(input).await?;
        if contents.starts_with(CORRUPT_MARKER) {
            return Err(CodecError::Failed {
                diagnostic: CORRUPT_DIAGNOSTIC.to_string(),
            });
        }
        let duration = read_duration(&contents).ok_or_else(|| {
            CodecError::InvalidOutput(format!("no duration in {}", input.display()))
        })?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, format!("FAKEMASTER duration={:.3}\n", duration)).await?;
        Ok(output.to_path_buf())
    }

    async fn segment(
        &self,
        input: &Path,
        profile: &QualityProfile,
        segment_duration_secs: u32,
        out_dir: &Path,
    ) -> Result<SegmentedRendition, CodecError> {
        self.segment_calls.fetch_add(1, Ordering::SeqCst);
        self.record("segment");
        if self.failing_rendition == Some(profile.name) {
            return Err(CodecError::Failed {
                diagnostic: format!("Conversion failed for {} rendition", profile.name),
            });
        }

        let contents = Self::read_input(input).await?;
        let duration = read_duration(&contents)
            .ok_or_else(|| CodecError::InvalidOutput("master has no duration".to_string()))?;

        tokio::fs::create_dir_all(out_dir).await?;
        let mut segments = Vec::new();
        let mut entries = Vec::new();
        for (index, segment_secs) in plan_segments(duration, segment_duration_secs as f64)
            .into_iter()
            .enumerate()
        {
            let name = segment_file_name(index);
            let path = out_dir.join(&name);
            tokio::fs::write(
                &path,
                format!("SEGMENT {} {} {:.3}\n", profile.name, index, segment_secs),
            )
            .await?;
            entries.push(PlaylistEntry {
                duration_secs: segment_secs,
                uri: name,
            });
            segments.push(SegmentFile {
                index,
                path,
                duration_secs: segment_secs,
            });
        }

        let playlist_path = out_dir.join(PLAYLIST_FILE_NAME);
        tokio::fs::write(&playlist_path, render_media_playlist(&entries)).await?;

        if self.vanishing_segment == Some(profile.name) {
            tokio::fs::remove_file(&segments[0].path).await?;
        }

        Ok(SegmentedRendition {
            profile: *profile,
            playlist_path,
            segments,
        })
    }
}

// ============================================================================
// FlakyObjectStore
// ============================================================================

/// A [`MemoryObjectStore`] with scripted failures.
#[derive(Default)]
pub struct FlakyObjectStore {
    inner: MemoryObjectStore,
    transient_get_failures: AtomicUsize,
    transient_put_failures: AtomicUsize,
    get_error: Mutex<Option<StorageError>>,
    put_error: Mutex<Option<(String, StorageError)>>,
    copy_error: Mutex<Option<StorageError>>,
    on_put: Mutex<Option<PutHook>>,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

type PutHook = Box<dyn Fn(&str) + Send + Sync>;

impl FlakyObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` reads fail with a transient error.
    pub fn fail_next_gets(&self, count: usize) {
        self.transient_get_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` writes fail with a transient error.
    pub fn fail_next_puts(&self, count: usize) {
        self.transient_put_failures.store(count, Ordering::SeqCst);
    }

    /// Every read fails with `error`.
    pub fn fail_gets_with(&self, error: StorageError) {
        *self.get_error.lock().unwrap() = Some(error);
    }

    /// Every write to a key containing `pattern` fails with `error`.
    pub fn fail_puts_matching(&self, pattern: &str, error: StorageError) {
        *self.put_error.lock().unwrap() = Some((pattern.to_string(), error));
    }

    /// Every copy fails with `error`.
    pub fn fail_copies_with(&self, error: StorageError) {
        *self.copy_error.lock().unwrap() = Some(error);
    }

    /// Call `hook` with the key after every successful write.
    pub fn on_put(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_put.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect()
    }

    fn take_transient(counter: &AtomicUsize, key: &str) -> Result<(), StorageError> {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining > 0 {
            counter.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Transient(format!("{}: connection reset", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.get_error.lock().unwrap().clone() {
            return Err(error);
        }
        Self::take_transient(&self.transient_get_failures, key)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((pattern, error)) = self.put_error.lock().unwrap().clone() {
            if key.contains(&pattern) {
                return Err(error);
            }
        }
        Self::take_transient(&self.transient_put_failures, key)?;
        self.inner.put(key, data).await?;
        if let Some(hook) = self.on_put.lock().unwrap().as_ref() {
            hook(key);
        }
        Ok(())
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<(), StorageError> {
        if let Some(error) = self.copy_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.inner.copy(src_key, dst_key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

// ============================================================================
// FlakyJobStore
// ============================================================================

/// A [`SqliteJobStore`] whose completion and failure writes can be broken.
pub struct FlakyJobStore {
    inner: SqliteJobStore,
    broken_finalize: AtomicBool,
}

impl FlakyJobStore {
    pub fn in_memory() -> Self {
        Self {
            inner: SqliteJobStore::in_memory().expect("Failed to create job store"),
            broken_finalize: AtomicBool::new(false),
        }
    }

    /// Make every `complete` and `fail` call return an error.
    pub fn break_finalize(&self) {
        self.broken_finalize.store(true, Ordering::SeqCst);
    }

    fn check_finalize(&self) -> anyhow::Result<()> {
        if self.broken_finalize.load(Ordering::SeqCst) {
            anyhow::bail!("database is locked");
        }
        Ok(())
    }
}

impl JobStore for FlakyJobStore {
    fn register(&self, id: &str, source_key: &str) -> anyhow::Result<bool> {
        self.inner.register(id, source_key)
    }

    fn get(&self, id: &str) -> anyhow::Result<Option<Job>> {
        self.inner.get(id)
    }

    fn try_claim(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.try_claim(id)
    }

    fn heartbeat(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.heartbeat(id)
    }

    fn complete(&self, id: &str) -> anyhow::Result<bool> {
        self.check_finalize()?;
        self.inner.complete(id)
    }

    fn fail(&self, id: &str, message: &str) -> anyhow::Result<bool> {
        self.check_finalize()?;
        self.inner.fail(id, message)
    }

    fn list_by_status(&self, status: JobStatus) -> anyhow::Result<Vec<String>> {
        self.inner.list_by_status(status)
    }

    fn fail_stale_processing(
        &self,
        older_than_secs: i64,
        message: &str,
    ) -> anyhow::Result<Vec<String>> {
        self.inner.fail_stale_processing(older_than_secs, message)
    }
}
