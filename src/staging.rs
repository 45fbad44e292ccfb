//! Per-job working directories on local disk.

use crate::assets::hls::PLAYLIST_FILE_NAME;
use crate::assets::{QualityProfile, METADATA_FILE_NAME};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

const PROBE_FILE_NAME: &str = ".staging-probe";

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staging area unavailable: {0}")]
    Unavailable(String),
}

/// Root directory under which every job gets its own private working set.
pub struct StagingArea {
    root: PathBuf,
}

/// A job's working directory and the paths derived from it.
///
/// Holds the directory guard, so a set that is dropped without
/// [`StagingArea::release`] is still removed.
#[derive(Debug)]
pub struct WorkingSet {
    dir: PathBuf,
    guard: Mutex<Option<TempDir>>,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn init(&self) -> Result<(), StagingError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StagingError::Unavailable(format!("{}: {}", self.root.display(), e)))
    }

    /// Create a fresh directory for `job_id` and check that it can be written to.
    pub async fn acquire(&self, job_id: &str) -> Result<WorkingSet, StagingError> {
        let prefix = format!("{}-", sanitize_job_id(job_id));
        let temp_dir = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(6)
            .tempdir_in(&self.root)
            .map_err(|e| StagingError::Unavailable(format!("{}: {}", self.root.display(), e)))?;

        let dir = temp_dir.path().to_path_buf();
        let probe = dir.join(PROBE_FILE_NAME);
        let probe_result = async {
            tokio::fs::write(&probe, b"probe").await?;
            tokio::fs::remove_file(&probe).await
        }
        .await;
        if let Err(e) = probe_result {
            // Dropping the guard removes the directory.
            return Err(StagingError::Unavailable(format!(
                "{} is not writable: {}",
                dir.display(),
                e
            )));
        }

        debug!("Acquired working set {} for job {}", dir.display(), job_id);
        Ok(WorkingSet {
            dir,
            guard: Mutex::new(Some(temp_dir)),
        })
    }

    /// Remove a working set. Safe to call more than once.
    pub fn release(&self, working_set: &WorkingSet) {
        working_set.release();
    }
}

impl WorkingSet {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the downloaded source is written.
    pub fn source_path(&self, original_filename: &str) -> PathBuf {
        let name = sanitize_filename(original_filename).unwrap_or_else(|| "source".to_string());
        self.dir.join("source").join(name)
    }

    pub fn master_path(&self) -> PathBuf {
        self.dir.join("master.m4a")
    }

    pub fn rendition_dir(&self, profile: &QualityProfile) -> PathBuf {
        self.dir.join("renditions").join(profile.dir_name)
    }

    pub fn master_playlist_path(&self) -> PathBuf {
        self.dir.join(PLAYLIST_FILE_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE_NAME)
    }

    pub fn is_released(&self) -> bool {
        match self.guard.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => false,
        }
    }

    fn release(&self) {
        let temp_dir = match self.guard.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        let Some(temp_dir) = temp_dir else {
            return;
        };

        if let Err(e) = temp_dir.close() {
            warn!("Failed to remove working set {}: {}", self.dir.display(), e);
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Retry removing {} failed: {}", self.dir.display(), e);
                }
            }
        } else {
            debug!("Released working set {}", self.dir.display());
        }
    }
}

/// Job ids become directory name prefixes; keep them to a safe alphabet.
fn sanitize_job_id(job_id: &str) -> String {
    let sanitized: String = job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "job".to_string()
    } else {
        sanitized
    }
}

fn sanitize_filename(filename: &str) -> Option<String> {
    let name = Path::new(filename).file_name().and_then(|n| n.to_str())?;

    if name.contains('\0') || name.starts_with('.') {
        return None;
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    (!sanitized.is_empty()).then_some(sanitized)
}
