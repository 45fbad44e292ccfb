//! Registration of pending jobs for raw uploads.

use crate::assets::AssetLayout;
use crate::jobs::JobStore;
use crate::storage::ObjectStore;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "ogg", "m4a", "aac", "wma", "opus", "aiff", "aif",
];

/// Check if a file is a supported audio format.
pub fn is_supported_audio(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Job id derived from an upload's file name: its stem.
pub fn job_id_for(filename: &str) -> Option<String> {
    let stem = Path::new(filename).file_stem()?.to_str()?.trim();
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

/// Register one upload under the raw prefix. Uses `job_id` when given,
/// otherwise the file stem. Returns false if the job already exists.
pub fn register_upload(
    job_store: &dyn JobStore,
    layout: &AssetLayout,
    filename: &str,
    job_id: Option<&str>,
) -> Result<bool> {
    if filename.is_empty() || filename.contains('/') {
        bail!("Upload name must be a plain file name, got {:?}", filename);
    }
    let id = match job_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        Some(_) => bail!("Job id must not be empty"),
        None => job_id_for(filename)
            .with_context(|| format!("Cannot derive a job id from {:?}", filename))?,
    };

    let source_key = layout.raw_key(filename);
    let created = job_store
        .register(&id, &source_key)
        .with_context(|| format!("Failed to register job {}", id))?;
    if created {
        info!("Registered job {} for {}", id, source_key);
        return Ok(true);
    }

    // Uploads that share a stem map to the same job; only the first one is processed.
    match job_store.get(&id) {
        Ok(Some(existing)) if existing.source_key != source_key => warn!(
            "Upload {} maps to job {} which already belongs to {}, not registered",
            source_key, id, existing.source_key
        ),
        Ok(_) => debug!("Job {} already registered", id),
        Err(e) => warn!("Failed to load existing job {}: {:#}", id, e),
    }
    Ok(false)
}

/// Register a pending job for every supported upload under the raw prefix
/// that has no job yet. Returns the number of new jobs.
pub async fn register_uploads(
    object_store: &dyn ObjectStore,
    job_store: &dyn JobStore,
    layout: &AssetLayout,
) -> Result<usize> {
    let keys = object_store
        .list(layout.raw_prefix())
        .await
        .with_context(|| format!("Failed to list uploads under {:?}", layout.raw_prefix()))?;

    let mut registered = 0;
    for key in keys {
        let filename = &key[layout.raw_prefix().len()..];
        // Only direct children of the raw prefix are uploads.
        if filename.is_empty() || filename.contains('/') || !is_supported_audio(filename) {
            debug!("Skipping {}", key);
            continue;
        }
        if job_id_for(filename).is_none() {
            debug!("Skipping {}: no usable job id", key);
            continue;
        }
        if register_upload(job_store, layout, filename, None)? {
            registered += 1;
        }
    }

    if registered > 0 {
        info!("Registered {} new uploads", registered);
    }
    Ok(registered)
}
