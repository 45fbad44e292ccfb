//! Filesystem-backed bucket.
//!
//! Layout: `{root}/{bucket}/{key}`. Writes go to a temp file in the target
//! directory and are renamed into place, so readers never see partial objects.

use super::{ObjectStore, StorageError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use walkdir::WalkDir;

/// Object store that maps a bucket onto a local directory.
pub struct FsObjectStore {
    bucket_dir: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            bucket_dir: root.as_ref().join(bucket),
        }
    }

    /// Create the bucket directory.
    pub async fn init(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.bucket_dir)
            .await
            .map_err(|e| StorageError::from_io(&self.bucket_dir.to_string_lossy(), &e))
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    /// Resolve a key to a path inside the bucket, rejecting traversal.
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::AccessDenied(format!("invalid key: {:?}", key)));
        }
        Ok(self.bucket_dir.join(relative))
    }

    fn path_to_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.bucket_dir).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    async fn write_atomically(&self, key: &str, target: &Path, data: &[u8]) -> Result<(), StorageError> {
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::AccessDenied(format!("invalid key: {:?}", key)))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::from_io(key, &e))?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = parent.join(format!(".{}.{}.partial", file_name, uuid::Uuid::new_v4()));

        let result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, target).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::from_io(key, &e));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        fs::read(&path).await.map_err(|e| StorageError::from_io(key, &e))
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        debug!("put {} ({} bytes)", key, data.len());
        self.write_atomically(key, &path, &data).await
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<(), StorageError> {
        let data = self.get(src_key).await?;
        self.put(dst_key, data).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(key, &e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(key, &e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let bucket_dir = self.bucket_dir.clone();
        let walk_root = bucket_dir.clone();
        let paths = tokio::task::spawn_blocking(move || {
            WalkDir::new(&walk_root)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| StorageError::Transient(format!("listing {:?}: {}", bucket_dir, e)))?;

        let mut keys: Vec<String> = paths
            .iter()
            .filter_map(|p| self.path_to_key(p))
            // In-flight writes are hidden.
            .filter(|k| !k.rsplit('/').next().unwrap_or("").starts_with('.'))
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
