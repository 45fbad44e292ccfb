//! Key-addressed object storage.
//!
//! The pipeline only talks to [`ObjectStore`]. [`FsObjectStore`] maps a bucket
//! onto a local directory; [`MemoryObjectStore`] keeps everything in memory.

mod fs_store;
mod memory_store;

pub use fs_store::FsObjectStore;
pub use memory_store::MemoryObjectStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by object storage backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("transient storage error: {0}")]
    Transient(String),
}

impl StorageError {
    /// Only transient errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }

    /// Map an I/O error on `key` to a storage error kind.
    pub fn from_io(key: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                StorageError::AccessDenied(format!("{}: {}", key, err))
            }
            _ => StorageError::Transient(format!("{}: {}", key, err)),
        }
    }
}

/// Object storage operations used by the processor.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the whole object.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Write an object, replacing any previous value.
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Server-side copy of `src_key` to `dst_key`.
    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<(), StorageError>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// List all keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
