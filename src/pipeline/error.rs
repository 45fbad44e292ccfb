//! Pipeline errors and their classification.

use crate::codec::CodecError;
use crate::staging::StagingError;
use crate::storage::StorageError;
use std::fmt;
use thiserror::Error;

/// How the pipeline reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt under the retry policy.
    Retryable,
    /// Fails the job without retrying.
    NonRetryable,
    /// Fails the job and raises an operator alert.
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Retryable => "retryable",
            ErrorClass::NonRetryable => "non_retryable",
            ErrorClass::Fatal => "fatal",
        }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Stage,
    Fetch,
    Normalize,
    Segment,
    Publish,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Stage => "stage",
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Segment => "segment",
            Stage::Publish => "publish",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Staging(#[from] StagingError),

    #[error("storage {operation} failed for {key}: {source}")]
    Storage {
        operation: &'static str,
        key: String,
        source: StorageError,
    },

    /// Codec diagnostics are carried through untouched.
    #[error("{0}")]
    Codec(CodecError),

    #[error("rendition {profile} failed: {source}")]
    Rendition {
        profile: &'static str,
        source: CodecError,
    },

    #[error("working directory I/O failed: {0}")]
    WorkingDir(#[from] std::io::Error),

    #[error("failed to serialize metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("job store error: {0:#}")]
    JobStore(anyhow::Error),

    #[error("processing cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn storage(operation: &'static str, key: impl Into<String>, source: StorageError) -> Self {
        PipelineError::Storage {
            operation,
            key: key.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Storage { source, .. } if source.is_retryable() => {
                ErrorClass::Retryable
            }
            PipelineError::Staging(_) | PipelineError::JobStore(_) => ErrorClass::Fatal,
            _ => ErrorClass::NonRetryable,
        }
    }
}

impl From<CodecError> for PipelineError {
    fn from(err: CodecError) -> Self {
        PipelineError::Codec(err)
    }
}
