//! Storage error types for alkymi-store.
//!
//! [`StoreError`] covers all anticipated failure modes in the persistence
//! layer: JSON serialization, filesystem I/O, missing sidecar blobs, and
//! malformed output documents.

use std::path::PathBuf;

use thiserror::Error;

use alkymi_core::CoreError;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A filesystem operation failed.
    #[error("i/o error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A document references a sidecar blob that is not on disk.
    #[error("sidecar blob missing: '{path}'")]
    BlobMissing { path: PathBuf },

    /// A persisted output document does not follow the expected shape.
    #[error("invalid output document: {reason}")]
    InvalidDocument { reason: String },

    /// A checksum could not be computed (vanished file, refused opaque).
    #[error(transparent)]
    Checksum(#[from] CoreError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
