//! Snapshot error types

use otter_heap::HeapError;
use otter_serializer::{DeserializeError, SerializeError};
use thiserror::Error;

/// Errors raised while saving or loading a module snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Stored checksum does not match the file contents
    #[error("Checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum read from the file
        stored: u32,
        /// Checksum of the content region
        computed: u32,
    },

    /// Snapshot was written by a different application build
    #[error("Application version mismatch: expected {expected}, found {found}")]
    AppVersionMismatch {
        /// Running application version code
        expected: u32,
        /// Version code stored in the file
        found: u32,
    },

    /// Snapshot was written for a different logical version
    #[error("Snapshot version mismatch: expected {expected:?}, found {found:?}")]
    VersionMismatch {
        /// Running version string
        expected: String,
        /// Version string stored in the file
        found: String,
    },

    /// File ends before a field it declares
    #[error("Snapshot truncated at offset {0}")]
    Truncated(usize),

    /// File contents are structurally inconsistent
    #[error("Invalid snapshot layout: {0}")]
    InvalidLayout(String),

    /// Module table could not be serialized
    #[error("Serialization failed: {0}")]
    Serialize(#[from] SerializeError),

    /// Module table could not be rebuilt
    #[error("Deserialization failed: {0}")]
    Deserialize(#[from] DeserializeError),

    /// Heap access failed
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),

    /// File system failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;
