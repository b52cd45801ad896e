//! Serializer error types

use otter_heap::{HeapError, ObjectType};
use thiserror::Error;

/// Errors that abort a serialization
#[derive(Debug, Error)]
pub enum SerializeError {
    /// Object kind or state is not serializable under the active policy
    #[error("Unsupported object: {0}")]
    NotSupported(String),

    /// Buffer would grow beyond the configured limit
    #[error("Serialized data exceeds size limit: {requested} bytes requested, {limit} bytes allowed")]
    SizeLimitExceeded {
        /// Configured limit
        limit: usize,
        /// Size the write would have reached
        requested: usize,
    },

    /// Transfer list is malformed
    #[error("Invalid transfer list: {0}")]
    InvalidTransferList(&'static str),

    /// Clone list is malformed
    #[error("Invalid clone list: {0}")]
    InvalidCloneList(&'static str),

    /// Array buffer was already detached
    #[error("Array buffer is detached")]
    DetachedBuffer,

    /// Buffer storage is not engine-allocated and cannot be copied
    #[error("Cannot clone array buffer with external storage")]
    ExternalBuffer,

    /// Heap access failed
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),
}

impl SerializeError {
    /// Unsupported object kind
    pub fn unsupported_type(ty: ObjectType) -> Self {
        Self::NotSupported(format!("{:?}", ty))
    }

    /// Unsupported input described by a message
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }
}

/// Result type for serialization
pub type SerializeResult<T> = Result<T, SerializeError>;

/// Errors that abort a deserialization
#[derive(Debug, Error)]
pub enum DeserializeError {
    /// Data was marked incomplete by its serializer
    #[error("Serialized data is incomplete")]
    IncompleteData,

    /// Stream ended inside a unit
    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEnd(usize),

    /// Unknown or misplaced tag
    #[error("Invalid encode flag {flag:#04x} at offset {offset}")]
    InvalidFlag {
        /// Tag byte
        flag: u8,
        /// Offset of the tag
        offset: usize,
    },

    /// Recorded region layout does not match the stream
    #[error("Corrupt layout: {0}")]
    CorruptLayout(String),

    /// Shared-object chunk is no longer registered
    #[error("Shared roots for data index {0} are gone")]
    MissingSharedRoots(u32),

    /// Attach callback produced no object
    #[error("Native attach failed: {0}")]
    AttachFailed(String),

    /// Unit not allowed under the active policy
    #[error("Unsupported unit: {0}")]
    NotSupported(String),

    /// Heap access failed
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),
}

impl DeserializeError {
    /// Layout mismatch
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptLayout(msg.into())
    }
}

/// Result type for deserialization
pub type DeserializeResult<T> = Result<T, DeserializeError>;
