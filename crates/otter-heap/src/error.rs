//! Heap error types

use crate::object::ObjectType;
use crate::value::ObjectRef;
use thiserror::Error;

/// Errors raised by heap accessors and factories
#[derive(Debug, Error)]
pub enum HeapError {
    /// Reference does not name a live object
    #[error("Invalid object reference: {0:?}")]
    InvalidRef(ObjectRef),

    /// Object is not of the expected kind
    #[error("Type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// Kind the caller asked for
        expected: ObjectType,
        /// Kind that was found
        found: ObjectType,
    },

    /// Field index out of bounds
    #[error("Field {index} out of bounds for {ty:?} with {len} fields")]
    FieldOutOfBounds {
        /// Object kind
        ty: ObjectType,
        /// Requested slot
        index: usize,
        /// Slot count
        len: usize,
    },

    /// A shared object may not point into an isolate-local heap
    #[error("Shared object {0:?} cannot reference local object {1:?}")]
    SharedToLocal(ObjectRef, ObjectRef),

    /// Heap access outside the managed thread state
    #[error("Heap access requires managed thread state")]
    NotManaged,

    /// Native storage id is unknown or already freed
    #[error("Unknown native storage: {0}")]
    UnknownStorage(u64),

    /// Transferred storage was already adopted
    #[error("Storage {0} is not in flight")]
    StorageNotInFlight(u64),

    /// Native callback id is not registered
    #[error("Unknown native callback: {0}")]
    UnknownCallback(u64),

    /// Region reservation exceeded the heap limit
    #[error("Heap limit exceeded: {requested} bytes requested, {limit} bytes allowed")]
    HeapLimit {
        /// Configured maximum
        limit: usize,
        /// Total that would have been committed
        requested: usize,
    },

    /// Heap configuration violates a sizing invariant
    #[error("Invalid heap config: {0}")]
    InvalidConfig(String),

    /// Object does not fit a region at the requested address
    #[error("Object of {size} bytes does not fit region {region} at offset {offset}")]
    BadPlacement {
        /// Region id
        region: u32,
        /// Offset inside the region
        offset: u32,
        /// Object size
        size: usize,
    },
}

/// Result type for heap operations
pub type HeapResult<T> = Result<T, HeapError>;
