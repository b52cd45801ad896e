//! # Otter Heap
//!
//! Region-based heap object model consumed by the Otter serializer.
//!
//! ## Design
//!
//! - **Arena**: objects are records addressed by [`ObjectRef`] indices,
//!   bump-allocated into fixed-size regions per [`SpaceKind`]
//! - **Shared heap**: one per [`Runtime`], holds cross-isolate objects and
//!   the shared string table
//! - **Snapshot environment**: intrinsics indexed in creation order so
//!   serialized data can refer to them by position
//! - **Thread state**: managed/native flag with RAII scopes around foreign
//!   callbacks

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod barrier;
pub mod env;
pub mod error;
pub mod factory;
pub mod heap;
pub mod isolate;
pub mod native;
pub mod object;
pub mod roots;
pub mod runtime;
pub mod space;
pub mod thread;
pub mod value;

pub use env::{LocalRoot, SharedRoot, SnapshotEnv};
pub use error::{HeapError, HeapResult};
pub use factory::{ErrorKind, ModuleInfo, ModuleKind, ModuleStatus};
pub use heap::{Arena, HeapConfig, HeapStats, fatal_oom};
pub use isolate::Isolate;
pub use native::{
    AttachArgs, AttachFn, CallbackId, CallbackRegistry, DetachArgs, DetachFn, NativeArea,
    NativeBindingInfo, SharedMemoryManager, StorageId,
};
pub use object::{Field, HeapObject, ObjectType, SpecialField};
pub use roots::{RootRegistry, SerializationChunk};
pub use runtime::Runtime;
pub use space::{Address, CollectorKind, RegionId, SpaceKind};
pub use thread::{ManagedScope, NativeScope, ThreadState};
pub use value::{ObjectRef, TaggedValue};
