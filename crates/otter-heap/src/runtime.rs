//! Process-wide runtime state
//!
//! One [`Runtime`] is shared by all isolates of a VM instance. It owns the
//! shared heap with its string table, the off-heap storage areas, the
//! native callback registry and the serialization root registry.

use crate::env::{SharedRoot, build_shared_roots};
use crate::error::{HeapError, HeapResult};
use crate::heap::{Arena, HeapConfig, HeapStats};
use crate::isolate::Isolate;
use crate::native::{CallbackRegistry, NativeArea, SharedMemoryManager};
use crate::object::{HeapObject, ObjectType};
use crate::roots::RootRegistry;
use crate::space::SpaceKind;
use crate::value::{ObjectRef, TaggedValue};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// State shared by every isolate of one VM instance
pub struct Runtime {
    config: HeapConfig,
    shared_heap: RwLock<Arena>,
    shared_strings: RwLock<FxHashMap<String, ObjectRef>>,
    shared_roots: Vec<ObjectRef>,
    native: NativeArea,
    shared_memory: SharedMemoryManager,
    callbacks: CallbackRegistry,
    roots: RootRegistry,
}

impl Runtime {
    /// Create a runtime with default configuration
    pub fn new() -> HeapResult<Arc<Self>> {
        Self::with_config(HeapConfig::default())
    }

    /// Create a runtime with custom configuration
    pub fn with_config(config: HeapConfig) -> HeapResult<Arc<Self>> {
        config.validate()?;
        let mut shared_heap = Arena::new(config.clone(), true);
        let shared_roots = build_shared_roots(&mut shared_heap)?;
        debug!(roots = shared_roots.len(), "Runtime created");
        Ok(Arc::new(Self {
            config,
            shared_heap: RwLock::new(shared_heap),
            shared_strings: RwLock::new(FxHashMap::default()),
            shared_roots,
            native: NativeArea::new(),
            shared_memory: SharedMemoryManager::new(),
            callbacks: CallbackRegistry::new(),
            roots: RootRegistry::new(),
        }))
    }

    /// Create a new isolate bound to this runtime
    pub fn new_isolate(self: &Arc<Self>) -> HeapResult<Isolate> {
        Isolate::new(Arc::clone(self))
    }

    /// Heap configuration
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Shared heap arena
    pub fn shared_heap(&self) -> &RwLock<Arena> {
        &self.shared_heap
    }

    /// Shared heap usage
    pub fn shared_heap_stats(&self) -> HeapStats {
        self.shared_heap.read().stats()
    }

    /// Shared intrinsics in environment order
    pub fn shared_roots(&self) -> &[ObjectRef] {
        &self.shared_roots
    }

    /// One shared intrinsic
    pub fn shared_root(&self, root: SharedRoot) -> ObjectRef {
        self.shared_roots[root as usize]
    }

    /// Off-heap buffer storage and binding records
    pub fn native(&self) -> &NativeArea {
        &self.native
    }

    /// Shared array buffer storage
    pub fn shared_memory(&self) -> &SharedMemoryManager {
        &self.shared_memory
    }

    /// Native callbacks
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Serialization root registry
    pub fn root_registry(&self) -> &RootRegistry {
        &self.roots
    }

    /// Look up an interned shared string
    pub fn lookup_shared_string(&self, text: &str) -> Option<ObjectRef> {
        self.shared_strings.read().get(text).copied()
    }

    /// Register `r` as the canonical shared string for `text`.
    ///
    /// Returns the already registered string if another one won.
    pub fn register_shared_string(&self, text: &str, r: ObjectRef) -> ObjectRef {
        *self
            .shared_strings
            .write()
            .entry(text.to_string())
            .or_insert(r)
    }

    /// Intern `text` in the shared heap
    pub fn intern_shared(&self, text: &str) -> HeapResult<ObjectRef> {
        if let Some(r) = self.lookup_shared_string(text) {
            return Ok(r);
        }
        let class = TaggedValue::object(self.shared_root(SharedRoot::SharedStringClass));
        let obj = HeapObject::new(ObjectType::String, class, Vec::new(), text.as_bytes().to_vec());
        let r = self.shared_heap.write().allocate(SpaceKind::SharedOld, obj)?;
        Ok(self.register_shared_string(text, r))
    }

    /// Copy of a shared object
    pub fn shared_object(&self, r: ObjectRef) -> HeapResult<HeapObject> {
        if !r.is_shared() {
            return Err(HeapError::InvalidRef(r));
        }
        self.shared_heap.read().get(r).cloned()
    }
}
