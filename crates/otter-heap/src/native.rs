//! Off-heap storage and native callbacks
//!
//! Array buffer backing stores, compiled regexp bytecode and native
//! binding records live outside the object arenas and are addressed by
//! 64-bit ids that heap objects keep in raw fields.

use crate::error::{HeapError, HeapResult};
use crate::isolate::Isolate;
use crate::value::TaggedValue;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Id of an off-heap backing store
pub type StorageId = u64;

/// Id of a registered native callback; 0 means "none"
pub type CallbackId = u64;

/// Id of a native binding record
pub type BindingId = u64;

struct NativeBuffer {
    bytes: Vec<u8>,
    /// Allocated through the engine allocator, so safe to byte-copy
    engine_allocated: bool,
    /// Detached from its sender, not yet adopted by a receiver
    in_flight: bool,
}

/// Process-wide store for buffer contents and binding records
pub struct NativeArea {
    buffers: DashMap<StorageId, NativeBuffer>,
    bindings: DashMap<BindingId, NativeBindingInfo>,
    next_id: AtomicU64,
}

impl NativeArea {
    /// Create an empty area
    pub fn new() -> Self {
        Self {
            buffers: DashMap::new(),
            bindings: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, bytes: Vec<u8>, engine_allocated: bool) -> StorageId {
        let id = self.next_id();
        self.buffers.insert(
            id,
            NativeBuffer {
                bytes,
                engine_allocated,
                in_flight: false,
            },
        );
        id
    }

    /// Store bytes allocated through the engine allocator
    pub fn allocate(&self, bytes: Vec<u8>) -> StorageId {
        self.insert(bytes, true)
    }

    /// Store bytes owned by an embedder allocator
    pub fn allocate_external(&self, bytes: Vec<u8>) -> StorageId {
        self.insert(bytes, false)
    }

    /// Copy of a store's contents
    pub fn read(&self, id: StorageId) -> HeapResult<Vec<u8>> {
        self.buffers
            .get(&id)
            .map(|b| b.bytes.clone())
            .ok_or(HeapError::UnknownStorage(id))
    }

    /// Overwrite bytes starting at `offset`
    pub fn write(&self, id: StorageId, offset: usize, bytes: &[u8]) -> HeapResult<()> {
        let mut buffer = self
            .buffers
            .get_mut(&id)
            .ok_or(HeapError::UnknownStorage(id))?;
        let end = (offset + bytes.len()).min(buffer.bytes.len());
        if offset < end {
            buffer.bytes[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
        Ok(())
    }

    /// Whether the store came from the engine allocator
    pub fn is_engine_allocated(&self, id: StorageId) -> HeapResult<bool> {
        self.buffers
            .get(&id)
            .map(|b| b.engine_allocated)
            .ok_or(HeapError::UnknownStorage(id))
    }

    /// Whether the id names a live store
    pub fn contains(&self, id: StorageId) -> bool {
        self.buffers.contains_key(&id)
    }

    /// Hand a store over to a receiver that has not adopted it yet
    pub fn mark_in_flight(&self, id: StorageId) -> HeapResult<()> {
        let mut buffer = self
            .buffers
            .get_mut(&id)
            .ok_or(HeapError::UnknownStorage(id))?;
        buffer.in_flight = true;
        Ok(())
    }

    /// Take ownership of an in-flight store; succeeds once per transfer
    pub fn adopt(&self, id: StorageId) -> HeapResult<()> {
        let mut buffer = self
            .buffers
            .get_mut(&id)
            .ok_or(HeapError::UnknownStorage(id))?;
        if !buffer.in_flight {
            return Err(HeapError::StorageNotInFlight(id));
        }
        buffer.in_flight = false;
        Ok(())
    }

    /// Free a store that was never adopted; returns whether it was freed
    pub fn release_in_flight(&self, id: StorageId) -> bool {
        self.buffers.remove_if(&id, |_, b| b.in_flight).is_some()
    }

    /// Number of live stores
    pub fn storage_count(&self) -> usize {
        self.buffers.len()
    }

    /// Register a native binding record
    pub fn register_binding(&self, info: NativeBindingInfo) -> BindingId {
        let id = self.next_id();
        self.bindings.insert(id, info);
        id
    }

    /// Look up a native binding record
    pub fn binding(&self, id: BindingId) -> Option<NativeBindingInfo> {
        self.bindings.get(&id).map(|b| *b)
    }
}

impl Default for NativeArea {
    fn default() -> Self {
        Self::new()
    }
}

struct SharedMemory {
    bytes: Arc<Mutex<Vec<u8>>>,
    refs: usize,
}

/// Reference-counted backing stores of shared array buffers
pub struct SharedMemoryManager {
    memories: DashMap<StorageId, SharedMemory>,
    next_id: AtomicU64,
}

impl SharedMemoryManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self {
            memories: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a store with one reference
    pub fn create(&self, bytes: Vec<u8>) -> StorageId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.memories.insert(
            id,
            SharedMemory {
                bytes: Arc::new(Mutex::new(bytes)),
                refs: 1,
            },
        );
        id
    }

    /// Add a reference
    pub fn retain(&self, id: StorageId) -> HeapResult<()> {
        let mut memory = self
            .memories
            .get_mut(&id)
            .ok_or(HeapError::UnknownStorage(id))?;
        memory.refs += 1;
        Ok(())
    }

    /// Drop a reference, freeing the store at zero
    pub fn release(&self, id: StorageId) {
        self.memories.remove_if_mut(&id, |_, memory| {
            memory.refs = memory.refs.saturating_sub(1);
            memory.refs == 0
        });
    }

    /// Current reference count (0 when freed)
    pub fn ref_count(&self, id: StorageId) -> usize {
        self.memories.get(&id).map(|m| m.refs).unwrap_or(0)
    }

    /// Shared handle to the bytes
    pub fn memory(&self, id: StorageId) -> HeapResult<Arc<Mutex<Vec<u8>>>> {
        self.memories
            .get(&id)
            .map(|m| m.bytes.clone())
            .ok_or(HeapError::UnknownStorage(id))
    }
}

impl Default for SharedMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments handed to an attach callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachArgs {
    /// Value produced by the matching detach callback
    pub detached: u64,
    /// Opaque embedder data
    pub attach_data: u64,
    /// Opaque embedder hint
    pub hint: u64,
}

/// Arguments handed to a detach callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachArgs {
    /// Native object wrapped by the binding
    pub native: u64,
    /// Opaque embedder data
    pub attach_data: u64,
    /// Opaque embedder hint
    pub hint: u64,
}

/// Recreates a bound object on the receiving side
pub type AttachFn = Arc<dyn Fn(&mut Isolate, &AttachArgs) -> Option<TaggedValue> + Send + Sync>;

/// Releases a bound object on the sending side
pub type DetachFn = Arc<dyn Fn(&DetachArgs) -> u64 + Send + Sync>;

#[derive(Clone)]
enum NativeCallback {
    Attach(AttachFn),
    Detach(DetachFn),
}

/// Registry of embedder callbacks addressed by id
pub struct CallbackRegistry {
    callbacks: RwLock<FxHashMap<CallbackId, NativeCallback>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, callback: NativeCallback) -> CallbackId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.write().insert(id, callback);
        id
    }

    /// Register an attach callback
    pub fn register_attach(
        &self,
        f: impl Fn(&mut Isolate, &AttachArgs) -> Option<TaggedValue> + Send + Sync + 'static,
    ) -> CallbackId {
        self.register(NativeCallback::Attach(Arc::new(f)))
    }

    /// Register a detach callback
    pub fn register_detach(&self, f: impl Fn(&DetachArgs) -> u64 + Send + Sync + 'static) -> CallbackId {
        self.register(NativeCallback::Detach(Arc::new(f)))
    }

    /// Resolve an attach callback
    pub fn attach(&self, id: CallbackId) -> HeapResult<AttachFn> {
        match self.callbacks.read().get(&id) {
            Some(NativeCallback::Attach(f)) => Ok(f.clone()),
            _ => Err(HeapError::UnknownCallback(id)),
        }
    }

    /// Resolve a detach callback
    pub fn detach(&self, id: CallbackId) -> HeapResult<DetachFn> {
        match self.callbacks.read().get(&id) {
            Some(NativeCallback::Detach(f)) => Ok(f.clone()),
            _ => Err(HeapError::UnknownCallback(id)),
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Native binding record of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeBindingInfo {
    /// Attach callback
    pub attach: Option<CallbackId>,
    /// Detach callback
    pub detach: Option<CallbackId>,
    /// Wrapped native object
    pub native: u64,
    /// Opaque embedder data
    pub attach_data: u64,
    /// Opaque embedder hint
    pub hint: u64,
    /// Object is a cross-VM reference
    pub xref: bool,
}
