//! Serialization roots
//!
//! Shared objects that a serializer hands across threads are kept alive
//! through a [`SerializationChunk`] parked in the [`RootRegistry`] until
//! the matching deserializer (or the data's destructor) removes it.

use crate::value::TaggedValue;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::trace;

/// Initial chunk capacity in bytes
const CHUNK_BASELINE_BYTES: usize = 1024;

/// Append-only array of raw tagged references
#[derive(Debug, Clone)]
pub struct SerializationChunk {
    slots: Vec<TaggedValue>,
}

impl SerializationChunk {
    /// Create an empty chunk; storage is allocated on first use
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Append a reference and return its index
    pub fn emplace(&mut self, value: TaggedValue) -> u32 {
        if self.slots.len() == self.slots.capacity() {
            let grow = if self.slots.capacity() == 0 {
                CHUNK_BASELINE_BYTES / std::mem::size_of::<TaggedValue>()
            } else {
                self.slots.capacity()
            };
            self.slots.reserve_exact(grow);
        }
        self.slots.push(value);
        (self.slots.len() - 1) as u32
    }

    /// Reference at `index`
    pub fn get(&self, index: u32) -> Option<TaggedValue> {
        self.slots.get(index as usize).copied()
    }

    /// Number of stored references
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing was stored
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot capacity
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Visit every slot as a root
    pub fn iterate(&self, mut visitor: impl FnMut(&TaggedValue)) {
        self.slots.iter().for_each(|slot| visitor(slot));
    }
}

impl Default for SerializationChunk {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide table of parked chunks
pub struct RootRegistry {
    chunks: DashMap<u32, Arc<SerializationChunk>>,
    next_index: AtomicU32,
}

impl RootRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            chunks: DashMap::new(),
            next_index: AtomicU32::new(0),
        }
    }

    /// Park a chunk and return its data index
    pub fn push_root(&self, chunk: SerializationChunk) -> u32 {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        trace!(index, slots = chunk.len(), "Pushed serialization root");
        self.chunks.insert(index, Arc::new(chunk));
        index
    }

    /// Remove a parked chunk; returns whether it was present
    pub fn remove_root(&self, index: u32) -> bool {
        let removed = self.chunks.remove(&index).is_some();
        trace!(index, removed, "Removed serialization root");
        removed
    }

    /// Parked chunk by index
    pub fn get(&self, index: u32) -> Option<Arc<SerializationChunk>> {
        self.chunks.get(&index).map(|c| c.clone())
    }

    /// Number of parked chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunk is parked
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Visit every slot of every parked chunk
    pub fn iterate(&self, mut visitor: impl FnMut(&TaggedValue)) {
        for chunk in self.chunks.iter() {
            chunk.iterate(&mut visitor);
        }
    }
}

impl Default for RootRegistry {
    fn default() -> Self {
        Self::new()
    }
}
