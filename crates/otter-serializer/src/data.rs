//! Serialized data buffer
//!
//! [`SerializeData`] owns the byte stream plus the bookkeeping a
//! deserializer needs before it reads a single byte: per-space byte
//! totals and, per region pool, the unused tail left in each region the
//! serializer filled. Reads take an explicit cursor so several readers
//! can walk the same buffer.

use crate::config::SerializeConfig;
use crate::encode::{EncodeFlag, SerializedObjectSpace};
use crate::error::{DeserializeError, DeserializeResult, SerializeError, SerializeResult};
use otter_heap::{CollectorKind, Runtime, SpaceKind, StorageId, TaggedValue, fatal_oom};
use std::sync::Arc;
use tracing::trace;

/// Number of entries in a size group
pub const SIZE_GROUP_LEN: usize = 10;

/// Number of region pools tracked
pub const POOL_COUNT: usize = 5;

/// Region pool indices
pub mod pool {
    /// Old space (regular pool under a compacting collector)
    pub const OLD: usize = 0;
    /// Non-movable space (pinned pool under a compacting collector)
    pub const NON_MOVABLE: usize = 1;
    /// Machine code space (regional collector only)
    pub const MACHINE_CODE: usize = 2;
    /// Shared old space
    pub const SHARED_OLD: usize = 3;
    /// Shared non-movable space
    pub const SHARED_NON_MOVABLE: usize = 4;
}

/// Pool an object space allocates from; huge spaces have none
pub fn pool_for(space: SerializedObjectSpace, collector: CollectorKind) -> Option<usize> {
    match space {
        SerializedObjectSpace::Old => Some(pool::OLD),
        SerializedObjectSpace::NonMovable => Some(pool::NON_MOVABLE),
        SerializedObjectSpace::MachineCode => match collector {
            CollectorKind::Regional => Some(pool::MACHINE_CODE),
            CollectorKind::Compacting => Some(pool::OLD),
        },
        SerializedObjectSpace::SharedOld => Some(pool::SHARED_OLD),
        SerializedObjectSpace::SharedNonMovable => Some(pool::SHARED_NON_MOVABLE),
        SerializedObjectSpace::Huge | SerializedObjectSpace::SharedHuge => None,
    }
}

/// Heap space whose regions back a pool
pub fn pool_space(pool_index: usize) -> SpaceKind {
    match pool_index {
        pool::OLD => SpaceKind::Old,
        pool::NON_MOVABLE => SpaceKind::NonMovable,
        pool::MACHINE_CODE => SpaceKind::MachineCode,
        pool::SHARED_OLD => SpaceKind::SharedOld,
        _ => SpaceKind::SharedNonMovable,
    }
}

/// Pools a collector family persists, in file order
pub fn persisted_pools(collector: CollectorKind) -> &'static [usize] {
    match collector {
        CollectorKind::Regional => &[
            pool::OLD,
            pool::NON_MOVABLE,
            pool::MACHINE_CODE,
            pool::SHARED_OLD,
            pool::SHARED_NON_MOVABLE,
        ],
        CollectorKind::Compacting => &[
            pool::OLD,
            pool::NON_MOVABLE,
            pool::SHARED_OLD,
            pool::SHARED_NON_MOVABLE,
        ],
    }
}

/// Owned serialized stream and its allocation plan
pub struct SerializeData {
    runtime: Arc<Runtime>,
    buffer: Vec<u8>,
    initial_capacity: usize,
    size_limit: usize,
    incomplete: bool,
    space_sizes: [u64; SerializedObjectSpace::COUNT],
    remain: [Vec<u64>; POOL_COUNT],
    pool_used: [u64; POOL_COUNT],
    data_index: Option<u32>,
    transferred: Vec<StorageId>,
    shared_refs: Vec<StorageId>,
}

impl SerializeData {
    /// Create an empty data object
    pub fn new(runtime: Arc<Runtime>, config: &SerializeConfig) -> Self {
        Self {
            runtime,
            buffer: Vec::new(),
            initial_capacity: config.initial_capacity.max(64),
            size_limit: config.size_limit,
            incomplete: false,
            space_sizes: [0; SerializedObjectSpace::COUNT],
            remain: Default::default(),
            pool_used: [0; POOL_COUNT],
            data_index: None,
            transferred: Vec::new(),
            shared_refs: Vec::new(),
        }
    }

    /// Rebuild a data object from persisted parts
    pub fn from_parts(
        runtime: Arc<Runtime>,
        buffer: Vec<u8>,
        size_group: [u64; SIZE_GROUP_LEN],
        remain: [Vec<u64>; POOL_COUNT],
        size_limit: usize,
        data_index: Option<u32>,
    ) -> Self {
        let mut space_sizes = [0; SerializedObjectSpace::COUNT];
        space_sizes.copy_from_slice(&size_group[2..2 + SerializedObjectSpace::COUNT]);
        Self {
            runtime,
            initial_capacity: buffer.len(),
            buffer,
            size_limit,
            incomplete: size_group[SIZE_GROUP_LEN - 1] != 0,
            space_sizes,
            remain,
            pool_used: [0; POOL_COUNT],
            data_index,
            transferred: Vec::new(),
            shared_refs: Vec::new(),
        }
    }

    /// Runtime the data belongs to
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Serialized bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes written
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Configured size limit
    pub fn size_limit(&self) -> usize {
        self.size_limit
    }

    /// Whether the serializer gave up part-way
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// Mark the data (in)complete
    pub fn set_incomplete(&mut self, incomplete: bool) {
        self.incomplete = incomplete;
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    fn reserve(&mut self, additional: usize) -> SerializeResult<()> {
        let requested = self.buffer.len() + additional;
        if requested > self.size_limit {
            return Err(SerializeError::SizeLimitExceeded {
                limit: self.size_limit,
                requested,
            });
        }
        if requested <= self.buffer.capacity() {
            return Ok(());
        }
        let target = (self.buffer.capacity() * 2)
            .max(self.initial_capacity)
            .max(requested)
            .min(self.size_limit);
        if self
            .buffer
            .try_reserve_exact(target - self.buffer.len())
            .is_err()
        {
            fatal_oom("serialize buffer growth", self.runtime.shared_heap_stats());
        }
        trace!(capacity = self.buffer.capacity(), "Grew serialize buffer");
        Ok(())
    }

    /// Append raw bytes
    pub fn write_raw(&mut self, bytes: &[u8]) -> SerializeResult<()> {
        self.reserve(bytes.len())?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Append one byte
    pub fn write_u8(&mut self, value: u8) -> SerializeResult<()> {
        self.write_raw(&[value])
    }

    /// Append a little-endian u32
    pub fn write_u32(&mut self, value: u32) -> SerializeResult<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Append a little-endian u64
    pub fn write_u64(&mut self, value: u64) -> SerializeResult<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Append a tagged word
    pub fn write_tagged(&mut self, value: TaggedValue) -> SerializeResult<()> {
        self.write_u64(value.raw())
    }

    /// Append a tag
    pub fn write_flag(&mut self, flag: EncodeFlag) -> SerializeResult<()> {
        self.write_u8(flag.to_u8())
    }

    /// Reserve an 8-byte slot to patch later; returns its offset
    pub fn placeholder_u64(&mut self) -> SerializeResult<usize> {
        let offset = self.buffer.len();
        self.write_u64(0)?;
        Ok(offset)
    }

    /// Overwrite a previously reserved 8-byte slot
    pub fn patch_u64(&mut self, offset: usize, value: u64) {
        if let Some(slot) = self.buffer.get_mut(offset..offset + 8) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Read `len` bytes at `pos`, advancing it
    pub fn read_raw(&self, len: usize, pos: &mut usize) -> DeserializeResult<&[u8]> {
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(DeserializeError::UnexpectedEnd(*pos))?;
        let bytes = &self.buffer[*pos..end];
        *pos = end;
        Ok(bytes)
    }

    /// Read one byte
    pub fn read_u8(&self, pos: &mut usize) -> DeserializeResult<u8> {
        Ok(self.read_raw(1, pos)?[0])
    }

    /// Read a little-endian u32
    pub fn read_u32(&self, pos: &mut usize) -> DeserializeResult<u32> {
        let bytes = self.read_raw(4, pos)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian u64
    pub fn read_u64(&self, pos: &mut usize) -> DeserializeResult<u64> {
        let bytes = self.read_raw(8, pos)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(word))
    }

    /// Read a tagged word
    pub fn read_tagged(&self, pos: &mut usize) -> DeserializeResult<TaggedValue> {
        Ok(TaggedValue::from_raw(self.read_u64(pos)?))
    }

    /// Read a tag
    pub fn read_flag(&self, pos: &mut usize) -> DeserializeResult<EncodeFlag> {
        let offset = *pos;
        let byte = self.read_u8(pos)?;
        EncodeFlag::from_u8(byte).ok_or(DeserializeError::InvalidFlag { flag: byte, offset })
    }

    // ------------------------------------------------------------------
    // Allocation plan
    // ------------------------------------------------------------------

    /// Account a newly emitted object of `size` bytes bound for `space`.
    ///
    /// Objects never straddle a region, so when one does not fit the
    /// unused tail of the current region is recorded and a fresh region
    /// is started.
    pub fn calculate_serialized_object_size(&mut self, space: SerializedObjectSpace, size: usize) {
        let size = size as u64;
        self.space_sizes[space as usize] += size;
        let config = self.runtime.config();
        let Some(pool_index) = pool_for(space, config.collector) else {
            return;
        };
        let region_size = config.region_size as u64;
        let used = self.pool_used[pool_index];
        if used + size > region_size {
            self.remain[pool_index].push(region_size - used);
            self.pool_used[pool_index] = size;
        } else {
            self.pool_used[pool_index] = used + size;
        }
    }

    /// Bytes recorded for `space`
    pub fn space_size(&self, space: SerializedObjectSpace) -> u64 {
        self.space_sizes[space as usize]
    }

    /// Unused region tails recorded for a pool
    pub fn remain_sizes(&self, pool_index: usize) -> &[u64] {
        &self.remain[pool_index]
    }

    /// Bytes recorded for all spaces served by a pool
    pub fn pool_size(&self, pool_index: usize) -> u64 {
        let collector = self.runtime.config().collector;
        SerializedObjectSpace::ALL
            .iter()
            .filter(|space| pool_for(**space, collector) == Some(pool_index))
            .map(|space| self.space_sizes[*space as usize])
            .sum()
    }

    /// Buffer size, capacity, per-space sizes and the incomplete flag
    pub fn size_group(&self) -> [u64; SIZE_GROUP_LEN] {
        let mut group = [0u64; SIZE_GROUP_LEN];
        group[0] = self.buffer.len() as u64;
        group[1] = self.buffer.capacity() as u64;
        group[2..2 + SerializedObjectSpace::COUNT].copy_from_slice(&self.space_sizes);
        group[SIZE_GROUP_LEN - 1] = self.incomplete as u64;
        group
    }

    // ------------------------------------------------------------------
    // Cross-thread resources
    // ------------------------------------------------------------------

    /// Registry index of the shared-object chunk
    pub fn data_index(&self) -> Option<u32> {
        self.data_index
    }

    pub(crate) fn set_data_index(&mut self, index: u32) {
        if let Some(previous) = self.data_index.replace(index) {
            self.runtime.root_registry().remove_root(previous);
        }
    }

    /// Release the shared-object chunk after consumption
    pub fn release_data_index(&mut self) {
        if let Some(index) = self.data_index.take() {
            self.runtime.root_registry().remove_root(index);
        }
    }

    pub(crate) fn add_transferred(&mut self, storage: StorageId) {
        self.transferred.push(storage);
    }

    /// Storage ids handed over by transfer
    pub fn transferred(&self) -> &[StorageId] {
        &self.transferred
    }

    pub(crate) fn add_shared_ref(&mut self, storage: StorageId) {
        self.shared_refs.push(storage);
    }
}

impl Drop for SerializeData {
    fn drop(&mut self) {
        self.release_data_index();
        let native = self.runtime.native();
        for storage in self.transferred.drain(..) {
            if native.release_in_flight(storage) {
                trace!(storage, "Freed unadopted transfer");
            }
        }
        let shared_memory = self.runtime.shared_memory();
        for storage in self.shared_refs.drain(..) {
            shared_memory.release(storage);
        }
    }
}

impl std::fmt::Debug for SerializeData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializeData")
            .field("len", &self.buffer.len())
            .field("incomplete", &self.incomplete)
            .field("space_sizes", &self.space_sizes)
            .field("data_index", &self.data_index)
            .finish()
    }
}
