//! Allocation spaces and regions
//!
//! Every object lives inside a fixed-capacity region that belongs to one
//! space. Objects are bump-allocated and never straddle two regions.

use serde::{Deserialize, Serialize};

/// Heap space an object is allocated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceKind {
    /// Nursery for freshly allocated local objects
    Young,
    /// Tenured local objects
    Old,
    /// Local objects that are never moved (hidden classes, intrinsics)
    NonMovable,
    /// Compiled code
    MachineCode,
    /// Objects above the huge threshold, one per region
    Huge,
    /// Immutable engine constants
    ReadOnly,
    /// Shared heap, movable
    SharedOld,
    /// Shared heap, pinned
    SharedNonMovable,
    /// Shared heap, huge objects
    SharedHuge,
}

impl SpaceKind {
    /// Whether the space belongs to the shared heap
    pub const fn is_shared(self) -> bool {
        matches!(
            self,
            SpaceKind::SharedOld | SpaceKind::SharedNonMovable | SpaceKind::SharedHuge
        )
    }

    /// Whether each object gets a region of its own
    pub const fn is_huge(self) -> bool {
        matches!(self, SpaceKind::Huge | SpaceKind::SharedHuge)
    }

    /// Huge space of the same heap
    pub const fn huge_variant(self) -> SpaceKind {
        if self.is_shared() {
            SpaceKind::SharedHuge
        } else {
            SpaceKind::Huge
        }
    }
}

/// Collector family of the running heap
///
/// The family decides which spaces share a region pool, which in turn
/// decides how serialized region bookkeeping is grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorKind {
    /// One region pool per space
    #[default]
    Regional,
    /// A regular pool (old + machine code) and a pinned pool
    Compacting,
}

impl CollectorKind {
    /// Space whose regions actually back allocations requested for `space`
    pub const fn region_space(self, space: SpaceKind) -> SpaceKind {
        match (self, space) {
            (CollectorKind::Compacting, SpaceKind::MachineCode) => SpaceKind::Old,
            (_, space) => space,
        }
    }
}

/// Index of a region inside an arena
pub type RegionId = u32;

/// Location of an object: region plus byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    /// Owning region
    pub region: RegionId,
    /// Byte offset from the region start
    pub offset: u32,
}

/// A bump-allocated chunk of a space
#[derive(Debug, Clone)]
pub struct Region {
    /// Space the region belongs to
    pub space: SpaceKind,
    /// Capacity in bytes
    pub capacity: usize,
    /// Bump pointer
    pub top: usize,
}

impl Region {
    /// Create an empty region
    pub fn new(space: SpaceKind, capacity: usize) -> Self {
        Self {
            space,
            capacity,
            top: 0,
        }
    }

    /// Bytes left at the tail of the region
    pub fn remaining(&self) -> usize {
        self.capacity - self.top
    }

    /// Bump-allocate `size` bytes, `None` if they do not fit
    pub fn bump(&mut self, size: usize) -> Option<u32> {
        if size > self.remaining() {
            return None;
        }
        let offset = self.top;
        self.top += size;
        Some(offset as u32)
    }
}

/// Round up to 8-byte alignment
pub const fn align8(size: usize) -> usize {
    (size + 7) & !7
}
