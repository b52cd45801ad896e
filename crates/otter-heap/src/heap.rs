//! Region arenas

use crate::error::{HeapError, HeapResult};
use crate::object::HeapObject;
use crate::space::{Address, CollectorKind, Region, RegionId, SpaceKind, align8};
use crate::value::ObjectRef;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

/// Heap configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Capacity of a regular region (default: 256KB)
    pub region_size: usize,
    /// Objects above this size go to a huge space (default: 32KB)
    pub huge_object_threshold: usize,
    /// Upper bound on committed region bytes per arena (default: 512MB)
    pub max_heap_size: usize,
    /// Collector family
    pub collector: CollectorKind,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            region_size: 256 * 1024,          // 256KB
            huge_object_threshold: 32 * 1024, // 32KB
            max_heap_size: 512 * 1024 * 1024, // 512MB
            collector: CollectorKind::Regional,
        }
    }
}

impl HeapConfig {
    /// Check the sizing invariants region bookkeeping relies on.
    ///
    /// Every non-huge object must fit an empty region, so the threshold
    /// has to stay below the region size.
    pub fn validate(&self) -> HeapResult<()> {
        if self.region_size == 0 || self.region_size % 8 != 0 {
            return Err(HeapError::InvalidConfig(format!(
                "region_size {} must be a non-zero multiple of 8",
                self.region_size
            )));
        }
        if self.huge_object_threshold >= self.region_size {
            return Err(HeapError::InvalidConfig(format!(
                "huge_object_threshold {} must be below region_size {}",
                self.huge_object_threshold, self.region_size
            )));
        }
        Ok(())
    }
}

/// Snapshot of arena usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live object records
    pub objects: usize,
    /// Regions ever created
    pub regions: usize,
    /// Bytes committed to regions
    pub committed: usize,
}

/// Log heap diagnostics and abort the process.
///
/// Used where a half-built object graph can no longer be unwound.
pub fn fatal_oom(context: &str, stats: HeapStats) -> ! {
    error!(
        context,
        objects = stats.objects,
        regions = stats.regions,
        committed = stats.committed,
        "Out of memory, aborting"
    );
    std::process::abort()
}

/// Index-addressed object arena backed by bump-allocated regions
pub struct Arena {
    shared: bool,
    config: HeapConfig,
    objects: Vec<Option<HeapObject>>,
    regions: Vec<Region>,
    current: FxHashMap<SpaceKind, RegionId>,
    committed: usize,
}

impl Arena {
    /// Create an empty arena
    pub fn new(config: HeapConfig, shared: bool) -> Self {
        Self {
            shared,
            config,
            objects: Vec::new(),
            regions: Vec::new(),
            current: FxHashMap::default(),
            committed: 0,
        }
    }

    /// Arena configuration
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Usage counters
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            objects: self.objects.iter().filter(|o| o.is_some()).count(),
            regions: self.regions.len(),
            committed: self.committed,
        }
    }

    /// Region by id
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id as usize)
    }

    /// Number of regions belonging to `space`
    pub fn region_count(&self, space: SpaceKind) -> usize {
        self.regions.iter().filter(|r| r.space == space).count()
    }

    /// Space an allocation request of `size` bytes actually lands in
    pub fn target_space(&self, space: SpaceKind, size: usize) -> SpaceKind {
        if size > self.config.huge_object_threshold || space.is_huge() {
            space.huge_variant()
        } else {
            self.config.collector.region_space(space)
        }
    }

    fn make_ref(&self, index: usize) -> ObjectRef {
        if self.shared {
            ObjectRef::shared(index as u32)
        } else {
            ObjectRef::local(index as u32)
        }
    }

    fn check_ref(&self, r: ObjectRef) -> HeapResult<()> {
        if r.is_shared() != self.shared {
            return Err(HeapError::InvalidRef(r));
        }
        Ok(())
    }

    fn new_region(&mut self, space: SpaceKind, capacity: usize) -> HeapResult<RegionId> {
        let requested = self.committed + capacity;
        if requested > self.config.max_heap_size {
            return Err(HeapError::HeapLimit {
                limit: self.config.max_heap_size,
                requested,
            });
        }
        self.committed = requested;
        self.regions.push(Region::new(space, capacity));
        Ok((self.regions.len() - 1) as RegionId)
    }

    fn bump(&mut self, space: SpaceKind, size: usize) -> HeapResult<Address> {
        if space.is_huge() {
            let region = self.new_region(space, align8(size))?;
            self.regions[region as usize].top = size;
            return Ok(Address { region, offset: 0 });
        }
        if let Some(&region) = self.current.get(&space)
            && let Some(offset) = self.regions[region as usize].bump(size)
        {
            return Ok(Address { region, offset });
        }
        let region = self.new_region(space, self.config.region_size)?;
        self.current.insert(space, region);
        let offset = self.regions[region as usize]
            .bump(size)
            .ok_or(HeapError::BadPlacement {
                region,
                offset: 0,
                size,
            })?;
        Ok(Address { region, offset })
    }

    /// Bump-allocate `obj` in `space`
    pub fn allocate(&mut self, space: SpaceKind, mut obj: HeapObject) -> HeapResult<ObjectRef> {
        let space = self.target_space(space, obj.size());
        obj.address = self.bump(space, obj.size())?;
        self.objects.push(Some(obj));
        Ok(self.make_ref(self.objects.len() - 1))
    }

    /// Reserve `count` fresh regions for `space` ahead of placement
    pub fn reserve_regions(&mut self, space: SpaceKind, count: usize) -> HeapResult<Vec<RegionId>> {
        let space = self.config.collector.region_space(space);
        let capacity = self.config.region_size;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.new_region(space, capacity)?);
        }
        trace!(?space, count, "Reserved regions");
        Ok(ids)
    }

    /// Place `obj` at the bump pointer of a reserved region
    pub fn place(&mut self, mut obj: HeapObject, address: Address) -> HeapResult<ObjectRef> {
        let size = obj.size();
        let region = self
            .regions
            .get_mut(address.region as usize)
            .ok_or(HeapError::BadPlacement {
                region: address.region,
                offset: address.offset,
                size,
            })?;
        if region.top != address.offset as usize || region.bump(size).is_none() {
            return Err(HeapError::BadPlacement {
                region: address.region,
                offset: address.offset,
                size,
            });
        }
        obj.address = address;
        self.objects.push(Some(obj));
        Ok(self.make_ref(self.objects.len() - 1))
    }

    /// Allocate `obj` in a region of its own
    pub fn allocate_huge(&mut self, space: SpaceKind, obj: HeapObject) -> HeapResult<ObjectRef> {
        self.allocate(space.huge_variant(), obj)
    }

    /// Borrow an object
    pub fn get(&self, r: ObjectRef) -> HeapResult<&HeapObject> {
        self.check_ref(r)?;
        self.objects
            .get(r.index())
            .and_then(Option::as_ref)
            .ok_or(HeapError::InvalidRef(r))
    }

    /// Mutate an object; growth relocates it, keeping the reference stable
    pub fn update<R>(&mut self, r: ObjectRef, f: impl FnOnce(&mut HeapObject) -> R) -> HeapResult<R> {
        self.check_ref(r)?;
        let obj = self
            .objects
            .get_mut(r.index())
            .and_then(Option::as_mut)
            .ok_or(HeapError::InvalidRef(r))?;
        let before = obj.size();
        let result = f(obj);
        let after = obj.size();
        if after > before {
            self.relocate(r, after)?;
        }
        Ok(result)
    }

    fn relocate(&mut self, r: ObjectRef, size: usize) -> HeapResult<()> {
        let region = self.get(r)?.address.region;
        let space = self.regions[region as usize].space;
        let space = if space.is_huge() {
            space
        } else {
            self.target_space(space, size)
        };
        let address = self.bump(space, size)?;
        if let Some(Some(obj)) = self.objects.get_mut(r.index()) {
            obj.address = address;
        }
        Ok(())
    }

    /// Space an object currently occupies
    pub fn space_of(&self, r: ObjectRef) -> HeapResult<SpaceKind> {
        let region = self.get(r)?.address.region;
        Ok(self.regions[region as usize].space)
    }

    /// Number of object slots ever handed out
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no object was ever allocated
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;
    use crate::value::TaggedValue;

    fn string_object(len: usize) -> HeapObject {
        HeapObject::new(ObjectType::String, TaggedValue::UNDEFINED, Vec::new(), vec![b'x'; len])
    }

    fn small_config() -> HeapConfig {
        HeapConfig {
            region_size: 64,
            huge_object_threshold: 48,
            max_heap_size: 1024,
            collector: CollectorKind::Regional,
        }
    }

    #[test]
    fn test_allocate_crosses_regions() {
        let mut arena = Arena::new(small_config(), false);
        // 8 header + 8 class + 24 raw = 40 bytes
        let a = arena.allocate(SpaceKind::Old, string_object(24)).unwrap();
        let b = arena.allocate(SpaceKind::Old, string_object(24)).unwrap();
        assert_eq!(arena.get(a).unwrap().address.region, 0);
        assert_eq!(arena.get(b).unwrap().address.region, 1);
        assert_eq!(arena.region(0).unwrap().remaining(), 24);
    }

    #[test]
    fn test_huge_allocation() {
        let mut arena = Arena::new(small_config(), false);
        let r = arena.allocate(SpaceKind::Old, string_object(100)).unwrap();
        assert_eq!(arena.space_of(r).unwrap(), SpaceKind::Huge);
        assert_eq!(arena.region_count(SpaceKind::Huge), 1);
    }

    #[test]
    fn test_heap_limit() {
        let mut arena = Arena::new(small_config(), false);
        let err = arena.reserve_regions(SpaceKind::Old, 17).unwrap_err();
        assert!(matches!(err, HeapError::HeapLimit { limit: 1024, .. }));
    }

    #[test]
    fn test_place_requires_bump_order() {
        let mut arena = Arena::new(small_config(), true);
        let regions = arena.reserve_regions(SpaceKind::SharedOld, 1).unwrap();
        let first = Address {
            region: regions[0],
            offset: 0,
        };
        let r = arena.place(string_object(8), first).unwrap();
        assert!(r.is_shared());
        assert!(arena.place(string_object(8), first).is_err());
        let next = Address {
            region: regions[0],
            offset: 24,
        };
        assert!(arena.place(string_object(8), next).is_ok());
    }

    #[test]
    fn test_update_relocates_on_growth() {
        let mut arena = Arena::new(small_config(), false);
        let r = arena.allocate(SpaceKind::Old, string_object(24)).unwrap();
        let before = arena.get(r).unwrap().address;
        arena
            .update(r, |obj| obj.fields.push(crate::object::Field::Raw(1)))
            .unwrap();
        assert_ne!(arena.get(r).unwrap().address, before);
        assert!(arena.get(ObjectRef::shared(0)).is_err());
    }
}
