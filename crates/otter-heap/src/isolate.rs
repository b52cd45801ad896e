//! Isolate: one thread's view of the heap
//!
//! # Send but not Sync
//!
//! `Isolate` owns its local arena and is driven by one thread at a time.
//! It can be moved to another thread but never shared; cross-isolate
//! state goes through the [`Runtime`].

use crate::barrier::{BarrierAction, RememberedSet, check_store};
use crate::env::{LocalRoot, SharedRoot, SnapshotEnv, build_local_roots};
use crate::error::{HeapError, HeapResult};
use crate::heap::{Arena, HeapStats};
use crate::object::{Field, HeapObject, ObjectType};
use crate::runtime::Runtime;
use crate::space::{Address, RegionId, SpaceKind};
use crate::thread::{ManagedScope, NativeScope, ThreadState, ThreadStateFlag};
use crate::value::{ObjectRef, TaggedValue};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Per-thread heap context
pub struct Isolate {
    runtime: Arc<Runtime>,
    heap: Arena,
    remembered: RememberedSet,
    local_roots: Vec<ObjectRef>,
    env: SnapshotEnv,
    strings: FxHashMap<String, ObjectRef>,
    thread: Arc<ThreadStateFlag>,
}

impl Isolate {
    pub(crate) fn new(runtime: Arc<Runtime>) -> HeapResult<Self> {
        let mut heap = Arena::new(runtime.config().clone(), false);
        let local_roots = build_local_roots(&mut heap)?;
        let env = SnapshotEnv::new(&local_roots, runtime.shared_roots());
        Ok(Self {
            runtime,
            heap,
            remembered: RememberedSet::new(),
            local_roots,
            env,
            strings: FxHashMap::default(),
            thread: ThreadStateFlag::new(),
        })
    }

    /// Owning runtime
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Snapshot environment of this isolate
    pub fn env(&self) -> &SnapshotEnv {
        &self.env
    }

    /// Local intrinsic
    pub fn root(&self, root: LocalRoot) -> ObjectRef {
        self.local_roots[root as usize]
    }

    /// Shared intrinsic
    pub fn shared_root(&self, root: SharedRoot) -> ObjectRef {
        self.runtime.shared_root(root)
    }

    /// Local heap usage
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Local arena
    pub fn heap(&self) -> &Arena {
        &self.heap
    }

    /// Remembered set of the local heap
    pub fn remembered_set(&self) -> &RememberedSet {
        &self.remembered
    }

    // ------------------------------------------------------------------
    // Thread state
    // ------------------------------------------------------------------

    /// Current thread state
    pub fn thread_state(&self) -> ThreadState {
        self.thread.get()
    }

    /// Whether heap access is currently allowed
    pub fn is_managed(&self) -> bool {
        self.thread.is_managed()
    }

    /// Leave managed state until the guard drops
    pub fn native_scope(&self) -> NativeScope {
        NativeScope::enter(Arc::clone(&self.thread))
    }

    /// Re-enter managed state until the guard drops
    pub fn managed_scope(&self) -> ManagedScope {
        ManagedScope::enter(Arc::clone(&self.thread))
    }

    pub(crate) fn ensure_managed(&self) -> HeapResult<()> {
        if self.thread.is_managed() {
            Ok(())
        } else {
            Err(HeapError::NotManaged)
        }
    }

    // ------------------------------------------------------------------
    // Object access
    // ------------------------------------------------------------------

    /// Run `f` against an object in either heap
    pub fn with_object<R>(&self, r: ObjectRef, f: impl FnOnce(&HeapObject) -> R) -> HeapResult<R> {
        if r.is_shared() {
            let shared = self.runtime.shared_heap().read();
            Ok(f(shared.get(r)?))
        } else {
            Ok(f(self.heap.get(r)?))
        }
    }

    /// Copy of an object in either heap
    pub fn object(&self, r: ObjectRef) -> HeapResult<HeapObject> {
        self.with_object(r, HeapObject::clone)
    }

    /// Kind of an object
    pub fn object_type(&self, r: ObjectRef) -> HeapResult<ObjectType> {
        self.with_object(r, |obj| obj.ty)
    }

    /// Kind of a value, `None` for primitives
    pub fn value_type(&self, value: TaggedValue) -> Option<ObjectType> {
        value.as_object().and_then(|r| self.object_type(r).ok())
    }

    /// Space an object occupies
    pub fn space_of(&self, r: ObjectRef) -> HeapResult<SpaceKind> {
        if r.is_shared() {
            self.runtime.shared_heap().read().space_of(r)
        } else {
            self.heap.space_of(r)
        }
    }

    /// Mutate an object without a barrier check; for untagged state only
    pub fn update_object<R>(
        &mut self,
        r: ObjectRef,
        f: impl FnOnce(&mut HeapObject) -> R,
    ) -> HeapResult<R> {
        if r.is_shared() {
            self.runtime.shared_heap().write().update(r, f)
        } else {
            self.heap.update(r, f)
        }
    }

    /// Store into a slot through the write barrier
    pub fn set_field(&mut self, r: ObjectRef, index: usize, field: Field) -> HeapResult<()> {
        if let Field::Tagged(value) = field {
            let holder_space = self.space_of(r)?;
            let value_space = match value.as_object() {
                Some(target) if !target.is_shared() => Some(self.heap.space_of(target)?),
                _ => None,
            };
            if check_store(r, holder_space, value, value_space)? == BarrierAction::Remember {
                self.remembered.insert(r);
            }
        }
        self.update_object(r, |obj| {
            let len = obj.fields.len();
            match obj.fields.get_mut(index) {
                Some(slot) => {
                    *slot = field;
                    Ok(())
                }
                None => Err(HeapError::FieldOutOfBounds {
                    ty: obj.ty,
                    index,
                    len,
                }),
            }
        })?
    }

    /// Append a slot through the write barrier
    pub fn push_field(&mut self, r: ObjectRef, field: Field) -> HeapResult<usize> {
        let index = self.update_object(r, |obj| {
            obj.fields.push(Field::default());
            obj.fields.len() - 1
        })?;
        self.set_field(r, index, field)?;
        Ok(index)
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Bump-allocate into the heap that owns `space`
    pub fn allocate(&mut self, space: SpaceKind, obj: HeapObject) -> HeapResult<ObjectRef> {
        self.ensure_managed()?;
        if space.is_shared() {
            self.runtime.shared_heap().write().allocate(space, obj)
        } else {
            self.heap.allocate(space, obj)
        }
    }

    /// Reserve regions ahead of placement
    pub fn reserve_regions(&mut self, space: SpaceKind, count: usize) -> HeapResult<Vec<RegionId>> {
        if space.is_shared() {
            self.runtime.shared_heap().write().reserve_regions(space, count)
        } else {
            self.heap.reserve_regions(space, count)
        }
    }

    /// Place an object into a reserved region of the heap owning `space`
    pub fn place(&mut self, space: SpaceKind, obj: HeapObject, address: Address) -> HeapResult<ObjectRef> {
        if space.is_shared() {
            self.runtime.shared_heap().write().place(obj, address)
        } else {
            self.heap.place(obj, address)
        }
    }

    /// Allocate an object in a region of its own
    pub fn allocate_huge(&mut self, space: SpaceKind, obj: HeapObject) -> HeapResult<ObjectRef> {
        if space.is_shared() {
            self.runtime.shared_heap().write().allocate_huge(space, obj)
        } else {
            self.heap.allocate_huge(space, obj)
        }
    }

    // ------------------------------------------------------------------
    // String table
    // ------------------------------------------------------------------

    /// Interned local string for `text`
    pub fn lookup_string(&self, text: &str) -> Option<ObjectRef> {
        self.strings.get(text).copied()
    }

    /// Register `r` as the canonical local string for `text`.
    ///
    /// Returns the already registered string if there is one.
    pub fn register_string(&mut self, text: &str, r: ObjectRef) -> ObjectRef {
        *self.strings.entry(text.to_string()).or_insert(r)
    }

    /// Number of interned local strings
    pub fn string_table_len(&self) -> usize {
        self.strings.len()
    }
}
