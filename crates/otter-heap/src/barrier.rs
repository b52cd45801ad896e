//! Write barrier
//!
//! Every tagged store into a heap object goes through [`check_store`]:
//!
//! - shared objects may only point at shared objects
//! - old-to-young edges are recorded in a [`RememberedSet`]

use crate::error::{HeapError, HeapResult};
use crate::space::SpaceKind;
use crate::value::{ObjectRef, TaggedValue};
use rustc_hash::FxHashSet;

/// Remembered set for tracking cross-generation references
///
/// Records old-to-young pointers to serve as additional roots
/// during young generation collection.
#[derive(Debug, Default)]
pub struct RememberedSet {
    entries: FxHashSet<ObjectRef>,
}

impl RememberedSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object holding a young reference
    pub fn insert(&mut self, holder: ObjectRef) {
        self.entries.insert(holder);
    }

    /// Whether `holder` is recorded
    pub fn contains(&self, holder: ObjectRef) -> bool {
        self.entries.contains(&holder)
    }

    /// Drop all entries (after a young collection)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of recorded holders
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a barrier check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierAction {
    /// Plain store
    None,
    /// Holder must be added to the remembered set
    Remember,
}

/// Validate a store of `value` into `holder`.
///
/// `holder_space` and `value_space` are the spaces of the two objects;
/// `value_space` is `None` for primitives and shared targets.
pub fn check_store(
    holder: ObjectRef,
    holder_space: SpaceKind,
    value: TaggedValue,
    value_space: Option<SpaceKind>,
) -> HeapResult<BarrierAction> {
    let Some(target) = value.as_object() else {
        return Ok(BarrierAction::None);
    };
    if holder.is_shared() && !target.is_shared() {
        return Err(HeapError::SharedToLocal(holder, target));
    }
    if holder_space != SpaceKind::Young && value_space == Some(SpaceKind::Young) {
        return Ok(BarrierAction::Remember);
    }
    Ok(BarrierAction::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_to_local_rejected() {
        let holder = ObjectRef::shared(1);
        let target = TaggedValue::object(ObjectRef::local(2));
        let err = check_store(holder, SpaceKind::SharedOld, target, Some(SpaceKind::Young));
        assert!(matches!(err, Err(HeapError::SharedToLocal(..))));
    }

    #[test]
    fn test_old_to_young_remembered() {
        let holder = ObjectRef::local(1);
        let target = TaggedValue::object(ObjectRef::local(2));
        assert_eq!(
            check_store(holder, SpaceKind::Old, target, Some(SpaceKind::Young)).unwrap(),
            BarrierAction::Remember
        );
        assert_eq!(
            check_store(holder, SpaceKind::Young, target, Some(SpaceKind::Young)).unwrap(),
            BarrierAction::None
        );
        assert_eq!(
            check_store(holder, SpaceKind::Old, TaggedValue::int(1), None).unwrap(),
            BarrierAction::None
        );
    }
}
