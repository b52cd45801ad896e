//! Module snapshot decode
//!
//! Decoded strings are folded into the string tables so a snapshot never
//! introduces a second copy of an interned string.

use super::{BaseDeserializer, DeserializePolicy, Entry};
use crate::data::SerializeData;
use crate::encode::SerializedObjectSpace;
use crate::error::DeserializeResult;
use otter_heap::{Isolate, ObjectRef, TaggedValue};

impl BaseDeserializer<'_> {
    /// Replace a freshly decoded string with the interned copy, if any
    pub(super) fn dedup_string(
        &mut self,
        index: usize,
        r: ObjectRef,
        space: SerializedObjectSpace,
    ) -> DeserializeResult<ObjectRef> {
        let text = self.isolate.string_value(r)?;
        let canonical = if space.is_shared() {
            self.isolate.runtime().register_shared_string(&text, r)
        } else {
            self.isolate.register_string(&text, r)
        };
        if canonical != r {
            self.objects[index] = Entry::Ready(canonical);
        }
        Ok(canonical)
    }
}

/// Deserializer for module snapshots
pub struct ModuleDeserializer<'a> {
    base: BaseDeserializer<'a>,
}

impl<'a> ModuleDeserializer<'a> {
    /// Deserializer over snapshot data
    pub fn new(isolate: &'a mut Isolate, data: &'a mut SerializeData) -> Self {
        Self {
            base: BaseDeserializer::with_policy(isolate, data, DeserializePolicy::Module),
        }
    }

    /// Decode the module table
    pub fn read_value(&mut self) -> DeserializeResult<TaggedValue> {
        self.base.read_value()
    }
}
