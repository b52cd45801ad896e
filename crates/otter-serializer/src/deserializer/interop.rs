//! Cross-VM value decode
//!
//! Native bindings flagged as cross-VM references are rebuilt by an
//! embedder-supplied bridge instead of an attach callback.

use super::{BaseDeserializer, DeserializePolicy};
use crate::data::SerializeData;
use crate::error::DeserializeResult;
use otter_heap::{AttachArgs, Isolate, TaggedValue};

/// Rehydrates cross-VM native bindings
pub trait CrossVmBridge {
    /// Build the local object for a cross-VM reference.
    ///
    /// Called outside managed state; implementations that allocate must
    /// enter a managed scope first.
    fn attach_xref(&self, isolate: &mut Isolate, args: &AttachArgs) -> Option<TaggedValue>;
}

/// Value deserializer that accepts cross-VM bindings
pub struct InterOpValueDeserializer<'a> {
    base: BaseDeserializer<'a>,
}

impl<'a> InterOpValueDeserializer<'a> {
    /// Deserializer using `bridge` for cross-VM bindings
    pub fn new(
        isolate: &'a mut Isolate,
        data: &'a mut SerializeData,
        bridge: &'a dyn CrossVmBridge,
    ) -> Self {
        Self {
            base: BaseDeserializer::with_policy(isolate, data, DeserializePolicy::InterOp(bridge)),
        }
    }

    /// Decode the root value
    pub fn read_value(&mut self) -> DeserializeResult<TaggedValue> {
        self.base.read_value()
    }
}
