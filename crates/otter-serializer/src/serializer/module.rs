//! Module snapshot policy
//!
//! Serializes compiled module graphs. Shared objects are copied in full
//! into shared spaces; native pointers are zeroed.

use super::{BaseSerializer, SerializePolicy};
use crate::config::SerializeConfig;
use crate::data::SerializeData;
use crate::error::{SerializeError, SerializeResult};
use otter_heap::{Isolate, ObjectRef, ObjectType, TaggedValue};
use tracing::{debug, warn};

fn module_serializable(ty: ObjectType) -> bool {
    matches!(
        ty,
        ObjectType::Module
            | ObjectType::Function
            | ObjectType::AsyncFunction
            | ObjectType::LexicalEnv
            | ObjectType::MachineCode
            | ObjectType::String
            | ObjectType::Array
            | ObjectType::PlainObject
            | ObjectType::TaggedArray
            | ObjectType::HiddenClass
            | ObjectType::Date
            | ObjectType::NativePointer
            | ObjectType::BigInt
            | ObjectType::Map
            | ObjectType::Set
            | ObjectType::SharedObject
            | ObjectType::SharedArray
            | ObjectType::SharedMap
            | ObjectType::SharedSet
    )
}

impl BaseSerializer {
    pub(super) fn serialize_module_object(
        &mut self,
        isolate: &mut Isolate,
        r: ObjectRef,
    ) -> SerializeResult<()> {
        let ty = isolate.object_type(r)?;
        if !module_serializable(ty) {
            return Err(SerializeError::unsupported_type(ty));
        }
        if ty == ObjectType::PlainObject && isolate.is_native_binding(r)? {
            return Err(SerializeError::not_supported("native binding in module graph"));
        }
        self.serialize_tagged_object(isolate, r)
    }
}

/// Serializer for module snapshots
pub struct ModuleSerializer<'a> {
    isolate: &'a mut Isolate,
    base: BaseSerializer,
}

impl<'a> ModuleSerializer<'a> {
    /// Serializer with default limits
    pub fn new(isolate: &'a mut Isolate) -> Self {
        Self::with_config(isolate, SerializeConfig::default())
    }

    /// Serializer with explicit limits
    pub fn with_config(isolate: &'a mut Isolate, config: SerializeConfig) -> Self {
        let base = BaseSerializer::new(isolate, &config, SerializePolicy::Module);
        Self { isolate, base }
    }

    /// Serialize a module table or any other module-graph value
    pub fn serialize(&mut self, value: TaggedValue) -> SerializeResult<()> {
        let result = self.base.serialize_tagged_value(self.isolate, value);
        match &result {
            Ok(()) => debug!(
                bytes = self.base.data.len(),
                objects = self.base.reference_count(),
                "Module graph serialized"
            ),
            Err(e) => {
                self.base.data.set_incomplete(true);
                warn!(error = %e, "Module serialization failed");
            }
        }
        result
    }

    /// Data written so far
    pub fn data(&self) -> &SerializeData {
        self.base.data()
    }

    /// Hand over the serialized data
    pub fn release(self) -> SerializeData {
        self.base.into_data()
    }
}
