//! Object graph walk
//!
//! [`BaseSerializer`] owns the output [`SerializeData`], the reference map
//! and the shared-object chunk. The walk is shared by every policy; the
//! policy only decides what happens to a heap object that is neither an
//! intrinsic nor already emitted.

mod module;
mod value;

pub use module::ModuleSerializer;
pub use value::ValueSerializer;

pub(crate) use value::ValuePolicy;

use crate::config::SerializeConfig;
use crate::data::SerializeData;
use crate::encode::{EncodeFlag, SerializedObjectSpace};
use crate::error::{SerializeError, SerializeResult};
use otter_heap::object::{layout, special_field};
use otter_heap::{
    Field, HeapObject, Isolate, ObjectRef, ObjectType, SerializationChunk, SpecialField, TaggedValue,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

/// Object policy driving the walk
pub(crate) enum SerializePolicy {
    /// Structured clone between isolates
    Value(ValuePolicy),
    /// Module snapshot
    Module,
}

/// Policy-independent serializer state
pub struct BaseSerializer {
    pub(crate) data: SerializeData,
    references: FxHashMap<ObjectRef, u32>,
    next_index: u32,
    chunk: SerializationChunk,
    pub(crate) policy: SerializePolicy,
}

impl BaseSerializer {
    pub(crate) fn new(isolate: &Isolate, config: &SerializeConfig, policy: SerializePolicy) -> Self {
        Self {
            data: SerializeData::new(Arc::clone(isolate.runtime()), config),
            references: FxHashMap::default(),
            next_index: 0,
            chunk: SerializationChunk::new(),
            policy,
        }
    }

    /// Data written so far
    pub fn data(&self) -> &SerializeData {
        &self.data
    }

    /// Number of reference indices handed out
    pub fn reference_count(&self) -> u32 {
        self.next_index
    }

    pub(crate) fn into_data(self) -> SerializeData {
        self.data
    }

    // ------------------------------------------------------------------
    // Walk
    // ------------------------------------------------------------------

    /// Emit one value
    pub(crate) fn serialize_tagged_value(
        &mut self,
        isolate: &mut Isolate,
        value: TaggedValue,
    ) -> SerializeResult<()> {
        let Some(r) = value.as_object() else {
            self.data.write_flag(EncodeFlag::Primitive)?;
            return self.data.write_tagged(value);
        };
        if value.is_weak() {
            self.data.write_flag(EncodeFlag::Weak)?;
        }
        if self.serialize_root_object(isolate, r)? || self.serialize_reference(r)? {
            return Ok(());
        }
        match self.policy {
            SerializePolicy::Value(_) => self.serialize_value_object(isolate, r),
            SerializePolicy::Module => self.serialize_module_object(isolate, r),
        }
    }

    fn serialize_root_object(&mut self, isolate: &Isolate, r: ObjectRef) -> SerializeResult<bool> {
        let Some(index) = isolate.env().root_index(r) else {
            return Ok(false);
        };
        self.data.write_flag(EncodeFlag::RootObject)?;
        self.data.write_u32(index)?;
        Ok(true)
    }

    fn serialize_reference(&mut self, r: ObjectRef) -> SerializeResult<bool> {
        let Some(&index) = self.references.get(&r) else {
            return Ok(false);
        };
        self.data.write_flag(EncodeFlag::Reference)?;
        self.data.write_u32(index)?;
        Ok(true)
    }

    /// Assign the next reference index to `r`
    pub(crate) fn register(&mut self, r: ObjectRef) -> u32 {
        let index = self.next_index;
        self.references.insert(r, index);
        self.next_index += 1;
        index
    }

    /// Hand a shared object over through the chunk instead of copying it
    pub(crate) fn serialize_shared_reference(&mut self, r: ObjectRef) -> SerializeResult<()> {
        if self.serialize_reference(r)? {
            return Ok(());
        }
        let slot = self.chunk.emplace(TaggedValue::object(r));
        self.data.write_flag(EncodeFlag::SharedObject)?;
        self.data.write_u32(slot)?;
        self.register(r);
        Ok(())
    }

    /// Move the chunk into the runtime's root registry
    pub(crate) fn publish_chunk(&mut self) {
        if self.chunk.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut self.chunk);
        let index = self.data.runtime().root_registry().push_root(chunk);
        self.data.set_data_index(index);
    }

    fn object_space(
        &self,
        isolate: &Isolate,
        r: ObjectRef,
        obj: &HeapObject,
    ) -> SerializeResult<SerializedObjectSpace> {
        let space = if obj.ty == ObjectType::MachineCode {
            SerializedObjectSpace::MachineCode
        } else {
            SerializedObjectSpace::from_space(isolate.space_of(r)?)
        };
        if obj.size() > isolate.runtime().config().huge_object_threshold {
            Ok(space.huge_variant())
        } else {
            Ok(space)
        }
    }

    /// Emit the full encoding of an object
    pub(crate) fn serialize_tagged_object(
        &mut self,
        isolate: &mut Isolate,
        r: ObjectRef,
    ) -> SerializeResult<()> {
        let obj = isolate.object(r)?;
        let size = obj.size();
        let space = self.object_space(isolate, r, &obj)?;
        if obj.ty == ObjectType::MachineCode && space.is_shared() {
            return Err(SerializeError::not_supported("machine code in a shared space"));
        }

        self.data.write_flag(EncodeFlag::NewObject(space))?;
        self.data.write_u32(size as u32)?;
        self.data.write_u8(obj.ty as u8)?;
        self.data.write_u8(obj.flags)?;
        self.data.write_raw(&[0, 0])?;
        self.data.write_u32(obj.raw.len() as u32)?;
        self.data.calculate_serialized_object_size(space, size);
        let index = self.register(r);
        trace!(?r, index, ty = ?obj.ty, size, "New object");

        self.serialize_fields(isolate, r, &obj)?;
        if !obj.raw.is_empty() {
            self.write_raw_area(&obj.raw)?;
        }
        Ok(())
    }

    fn write_raw_area(&mut self, bytes: &[u8]) -> SerializeResult<()> {
        self.data.write_flag(EncodeFlag::MultiRawData)?;
        self.data.write_u32(bytes.len() as u32)?;
        self.data.write_raw(bytes)
    }

    fn flush_raw_run(&mut self, run: &mut Vec<u8>) -> SerializeResult<()> {
        if run.is_empty() {
            return Ok(());
        }
        self.write_raw_area(run)?;
        run.clear();
        Ok(())
    }

    fn serialize_fields(
        &mut self,
        isolate: &mut Isolate,
        r: ObjectRef,
        obj: &HeapObject,
    ) -> SerializeResult<()> {
        let mut run = Vec::new();
        for (index, field) in obj.fields.iter().enumerate() {
            let field = sanitize_field(obj.ty, index, *field);
            match special_field(obj.ty, index) {
                Some(SpecialField::NativePointer) => {
                    let bits = match self.policy {
                        SerializePolicy::Value(_) => field.raw().unwrap_or(0),
                        SerializePolicy::Module => 0,
                    };
                    run.extend_from_slice(&bits.to_le_bytes());
                }
                Some(SpecialField::BufferData) => {
                    self.flush_raw_run(&mut run)?;
                    self.serialize_buffer_data(isolate, r, obj)?;
                }
                Some(SpecialField::RegExpBytecode) => {
                    self.flush_raw_run(&mut run)?;
                    let storage = field.raw().unwrap_or(0);
                    let bytecode = isolate.runtime().native().read(storage)?;
                    self.data.write_flag(EncodeFlag::JsRegExp)?;
                    self.data.write_u32(bytecode.len() as u32)?;
                    self.data.write_raw(&bytecode)?;
                }
                None => match field {
                    Field::Raw(bits) => run.extend_from_slice(&bits.to_le_bytes()),
                    Field::Tagged(value) => {
                        self.flush_raw_run(&mut run)?;
                        if obj.ty == ObjectType::HiddenClass
                            && index == layout::class::PROTO
                            && value.is_heap_object()
                        {
                            self.data.write_flag(EncodeFlag::ObjectProto)?;
                        }
                        self.serialize_tagged_value(isolate, value)?;
                    }
                },
            }
        }
        self.flush_raw_run(&mut run)
    }

    fn serialize_buffer_data(
        &mut self,
        isolate: &mut Isolate,
        r: ObjectRef,
        obj: &HeapObject,
    ) -> SerializeResult<()> {
        match self.policy {
            SerializePolicy::Value(_) => self.serialize_value_buffer(isolate, r, obj),
            SerializePolicy::Module => Err(SerializeError::unsupported_type(obj.ty)),
        }
    }
}

/// Replace process-local state with portable placeholders
fn sanitize_field(ty: ObjectType, index: usize, field: Field) -> Field {
    let cleared = Field::Tagged(TaggedValue::UNDEFINED);
    match ty {
        ObjectType::HiddenClass => match index {
            layout::class::TRANSITIONS
            | layout::class::PARENT
            | layout::class::PROTO_CHANGE_MARKER
            | layout::class::PROTO_CHANGE_DETAILS => cleared,
            _ => field,
        },
        ObjectType::LexicalEnv => match index {
            layout::env::PARENT | layout::env::SCOPE_INFO => cleared,
            _ => field,
        },
        ObjectType::Function | ObjectType::AsyncFunction => match index {
            layout::function::MACHINE_CODE | layout::function::PROFILE => cleared,
            layout::function::CODE_ENTRY => Field::Raw(0),
            layout::function::GC_HASH if ty == ObjectType::AsyncFunction => cleared,
            _ => field,
        },
        _ => field,
    }
}
