//! Structured-clone policy
//!
//! Decides per object whether it is copied, transferred, handed over by
//! reference (shared objects) or rejected. Native detach callbacks and
//! buffer detaches are queued during the walk and run once the whole
//! graph is emitted.

use super::{BaseSerializer, SerializePolicy};
use crate::config::SerializeConfig;
use crate::data::SerializeData;
use crate::encode::EncodeFlag;
use crate::error::{SerializeError, SerializeResult};
use otter_heap::object::{FLAG_DETACHED, layout::array_buffer};
use otter_heap::{CallbackId, DetachArgs, HeapObject, Isolate, ObjectRef, ObjectType, TaggedValue};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

struct BindingDetach {
    slot: usize,
    detach: CallbackId,
    args: DetachArgs,
}

/// Per-call clone/transfer state
#[derive(Default)]
pub(crate) struct ValuePolicy {
    default_transfer: bool,
    clone_shared: bool,
    transfer: FxHashSet<ObjectRef>,
    clone: FxHashSet<ObjectRef>,
    shared_depth: u32,
    buffer_detaches: Vec<ObjectRef>,
    binding_detaches: Vec<BindingDetach>,
}

impl ValuePolicy {
    fn clones_shared(&self, r: ObjectRef) -> bool {
        self.clone_shared || self.shared_depth > 0 || self.clone.contains(&r)
    }

    fn transfers(&self, r: ObjectRef) -> bool {
        self.transfer.contains(&r) || (self.default_transfer && !self.clone.contains(&r))
    }
}

fn copyable(ty: ObjectType) -> bool {
    matches!(
        ty,
        ObjectType::PlainObject
            | ObjectType::Array
            | ObjectType::Date
            | ObjectType::Map
            | ObjectType::Set
            | ObjectType::RegExp
            | ObjectType::TypedArray
            | ObjectType::ArrayBuffer
            | ObjectType::SharedArrayBuffer
            | ObjectType::String
            | ObjectType::TaggedArray
            | ObjectType::HiddenClass
            | ObjectType::BigInt
    )
}

fn shared_copyable(ty: ObjectType) -> bool {
    ty.is_shared_kind()
        || matches!(ty, ObjectType::String | ObjectType::TaggedArray | ObjectType::HiddenClass)
}

impl BaseSerializer {
    fn value_policy(&mut self) -> SerializeResult<&mut ValuePolicy> {
        match &mut self.policy {
            SerializePolicy::Value(policy) => Ok(policy),
            SerializePolicy::Module => Err(SerializeError::not_supported("value policy expected")),
        }
    }

    pub(super) fn serialize_value_object(
        &mut self,
        isolate: &mut Isolate,
        r: ObjectRef,
    ) -> SerializeResult<()> {
        let ty = isolate.object_type(r)?;
        if r.is_shared() {
            return self.serialize_shared_value(isolate, r, ty);
        }
        if self.value_policy()?.shared_depth > 0 {
            return Err(SerializeError::not_supported("local object inside a cloned shared graph"));
        }
        if ty == ObjectType::PlainObject && isolate.is_native_binding(r)? {
            return self.serialize_native_binding(isolate, r);
        }
        match ty {
            ObjectType::Error => self.serialize_js_error(isolate, r),
            ty if copyable(ty) => self.serialize_tagged_object(isolate, r),
            ty => {
                debug!(?ty, "Rejected object kind");
                Err(SerializeError::unsupported_type(ty))
            }
        }
    }

    fn serialize_shared_value(
        &mut self,
        isolate: &mut Isolate,
        r: ObjectRef,
        ty: ObjectType,
    ) -> SerializeResult<()> {
        if !self.value_policy()?.clones_shared(r) {
            return self.serialize_shared_reference(r);
        }
        if !shared_copyable(ty) {
            return Err(SerializeError::unsupported_type(ty));
        }
        self.value_policy()?.shared_depth += 1;
        let result = self.serialize_tagged_object(isolate, r);
        self.value_policy()?.shared_depth -= 1;
        result
    }

    fn serialize_native_binding(&mut self, isolate: &mut Isolate, r: ObjectRef) -> SerializeResult<()> {
        let info = isolate
            .native_binding_info(r)?
            .ok_or_else(|| SerializeError::not_supported("native binding without a binding record"))?;
        let (Some(attach), Some(detach)) = (info.attach, info.detach) else {
            return Err(SerializeError::not_supported(
                "native binding requires attach and detach callbacks",
            ));
        };
        self.register(r);
        self.data.write_flag(EncodeFlag::NativeBindingObject)?;
        self.data.write_u64(attach)?;
        self.data.write_u64(info.attach_data)?;
        self.data.write_u64(info.hint)?;
        let slot = self.data.placeholder_u64()?;
        self.data.write_u8(info.xref as u8)?;
        self.value_policy()?.binding_detaches.push(BindingDetach {
            slot,
            detach,
            args: DetachArgs {
                native: info.native,
                attach_data: info.attach_data,
                hint: info.hint,
            },
        });
        Ok(())
    }

    fn serialize_js_error(&mut self, isolate: &mut Isolate, r: ObjectRef) -> SerializeResult<()> {
        let kind = isolate.error_kind(r)?;
        let message = isolate.error_message(r)?;
        self.register(r);
        self.data.write_flag(EncodeFlag::JsError)?;
        self.data.write_u8(kind as u8)?;
        self.data.write_u8(message.is_some() as u8)?;
        if let Some(text) = message {
            let shared = isolate.new_shared_string(&text)?;
            self.serialize_shared_reference(shared)?;
        }
        Ok(())
    }

    pub(super) fn serialize_value_buffer(
        &mut self,
        isolate: &mut Isolate,
        r: ObjectRef,
        obj: &HeapObject,
    ) -> SerializeResult<()> {
        let storage = obj.raw_field(array_buffer::DATA);
        let len = obj.raw_field(array_buffer::BYTE_LENGTH) as usize;
        if obj.has_flag(FLAG_DETACHED) {
            return Err(SerializeError::DetachedBuffer);
        }
        let transfer = self.value_policy()?.transfers(r);
        match obj.ty {
            ObjectType::SharedArrayBuffer => {
                isolate.runtime().shared_memory().retain(storage)?;
                self.data.add_shared_ref(storage);
                self.data.write_flag(EncodeFlag::SharedArrayBuffer)?;
                self.data.write_u64(storage)
            }
            ObjectType::SendableArrayBuffer => {
                self.value_policy()?.buffer_detaches.push(r);
                self.data.write_flag(EncodeFlag::SendableArrayBuffer)?;
                self.data.write_u64(storage)
            }
            _ if transfer => {
                // an empty buffer has nothing to hand over but is still detached
                self.value_policy()?.buffer_detaches.push(r);
                if storage == array_buffer::NO_STORAGE || len == 0 {
                    self.data.write_flag(EncodeFlag::ArrayBuffer)?;
                    return self.data.write_u32(0);
                }
                self.data.write_flag(EncodeFlag::TransferArrayBuffer)?;
                self.data.write_u64(storage)
            }
            _ if storage == array_buffer::NO_STORAGE || len == 0 => {
                self.data.write_flag(EncodeFlag::ArrayBuffer)?;
                self.data.write_u32(0)
            }
            _ => {
                let native = isolate.runtime().native();
                if !native.is_engine_allocated(storage)? {
                    return Err(SerializeError::ExternalBuffer);
                }
                let bytes = native.read(storage)?;
                self.data.write_flag(EncodeFlag::ArrayBuffer)?;
                self.data.write_u32(bytes.len() as u32)?;
                self.data.write_raw(&bytes)
            }
        }
    }

    /// Run queued detaches once the graph is fully emitted
    fn finish_value(&mut self, isolate: &mut Isolate) -> SerializeResult<()> {
        let bindings = std::mem::take(&mut self.value_policy()?.binding_detaches);
        if !bindings.is_empty() {
            let callbacks = isolate.runtime().callbacks();
            let mut resolved = Vec::with_capacity(bindings.len());
            for binding in bindings {
                resolved.push((binding.slot, callbacks.detach(binding.detach)?, binding.args));
            }
            let _native = isolate.native_scope();
            for (slot, detach, args) in resolved {
                let detached = detach(&args);
                self.data.patch_u64(slot, detached);
            }
        }

        let buffers = std::mem::take(&mut self.value_policy()?.buffer_detaches);
        for buffer in buffers {
            let storage = isolate.detach_array_buffer(buffer)?;
            if storage == array_buffer::NO_STORAGE {
                continue;
            }
            isolate.runtime().native().mark_in_flight(storage)?;
            self.data.add_transferred(storage);
        }
        Ok(())
    }
}

/// Serializer for values crossing isolate boundaries
pub struct ValueSerializer<'a> {
    isolate: &'a mut Isolate,
    base: BaseSerializer,
}

impl<'a> ValueSerializer<'a> {
    /// Copy array buffers unless listed for transfer
    pub fn new(isolate: &'a mut Isolate) -> Self {
        Self::with_config(isolate, SerializeConfig::default(), false, false)
    }

    /// Transfer array buffers unless listed for cloning
    pub fn with_default_transfer(isolate: &'a mut Isolate) -> Self {
        Self::with_config(isolate, SerializeConfig::default(), true, false)
    }

    /// Copy shared objects instead of passing them by reference
    pub fn with_clone_shared(isolate: &'a mut Isolate) -> Self {
        Self::with_config(isolate, SerializeConfig::default(), false, true)
    }

    /// Fully configured serializer
    pub fn with_config(
        isolate: &'a mut Isolate,
        config: SerializeConfig,
        default_transfer: bool,
        clone_shared: bool,
    ) -> Self {
        let policy = ValuePolicy {
            default_transfer,
            clone_shared,
            ..ValuePolicy::default()
        };
        let base = BaseSerializer::new(isolate, &config, SerializePolicy::Value(policy));
        Self { isolate, base }
    }

    /// Serialize `value`.
    ///
    /// `transfer` and `clone` are `undefined` or arrays. On failure the
    /// data is marked incomplete and must not be deserialized.
    pub fn write_value(
        &mut self,
        value: TaggedValue,
        transfer: TaggedValue,
        clone: TaggedValue,
    ) -> SerializeResult<()> {
        let result = self.write_value_inner(value, transfer, clone);
        if let Err(e) = &result {
            self.base.data.set_incomplete(true);
            warn!(error = %e, "Value serialization failed");
        }
        result
    }

    fn write_value_inner(
        &mut self,
        value: TaggedValue,
        transfer: TaggedValue,
        clone: TaggedValue,
    ) -> SerializeResult<()> {
        self.prepare_transfer(transfer)?;
        self.prepare_clone(clone)?;
        self.base.serialize_tagged_value(self.isolate, value)?;
        self.base.publish_chunk();
        self.base.finish_value(self.isolate)?;
        debug!(bytes = self.base.data.len(), "Value serialized");
        Ok(())
    }

    fn list_entries(&self, list: TaggedValue) -> Option<Vec<TaggedValue>> {
        let r = list.as_object()?;
        match self.isolate.object_type(r) {
            Ok(ObjectType::Array) => self.isolate.collection_elements(r).ok(),
            _ => None,
        }
    }

    fn prepare_transfer(&mut self, transfer: TaggedValue) -> SerializeResult<()> {
        if transfer.is_undefined() {
            return Ok(());
        }
        let entries = self
            .list_entries(transfer)
            .ok_or(SerializeError::InvalidTransferList("transfer list must be an array"))?;
        let mut buffers = FxHashSet::default();
        for entry in entries {
            let buffer = entry
                .as_object()
                .filter(|r| self.isolate.object_type(*r).ok() == Some(ObjectType::ArrayBuffer))
                .ok_or(SerializeError::InvalidTransferList("entries must be array buffers"))?;
            if self.isolate.is_detached(buffer)? {
                return Err(SerializeError::InvalidTransferList("array buffer is detached"));
            }
            buffers.insert(buffer);
        }
        self.base.value_policy()?.transfer = buffers;
        Ok(())
    }

    fn prepare_clone(&mut self, clone: TaggedValue) -> SerializeResult<()> {
        if clone.is_undefined() {
            return Ok(());
        }
        let entries = self
            .list_entries(clone)
            .ok_or(SerializeError::InvalidCloneList("clone list must be an array"))?;
        let mut objects = FxHashSet::default();
        for entry in entries {
            let r = entry.as_object().ok_or(SerializeError::InvalidCloneList(
                "entries must be array buffers or shared objects",
            ))?;
            let ty = self.isolate.object_type(r)?;
            if ty == ObjectType::ArrayBuffer {
                if self.base.value_policy()?.transfer.contains(&r) {
                    return Err(SerializeError::InvalidTransferList(
                        "array buffer in both transfer and clone lists",
                    ));
                }
            } else if !r.is_shared() {
                return Err(SerializeError::InvalidCloneList(
                    "entries must be array buffers or shared objects",
                ));
            }
            objects.insert(r);
        }
        self.base.value_policy()?.clone = objects;
        Ok(())
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
