//! Object graph rebuild
//!
//! [`BaseDeserializer`] reserves every region the serializer planned for,
//! places objects in stream order and relinks references by emission
//! index. Units that need foreign code (native binding attach, error
//! construction, cross-VM attach) decode to placeholders and run in a
//! deferred pass once the graph is linked.

mod interop;
mod module;

pub use interop::{CrossVmBridge, InterOpValueDeserializer};
pub use module::ModuleDeserializer;

use crate::data::{POOL_COUNT, SerializeData, pool_for, pool_space};
use crate::encode::{EncodeFlag, SerializedObjectSpace};
use crate::error::{DeserializeError, DeserializeResult};
use otter_heap::object::{FIELD_SIZE, FLAG_PROTOTYPE, layout::array_buffer};
use otter_heap::{
    Address, AttachArgs, CallbackId, ErrorKind, Field, HeapError, HeapObject, Isolate, ObjectRef,
    ObjectType, RegionId, SerializationChunk, TaggedValue, fatal_oom,
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Decode policy
#[derive(Clone, Copy)]
pub(crate) enum DeserializePolicy<'a> {
    /// Structured clone; cross-VM bindings rejected
    Value,
    /// Module snapshot; strings deduplicated
    Module,
    /// Structured clone with a cross-VM bridge
    InterOp(&'a dyn CrossVmBridge),
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Ready(ObjectRef),
    Pending(usize),
}

/// Result of decoding one unit
#[derive(Debug, Clone, Copy)]
enum Decoded {
    Value(TaggedValue),
    /// Deferred result; `weak` is set when a WEAK marker preceded the unit
    Pending { index: usize, weak: bool },
}

impl Decoded {
    fn pending(index: usize) -> Self {
        Decoded::Pending { index, weak: false }
    }
}

/// Slot patched once deferred results exist
struct PendingSlot {
    holder: ObjectRef,
    field: usize,
    index: usize,
    weak: bool,
}

fn resolve_pending(results: &[TaggedValue], index: usize, weak: bool) -> DeserializeResult<TaggedValue> {
    let value = *results
        .get(index)
        .ok_or_else(|| DeserializeError::corrupt(format!("deferred unit {index} was never produced")))?;
    Ok(if weak { value.to_weak() } else { value })
}

enum Deferred {
    Binding { attach: CallbackId, args: AttachArgs },
    XRef(AttachArgs),
    Error { kind: ErrorKind, message: TaggedValue },
}

struct PoolCursor {
    regions: Vec<RegionId>,
    current: usize,
    offset: usize,
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    u64::from_le_bytes(word)
}

/// Policy-independent deserializer state
pub struct BaseDeserializer<'a> {
    isolate: &'a mut Isolate,
    data: &'a mut SerializeData,
    policy: DeserializePolicy<'a>,
    objects: Vec<Entry>,
    pools: [Option<PoolCursor>; POOL_COUNT],
    deferred: Vec<Deferred>,
    pending: Vec<PendingSlot>,
    prototypes: Vec<ObjectRef>,
    chunk: Option<Arc<SerializationChunk>>,
}

impl<'a> BaseDeserializer<'a> {
    /// Deserializer for cloned values
    pub fn new(isolate: &'a mut Isolate, data: &'a mut SerializeData) -> Self {
        Self::with_policy(isolate, data, DeserializePolicy::Value)
    }

    pub(crate) fn with_policy(
        isolate: &'a mut Isolate,
        data: &'a mut SerializeData,
        policy: DeserializePolicy<'a>,
    ) -> Self {
        Self {
            isolate,
            data,
            policy,
            objects: Vec::new(),
            pools: Default::default(),
            deferred: Vec::new(),
            pending: Vec::new(),
            prototypes: Vec::new(),
            chunk: None,
        }
    }

    /// Number of reference indices seen by the last read
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Decode the root value
    pub fn read_value(&mut self) -> DeserializeResult<TaggedValue> {
        let result = self.read_value_inner();
        if let Err(e) = &result {
            warn!(error = %e, "Deserialization failed");
        }
        result
    }

    fn read_value_inner(&mut self) -> DeserializeResult<TaggedValue> {
        if self.data.is_incomplete() {
            return Err(DeserializeError::IncompleteData);
        }
        self.objects.clear();
        self.deferred.clear();
        self.pending.clear();
        self.prototypes.clear();
        self.reserve_pools()?;

        let mut pos = 0;
        let root = self.read_unit(&mut pos)?;
        if pos != self.data.len() {
            return Err(DeserializeError::corrupt(format!(
                "{} trailing bytes after root value",
                self.data.len() - pos
            )));
        }

        for r in std::mem::take(&mut self.prototypes) {
            self.isolate.update_object(r, |o| o.flags |= FLAG_PROTOTYPE)?;
        }
        let results = self.run_deferred()?;
        for slot in std::mem::take(&mut self.pending) {
            let value = resolve_pending(&results, slot.index, slot.weak)?;
            self.isolate.set_field(slot.holder, slot.field, Field::Tagged(value))?;
        }
        let value = match root {
            Decoded::Value(value) => value,
            Decoded::Pending { index, weak } => resolve_pending(&results, index, weak)?,
        };
        self.data.release_data_index();
        debug!(objects = self.objects.len(), "Value deserialized");
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    fn reserve_pools(&mut self) -> DeserializeResult<()> {
        for pool in 0..POOL_COUNT {
            self.pools[pool] = None;
            if self.data.pool_size(pool) == 0 {
                continue;
            }
            let count = self.data.remain_sizes(pool).len() + 1;
            let regions = match self.isolate.reserve_regions(pool_space(pool), count) {
                Ok(regions) => regions,
                Err(HeapError::HeapLimit { .. }) => {
                    fatal_oom("deserializer region reservation", self.isolate.heap_stats())
                }
                Err(e) => return Err(e.into()),
            };
            trace!(pool, count, "Reserved regions for deserialization");
            self.pools[pool] = Some(PoolCursor {
                regions,
                current: 0,
                offset: 0,
            });
        }
        Ok(())
    }

    /// Address for the next object of `space`, crossing regions exactly
    /// where the serializer recorded a tail
    fn carve(&mut self, space: SerializedObjectSpace, size: usize) -> DeserializeResult<Address> {
        let config = self.isolate.runtime().config();
        let region_size = config.region_size;
        let pool = pool_for(space, config.collector)
            .ok_or_else(|| DeserializeError::corrupt(format!("{space:?} has no region pool")))?;
        let remain = self.data.remain_sizes(pool);
        let cursor = self.pools[pool]
            .as_mut()
            .ok_or_else(|| DeserializeError::corrupt(format!("no regions reserved for {space:?}")))?;
        if cursor.offset + size > region_size {
            let tail = (region_size - cursor.offset) as u64;
            if remain.get(cursor.current) != Some(&tail) {
                return Err(DeserializeError::corrupt(format!(
                    "region {} of {space:?} ends with {tail} free bytes, expected {:?}",
                    cursor.current,
                    remain.get(cursor.current)
                )));
            }
            cursor.current += 1;
            cursor.offset = 0;
        }
        let region = *cursor
            .regions
            .get(cursor.current)
            .ok_or_else(|| DeserializeError::corrupt(format!("{space:?} overflows reserved regions")))?;
        let address = Address {
            region,
            offset: cursor.offset as u32,
        };
        cursor.offset += size;
        Ok(address)
    }

    fn allocate_object(
        &mut self,
        space: SerializedObjectSpace,
        size: usize,
        obj: HeapObject,
    ) -> DeserializeResult<ObjectRef> {
        if space.is_huge() {
            return match self.isolate.allocate_huge(space.to_space(), obj) {
                Ok(r) => Ok(r),
                Err(HeapError::HeapLimit { .. }) => {
                    fatal_oom("deserializer huge allocation", self.isolate.heap_stats())
                }
                Err(e) => Err(e.into()),
            };
        }
        let address = self.carve(space, size)?;
        Ok(self.isolate.place(space.to_space(), obj, address)?)
    }

    // ------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------

    fn read_unit(&mut self, pos: &mut usize) -> DeserializeResult<Decoded> {
        let offset = *pos;
        let flag = self.data.read_flag(pos)?;
        match flag {
            EncodeFlag::Primitive => Ok(Decoded::Value(self.data.read_tagged(pos)?)),
            EncodeFlag::Weak => match self.read_unit(pos)? {
                Decoded::Value(value) if value.is_heap_object() => Ok(Decoded::Value(value.to_weak())),
                Decoded::Pending { index, .. } => Ok(Decoded::Pending { index, weak: true }),
                Decoded::Value(_) => Err(DeserializeError::corrupt("weak marker before a non-object unit")),
            },
            EncodeFlag::Reference => {
                let index = self.data.read_u32(pos)?;
                match self.objects.get(index as usize) {
                    Some(Entry::Ready(r)) => Ok(Decoded::Value(TaggedValue::object(*r))),
                    Some(Entry::Pending(pending)) => Ok(Decoded::pending(*pending)),
                    None => Err(DeserializeError::corrupt(format!("reference {index} out of range"))),
                }
            }
            EncodeFlag::RootObject => {
                let index = self.data.read_u32(pos)?;
                let r = self
                    .isolate
                    .env()
                    .root(index)
                    .ok_or_else(|| DeserializeError::corrupt(format!("unknown root {index}")))?;
                Ok(Decoded::Value(TaggedValue::object(r)))
            }
            EncodeFlag::SharedObject => {
                let slot = self.data.read_u32(pos)?;
                let r = self.shared_object(slot)?;
                self.objects.push(Entry::Ready(r));
                Ok(Decoded::Value(TaggedValue::object(r)))
            }
            EncodeFlag::ObjectProto => {
                let decoded = self.read_unit(pos)?;
                if let Decoded::Value(value) = decoded
                    && let Some(r) = value.as_object()
                    && !r.is_shared()
                    && self.isolate.env().root_index(r).is_none()
                {
                    self.prototypes.push(r);
                }
                Ok(decoded)
            }
            EncodeFlag::NewObject(space) => self.read_new_object(space, pos),
            EncodeFlag::NativeBindingObject => self.read_native_binding(pos),
            EncodeFlag::JsError => self.read_js_error(pos),
            other => Err(DeserializeError::InvalidFlag {
                flag: other.to_u8(),
                offset,
            }),
        }
    }

    fn shared_object(&mut self, slot: u32) -> DeserializeResult<ObjectRef> {
        if self.chunk.is_none() {
            let index = self
                .data
                .data_index()
                .ok_or_else(|| DeserializeError::corrupt("shared object without a data index"))?;
            let chunk = self
                .isolate
                .runtime()
                .root_registry()
                .get(index)
                .ok_or(DeserializeError::MissingSharedRoots(index))?;
            self.chunk = Some(chunk);
        }
        self.chunk
            .as_ref()
            .and_then(|chunk| chunk.get(slot))
            .and_then(TaggedValue::as_object)
            .ok_or_else(|| DeserializeError::corrupt(format!("shared slot {slot} is empty")))
    }

    fn read_new_object(
        &mut self,
        space: SerializedObjectSpace,
        pos: &mut usize,
    ) -> DeserializeResult<Decoded> {
        let size = self.data.read_u32(pos)? as usize;
        let ty_byte = self.data.read_u8(pos)?;
        let flags = self.data.read_u8(pos)?;
        self.data.read_raw(2, pos)?;
        let raw_len = self.data.read_u32(pos)? as usize;

        let ty = ObjectType::from_u8(ty_byte)
            .ok_or_else(|| DeserializeError::corrupt(format!("unknown object type {ty_byte}")))?;
        let field_count = HeapObject::field_count_for(size, raw_len).ok_or_else(|| {
            DeserializeError::corrupt(format!("{ty:?} of {size} bytes cannot hold {raw_len} raw bytes"))
        })?;
        if ty == ObjectType::MachineCode && space.is_shared() {
            return Err(DeserializeError::corrupt("machine code in a shared space"));
        }

        let mut obj = HeapObject::new(
            ty,
            TaggedValue::UNDEFINED,
            vec![Field::default(); field_count - 1],
            vec![0; raw_len],
        );
        obj.flags = flags;
        let r = self.allocate_object(space, size, obj)?;
        let index = self.objects.len();
        self.objects.push(Entry::Ready(r));

        self.read_fields(r, field_count, pos)?;
        if raw_len > 0 {
            let offset = *pos;
            let flag = self.data.read_flag(pos)?;
            if flag != EncodeFlag::MultiRawData {
                return Err(DeserializeError::InvalidFlag {
                    flag: flag.to_u8(),
                    offset,
                });
            }
            let len = self.data.read_u32(pos)? as usize;
            if len != raw_len {
                return Err(DeserializeError::corrupt(format!(
                    "raw area of {len} bytes, header says {raw_len}"
                )));
            }
            let bytes = self.data.read_raw(len, pos)?.to_vec();
            self.isolate.update_object(r, |o| o.raw = bytes)?;
        }

        let r = match (self.policy, ty) {
            (DeserializePolicy::Module, ObjectType::String) => self.dedup_string(index, r, space)?,
            _ => r,
        };
        Ok(Decoded::Value(TaggedValue::object(r)))
    }

    fn set_raw(&mut self, r: ObjectRef, index: usize, bits: u64) -> DeserializeResult<()> {
        Ok(self.isolate.set_field(r, index, Field::Raw(bits))?)
    }

    fn reject_in_module(&self, flag: EncodeFlag, offset: usize) -> DeserializeResult<()> {
        if matches!(self.policy, DeserializePolicy::Module) {
            return Err(DeserializeError::InvalidFlag {
                flag: flag.to_u8(),
                offset,
            });
        }
        Ok(())
    }

    fn read_fields(&mut self, r: ObjectRef, count: usize, pos: &mut usize) -> DeserializeResult<()> {
        let mut index = 0;
        while index < count {
            let offset = *pos;
            let flag = self.data.read_flag(pos)?;
            match flag {
                EncodeFlag::MultiRawData => {
                    let len = self.data.read_u32(pos)? as usize;
                    if len % FIELD_SIZE != 0 || index + len / FIELD_SIZE > count {
                        return Err(DeserializeError::corrupt(format!(
                            "raw run of {len} bytes at field {index} of {count}"
                        )));
                    }
                    let words: Vec<u64> = self
                        .data
                        .read_raw(len, pos)?
                        .chunks_exact(FIELD_SIZE)
                        .map(le_u64)
                        .collect();
                    let start = index;
                    self.isolate.update_object(r, |o| {
                        for (i, word) in words.iter().enumerate() {
                            o.fields[start + i] = Field::Raw(*word);
                        }
                    })?;
                    index += words.len();
                }
                EncodeFlag::ArrayBuffer | EncodeFlag::JsRegExp => {
                    self.reject_in_module(flag, offset)?;
                    let len = self.data.read_u32(pos)? as usize;
                    let bytes = self.data.read_raw(len, pos)?.to_vec();
                    let storage = if bytes.is_empty() && flag == EncodeFlag::ArrayBuffer {
                        array_buffer::NO_STORAGE
                    } else {
                        self.isolate.runtime().native().allocate(bytes)
                    };
                    self.set_raw(r, index, storage)?;
                    index += 1;
                }
                EncodeFlag::TransferArrayBuffer | EncodeFlag::SendableArrayBuffer => {
                    self.reject_in_module(flag, offset)?;
                    let storage = self.data.read_u64(pos)?;
                    self.isolate.runtime().native().adopt(storage)?;
                    self.set_raw(r, index, storage)?;
                    index += 1;
                }
                EncodeFlag::SharedArrayBuffer => {
                    self.reject_in_module(flag, offset)?;
                    let storage = self.data.read_u64(pos)?;
                    self.isolate.runtime().shared_memory().retain(storage)?;
                    self.set_raw(r, index, storage)?;
                    index += 1;
                }
                _ => {
                    *pos = offset;
                    match self.read_unit(pos)? {
                        Decoded::Value(value) => self.isolate.set_field(r, index, Field::Tagged(value))?,
                        Decoded::Pending { index: pending, weak } => self.pending.push(PendingSlot {
                            holder: r,
                            field: index,
                            index: pending,
                            weak,
                        }),
                    }
                    index += 1;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred units
    // ------------------------------------------------------------------

    fn defer(&mut self, record: Deferred) -> usize {
        let pending = self.deferred.len();
        self.deferred.push(record);
        self.objects.push(Entry::Pending(pending));
        pending
    }

    fn read_native_binding(&mut self, pos: &mut usize) -> DeserializeResult<Decoded> {
        let attach = self.data.read_u64(pos)?;
        let attach_data = self.data.read_u64(pos)?;
        let hint = self.data.read_u64(pos)?;
        let detached = self.data.read_u64(pos)?;
        let xref = self.data.read_u8(pos)? != 0;
        let args = AttachArgs {
            detached,
            attach_data,
            hint,
        };
        let record = match (self.policy, xref) {
            (DeserializePolicy::Module, _) => {
                return Err(DeserializeError::NotSupported("native binding in module data".into()));
            }
            (DeserializePolicy::InterOp(_), true) => Deferred::XRef(args),
            (_, true) => {
                return Err(DeserializeError::NotSupported(
                    "cross-VM binding without an interop bridge".into(),
                ));
            }
            (_, false) => Deferred::Binding { attach, args },
        };
        Ok(Decoded::pending(self.defer(record)))
    }

    fn read_js_error(&mut self, pos: &mut usize) -> DeserializeResult<Decoded> {
        if matches!(self.policy, DeserializePolicy::Module) {
            return Err(DeserializeError::NotSupported("error object in module data".into()));
        }
        let kind_byte = self.data.read_u8(pos)?;
        let has_message = self.data.read_u8(pos)? != 0;
        let kind = ErrorKind::from_u8(kind_byte)
            .ok_or_else(|| DeserializeError::corrupt(format!("unknown error kind {kind_byte}")))?;
        let pending = self.defer(Deferred::Error {
            kind,
            message: TaggedValue::UNDEFINED,
        });
        if has_message {
            let Decoded::Value(text) = self.read_unit(pos)? else {
                return Err(DeserializeError::corrupt(
                    "error message refers to a deferred unit instead of a shared string",
                ));
            };
            if let Some(Deferred::Error { message, .. }) = self.deferred.get_mut(pending) {
                *message = text;
            }
        }
        Ok(Decoded::pending(pending))
    }

    /// Run foreign callbacks and error construction in stream order
    fn run_deferred(&mut self) -> DeserializeResult<Vec<TaggedValue>> {
        let records = std::mem::take(&mut self.deferred);
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let value = match record {
                Deferred::Binding { attach, args } => {
                    let callback = self.isolate.runtime().callbacks().attach(attach)?;
                    let value = {
                        let _native = self.isolate.native_scope();
                        callback(&mut *self.isolate, &args)
                    };
                    value.ok_or_else(|| {
                        DeserializeError::AttachFailed(format!("attach callback {attach} returned nothing"))
                    })?
                }
                Deferred::XRef(args) => {
                    let DeserializePolicy::InterOp(bridge) = self.policy else {
                        return Err(DeserializeError::NotSupported(
                            "cross-VM binding without an interop bridge".into(),
                        ));
                    };
                    let value = {
                        let _native = self.isolate.native_scope();
                        bridge.attach_xref(&mut *self.isolate, &args)
                    };
                    value.ok_or_else(|| {
                        DeserializeError::AttachFailed("cross-VM attach returned nothing".into())
                    })?
                }
                Deferred::Error { kind, message } => {
                    TaggedValue::object(self.isolate.new_error(kind, message)?)
                }
            };
            results.push(value);
        }
        Ok(results)
    }
}
