//! Snapshot environment
//!
//! Engine intrinsics are created in a fixed order for every isolate, so a
//! position in that order names the same logical object in any isolate of
//! the same build. Serializers emit that position instead of copying the
//! object.

use crate::error::HeapResult;
use crate::heap::Arena;
use crate::object::{FLAG_PROTOTYPE, Field, HeapObject, ObjectType, class_bits, layout};
use crate::space::SpaceKind;
use crate::value::{ObjectRef, TaggedValue};
use rustc_hash::FxHashMap;

/// Isolate-local intrinsics, in environment order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum LocalRoot {
    MetaClass,
    StringClass,
    TaggedArrayClass,
    PrototypeClass,
    ObjectPrototype,
    PlainObjectClass,
    ArrayPrototype,
    ArrayClass,
    ErrorPrototype,
    ErrorClass,
    DateClass,
    MapClass,
    SetClass,
    RegExpClass,
    ArrayBufferClass,
    SharedArrayBufferClass,
    TypedArrayClass,
    NativePointerClass,
    BigIntClass,
    FunctionPrototype,
    FunctionClass,
    AsyncFunctionClass,
    LexicalEnvClass,
    MachineCodeClass,
    ModuleClass,
    ProxyClass,
    EmptyString,
    NativeBindingSymbol,
    NativeBindingClass,
}

impl LocalRoot {
    /// Every local root in environment order
    pub const ALL: [LocalRoot; 29] = [
        LocalRoot::MetaClass,
        LocalRoot::StringClass,
        LocalRoot::TaggedArrayClass,
        LocalRoot::PrototypeClass,
        LocalRoot::ObjectPrototype,
        LocalRoot::PlainObjectClass,
        LocalRoot::ArrayPrototype,
        LocalRoot::ArrayClass,
        LocalRoot::ErrorPrototype,
        LocalRoot::ErrorClass,
        LocalRoot::DateClass,
        LocalRoot::MapClass,
        LocalRoot::SetClass,
        LocalRoot::RegExpClass,
        LocalRoot::ArrayBufferClass,
        LocalRoot::SharedArrayBufferClass,
        LocalRoot::TypedArrayClass,
        LocalRoot::NativePointerClass,
        LocalRoot::BigIntClass,
        LocalRoot::FunctionPrototype,
        LocalRoot::FunctionClass,
        LocalRoot::AsyncFunctionClass,
        LocalRoot::LexicalEnvClass,
        LocalRoot::MachineCodeClass,
        LocalRoot::ModuleClass,
        LocalRoot::ProxyClass,
        LocalRoot::EmptyString,
        LocalRoot::NativeBindingSymbol,
        LocalRoot::NativeBindingClass,
    ];
}

/// Runtime-wide shared intrinsics, following the local ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SharedRoot {
    SharedMetaClass,
    SharedStringClass,
    SharedTaggedArrayClass,
    SharedObjectClass,
    SharedArrayClass,
    SharedMapClass,
    SharedSetClass,
    SendableArrayBufferClass,
    SharedModuleClass,
}

impl SharedRoot {
    /// Every shared root in environment order
    pub const ALL: [SharedRoot; 9] = [
        SharedRoot::SharedMetaClass,
        SharedRoot::SharedStringClass,
        SharedRoot::SharedTaggedArrayClass,
        SharedRoot::SharedObjectClass,
        SharedRoot::SharedArrayClass,
        SharedRoot::SharedMapClass,
        SharedRoot::SharedSetClass,
        SharedRoot::SendableArrayBufferClass,
        SharedRoot::SharedModuleClass,
    ];
}

/// Build a hidden class record
pub(crate) fn class_object(
    meta: TaggedValue,
    instance: ObjectType,
    proto: TaggedValue,
    keys: TaggedValue,
    flags: u64,
) -> HeapObject {
    let mut fields = vec![Field::Tagged(TaggedValue::UNDEFINED); layout::class::COUNT - 1];
    fields[layout::class::PROTO - 1] = Field::Tagged(proto);
    fields[layout::class::LAYOUT - 1] = Field::Tagged(keys);
    fields[layout::class::BITFIELD - 1] = Field::Raw(class_bits::encode(instance, flags));
    HeapObject::new(ObjectType::HiddenClass, meta, fields, Vec::new())
}

fn string_object(class: TaggedValue, text: &str) -> HeapObject {
    HeapObject::new(ObjectType::String, class, Vec::new(), text.as_bytes().to_vec())
}

/// Create the local intrinsics in [`LocalRoot::ALL`] order
pub(crate) fn build_local_roots(arena: &mut Arena) -> HeapResult<Vec<ObjectRef>> {
    let space = SpaceKind::NonMovable;
    let mut roots = Vec::with_capacity(LocalRoot::ALL.len());

    let meta = arena.allocate(
        space,
        class_object(
            TaggedValue::UNDEFINED,
            ObjectType::HiddenClass,
            TaggedValue::NULL,
            TaggedValue::UNDEFINED,
            0,
        ),
    )?;
    arena.update(meta, |obj| {
        obj.fields[layout::CLASS] = Field::Tagged(TaggedValue::object(meta));
    })?;
    let meta_v = TaggedValue::object(meta);
    roots.push(meta);

    let class = |arena: &mut Arena, instance, proto, keys, flags| {
        arena.allocate(space, class_object(meta_v, instance, proto, keys, flags))
    };

    let string_class = class(arena, ObjectType::String, TaggedValue::NULL, TaggedValue::UNDEFINED, 0)?;
    let tagged_array_class =
        class(arena, ObjectType::TaggedArray, TaggedValue::NULL, TaggedValue::UNDEFINED, 0)?;
    let prototype_class = class(
        arena,
        ObjectType::PlainObject,
        TaggedValue::NULL,
        TaggedValue::UNDEFINED,
        class_bits::IS_PROTOTYPE,
    )?;
    roots.extend([string_class, tagged_array_class, prototype_class]);

    let prototype = |arena: &mut Arena| {
        let mut obj = HeapObject::new(
            ObjectType::PlainObject,
            TaggedValue::object(prototype_class),
            Vec::new(),
            Vec::new(),
        );
        obj.flags |= FLAG_PROTOTYPE;
        arena.allocate(space, obj)
    };

    let object_proto = prototype(arena)?;
    let object_proto_v = TaggedValue::object(object_proto);
    let plain_object_class =
        class(arena, ObjectType::PlainObject, object_proto_v, TaggedValue::UNDEFINED, 0)?;
    roots.extend([object_proto, plain_object_class]);
    for instance in [ObjectType::Array, ObjectType::Error] {
        let proto = prototype(arena)?;
        let instance_class =
            class(arena, instance, TaggedValue::object(proto), TaggedValue::UNDEFINED, 0)?;
        roots.extend([proto, instance_class]);
    }

    for instance in [
        ObjectType::Date,
        ObjectType::Map,
        ObjectType::Set,
        ObjectType::RegExp,
        ObjectType::ArrayBuffer,
        ObjectType::SharedArrayBuffer,
        ObjectType::TypedArray,
        ObjectType::NativePointer,
        ObjectType::BigInt,
    ] {
        roots.push(class(arena, instance, object_proto_v, TaggedValue::UNDEFINED, 0)?);
    }

    let function_proto = prototype(arena)?;
    roots.push(function_proto);
    for instance in [ObjectType::Function, ObjectType::AsyncFunction] {
        roots.push(class(
            arena,
            instance,
            TaggedValue::object(function_proto),
            TaggedValue::UNDEFINED,
            0,
        )?);
    }
    for instance in [
        ObjectType::LexicalEnv,
        ObjectType::MachineCode,
        ObjectType::Module,
        ObjectType::Proxy,
    ] {
        roots.push(class(arena, instance, TaggedValue::NULL, TaggedValue::UNDEFINED, 0)?);
    }

    let string_class_v = TaggedValue::object(string_class);
    roots.push(arena.allocate(space, string_object(string_class_v, ""))?);
    let symbol = arena.allocate(space, string_object(string_class_v, "Symbol(native_binding)"))?;
    roots.push(symbol);

    let keys = arena.allocate(
        space,
        HeapObject::new(
            ObjectType::TaggedArray,
            TaggedValue::object(tagged_array_class),
            vec![Field::Tagged(TaggedValue::object(symbol))],
            Vec::new(),
        ),
    )?;
    roots.push(class(
        arena,
        ObjectType::PlainObject,
        object_proto_v,
        TaggedValue::object(keys),
        class_bits::IS_NATIVE_BINDING,
    )?);

    debug_assert_eq!(roots.len(), LocalRoot::ALL.len());
    Ok(roots)
}

/// Create the shared intrinsics in [`SharedRoot::ALL`] order
pub(crate) fn build_shared_roots(arena: &mut Arena) -> HeapResult<Vec<ObjectRef>> {
    let space = SpaceKind::SharedNonMovable;
    let shared = class_bits::IS_SHARED;
    let meta = arena.allocate(
        space,
        class_object(
            TaggedValue::UNDEFINED,
            ObjectType::HiddenClass,
            TaggedValue::NULL,
            TaggedValue::UNDEFINED,
            shared,
        ),
    )?;
    arena.update(meta, |obj| {
        obj.fields[layout::CLASS] = Field::Tagged(TaggedValue::object(meta));
    })?;
    let mut roots = vec![meta];
    for instance in [
        ObjectType::String,
        ObjectType::TaggedArray,
        ObjectType::SharedObject,
        ObjectType::SharedArray,
        ObjectType::SharedMap,
        ObjectType::SharedSet,
        ObjectType::SendableArrayBuffer,
        ObjectType::Module,
    ] {
        roots.push(arena.allocate(
            space,
            class_object(
                TaggedValue::object(meta),
                instance,
                TaggedValue::NULL,
                TaggedValue::UNDEFINED,
                shared,
            ),
        )?);
    }
    debug_assert_eq!(roots.len(), SharedRoot::ALL.len());
    Ok(roots)
}

/// Index table of well-known objects
#[derive(Debug, Clone, Default)]
pub struct SnapshotEnv {
    roots: Vec<ObjectRef>,
    index: FxHashMap<ObjectRef, u32>,
}

impl SnapshotEnv {
    /// Build from local roots followed by shared roots
    pub fn new(local: &[ObjectRef], shared: &[ObjectRef]) -> Self {
        let roots: Vec<ObjectRef> = local.iter().chain(shared).copied().collect();
        let index = roots
            .iter()
            .enumerate()
            .map(|(i, r)| (*r, i as u32))
            .collect();
        Self { roots, index }
    }

    /// Environment index of `r`, if it is an intrinsic
    pub fn root_index(&self, r: ObjectRef) -> Option<u32> {
        self.index.get(&r).copied()
    }

    /// Intrinsic at `index`
    pub fn root(&self, index: u32) -> Option<ObjectRef> {
        self.roots.get(index as usize).copied()
    }

    /// Number of intrinsics
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
