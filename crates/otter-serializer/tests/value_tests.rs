//! Value serializer tests
//!
//! Values are written in one isolate and read back in another isolate of
//! the same runtime unless a test says otherwise.

use otter_heap::object::{FLAG_PROTOTYPE, layout};
use otter_heap::{
    CollectorKind, ErrorKind, Field, HeapConfig, HeapObject, Isolate, NativeBindingInfo,
    ObjectRef, ObjectType, Runtime, SpaceKind, TaggedValue,
};
use otter_serializer::{
    BaseDeserializer, DeserializeError, EncodeFlag, SerializeConfig, SerializeData,
    SerializeError, SerializedObjectSpace, ValueSerializer,
};
use std::sync::Arc;

const UNDEFINED: TaggedValue = TaggedValue::UNDEFINED;

fn isolates() -> (Arc<Runtime>, Isolate, Isolate) {
    let runtime = Runtime::new().unwrap();
    let a = runtime.new_isolate().unwrap();
    let b = runtime.new_isolate().unwrap();
    (runtime, a, b)
}

fn write(isolate: &mut Isolate, value: TaggedValue) -> SerializeData {
    let mut serializer = ValueSerializer::new(isolate);
    serializer.write_value(value, UNDEFINED, UNDEFINED).unwrap();
    serializer.release()
}

fn read(isolate: &mut Isolate, data: &mut SerializeData) -> TaggedValue {
    BaseDeserializer::new(isolate, data).read_value().unwrap()
}

fn object_of(value: TaggedValue) -> ObjectRef {
    value.as_object().expect("heap object")
}

fn property(isolate: &Isolate, obj: ObjectRef, key: &str) -> TaggedValue {
    isolate.get_property(obj, key).unwrap().expect("property present")
}

// ============================================================================
// Object graphs
// ============================================================================

#[test]
fn test_self_reference_stream_layout() {
    let (_runtime, mut a, mut b) = isolates();
    let obj = a.new_plain_object().unwrap();
    a.set_property(obj, "a", TaggedValue::int(1)).unwrap();
    a.set_property(obj, "b", TaggedValue::object(obj)).unwrap();

    let mut data = write(&mut a, TaggedValue::object(obj));
    let bytes = data.as_bytes();
    assert_eq!(bytes[0], EncodeFlag::NewObject(SerializedObjectSpace::Old).to_u8());
    let size = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
    assert_eq!(size, HeapObject::size_for(3, 0));
    assert_eq!(bytes[5], ObjectType::PlainObject as u8);

    let mut tail = vec![EncodeFlag::Primitive.to_u8()];
    tail.extend_from_slice(&TaggedValue::int(1).raw().to_le_bytes());
    tail.push(EncodeFlag::Reference.to_u8());
    tail.extend_from_slice(&0u32.to_le_bytes());
    assert!(bytes.ends_with(&tail));

    let copy = object_of(read(&mut b, &mut data));
    assert_eq!(property(&b, copy, "a"), TaggedValue::int(1));
    assert_eq!(property(&b, copy, "b"), TaggedValue::object(copy));
    assert_eq!(b.space_of(copy).unwrap(), SpaceKind::Old);
}

#[test]
fn test_shared_subgraph_decoded_once() {
    let (_runtime, mut a, mut b) = isolates();
    let inner = a.new_plain_object().unwrap();
    a.set_property(inner, "n", TaggedValue::int(7)).unwrap();
    let outer = a.new_plain_object().unwrap();
    a.set_property(outer, "x", TaggedValue::object(inner)).unwrap();
    a.set_property(outer, "y", TaggedValue::object(inner)).unwrap();

    let mut data = write(&mut a, TaggedValue::object(outer));
    let copy = object_of(read(&mut b, &mut data));
    let x = property(&b, copy, "x");
    assert_eq!(x, property(&b, copy, "y"));
    assert_eq!(property(&b, object_of(x), "n"), TaggedValue::int(7));
}

#[test]
fn test_primitive_root() {
    let (_runtime, mut a, mut b) = isolates();
    let mut data = write(&mut a, TaggedValue::int(42));
    assert_eq!(data.len(), 9);
    assert_eq!(read(&mut b, &mut data), TaggedValue::int(42));
}

#[test]
fn test_builtin_kinds_round_trip() {
    let (_runtime, mut a, mut b) = isolates();
    let re = a.new_regexp("a+b", "g", vec![1, 2, 3]).unwrap();
    let date = a.new_date(1234.5).unwrap();
    let text = a.new_string("x").unwrap();
    let map = a.new_map(&[(TaggedValue::int(1), TaggedValue::object(text))]).unwrap();
    let buffer = a.new_array_buffer_from(vec![9, 8, 7, 6]).unwrap();
    let view = a.new_typed_array(buffer, 1, 2, 1).unwrap();
    let big = a.new_bigint(true, &[1, 2]).unwrap();
    let big_raw = a.with_object(big, |o| o.raw.clone()).unwrap();

    let obj = a.new_plain_object().unwrap();
    for (key, r) in [("re", re), ("date", date), ("map", map), ("view", view), ("big", big)] {
        a.set_property(obj, key, TaggedValue::object(r)).unwrap();
    }
    a.set_property(obj, "pi", TaggedValue::double(3.25)).unwrap();

    let mut data = write(&mut a, TaggedValue::object(obj));
    let copy = object_of(read(&mut b, &mut data));

    let re = object_of(property(&b, copy, "re"));
    assert_eq!(b.regexp_bytecode(re).unwrap(), vec![1, 2, 3]);
    let date = object_of(property(&b, copy, "date"));
    assert_eq!(b.date_value(date).unwrap(), 1234.5);

    let map = object_of(property(&b, copy, "map"));
    let entries = b.collection_elements(map).unwrap();
    assert_eq!(entries[0], TaggedValue::int(1));
    assert_eq!(b.string_of(entries[1]).as_deref(), Some("x"));

    let view = object_of(property(&b, copy, "view"));
    let (buffer, offset) = b
        .with_object(view, |o| (o.tagged(layout::typed_array::BUFFER), o.raw_field(layout::typed_array::BYTE_OFFSET)))
        .unwrap();
    assert_eq!(offset, 1);
    assert_eq!(b.array_buffer_bytes(object_of(buffer)).unwrap(), vec![9, 8, 7, 6]);

    let big = object_of(property(&b, copy, "big"));
    assert_eq!(b.with_object(big, |o| o.raw.clone()).unwrap(), big_raw);
    assert_eq!(property(&b, copy, "pi"), TaggedValue::double(3.25));
}

#[test]
fn test_weak_slot_round_trip() {
    let (_runtime, mut a, mut b) = isolates();
    let target = a.new_plain_object().unwrap();
    let array = a
        .new_tagged_array(&[TaggedValue::weak_object(target), TaggedValue::object(target)])
        .unwrap();

    let mut data = write(&mut a, TaggedValue::object(array));
    let copy = object_of(read(&mut b, &mut data));
    let elements = b.tagged_array_elements(copy).unwrap();
    assert!(elements[0].is_weak());
    assert!(!elements[1].is_weak());
    assert_eq!(elements[0].to_strong(), elements[1]);
}

#[test]
fn test_prototype_flag_restored() {
    let (_runtime, mut a, mut b) = isolates();
    let obj = a.new_plain_object().unwrap();
    a.set_property(obj, "x", TaggedValue::int(1)).unwrap();
    let class = object_of(a.with_object(obj, |o| o.class()).unwrap());
    let proto = a.new_plain_object().unwrap();
    a.set_field(class, layout::class::PROTO, Field::Tagged(TaggedValue::object(proto)))
        .unwrap();

    let mut data = write(&mut a, TaggedValue::object(obj));
    let copy = object_of(read(&mut b, &mut data));
    let class = object_of(b.with_object(copy, |o| o.class()).unwrap());
    let proto = object_of(b.with_object(class, |o| o.tagged(layout::class::PROTO)).unwrap());
    assert!(b.with_object(proto, |o| o.has_flag(FLAG_PROTOTYPE)).unwrap());
    assert!(!b.with_object(copy, |o| o.has_flag(FLAG_PROTOTYPE)).unwrap());
}

#[test]
fn test_transition_links_not_serialized() {
    let (_runtime, mut a, mut b) = isolates();
    let obj = a.new_plain_object().unwrap();
    a.set_property(obj, "k", TaggedValue::int(3)).unwrap();

    let mut data = write(&mut a, TaggedValue::object(obj));
    let copy = object_of(read(&mut b, &mut data));
    let class = object_of(b.with_object(copy, |o| o.class()).unwrap());
    let parent = b.with_object(class, |o| o.tagged(layout::class::PARENT)).unwrap();
    assert!(parent.is_undefined());
    assert_eq!(b.space_of(class).unwrap(), SpaceKind::NonMovable);
    assert_eq!(property(&b, copy, "k"), TaggedValue::int(3));
}

// ============================================================================
// Region layout
// ============================================================================

fn small_region_runtime(collector: CollectorKind) -> Arc<Runtime> {
    Runtime::with_config(HeapConfig {
        region_size: 1024,
        huge_object_threshold: 512,
        collector,
        ..HeapConfig::default()
    })
    .unwrap()
}

#[test]
fn test_objects_cross_regions_in_stream_order() {
    for collector in [CollectorKind::Regional, CollectorKind::Compacting] {
        let runtime = small_region_runtime(collector);
        let mut a = runtime.new_isolate().unwrap();
        let mut b = runtime.new_isolate().unwrap();

        let texts: Vec<String> = (0..60).map(|i| format!("{i:03}-{}", "s".repeat(36))).collect();
        let array = a.new_array(&[]).unwrap();
        for text in &texts {
            let s = a.new_string(text).unwrap();
            a.array_push(array, TaggedValue::object(s)).unwrap();
        }
        let big = a.new_string(&"h".repeat(700)).unwrap();
        a.array_push(array, TaggedValue::object(big)).unwrap();

        let mut data = write(&mut a, TaggedValue::object(array));
        assert!(!data.remain_sizes(0).is_empty());
        assert!(data.space_size(SerializedObjectSpace::Huge) > 0);

        let copy = object_of(read(&mut b, &mut data));
        let elements = b.collection_elements(copy).unwrap();
        assert_eq!(elements.len(), texts.len() + 1);
        for (value, text) in elements.iter().zip(&texts) {
            assert_eq!(b.string_of(*value).as_deref(), Some(text.as_str()));
        }
        let last = object_of(elements[texts.len()]);
        assert_eq!(b.space_of(last).unwrap(), SpaceKind::Huge);
    }
}

#[test]
fn test_mismatched_region_tail_is_corrupt() {
    let runtime = small_region_runtime(CollectorKind::Regional);
    let mut a = runtime.new_isolate().unwrap();
    let mut b = runtime.new_isolate().unwrap();
    let array = a.new_array(&[]).unwrap();
    for i in 0..40 {
        let s = a.new_string(&format!("{i:02}{}", "t".repeat(40))).unwrap();
        a.array_push(array, TaggedValue::object(s)).unwrap();
    }
    let data = write(&mut a, TaggedValue::object(array));

    let mut remain: [Vec<u64>; 5] = Default::default();
    for (pool, sizes) in remain.iter_mut().enumerate() {
        *sizes = data.remain_sizes(pool).to_vec();
    }
    assert!(!remain[0].is_empty());
    remain[0][0] += 8;
    let mut tampered = SerializeData::from_parts(
        Arc::clone(&runtime),
        data.as_bytes().to_vec(),
        data.size_group(),
        remain,
        data.size_limit(),
        None,
    );
    let err = BaseDeserializer::new(&mut b, &mut tampered).read_value().unwrap_err();
    assert!(matches!(err, DeserializeError::CorruptLayout(_)));
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
fn test_size_limit_marks_incomplete() {
    let (_runtime, mut a, mut b) = isolates();
    let text = a.new_string(&"z".repeat(200)).unwrap();
    let config = SerializeConfig {
        size_limit: 64,
        initial_capacity: 64,
    };
    let mut serializer = ValueSerializer::with_config(&mut a, config, false, false);
    let err = serializer
        .write_value(TaggedValue::object(text), UNDEFINED, UNDEFINED)
        .unwrap_err();
    assert!(matches!(err, SerializeError::SizeLimitExceeded { .. }));
    let mut data = serializer.release();
    assert!(data.is_incomplete());

    let err = BaseDeserializer::new(&mut b, &mut data).read_value().unwrap_err();
    assert!(matches!(err, DeserializeError::IncompleteData));
}

#[test]
fn test_function_in_graph_rejected() {
    let (_runtime, mut a, _b) = isolates();
    let f = a.new_function("f", UNDEFINED, None, UNDEFINED).unwrap();
    let obj = a.new_plain_object().unwrap();
    a.set_property(obj, "f", TaggedValue::object(f)).unwrap();

    let mut serializer = ValueSerializer::new(&mut a);
    let err = serializer
        .write_value(TaggedValue::object(obj), UNDEFINED, UNDEFINED)
        .unwrap_err();
    assert!(matches!(err, SerializeError::NotSupported(_)));
    assert!(serializer.data().is_incomplete());
}

#[test]
fn test_native_pointer_rejected() {
    let (_runtime, mut a, _b) = isolates();
    let pointer = a.new_native_pointer(0xdead).unwrap();
    let mut serializer = ValueSerializer::new(&mut a);
    let err = serializer
        .write_value(TaggedValue::object(pointer), UNDEFINED, UNDEFINED)
        .unwrap_err();
    assert!(matches!(err, SerializeError::NotSupported(_)));
}

#[test]
fn test_binding_without_detach_rejected() {
    let (runtime, mut a, _b) = isolates();
    let attach = runtime.callbacks().register_attach(|_, _| Some(TaggedValue::int(0)));
    let binding = a
        .new_native_binding_object(NativeBindingInfo {
            attach: Some(attach),
            ..NativeBindingInfo::default()
        })
        .unwrap();
    let mut serializer = ValueSerializer::new(&mut a);
    let err = serializer
        .write_value(TaggedValue::object(binding), UNDEFINED, UNDEFINED)
        .unwrap_err();
    assert!(matches!(err, SerializeError::NotSupported(_)));
}

#[test]
fn test_detached_buffer_rejected() {
    let (_runtime, mut a, _b) = isolates();
    let buffer = a.new_array_buffer_from(vec![1]).unwrap();
    a.detach_array_buffer(buffer).unwrap();
    let mut serializer = ValueSerializer::new(&mut a);
    let err = serializer
        .write_value(TaggedValue::object(buffer), UNDEFINED, UNDEFINED)
        .unwrap_err();
    assert!(matches!(err, SerializeError::DetachedBuffer));
}

#[test]
fn test_invalid_transfer_lists() {
    let (_runtime, mut a, _b) = isolates();
    let plain = a.new_plain_object().unwrap();
    let not_buffers = a.new_array(&[TaggedValue::object(plain)]).unwrap();

    for transfer in [TaggedValue::object(plain), TaggedValue::object(not_buffers)] {
        let mut serializer = ValueSerializer::new(&mut a);
        let err = serializer.write_value(TaggedValue::int(1), transfer, UNDEFINED).unwrap_err();
        assert!(matches!(err, SerializeError::InvalidTransferList(_)));
    }
}

#[test]
fn test_invalid_clone_list() {
    let (_runtime, mut a, _b) = isolates();
    let plain = a.new_plain_object().unwrap();
    let clone = a.new_array(&[TaggedValue::object(plain)]).unwrap();
    let mut serializer = ValueSerializer::new(&mut a);
    let err = serializer
        .write_value(TaggedValue::int(1), UNDEFINED, TaggedValue::object(clone))
        .unwrap_err();
    assert!(matches!(err, SerializeError::InvalidCloneList(_)));
}

#[test]
fn test_buffer_in_transfer_and_clone_lists() {
    let (_runtime, mut a, _b) = isolates();
    let buffer = a.new_array_buffer_from(vec![1, 2]).unwrap();
    let transfer = a.new_array(&[TaggedValue::object(buffer)]).unwrap();
    let clone = a.new_array(&[TaggedValue::object(buffer)]).unwrap();
    let mut serializer = ValueSerializer::new(&mut a);
    let err = serializer
        .write_value(
            TaggedValue::object(buffer),
            TaggedValue::object(transfer),
            TaggedValue::object(clone),
        )
        .unwrap_err();
    assert!(matches!(err, SerializeError::InvalidTransferList(_)));
}

#[test]
fn test_unknown_flag_rejected() {
    let (runtime, _a, mut b) = isolates();
    let mut data = SerializeData::from_parts(
        runtime,
        vec![0xFF],
        [0; otter_serializer::SIZE_GROUP_LEN],
        Default::default(),
        1024,
        None,
    );
    let err = BaseDeserializer::new(&mut b, &mut data).read_value().unwrap_err();
    assert!(matches!(err, DeserializeError::InvalidFlag { flag: 0xFF, offset: 0 }));
}

#[test]
fn test_truncated_stream() {
    let (_runtime, mut a, mut b) = isolates();
    let obj = a.new_plain_object().unwrap();
    a.set_property(obj, "k", TaggedValue::int(1)).unwrap();
    let data = write(&mut a, TaggedValue::object(obj));

    let bytes = data.as_bytes();
    let mut truncated = SerializeData::from_parts(
        Arc::clone(data.runtime()),
        bytes[..bytes.len() - 3].to_vec(),
        data.size_group(),
        Default::default(),
        data.size_limit(),
        None,
    );
    let err = BaseDeserializer::new(&mut b, &mut truncated).read_value().unwrap_err();
    assert!(matches!(err, DeserializeError::UnexpectedEnd(_)));
}

// ============================================================================
// Array buffers
// ============================================================================

#[test]
fn test_transfer_moves_storage() {
    let (runtime, mut a, mut b) = isolates();
    let buffer = a.new_array_buffer_from(vec![1, 2, 3]).unwrap();
    let storage = a.array_buffer_storage(buffer).unwrap();
    let transfer = a.new_array(&[TaggedValue::object(buffer)]).unwrap();

    let mut serializer = ValueSerializer::new(&mut a);
    serializer
        .write_value(TaggedValue::object(buffer), TaggedValue::object(transfer), UNDEFINED)
        .unwrap();
    let mut data = serializer.release();
    assert!(a.is_detached(buffer).unwrap());
    assert_eq!(a.array_buffer_len(buffer).unwrap(), 0);
    assert_eq!(data.transferred(), &[storage]);

    let copy = object_of(read(&mut b, &mut data));
    assert_eq!(b.array_buffer_storage(copy).unwrap(), storage);
    assert_eq!(b.array_buffer_bytes(copy).unwrap(), vec![1, 2, 3]);

    drop(data);
    assert!(runtime.native().contains(storage));
    assert!(runtime.native().adopt(storage).is_err());
}

#[test]
fn test_unread_transfer_freed_on_drop() {
    let (runtime, mut a, _b) = isolates();
    let buffer = a.new_array_buffer_from(vec![5; 16]).unwrap();
    let storage = a.array_buffer_storage(buffer).unwrap();
    let transfer = a.new_array(&[TaggedValue::object(buffer)]).unwrap();

    let mut serializer = ValueSerializer::new(&mut a);
    serializer
        .write_value(TaggedValue::object(buffer), TaggedValue::object(transfer), UNDEFINED)
        .unwrap();
    let data = serializer.release();
    assert!(runtime.native().contains(storage));
    drop(data);
    assert!(!runtime.native().contains(storage));
}

#[test]
fn test_empty_buffer_cloned() {
    let (_runtime, mut a, mut b) = isolates();
    let buffer = a.new_array_buffer(0).unwrap();
    let mut data = write(&mut a, TaggedValue::object(buffer));
    assert!(!a.is_detached(buffer).unwrap());

    let copy = object_of(read(&mut b, &mut data));
    assert_eq!(b.array_buffer_len(copy).unwrap(), 0);
    assert!(b.array_buffer_bytes(copy).unwrap().is_empty());
}

#[test]
fn test_empty_buffer_in_transfer_list_detached() {
    let (_runtime, mut a, mut b) = isolates();
    let buffer = a.new_array_buffer(0).unwrap();
    let transfer = a.new_array(&[TaggedValue::object(buffer)]).unwrap();

    let mut serializer = ValueSerializer::new(&mut a);
    serializer
        .write_value(TaggedValue::object(buffer), TaggedValue::object(transfer), UNDEFINED)
        .unwrap();
    let mut data = serializer.release();
    assert!(a.is_detached(buffer).unwrap());
    assert!(data.transferred().is_empty());

    let copy = object_of(read(&mut b, &mut data));
    assert!(!b.is_detached(copy).unwrap());
    assert_eq!(b.array_buffer_len(copy).unwrap(), 0);
}

#[test]
fn test_empty_buffer_default_transfer_detached() {
    let (_runtime, mut a, mut b) = isolates();
    let buffer = a.new_array_buffer(0).unwrap();
    let mut serializer = ValueSerializer::with_default_transfer(&mut a);
    serializer.write_value(TaggedValue::object(buffer), UNDEFINED, UNDEFINED).unwrap();
    let mut data = serializer.release();
    assert!(a.is_detached(buffer).unwrap());

    let copy = object_of(read(&mut b, &mut data));
    assert_eq!(b.array_buffer_len(copy).unwrap(), 0);
}

#[test]
fn test_external_buffer_clone_rejected() {
    let (_runtime, mut a, _b) = isolates();
    let buffer = a.new_external_array_buffer(vec![1, 2]).unwrap();
    let mut serializer = ValueSerializer::new(&mut a);
    let err = serializer
        .write_value(TaggedValue::object(buffer), UNDEFINED, UNDEFINED)
        .unwrap_err();
    assert!(matches!(err, SerializeError::ExternalBuffer));
    assert!(!a.is_detached(buffer).unwrap());
}

#[test]
fn test_default_transfer_moves_external_buffer() {
    let (_runtime, mut a, mut b) = isolates();
    let buffer = a.new_external_array_buffer(vec![4, 5]).unwrap();
    let mut serializer = ValueSerializer::with_default_transfer(&mut a);
    serializer.write_value(TaggedValue::object(buffer), UNDEFINED, UNDEFINED).unwrap();
    let mut data = serializer.release();
    assert!(a.is_detached(buffer).unwrap());

    let copy = object_of(read(&mut b, &mut data));
    assert_eq!(b.array_buffer_bytes(copy).unwrap(), vec![4, 5]);
}

#[test]
fn test_clone_list_overrides_default_transfer() {
    let (_runtime, mut a, mut b) = isolates();
    let buffer = a.new_array_buffer_from(vec![8, 9]).unwrap();
    let clone = a.new_array(&[TaggedValue::object(buffer)]).unwrap();
    let mut serializer = ValueSerializer::with_default_transfer(&mut a);
    serializer
        .write_value(TaggedValue::object(buffer), UNDEFINED, TaggedValue::object(clone))
        .unwrap();
    let mut data = serializer.release();
    assert!(!a.is_detached(buffer).unwrap());

    let copy = object_of(read(&mut b, &mut data));
    assert_ne!(b.array_buffer_storage(copy).unwrap(), a.array_buffer_storage(buffer).unwrap());
    assert_eq!(b.array_buffer_bytes(copy).unwrap(), vec![8, 9]);
}

#[test]
fn test_shared_array_buffer_shares_memory() {
    let runtime = Runtime::new().unwrap();
    let mut a = runtime.new_isolate().unwrap();
    let mut b = runtime.new_isolate().unwrap();
    let mut c = runtime.new_isolate().unwrap();
    let sab = a.new_shared_array_buffer(vec![0; 4]).unwrap();
    let storage = a.array_buffer_storage(sab).unwrap();

    let mut data = write(&mut a, TaggedValue::object(sab));
    assert_eq!(runtime.shared_memory().ref_count(storage), 2);
    let in_b = object_of(read(&mut b, &mut data));
    let in_c = object_of(read(&mut c, &mut data));
    assert_eq!(runtime.shared_memory().ref_count(storage), 4);

    b.write_array_buffer(in_b, 0, &[7]).unwrap();
    assert_eq!(c.array_buffer_bytes(in_c).unwrap()[0], 7);
    assert_eq!(a.array_buffer_bytes(sab).unwrap()[0], 7);

    drop(data);
    assert_eq!(runtime.shared_memory().ref_count(storage), 3);
}

// ============================================================================
// Shared objects
// ============================================================================

#[test]
fn test_shared_object_passed_by_reference() {
    let (runtime, mut a, mut b) = isolates();
    let shared = a.new_shared_object().unwrap();
    a.set_property(shared, "n", TaggedValue::int(3)).unwrap();

    let mut data = write(&mut a, TaggedValue::object(shared));
    let index = data.data_index().expect("shared roots published");
    assert!(runtime.root_registry().get(index).is_some());

    let copy = read(&mut b, &mut data);
    assert_eq!(copy, TaggedValue::object(shared));
    assert!(runtime.root_registry().get(index).is_none());
    assert_eq!(data.data_index(), None);
}

#[test]
fn test_shared_roots_released_on_drop() {
    let (runtime, mut a, _b) = isolates();
    let shared = a.new_shared_object().unwrap();
    let data = write(&mut a, TaggedValue::object(shared));
    let index = data.data_index().unwrap();
    drop(data);
    assert!(runtime.root_registry().get(index).is_none());
}

#[test]
fn test_clone_shared_copies_object() {
    let (_runtime, mut a, mut b) = isolates();
    let shared = a.new_shared_object().unwrap();
    a.set_property(shared, "n", TaggedValue::int(3)).unwrap();

    let mut serializer = ValueSerializer::with_clone_shared(&mut a);
    serializer.write_value(TaggedValue::object(shared), UNDEFINED, UNDEFINED).unwrap();
    let mut data = serializer.release();

    let copy = object_of(read(&mut b, &mut data));
    assert_ne!(copy, shared);
    assert!(copy.is_shared());
    assert_eq!(property(&b, copy, "n"), TaggedValue::int(3));
}

// ============================================================================
// Native bindings and errors
// ============================================================================

#[test]
fn test_native_binding_detach_and_attach() {
    let (runtime, mut a, mut b) = isolates();
    let detach = runtime.callbacks().register_detach(|args| args.native * 10);
    let attach = runtime.callbacks().register_attach(|isolate, args| {
        assert!(!isolate.is_managed());
        let _managed = isolate.managed_scope();
        let obj = isolate.new_plain_object().ok()?;
        isolate
            .set_property(obj, "detached", TaggedValue::int(args.detached as i32))
            .ok()?;
        isolate
            .set_property(obj, "data", TaggedValue::int(args.attach_data as i32))
            .ok()?;
        Some(TaggedValue::object(obj))
    });
    let binding = a
        .new_native_binding_object(NativeBindingInfo {
            attach: Some(attach),
            detach: Some(detach),
            native: 4,
            attach_data: 5,
            hint: 0,
            xref: false,
        })
        .unwrap();
    let holder = a.new_plain_object().unwrap();
    a.set_property(holder, "first", TaggedValue::object(binding)).unwrap();
    a.set_property(holder, "second", TaggedValue::object(binding)).unwrap();

    let mut data = write(&mut a, TaggedValue::object(holder));
    let copy = object_of(read(&mut b, &mut data));
    assert!(b.is_managed());

    let first = property(&b, copy, "first");
    assert_eq!(first, property(&b, copy, "second"));
    let first = object_of(first);
    assert_eq!(property(&b, first, "detached"), TaggedValue::int(40));
    assert_eq!(property(&b, first, "data"), TaggedValue::int(5));
}

#[test]
fn test_weak_binding_and_error_round_trip() {
    let (runtime, mut a, mut b) = isolates();
    let detach = runtime.callbacks().register_detach(|args| args.native);
    let attach = runtime.callbacks().register_attach(|isolate, _| {
        let _managed = isolate.managed_scope();
        isolate.new_plain_object().ok().map(TaggedValue::object)
    });
    let binding = a
        .new_native_binding_object(NativeBindingInfo {
            attach: Some(attach),
            detach: Some(detach),
            native: 1,
            ..NativeBindingInfo::default()
        })
        .unwrap();
    let error = a.new_error_with_message(ErrorKind::TypeError, "weak").unwrap();
    // strong then weak for the binding, weak then strong for the error
    let array = a
        .new_tagged_array(&[
            TaggedValue::object(binding),
            TaggedValue::weak_object(binding),
            TaggedValue::weak_object(error),
            TaggedValue::object(error),
        ])
        .unwrap();

    let mut data = write(&mut a, TaggedValue::object(array));
    let copy = object_of(read(&mut b, &mut data));
    let elements = b.tagged_array_elements(copy).unwrap();

    assert!(!elements[0].is_weak());
    assert!(elements[1].is_weak());
    assert_eq!(elements[1].to_strong(), elements[0]);

    assert!(elements[2].is_weak());
    assert!(!elements[3].is_weak());
    assert_eq!(elements[2].to_strong(), elements[3]);
    let error = object_of(elements[3]);
    assert_eq!(b.error_message(error).unwrap().as_deref(), Some("weak"));
}

#[test]
fn test_weak_binding_root_round_trip() {
    let (runtime, mut a, mut b) = isolates();
    let detach = runtime.callbacks().register_detach(|_| 0);
    let attach = runtime.callbacks().register_attach(|isolate, _| {
        let _managed = isolate.managed_scope();
        isolate.new_plain_object().ok().map(TaggedValue::object)
    });
    let binding = a
        .new_native_binding_object(NativeBindingInfo {
            attach: Some(attach),
            detach: Some(detach),
            ..NativeBindingInfo::default()
        })
        .unwrap();

    let mut data = write(&mut a, TaggedValue::weak_object(binding));
    let value = read(&mut b, &mut data);
    assert!(value.is_weak());
    assert_eq!(b.object_type(object_of(value.to_strong())).unwrap(), ObjectType::PlainObject);
}

#[test]
fn test_error_message_referring_to_deferred_unit_rejected() {
    let (runtime, mut a, mut b) = isolates();
    let detach = runtime.callbacks().register_detach(|_| 0);
    let attach = runtime.callbacks().register_attach(|_, _| Some(TaggedValue::int(0)));
    let binding = a
        .new_native_binding_object(NativeBindingInfo {
            attach: Some(attach),
            detach: Some(detach),
            ..NativeBindingInfo::default()
        })
        .unwrap();
    let error = a.new_error_with_message(ErrorKind::Error, "m").unwrap();
    let array = a
        .new_tagged_array(&[TaggedValue::object(binding), TaggedValue::object(error)])
        .unwrap();
    let data = write(&mut a, TaggedValue::object(array));

    // point the error's message unit at the binding instead of the shared string
    let mut bytes = data.as_bytes().to_vec();
    let error_at = bytes
        .iter()
        .rposition(|&byte| byte == EncodeFlag::JsError.to_u8())
        .unwrap();
    let message_at = error_at + 3;
    assert_eq!(bytes[message_at], EncodeFlag::SharedObject.to_u8());
    bytes[message_at] = EncodeFlag::Reference.to_u8();
    bytes[message_at + 1..message_at + 5].copy_from_slice(&1u32.to_le_bytes());

    let mut forged = SerializeData::from_parts(
        Arc::clone(data.runtime()),
        bytes,
        data.size_group(),
        std::array::from_fn(|pool| data.remain_sizes(pool).to_vec()),
        data.size_limit(),
        data.data_index(),
    );
    let err = BaseDeserializer::new(&mut b, &mut forged).read_value().unwrap_err();
    match err {
        DeserializeError::CorruptLayout(msg) => assert!(msg.contains("deferred unit")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_attach_returning_nothing_fails() {
    let (runtime, mut a, mut b) = isolates();
    let detach = runtime.callbacks().register_detach(|_| 0);
    let attach = runtime.callbacks().register_attach(|_, _| None);
    let binding = a
        .new_native_binding_object(NativeBindingInfo {
            attach: Some(attach),
            detach: Some(detach),
            ..NativeBindingInfo::default()
        })
        .unwrap();
    let mut data = write(&mut a, TaggedValue::object(binding));
    let err = BaseDeserializer::new(&mut b, &mut data).read_value().unwrap_err();
    assert!(matches!(err, DeserializeError::AttachFailed(_)));
}

#[test]
fn test_error_round_trip() {
    let (_runtime, mut a, mut b) = isolates();
    let error = a.new_error_with_message(ErrorKind::TypeError, "boom").unwrap();
    let bare = a.new_error(ErrorKind::RangeError, UNDEFINED).unwrap();
    let holder = a.new_plain_object().unwrap();
    a.set_property(holder, "e1", TaggedValue::object(error)).unwrap();
    a.set_property(holder, "e2", TaggedValue::object(error)).unwrap();
    a.set_property(holder, "bare", TaggedValue::object(bare)).unwrap();

    let mut data = write(&mut a, TaggedValue::object(holder));
    assert!(data.data_index().is_some());
    let copy = object_of(read(&mut b, &mut data));

    let e1 = property(&b, copy, "e1");
    assert_eq!(e1, property(&b, copy, "e2"));
    let e1 = object_of(e1);
    assert_eq!(b.error_kind(e1).unwrap(), ErrorKind::TypeError);
    assert_eq!(b.error_message(e1).unwrap().as_deref(), Some("boom"));

    let bare = object_of(property(&b, copy, "bare"));
    assert_eq!(b.error_kind(bare).unwrap(), ErrorKind::RangeError);
    assert_eq!(b.error_message(bare).unwrap(), None);
}
