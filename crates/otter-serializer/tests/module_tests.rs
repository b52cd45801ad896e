//! Module serializer tests
//!
//! Module graphs are decoded into a fresh runtime to mimic a process that
//! starts from a snapshot.

use otter_heap::object::layout;
use otter_heap::{
    AttachArgs, CollectorKind, HeapConfig, Isolate, ModuleKind, ModuleStatus, NativeBindingInfo,
    ObjectRef, Runtime, SpaceKind, TaggedValue,
};
use otter_serializer::{
    BaseDeserializer, CrossVmBridge, DeserializeError, InterOpValueDeserializer,
    ModuleDeserializer, ModuleSerializer, SerializeData, SerializeError, ValueSerializer,
};

fn snapshot(isolate: &mut Isolate, value: TaggedValue) -> SerializeData {
    let mut serializer = ModuleSerializer::new(isolate);
    serializer.serialize(value).unwrap();
    serializer.release()
}

fn restore(config: HeapConfig, data: &SerializeData) -> (Isolate, TaggedValue) {
    let runtime = Runtime::with_config(config).unwrap();
    let mut isolate = runtime.new_isolate().unwrap();
    let mut data = SerializeData::from_parts(
        runtime,
        data.as_bytes().to_vec(),
        data.size_group(),
        std::array::from_fn(|pool| data.remain_sizes(pool).to_vec()),
        data.size_limit(),
        None,
    );
    let value = ModuleDeserializer::new(&mut isolate, &mut data).read_value().unwrap();
    (isolate, value)
}

fn object_of(value: TaggedValue) -> ObjectRef {
    value.as_object().expect("heap object")
}

// ============================================================================
// Module graphs
// ============================================================================

#[test]
fn test_module_graph_restored_in_new_runtime() {
    for collector in [CollectorKind::Regional, CollectorKind::Compacting] {
        let config = HeapConfig {
            collector,
            ..HeapConfig::default()
        };
        let runtime = Runtime::with_config(config.clone()).unwrap();
        let mut a = runtime.new_isolate().unwrap();

        let env = a.new_lexical_env(TaggedValue::UNDEFINED, &[TaggedValue::int(1)]).unwrap();
        let code = a.new_machine_code(vec![0x90; 32]).unwrap();
        let module = a
            .new_module(
                "app.js",
                ModuleKind::Normal,
                ModuleStatus::Evaluated,
                TaggedValue::object(env),
                &["dep.js"],
            )
            .unwrap();
        let main = a
            .new_function("main", TaggedValue::object(env), Some(code), TaggedValue::object(module))
            .unwrap();
        a.set_function_profile(main, TaggedValue::int(3)).unwrap();
        let table = a
            .new_tagged_array(&[
                TaggedValue::object(module),
                TaggedValue::object(main),
                TaggedValue::object(code),
            ])
            .unwrap();

        let data = snapshot(&mut a, TaggedValue::object(table));
        let (b, value) = restore(config, &data);
        let elements = b.tagged_array_elements(object_of(value)).unwrap();

        let module = object_of(elements[0]);
        let info = b.module_info(module).unwrap();
        assert_eq!(info.name, "app.js");
        assert_eq!(info.kind, ModuleKind::Normal);
        assert_eq!(info.status, ModuleStatus::Evaluated);
        assert_eq!(b.module_requests(module).unwrap(), vec!["dep.js".to_string()]);

        let main = object_of(elements[1]);
        let (name, env, machine_code, profile, entry, owner) = b
            .with_object(main, |o| {
                (
                    o.tagged(layout::function::NAME),
                    o.tagged(layout::function::ENV),
                    o.tagged(layout::function::MACHINE_CODE),
                    o.tagged(layout::function::PROFILE),
                    o.raw_field(layout::function::CODE_ENTRY),
                    o.tagged(layout::function::MODULE),
                )
            })
            .unwrap();
        assert_eq!(b.string_of(name).as_deref(), Some("main"));
        assert!(machine_code.is_undefined());
        assert!(profile.is_undefined());
        assert_eq!(entry, 0);
        assert_eq!(owner, TaggedValue::object(module));

        let env = object_of(env);
        let (slot, parent) = b
            .with_object(env, |o| (o.tagged(layout::env::SLOTS), o.tagged(layout::env::PARENT)))
            .unwrap();
        assert_eq!(slot, TaggedValue::int(1));
        assert!(parent.is_undefined());

        let code = object_of(elements[2]);
        assert_eq!(b.with_object(code, |o| o.raw.clone()).unwrap(), vec![0x90; 32]);
        let code_space = b.space_of(code).unwrap();
        match collector {
            CollectorKind::Regional => assert_eq!(code_space, SpaceKind::MachineCode),
            CollectorKind::Compacting => assert!(!code_space.is_shared()),
        }
    }
}

#[test]
fn test_decoded_strings_use_string_table() {
    let runtime = Runtime::new().unwrap();
    let mut a = runtime.new_isolate().unwrap();
    let module = a
        .new_module("app.js", ModuleKind::Normal, ModuleStatus::Linked, TaggedValue::UNDEFINED, &["dep.js"])
        .unwrap();
    let data = snapshot(&mut a, TaggedValue::object(module));

    let fresh = Runtime::new().unwrap();
    let mut b = fresh.new_isolate().unwrap();
    let existing = b.intern("dep.js").unwrap();
    let mut data = SerializeData::from_parts(
        fresh,
        data.as_bytes().to_vec(),
        data.size_group(),
        Default::default(),
        data.size_limit(),
        None,
    );
    let module = object_of(ModuleDeserializer::new(&mut b, &mut data).read_value().unwrap());

    let requested = b.with_object(module, |o| o.tagged(layout::module::REQUESTED)).unwrap();
    let specifiers = b.tagged_array_elements(object_of(requested)).unwrap();
    assert_eq!(specifiers, vec![TaggedValue::object(existing)]);

    let name = b.with_object(module, |o| o.tagged(layout::module::NAME)).unwrap();
    assert_eq!(b.lookup_string("app.js"), name.as_object());
}

#[test]
fn test_shared_module_restored_into_shared_heap() {
    let runtime = Runtime::new().unwrap();
    let mut a = runtime.new_isolate().unwrap();
    let module = a
        .new_module("shared.js", ModuleKind::Shared, ModuleStatus::Linked, TaggedValue::UNDEFINED, &["util.js"])
        .unwrap();
    let data = snapshot(&mut a, TaggedValue::object(module));
    assert_eq!(data.data_index(), None);

    let (b, value) = restore(HeapConfig::default(), &data);
    let module = object_of(value);
    assert!(module.is_shared());
    assert_eq!(b.space_of(module).unwrap(), SpaceKind::SharedOld);
    let info = b.module_info(module).unwrap();
    assert_eq!(info.kind, ModuleKind::Shared);
    assert_eq!(b.module_requests(module).unwrap(), vec!["util.js".to_string()]);

    let name = b.with_object(module, |o| o.tagged(layout::module::NAME)).unwrap();
    assert_eq!(b.runtime().lookup_shared_string("shared.js"), name.as_object());
}

#[test]
fn test_native_pointer_zeroed() {
    let runtime = Runtime::new().unwrap();
    let mut a = runtime.new_isolate().unwrap();
    let pointer = a.new_native_pointer(0xdead_beef).unwrap();
    let data = snapshot(&mut a, TaggedValue::object(pointer));
    let (b, value) = restore(HeapConfig::default(), &data);
    assert_eq!(b.native_pointer_value(object_of(value)).unwrap(), 0);
}

// ============================================================================
// Rejections
// ============================================================================

#[test]
fn test_module_graph_rejects_value_kinds() {
    let runtime = Runtime::new().unwrap();
    let mut a = runtime.new_isolate().unwrap();
    let buffer = a.new_array_buffer_from(vec![1]).unwrap();
    let error = a.new_error_with_message(otter_heap::ErrorKind::Error, "e").unwrap();
    let target = a.new_plain_object().unwrap();
    let proxy = a.new_proxy(target, target).unwrap();

    for r in [buffer, error, proxy] {
        let mut serializer = ModuleSerializer::new(&mut a);
        let err = serializer.serialize(TaggedValue::object(r)).unwrap_err();
        assert!(matches!(err, SerializeError::NotSupported(_)));
        assert!(serializer.data().is_incomplete());
    }
}

#[test]
fn test_module_graph_rejects_native_binding() {
    let runtime = Runtime::new().unwrap();
    let mut a = runtime.new_isolate().unwrap();
    let binding = a.new_native_binding_object(NativeBindingInfo::default()).unwrap();
    let mut serializer = ModuleSerializer::new(&mut a);
    let err = serializer.serialize(TaggedValue::object(binding)).unwrap_err();
    assert!(matches!(err, SerializeError::NotSupported(_)));
}

// ============================================================================
// Cross-VM bindings
// ============================================================================

struct HintBridge;

impl CrossVmBridge for HintBridge {
    fn attach_xref(&self, isolate: &mut Isolate, args: &AttachArgs) -> Option<TaggedValue> {
        let _managed = isolate.managed_scope();
        let obj = isolate.new_plain_object().ok()?;
        isolate.set_property(obj, "hint", TaggedValue::int(args.hint as i32)).ok()?;
        Some(TaggedValue::object(obj))
    }
}

fn xref_data(runtime: &std::sync::Arc<Runtime>, a: &mut Isolate) -> SerializeData {
    let attach = runtime.callbacks().register_attach(|_, _| None);
    let detach = runtime.callbacks().register_detach(|args| args.native);
    let binding = a
        .new_native_binding_object(NativeBindingInfo {
            attach: Some(attach),
            detach: Some(detach),
            native: 1,
            attach_data: 0,
            hint: 11,
            xref: true,
        })
        .unwrap();
    let mut serializer = ValueSerializer::new(a);
    serializer
        .write_value(TaggedValue::object(binding), TaggedValue::UNDEFINED, TaggedValue::UNDEFINED)
        .unwrap();
    serializer.release()
}

#[test]
fn test_xref_attached_through_bridge() {
    let runtime = Runtime::new().unwrap();
    let mut a = runtime.new_isolate().unwrap();
    let mut b = runtime.new_isolate().unwrap();
    let mut data = xref_data(&runtime, &mut a);

    let bridge = HintBridge;
    let value = InterOpValueDeserializer::new(&mut b, &mut data, &bridge)
        .read_value()
        .unwrap();
    let obj = object_of(value);
    assert_eq!(b.get_property(obj, "hint").unwrap(), Some(TaggedValue::int(11)));
}

#[test]
fn test_xref_without_bridge_rejected() {
    let runtime = Runtime::new().unwrap();
    let mut a = runtime.new_isolate().unwrap();
    let mut b = runtime.new_isolate().unwrap();
    let mut data = xref_data(&runtime, &mut a);

    let err = BaseDeserializer::new(&mut b, &mut data).read_value().unwrap_err();
    assert!(matches!(err, DeserializeError::NotSupported(_)));
    let err = ModuleDeserializer::new(&mut b, &mut data).read_value().unwrap_err();
    assert!(matches!(err, DeserializeError::NotSupported(_)));
}
