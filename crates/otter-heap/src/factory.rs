//! Object factory and typed accessors
//!
//! All constructors require managed thread state. Objects built for the
//! shared heap only ever reference shared objects.

use crate::env::{LocalRoot, SharedRoot, class_object};
use crate::error::{HeapError, HeapResult};
use crate::isolate::Isolate;
use crate::native::{NativeBindingInfo, StorageId};
use crate::object::{
    FLAG_DETACHED, Field, HeapObject, ObjectType, class_bits,
    layout::{self, array_buffer},
};
use crate::space::SpaceKind;
use crate::value::{ObjectRef, TaggedValue};

/// Error constructor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ErrorKind {
    Error = 0,
    TypeError = 1,
    RangeError = 2,
    ReferenceError = 3,
    SyntaxError = 4,
    EvalError = 5,
    UriError = 6,
    AggregateError = 7,
    OomError = 8,
}

impl ErrorKind {
    /// Decode a kind byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => ErrorKind::Error,
            1 => ErrorKind::TypeError,
            2 => ErrorKind::RangeError,
            3 => ErrorKind::ReferenceError,
            4 => ErrorKind::SyntaxError,
            5 => ErrorKind::EvalError,
            6 => ErrorKind::UriError,
            7 => ErrorKind::AggregateError,
            8 => ErrorKind::OomError,
            _ => return None,
        })
    }
}

/// Whether a module lives in one isolate or in the shared heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModuleKind {
    /// Isolate-local module
    Normal = 0,
    /// Shared module, one instance per runtime
    Shared = 1,
}

/// Module lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ModuleStatus {
    Unlinked = 0,
    Linking = 1,
    Linked = 2,
    Evaluating = 3,
    Evaluated = 4,
    Errored = 5,
}

impl ModuleStatus {
    /// Decode a status value
    pub fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => ModuleStatus::Unlinked,
            1 => ModuleStatus::Linking,
            2 => ModuleStatus::Linked,
            3 => ModuleStatus::Evaluating,
            4 => ModuleStatus::Evaluated,
            5 => ModuleStatus::Errored,
            _ => return None,
        })
    }

    /// Whether the module finished instantiation
    pub fn is_instantiated(self) -> bool {
        self >= ModuleStatus::Linked
    }
}

/// Decoded module header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Record name
    pub name: String,
    /// Local or shared
    pub kind: ModuleKind,
    /// Lifecycle state
    pub status: ModuleStatus,
}

fn expect_type(found: ObjectType, expected: ObjectType) -> HeapResult<()> {
    if found == expected {
        Ok(())
    } else {
        Err(HeapError::TypeMismatch { expected, found })
    }
}

impl Isolate {
    fn class_of(&self, root: LocalRoot) -> TaggedValue {
        TaggedValue::object(self.root(root))
    }

    fn shared_class_of(&self, root: SharedRoot) -> TaggedValue {
        TaggedValue::object(self.shared_root(root))
    }

    fn alloc(&mut self, space: SpaceKind, ty: ObjectType, class: TaggedValue, fields: Vec<Field>, raw: Vec<u8>) -> HeapResult<ObjectRef> {
        self.allocate(space, HeapObject::new(ty, class, fields, raw))
    }

    fn tagged_fields(values: &[TaggedValue]) -> Vec<Field> {
        values.iter().copied().map(Field::Tagged).collect()
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// New local string
    pub fn new_string(&mut self, text: &str) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::StringClass);
        self.alloc(SpaceKind::Young, ObjectType::String, class, Vec::new(), text.as_bytes().to_vec())
    }

    /// Interned local string
    pub fn intern(&mut self, text: &str) -> HeapResult<ObjectRef> {
        if let Some(r) = self.lookup_string(text) {
            return Ok(r);
        }
        let r = self.new_string(text)?;
        Ok(self.register_string(text, r))
    }

    /// Interned shared string
    pub fn new_shared_string(&mut self, text: &str) -> HeapResult<ObjectRef> {
        self.ensure_managed()?;
        self.runtime().intern_shared(text)
    }

    /// Contents of a string object
    pub fn string_value(&self, r: ObjectRef) -> HeapResult<String> {
        self.with_object(r, |obj| {
            expect_type(obj.ty, ObjectType::String)?;
            Ok(String::from_utf8_lossy(&obj.raw).into_owned())
        })?
    }

    /// Contents of a string value, `None` for non-strings
    pub fn string_of(&self, value: TaggedValue) -> Option<String> {
        value.as_object().and_then(|r| self.string_value(r).ok())
    }

    // ------------------------------------------------------------------
    // Tagged arrays
    // ------------------------------------------------------------------

    /// New local tagged array
    pub fn new_tagged_array(&mut self, values: &[TaggedValue]) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::TaggedArrayClass);
        self.alloc(SpaceKind::Young, ObjectType::TaggedArray, class, Self::tagged_fields(values), Vec::new())
    }

    /// New shared tagged array
    pub fn new_shared_tagged_array(&mut self, values: &[TaggedValue]) -> HeapResult<ObjectRef> {
        let class = self.shared_class_of(SharedRoot::SharedTaggedArrayClass);
        let r = self.alloc(SpaceKind::SharedOld, ObjectType::TaggedArray, class, Vec::new(), Vec::new())?;
        for value in values {
            self.push_field(r, Field::Tagged(*value))?;
        }
        Ok(r)
    }

    /// Elements of a tagged array
    pub fn tagged_array_elements(&self, r: ObjectRef) -> HeapResult<Vec<TaggedValue>> {
        self.with_object(r, |obj| {
            expect_type(obj.ty, ObjectType::TaggedArray)?;
            Ok(obj.fields[layout::tagged_array::ELEMENTS..]
                .iter()
                .map(|f| f.tagged().unwrap_or(TaggedValue::UNDEFINED))
                .collect())
        })?
    }

    // ------------------------------------------------------------------
    // Objects with named properties
    // ------------------------------------------------------------------

    /// New empty plain object
    pub fn new_plain_object(&mut self) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::PlainObjectClass);
        self.alloc(SpaceKind::Young, ObjectType::PlainObject, class, Vec::new(), Vec::new())
    }

    /// New empty shared object
    pub fn new_shared_object(&mut self) -> HeapResult<ObjectRef> {
        let class = self.shared_class_of(SharedRoot::SharedObjectClass);
        self.alloc(SpaceKind::SharedOld, ObjectType::SharedObject, class, Vec::new(), Vec::new())
    }

    fn class_keys(&self, class: ObjectRef) -> HeapResult<Vec<String>> {
        let keys = self.with_object(class, |c| c.tagged(layout::class::LAYOUT))?;
        match keys.as_object() {
            Some(keys) => Ok(self
                .tagged_array_elements(keys)?
                .into_iter()
                .map(|k| self.string_of(k).unwrap_or_default())
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Property names of a plain or shared object, in slot order
    pub fn property_keys(&self, obj: ObjectRef) -> HeapResult<Vec<String>> {
        let class = self.with_object(obj, |o| o.class())?;
        match class.as_object() {
            Some(class) => self.class_keys(class),
            None => Ok(Vec::new()),
        }
    }

    fn find_transition(&self, class: ObjectRef, key: &str) -> HeapResult<Option<ObjectRef>> {
        let transitions = self.with_object(class, |c| c.tagged(layout::class::TRANSITIONS))?;
        let Some(transitions) = transitions.as_object() else {
            return Ok(None);
        };
        for child in self.tagged_array_elements(transitions)? {
            let Some(child) = child.as_object() else { continue };
            if self.class_keys(child)?.last().map(String::as_str) == Some(key) {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    fn derive_class(&mut self, parent: ObjectRef, key: &str) -> HeapResult<ObjectRef> {
        if let Some(child) = self.find_transition(parent, key)? {
            return Ok(child);
        }
        let shared = parent.is_shared();
        let parent_obj = self.object(parent)?;
        let key_ref = if shared {
            self.new_shared_string(key)?
        } else {
            self.intern(key)?
        };
        let mut keys = match parent_obj.tagged(layout::class::LAYOUT).as_object() {
            Some(keys) => self.tagged_array_elements(keys)?,
            None => Vec::new(),
        };
        keys.push(TaggedValue::object(key_ref));
        let keys = if shared {
            self.new_shared_tagged_array(&keys)?
        } else {
            self.new_tagged_array(&keys)?
        };

        let bits = parent_obj.raw_field(layout::class::BITFIELD);
        let instance = class_bits::instance_type(bits).unwrap_or(ObjectType::PlainObject);
        let mut class = class_object(
            parent_obj.class(),
            instance,
            parent_obj.tagged(layout::class::PROTO),
            TaggedValue::object(keys),
            bits & !0xFF,
        );
        class.fields[layout::class::PARENT] = Field::Tagged(TaggedValue::object(parent));
        let space = if shared {
            SpaceKind::SharedNonMovable
        } else {
            SpaceKind::NonMovable
        };
        let child = self.allocate(space, class)?;

        let transitions = parent_obj.tagged(layout::class::TRANSITIONS);
        match transitions.as_object() {
            Some(transitions) => {
                self.push_field(transitions, Field::Tagged(TaggedValue::object(child)))?;
            }
            None => {
                let child_v = [TaggedValue::object(child)];
                let transitions = if shared {
                    self.new_shared_tagged_array(&child_v)?
                } else {
                    self.new_tagged_array(&child_v)?
                };
                self.set_field(
                    parent,
                    layout::class::TRANSITIONS,
                    Field::Tagged(TaggedValue::object(transitions)),
                )?;
            }
        }
        Ok(child)
    }

    /// Set a named property, transitioning the hidden class on new keys.
    ///
    /// Doubles are stored unboxed in raw slots.
    pub fn set_property(&mut self, obj: ObjectRef, key: &str, value: TaggedValue) -> HeapResult<()> {
        self.ensure_managed()?;
        let (ty, class) = self.with_object(obj, |o| (o.ty, o.class()))?;
        if !ty.has_named_properties() {
            return Err(HeapError::TypeMismatch {
                expected: ObjectType::PlainObject,
                found: ty,
            });
        }
        if let Some(target) = value.as_object()
            && obj.is_shared()
            && !target.is_shared()
        {
            return Err(HeapError::SharedToLocal(obj, target));
        }
        let field = if value.is_double() {
            Field::Raw(value.as_number().unwrap_or(f64::NAN).to_bits())
        } else {
            Field::Tagged(value)
        };
        let class = class.as_object().ok_or(HeapError::InvalidRef(obj))?;
        let keys = self.class_keys(class)?;
        if let Some(pos) = keys.iter().position(|k| k == key) {
            return self.set_field(obj, layout::object::PROPERTIES + pos, field);
        }
        let child = self.derive_class(class, key)?;
        self.push_field(obj, field)?;
        self.set_field(obj, layout::CLASS, Field::Tagged(TaggedValue::object(child)))
    }

    /// Read a named property
    pub fn get_property(&self, obj: ObjectRef, key: &str) -> HeapResult<Option<TaggedValue>> {
        let keys = self.property_keys(obj)?;
        let Some(pos) = keys.iter().position(|k| k == key) else {
            return Ok(None);
        };
        self.with_object(obj, |o| {
            o.fields
                .get(layout::object::PROPERTIES + pos)
                .map(|field| match *field {
                    Field::Tagged(v) => v,
                    Field::Raw(bits) => TaggedValue::double(f64::from_bits(bits)),
                })
        })
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    fn new_collection(&mut self, ty: ObjectType, values: &[TaggedValue]) -> HeapResult<ObjectRef> {
        let shared = ty.is_shared_kind();
        let elements = if shared {
            self.new_shared_tagged_array(values)?
        } else {
            self.new_tagged_array(values)?
        };
        let (class, space) = match ty {
            ObjectType::Array => (self.class_of(LocalRoot::ArrayClass), SpaceKind::Young),
            ObjectType::Map => (self.class_of(LocalRoot::MapClass), SpaceKind::Young),
            ObjectType::Set => (self.class_of(LocalRoot::SetClass), SpaceKind::Young),
            ObjectType::SharedArray => (self.shared_class_of(SharedRoot::SharedArrayClass), SpaceKind::SharedOld),
            ObjectType::SharedMap => (self.shared_class_of(SharedRoot::SharedMapClass), SpaceKind::SharedOld),
            ObjectType::SharedSet => (self.shared_class_of(SharedRoot::SharedSetClass), SpaceKind::SharedOld),
            other => {
                return Err(HeapError::TypeMismatch {
                    expected: ObjectType::Array,
                    found: other,
                });
            }
        };
        let fields = vec![Field::Tagged(TaggedValue::object(elements))];
        self.alloc(space, ty, class, fields, Vec::new())
    }

    /// New array
    pub fn new_array(&mut self, values: &[TaggedValue]) -> HeapResult<ObjectRef> {
        self.new_collection(ObjectType::Array, values)
    }

    /// New shared array
    pub fn new_shared_array(&mut self, values: &[TaggedValue]) -> HeapResult<ObjectRef> {
        self.new_collection(ObjectType::SharedArray, values)
    }

    /// New map from key/value pairs
    pub fn new_map(&mut self, entries: &[(TaggedValue, TaggedValue)]) -> HeapResult<ObjectRef> {
        let flat: Vec<_> = entries.iter().flat_map(|(k, v)| [*k, *v]).collect();
        self.new_collection(ObjectType::Map, &flat)
    }

    /// New shared map from key/value pairs
    pub fn new_shared_map(&mut self, entries: &[(TaggedValue, TaggedValue)]) -> HeapResult<ObjectRef> {
        let flat: Vec<_> = entries.iter().flat_map(|(k, v)| [*k, *v]).collect();
        self.new_collection(ObjectType::SharedMap, &flat)
    }

    /// New set
    pub fn new_set(&mut self, values: &[TaggedValue]) -> HeapResult<ObjectRef> {
        self.new_collection(ObjectType::Set, values)
    }

    /// New shared set
    pub fn new_shared_set(&mut self, values: &[TaggedValue]) -> HeapResult<ObjectRef> {
        self.new_collection(ObjectType::SharedSet, values)
    }

    /// Backing elements of an array, map (flattened pairs) or set
    pub fn collection_elements(&self, r: ObjectRef) -> HeapResult<Vec<TaggedValue>> {
        let elements = self.with_object(r, |o| o.tagged(layout::collection::ELEMENTS))?;
        match elements.as_object() {
            Some(elements) => self.tagged_array_elements(elements),
            None => Ok(Vec::new()),
        }
    }

    /// Append to an array
    pub fn array_push(&mut self, r: ObjectRef, value: TaggedValue) -> HeapResult<()> {
        let elements = self.with_object(r, |o| o.tagged(layout::collection::ELEMENTS))?;
        let elements = elements.as_object().ok_or(HeapError::InvalidRef(r))?;
        self.push_field(elements, Field::Tagged(value)).map(|_| ())
    }

    // ------------------------------------------------------------------
    // Dates, regexps, bigints
    // ------------------------------------------------------------------

    /// New date
    pub fn new_date(&mut self, time: f64) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::DateClass);
        self.alloc(SpaceKind::Young, ObjectType::Date, class, vec![Field::Raw(time.to_bits())], Vec::new())
    }

    /// Time value of a date
    pub fn date_value(&self, r: ObjectRef) -> HeapResult<f64> {
        self.with_object(r, |o| {
            expect_type(o.ty, ObjectType::Date)?;
            Ok(f64::from_bits(o.raw_field(layout::date::TIME)))
        })?
    }

    /// New regexp with its compiled bytecode held off-heap
    pub fn new_regexp(&mut self, source: &str, flags: &str, bytecode: Vec<u8>) -> HeapResult<ObjectRef> {
        let source = self.new_string(source)?;
        let flags = self.new_string(flags)?;
        let storage = self.runtime().native().allocate(bytecode);
        let class = self.class_of(LocalRoot::RegExpClass);
        let fields = vec![
            Field::Tagged(TaggedValue::object(source)),
            Field::Tagged(TaggedValue::object(flags)),
            Field::Raw(storage),
        ];
        self.alloc(SpaceKind::Young, ObjectType::RegExp, class, fields, Vec::new())
    }

    /// Compiled bytecode of a regexp
    pub fn regexp_bytecode(&self, r: ObjectRef) -> HeapResult<Vec<u8>> {
        let storage = self.with_object(r, |o| {
            expect_type(o.ty, ObjectType::RegExp)?;
            Ok(o.raw_field(layout::regexp::BYTECODE))
        })??;
        self.runtime().native().read(storage)
    }

    /// New bigint from sign and little-endian magnitude
    pub fn new_bigint(&mut self, negative: bool, magnitude: &[u8]) -> HeapResult<ObjectRef> {
        let mut raw = Vec::with_capacity(magnitude.len() + 1);
        raw.push(negative as u8);
        raw.extend_from_slice(magnitude);
        let class = self.class_of(LocalRoot::BigIntClass);
        self.alloc(SpaceKind::Young, ObjectType::BigInt, class, Vec::new(), raw)
    }

    // ------------------------------------------------------------------
    // Array buffers
    // ------------------------------------------------------------------

    fn buffer_object(&mut self, ty: ObjectType, storage: u64, len: usize) -> HeapResult<ObjectRef> {
        let (class, space) = match ty {
            ObjectType::ArrayBuffer => (self.class_of(LocalRoot::ArrayBufferClass), SpaceKind::Young),
            ObjectType::SharedArrayBuffer => {
                (self.class_of(LocalRoot::SharedArrayBufferClass), SpaceKind::Young)
            }
            _ => (
                self.shared_class_of(SharedRoot::SendableArrayBufferClass),
                SpaceKind::SharedOld,
            ),
        };
        let fields = vec![Field::Raw(storage), Field::Raw(len as u64)];
        self.alloc(space, ty, class, fields, Vec::new())
    }

    /// New zero-filled array buffer; empty buffers have no storage
    pub fn new_array_buffer(&mut self, len: usize) -> HeapResult<ObjectRef> {
        self.new_array_buffer_from(vec![0; len])
    }

    /// New array buffer holding `bytes`
    pub fn new_array_buffer_from(&mut self, bytes: Vec<u8>) -> HeapResult<ObjectRef> {
        self.ensure_managed()?;
        let len = bytes.len();
        let storage = if len == 0 {
            array_buffer::NO_STORAGE
        } else {
            self.runtime().native().allocate(bytes)
        };
        self.buffer_object(ObjectType::ArrayBuffer, storage, len)
    }

    /// New array buffer over embedder-allocated storage
    pub fn new_external_array_buffer(&mut self, bytes: Vec<u8>) -> HeapResult<ObjectRef> {
        self.ensure_managed()?;
        let len = bytes.len();
        let storage = self.runtime().native().allocate_external(bytes);
        self.buffer_object(ObjectType::ArrayBuffer, storage, len)
    }

    /// Wrap storage adopted from a transfer
    pub fn new_array_buffer_with_storage(&mut self, storage: StorageId, len: usize) -> HeapResult<ObjectRef> {
        self.buffer_object(ObjectType::ArrayBuffer, storage, len)
    }

    /// New shared array buffer
    pub fn new_shared_array_buffer(&mut self, bytes: Vec<u8>) -> HeapResult<ObjectRef> {
        self.ensure_managed()?;
        let len = bytes.len();
        let storage = self.runtime().shared_memory().create(bytes);
        self.buffer_object(ObjectType::SharedArrayBuffer, storage, len)
    }

    /// New sendable array buffer in the shared heap
    pub fn new_sendable_array_buffer(&mut self, bytes: Vec<u8>) -> HeapResult<ObjectRef> {
        self.ensure_managed()?;
        let len = bytes.len();
        let storage = self.runtime().native().allocate(bytes);
        self.buffer_object(ObjectType::SendableArrayBuffer, storage, len)
    }

    fn buffer_fields(&self, r: ObjectRef) -> HeapResult<(ObjectType, u64, usize, bool)> {
        self.with_object(r, |o| match o.ty {
            ObjectType::ArrayBuffer | ObjectType::SharedArrayBuffer | ObjectType::SendableArrayBuffer => Ok((
                o.ty,
                o.raw_field(array_buffer::DATA),
                o.raw_field(array_buffer::BYTE_LENGTH) as usize,
                o.has_flag(FLAG_DETACHED),
            )),
            found => Err(HeapError::TypeMismatch {
                expected: ObjectType::ArrayBuffer,
                found,
            }),
        })?
    }

    /// Contents of any array buffer kind; empty when detached
    pub fn array_buffer_bytes(&self, r: ObjectRef) -> HeapResult<Vec<u8>> {
        let (ty, storage, _, detached) = self.buffer_fields(r)?;
        if detached || storage == array_buffer::NO_STORAGE {
            return Ok(Vec::new());
        }
        match ty {
            ObjectType::SharedArrayBuffer => Ok(self.runtime().shared_memory().memory(storage)?.lock().clone()),
            _ => self.runtime().native().read(storage),
        }
    }

    /// Overwrite array buffer contents starting at `offset`
    pub fn write_array_buffer(&self, r: ObjectRef, offset: usize, bytes: &[u8]) -> HeapResult<()> {
        let (ty, storage, _, detached) = self.buffer_fields(r)?;
        if detached || storage == array_buffer::NO_STORAGE {
            return Ok(());
        }
        match ty {
            ObjectType::SharedArrayBuffer => {
                let memory = self.runtime().shared_memory().memory(storage)?;
                let mut memory = memory.lock();
                let end = (offset + bytes.len()).min(memory.len());
                if offset < end {
                    memory[offset..end].copy_from_slice(&bytes[..end - offset]);
                }
                Ok(())
            }
            _ => self.runtime().native().write(storage, offset, bytes),
        }
    }

    /// Byte length of an array buffer
    pub fn array_buffer_len(&self, r: ObjectRef) -> HeapResult<usize> {
        Ok(self.buffer_fields(r)?.2)
    }

    /// Backing storage id of an array buffer
    pub fn array_buffer_storage(&self, r: ObjectRef) -> HeapResult<StorageId> {
        Ok(self.buffer_fields(r)?.1)
    }

    /// Whether an array buffer was detached
    pub fn is_detached(&self, r: ObjectRef) -> HeapResult<bool> {
        Ok(self.buffer_fields(r)?.3)
    }

    /// Detach an array buffer, returning its former storage id
    pub fn detach_array_buffer(&mut self, r: ObjectRef) -> HeapResult<StorageId> {
        self.buffer_fields(r)?;
        self.update_object(r, |o| {
            let storage = o.raw_field(array_buffer::DATA);
            o.fields[array_buffer::DATA] = Field::Raw(array_buffer::NO_STORAGE);
            o.fields[array_buffer::BYTE_LENGTH] = Field::Raw(0);
            o.flags |= FLAG_DETACHED;
            storage
        })
    }

    /// New typed array view
    pub fn new_typed_array(&mut self, buffer: ObjectRef, byte_offset: usize, length: usize, kind: u8) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::TypedArrayClass);
        let fields = vec![
            Field::Tagged(TaggedValue::object(buffer)),
            Field::Raw(byte_offset as u64),
            Field::Raw(length as u64),
            Field::Raw(kind as u64),
        ];
        self.alloc(SpaceKind::Young, ObjectType::TypedArray, class, fields, Vec::new())
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    /// New error with an optional message string value
    pub fn new_error(&mut self, kind: ErrorKind, message: TaggedValue) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::ErrorClass);
        let fields = vec![Field::Raw(kind as u64), Field::Tagged(message)];
        self.alloc(SpaceKind::Young, ObjectType::Error, class, fields, Vec::new())
    }

    /// New error with a message text
    pub fn new_error_with_message(&mut self, kind: ErrorKind, message: &str) -> HeapResult<ObjectRef> {
        let message = self.new_string(message)?;
        self.new_error(kind, TaggedValue::object(message))
    }

    /// Kind of an error object
    pub fn error_kind(&self, r: ObjectRef) -> HeapResult<ErrorKind> {
        self.with_object(r, |o| {
            expect_type(o.ty, ObjectType::Error)?;
            Ok(ErrorKind::from_u8(o.raw_field(layout::error::KIND) as u8).unwrap_or(ErrorKind::Error))
        })?
    }

    /// Message of an error object
    pub fn error_message(&self, r: ObjectRef) -> HeapResult<Option<String>> {
        let message = self.with_object(r, |o| {
            expect_type(o.ty, ObjectType::Error)?;
            Ok(o.tagged(layout::error::MESSAGE))
        })??;
        Ok(self.string_of(message))
    }

    // ------------------------------------------------------------------
    // Code and scopes
    // ------------------------------------------------------------------

    /// New compiled code object
    pub fn new_machine_code(&mut self, code: Vec<u8>) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::MachineCodeClass);
        self.alloc(SpaceKind::MachineCode, ObjectType::MachineCode, class, Vec::new(), code)
    }

    /// New lexical environment
    pub fn new_lexical_env(&mut self, parent: TaggedValue, slots: &[TaggedValue]) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::LexicalEnvClass);
        let mut fields = vec![Field::Tagged(parent), Field::Tagged(TaggedValue::UNDEFINED)];
        fields.extend(Self::tagged_fields(slots));
        self.alloc(SpaceKind::Young, ObjectType::LexicalEnv, class, fields, Vec::new())
    }

    fn new_function_object(
        &mut self,
        ty: ObjectType,
        name: &str,
        env: TaggedValue,
        code: Option<ObjectRef>,
        module: TaggedValue,
    ) -> HeapResult<ObjectRef> {
        let name = self.intern(name)?;
        let root = if ty == ObjectType::AsyncFunction {
            LocalRoot::AsyncFunctionClass
        } else {
            LocalRoot::FunctionClass
        };
        let class = self.class_of(root);
        let entry = code.map(|c| 0x1000 + c.index() as u64).unwrap_or(0);
        let mut fields = vec![
            Field::Tagged(TaggedValue::object(name)),
            Field::Tagged(env),
            Field::Tagged(code.map(TaggedValue::object).unwrap_or(TaggedValue::UNDEFINED)),
            Field::Tagged(TaggedValue::UNDEFINED),
            Field::Raw(entry),
            Field::Tagged(module),
        ];
        if ty == ObjectType::AsyncFunction {
            let hash = (name.index() as i32).wrapping_mul(31);
            fields.push(Field::Tagged(TaggedValue::int(hash)));
        }
        self.alloc(SpaceKind::Young, ty, class, fields, Vec::new())
    }

    /// New function
    pub fn new_function(
        &mut self,
        name: &str,
        env: TaggedValue,
        code: Option<ObjectRef>,
        module: TaggedValue,
    ) -> HeapResult<ObjectRef> {
        self.new_function_object(ObjectType::Function, name, env, code, module)
    }

    /// New async function
    pub fn new_async_function(
        &mut self,
        name: &str,
        env: TaggedValue,
        code: Option<ObjectRef>,
        module: TaggedValue,
    ) -> HeapResult<ObjectRef> {
        self.new_function_object(ObjectType::AsyncFunction, name, env, code, module)
    }

    /// Attach profiling feedback to a function
    pub fn set_function_profile(&mut self, function: ObjectRef, profile: TaggedValue) -> HeapResult<()> {
        self.set_field(function, layout::function::PROFILE, Field::Tagged(profile))
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    /// New module record; shared modules go to the shared heap
    pub fn new_module(
        &mut self,
        name: &str,
        kind: ModuleKind,
        status: ModuleStatus,
        environment: TaggedValue,
        requested: &[&str],
    ) -> HeapResult<ObjectRef> {
        let shared = kind == ModuleKind::Shared;
        let mut specifiers = Vec::with_capacity(requested.len());
        for specifier in requested {
            let s = if shared {
                self.new_shared_string(specifier)?
            } else {
                self.intern(specifier)?
            };
            specifiers.push(TaggedValue::object(s));
        }
        let (name, requested, class, space) = if shared {
            (
                self.new_shared_string(name)?,
                self.new_shared_tagged_array(&specifiers)?,
                self.shared_class_of(SharedRoot::SharedModuleClass),
                SpaceKind::SharedOld,
            )
        } else {
            (
                self.intern(name)?,
                self.new_tagged_array(&specifiers)?,
                self.class_of(LocalRoot::ModuleClass),
                SpaceKind::Young,
            )
        };
        let fields = vec![
            Field::Tagged(TaggedValue::object(name)),
            Field::Raw(kind as u64),
            Field::Raw(status as u64),
            Field::Tagged(environment),
            Field::Tagged(TaggedValue::object(requested)),
        ];
        self.alloc(space, ObjectType::Module, class, fields, Vec::new())
    }

    /// Decoded module header
    pub fn module_info(&self, r: ObjectRef) -> HeapResult<ModuleInfo> {
        let (name, kind, status) = self.with_object(r, |o| {
            expect_type(o.ty, ObjectType::Module)?;
            Ok((
                o.tagged(layout::module::NAME),
                o.raw_field(layout::module::KIND),
                o.raw_field(layout::module::STATUS),
            ))
        })??;
        Ok(ModuleInfo {
            name: self.string_of(name).unwrap_or_default(),
            kind: if kind == ModuleKind::Shared as u64 {
                ModuleKind::Shared
            } else {
                ModuleKind::Normal
            },
            status: ModuleStatus::from_raw(status).unwrap_or(ModuleStatus::Errored),
        })
    }

    /// Requested specifiers of a module
    pub fn module_requests(&self, r: ObjectRef) -> HeapResult<Vec<String>> {
        let requested = self.with_object(r, |o| o.tagged(layout::module::REQUESTED))?;
        match requested.as_object() {
            Some(requested) => Ok(self
                .tagged_array_elements(requested)?
                .into_iter()
                .filter_map(|v| self.string_of(v))
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Native objects
    // ------------------------------------------------------------------

    /// New native pointer wrapper
    pub fn new_native_pointer(&mut self, pointer: u64) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::NativePointerClass);
        self.alloc(SpaceKind::Young, ObjectType::NativePointer, class, vec![Field::Raw(pointer)], Vec::new())
    }

    /// Foreign handle of a native pointer
    pub fn native_pointer_value(&self, r: ObjectRef) -> HeapResult<u64> {
        self.with_object(r, |o| {
            expect_type(o.ty, ObjectType::NativePointer)?;
            Ok(o.raw_field(layout::native_pointer::POINTER))
        })?
    }

    /// New object wrapping a native binding
    pub fn new_native_binding_object(&mut self, info: NativeBindingInfo) -> HeapResult<ObjectRef> {
        let binding = self.runtime().native().register_binding(info);
        let pointer = self.new_native_pointer(binding)?;
        let class = self.class_of(LocalRoot::NativeBindingClass);
        let fields = vec![Field::Tagged(TaggedValue::object(pointer))];
        self.alloc(SpaceKind::Young, ObjectType::PlainObject, class, fields, Vec::new())
    }

    /// Whether the object's class marks it as a native binding
    pub fn is_native_binding(&self, r: ObjectRef) -> HeapResult<bool> {
        let class = self.with_object(r, |o| o.class())?;
        let Some(class) = class.as_object() else {
            return Ok(false);
        };
        let bits = self.with_object(class, |c| {
            (c.ty == ObjectType::HiddenClass).then(|| c.raw_field(layout::class::BITFIELD))
        })?;
        Ok(bits.is_some_and(|b| b & class_bits::IS_NATIVE_BINDING != 0))
    }

    /// Binding record of a native binding object
    pub fn native_binding_info(&self, r: ObjectRef) -> HeapResult<Option<NativeBindingInfo>> {
        if !self.is_native_binding(r)? {
            return Ok(None);
        }
        let symbol = self.root(LocalRoot::NativeBindingSymbol);
        let keys = self.property_keys(r)?;
        let symbol_key = self.string_value(symbol)?;
        let Some(pos) = keys.iter().position(|k| *k == symbol_key) else {
            return Ok(None);
        };
        let pointer = self.with_object(r, |o| o.tagged(layout::object::PROPERTIES + pos))?;
        let Some(pointer) = pointer.as_object() else {
            return Ok(None);
        };
        let binding = self.native_pointer_value(pointer)?;
        Ok(self.runtime().native().binding(binding))
    }

    /// New proxy
    pub fn new_proxy(&mut self, target: ObjectRef, handler: ObjectRef) -> HeapResult<ObjectRef> {
        let class = self.class_of(LocalRoot::ProxyClass);
        let fields = vec![
            Field::Tagged(TaggedValue::object(target)),
            Field::Tagged(TaggedValue::object(handler)),
        ];
        self.alloc(SpaceKind::Young, ObjectType::Proxy, class, fields, Vec::new())
    }
}
