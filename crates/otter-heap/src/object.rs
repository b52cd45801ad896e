//! Heap object records
//!
//! An object is a short header, a vector of 8-byte fields and an optional
//! raw byte area. Field 0 is always the hidden class. Per-type field
//! indices live in [`layout`].

use crate::space::{Address, align8};
use crate::value::TaggedValue;

/// Byte size of the object header
pub const HEADER_SIZE: usize = 8;

/// Byte size of one field
pub const FIELD_SIZE: usize = 8;

/// Object flag: array buffer storage was detached
pub const FLAG_DETACHED: u8 = 1 << 0;
/// Object flag: object is used as a prototype
pub const FLAG_PROTOTYPE: u8 = 1 << 1;

/// Closed set of heap object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ObjectType {
    HiddenClass = 0,
    String = 1,
    TaggedArray = 2,
    PlainObject = 3,
    Array = 4,
    Error = 5,
    Date = 6,
    Map = 7,
    Set = 8,
    RegExp = 9,
    ArrayBuffer = 10,
    SharedArrayBuffer = 11,
    SendableArrayBuffer = 12,
    TypedArray = 13,
    NativePointer = 14,
    BigInt = 15,
    Function = 16,
    AsyncFunction = 17,
    LexicalEnv = 18,
    MachineCode = 19,
    Module = 20,
    Proxy = 21,
    SharedObject = 22,
    SharedArray = 23,
    SharedMap = 24,
    SharedSet = 25,
}

impl ObjectType {
    const ALL: [ObjectType; 26] = [
        ObjectType::HiddenClass,
        ObjectType::String,
        ObjectType::TaggedArray,
        ObjectType::PlainObject,
        ObjectType::Array,
        ObjectType::Error,
        ObjectType::Date,
        ObjectType::Map,
        ObjectType::Set,
        ObjectType::RegExp,
        ObjectType::ArrayBuffer,
        ObjectType::SharedArrayBuffer,
        ObjectType::SendableArrayBuffer,
        ObjectType::TypedArray,
        ObjectType::NativePointer,
        ObjectType::BigInt,
        ObjectType::Function,
        ObjectType::AsyncFunction,
        ObjectType::LexicalEnv,
        ObjectType::MachineCode,
        ObjectType::Module,
        ObjectType::Proxy,
        ObjectType::SharedObject,
        ObjectType::SharedArray,
        ObjectType::SharedMap,
        ObjectType::SharedSet,
    ];

    /// Decode a type byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Whether objects of this type hold properties keyed through their class layout
    pub const fn has_named_properties(self) -> bool {
        matches!(self, ObjectType::PlainObject | ObjectType::SharedObject)
    }

    /// Whether the kind is a cross-isolate shared container
    pub const fn is_shared_kind(self) -> bool {
        matches!(
            self,
            ObjectType::SharedObject
                | ObjectType::SharedArray
                | ObjectType::SharedMap
                | ObjectType::SharedSet
                | ObjectType::SendableArrayBuffer
        )
    }
}

/// One 8-byte object slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Tagged value, traced by the collector
    Tagged(TaggedValue),
    /// Untagged payload (unboxed doubles, lengths, native handles)
    Raw(u64),
}

impl Field {
    /// Tagged payload, if any
    pub fn tagged(self) -> Option<TaggedValue> {
        match self {
            Field::Tagged(v) => Some(v),
            Field::Raw(_) => None,
        }
    }

    /// Raw payload, if any
    pub fn raw(self) -> Option<u64> {
        match self {
            Field::Raw(bits) => Some(bits),
            Field::Tagged(_) => None,
        }
    }
}

impl Default for Field {
    fn default() -> Self {
        Field::Tagged(TaggedValue::UNDEFINED)
    }
}

/// A heap object record
#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    /// Object kind
    pub ty: ObjectType,
    /// `FLAG_*` bits
    pub flags: u8,
    /// Slots; slot 0 is the hidden class
    pub fields: Vec<Field>,
    /// Trailing raw bytes (string contents, code, bigint digits)
    pub raw: Vec<u8>,
    /// Where the object currently sits
    pub address: Address,
}

impl HeapObject {
    /// Build an unplaced object
    pub fn new(ty: ObjectType, class: TaggedValue, mut fields: Vec<Field>, raw: Vec<u8>) -> Self {
        fields.insert(0, Field::Tagged(class));
        Self {
            ty,
            flags: 0,
            fields,
            raw,
            address: Address {
                region: 0,
                offset: 0,
            },
        }
    }

    /// Byte size of an object with the given shape
    pub const fn size_for(field_count: usize, raw_len: usize) -> usize {
        HEADER_SIZE + field_count * FIELD_SIZE + align8(raw_len)
    }

    /// Field count implied by a byte size and raw length, if consistent
    pub fn field_count_for(size: usize, raw_len: usize) -> Option<usize> {
        let fixed = HEADER_SIZE + align8(raw_len);
        if size < fixed + FIELD_SIZE || (size - fixed) % FIELD_SIZE != 0 {
            return None;
        }
        Some((size - fixed) / FIELD_SIZE)
    }

    /// Current byte size
    pub fn size(&self) -> usize {
        Self::size_for(self.fields.len(), self.raw.len())
    }

    /// Hidden class reference
    pub fn class(&self) -> TaggedValue {
        self.fields
            .first()
            .and_then(|f| f.tagged())
            .unwrap_or(TaggedValue::UNDEFINED)
    }

    /// Tagged field at `index`, `undefined` for raw or missing slots
    pub fn tagged(&self, index: usize) -> TaggedValue {
        self.fields
            .get(index)
            .and_then(|f| f.tagged())
            .unwrap_or(TaggedValue::UNDEFINED)
    }

    /// Raw field at `index`, 0 for tagged or missing slots
    pub fn raw_field(&self, index: usize) -> u64 {
        self.fields.get(index).and_then(|f| f.raw()).unwrap_or(0)
    }

    /// Whether a flag bit is set
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Field indices per object type
pub mod layout {
    /// Slot 0 of every object
    pub const CLASS: usize = 0;

    /// Hidden class slots
    pub mod class {
        /// Prototype object or null
        pub const PROTO: usize = 1;
        /// TaggedArray of property keys
        pub const LAYOUT: usize = 2;
        /// TaggedArray of child classes
        pub const TRANSITIONS: usize = 3;
        /// Class this one was derived from
        pub const PARENT: usize = 4;
        /// Prototype-change marker
        pub const PROTO_CHANGE_MARKER: usize = 5;
        /// Prototype-change details
        pub const PROTO_CHANGE_DETAILS: usize = 6;
        /// Raw bitfield, see [`crate::object::class_bits`]
        pub const BITFIELD: usize = 7;
        /// Slot count
        pub const COUNT: usize = 8;
    }

    /// Plain and shared object slots
    pub mod object {
        /// First property slot
        pub const PROPERTIES: usize = 1;
    }

    /// Tagged array slots
    pub mod tagged_array {
        /// First element slot
        pub const ELEMENTS: usize = 1;
    }

    /// Array, Map, Set and shared counterparts
    pub mod collection {
        /// Backing TaggedArray
        pub const ELEMENTS: usize = 1;
        /// Slot count
        pub const COUNT: usize = 2;
    }

    /// Error slots
    pub mod error {
        /// Raw error kind
        pub const KIND: usize = 1;
        /// Message string or undefined
        pub const MESSAGE: usize = 2;
        /// Slot count
        pub const COUNT: usize = 3;
    }

    /// Date slots
    pub mod date {
        /// Raw f64 bits of the time value
        pub const TIME: usize = 1;
    }

    /// RegExp slots
    pub mod regexp {
        /// Source string
        pub const SOURCE: usize = 1;
        /// Flags string
        pub const FLAGS: usize = 2;
        /// Raw native buffer id of the compiled bytecode
        pub const BYTECODE: usize = 3;
        /// Slot count
        pub const COUNT: usize = 4;
    }

    /// ArrayBuffer, SharedArrayBuffer and SendableArrayBuffer slots
    pub mod array_buffer {
        /// Raw storage id
        pub const DATA: usize = 1;
        /// Raw byte length
        pub const BYTE_LENGTH: usize = 2;
        /// Slot count
        pub const COUNT: usize = 3;
        /// Storage id of a buffer with no backing store
        pub const NO_STORAGE: u64 = u64::MAX;
    }

    /// TypedArray slots
    pub mod typed_array {
        /// Viewed buffer
        pub const BUFFER: usize = 1;
        /// Raw byte offset
        pub const BYTE_OFFSET: usize = 2;
        /// Raw element count
        pub const LENGTH: usize = 3;
        /// Raw element kind
        pub const KIND: usize = 4;
        /// Slot count
        pub const COUNT: usize = 5;
    }

    /// NativePointer slots
    pub mod native_pointer {
        /// Raw foreign handle
        pub const POINTER: usize = 1;
    }

    /// Function and AsyncFunction slots
    pub mod function {
        /// Name string
        pub const NAME: usize = 1;
        /// Captured lexical environment
        pub const ENV: usize = 2;
        /// MachineCode object
        pub const MACHINE_CODE: usize = 3;
        /// Profiling feedback
        pub const PROFILE: usize = 4;
        /// Raw entry point of the compiled code
        pub const CODE_ENTRY: usize = 5;
        /// Owning module
        pub const MODULE: usize = 6;
        /// Slot count of a plain function
        pub const COUNT: usize = 7;
        /// AsyncFunction only: identity hash
        pub const GC_HASH: usize = 7;
        /// Slot count of an async function
        pub const ASYNC_COUNT: usize = 8;
    }

    /// LexicalEnv slots
    pub mod env {
        /// Enclosing environment
        pub const PARENT: usize = 1;
        /// Scope description
        pub const SCOPE_INFO: usize = 2;
        /// First variable slot
        pub const SLOTS: usize = 3;
    }

    /// Module slots
    pub mod module {
        /// Record name
        pub const NAME: usize = 1;
        /// Raw [`crate::ModuleKind`]
        pub const KIND: usize = 2;
        /// Raw [`crate::ModuleStatus`]
        pub const STATUS: usize = 3;
        /// Module environment
        pub const ENVIRONMENT: usize = 4;
        /// TaggedArray of requested specifiers
        pub const REQUESTED: usize = 5;
        /// Slot count
        pub const COUNT: usize = 6;
    }

    /// Proxy slots
    pub mod proxy {
        /// Target object
        pub const TARGET: usize = 1;
        /// Handler object
        pub const HANDLER: usize = 2;
    }
}

/// Hidden class bitfield encoding
pub mod class_bits {
    use super::ObjectType;

    /// Instances serve as prototypes
    pub const IS_PROTOTYPE: u64 = 1 << 8;
    /// Instances wrap a native binding
    pub const IS_NATIVE_BINDING: u64 = 1 << 9;
    /// Class lives in the shared heap
    pub const IS_SHARED: u64 = 1 << 10;

    /// Pack an instance type and flags
    pub fn encode(instance: ObjectType, flags: u64) -> u64 {
        instance as u64 | flags
    }

    /// Instance type of a bitfield
    pub fn instance_type(bits: u64) -> Option<ObjectType> {
        ObjectType::from_u8((bits & 0xFF) as u8)
    }
}

/// Slots whose contents need a dedicated encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialField {
    /// Foreign handle, not portable across processes
    NativePointer,
    /// Storage id of an array buffer
    BufferData,
    /// Native id of compiled regexp bytecode
    RegExpBytecode,
}

/// Classify a slot of an object type
pub fn special_field(ty: ObjectType, index: usize) -> Option<SpecialField> {
    match (ty, index) {
        (ObjectType::NativePointer, layout::native_pointer::POINTER) => {
            Some(SpecialField::NativePointer)
        }
        (ObjectType::Function | ObjectType::AsyncFunction, layout::function::CODE_ENTRY) => {
            Some(SpecialField::NativePointer)
        }
        (
            ObjectType::ArrayBuffer
            | ObjectType::SharedArrayBuffer
            | ObjectType::SendableArrayBuffer,
            layout::array_buffer::DATA,
        ) => Some(SpecialField::BufferData),
        (ObjectType::RegExp, layout::regexp::BYTECODE) => Some(SpecialField::RegExpBytecode),
        _ => None,
    }
}
