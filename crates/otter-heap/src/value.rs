//! Tagged values and heap references
//!
//! A [`TaggedValue`] is a single 64-bit word. The upper 16 bits tell the
//! encodings apart:
//!
//! - `0x0000`: heap reference (bit 40 set) or a special constant
//! - `0xFFFF`: 32-bit integer in the low half
//! - anything else: an IEEE double shifted up by `2^48`

use std::fmt;

const TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
const TAG_INT: u64 = 0xFFFF_0000_0000_0000;
const TAG_HEAP: u64 = 1 << 40;
const TAG_WEAK: u64 = 1 << 39;
const DOUBLE_OFFSET: u64 = 1 << 48;
const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

const VALUE_NULL: u64 = 0x02;
const VALUE_HOLE: u64 = 0x05;
const VALUE_FALSE: u64 = 0x06;
const VALUE_TRUE: u64 = 0x07;
const VALUE_UNDEFINED: u64 = 0x0A;

/// Opaque handle to a heap object.
///
/// The index addresses a slot in either the isolate-local arena or the
/// runtime-wide shared arena; the top bit selects which one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(u32);

impl ObjectRef {
    const SHARED_BIT: u32 = 1 << 31;

    /// Reference into the isolate-local arena
    pub const fn local(index: u32) -> Self {
        Self(index & !Self::SHARED_BIT)
    }

    /// Reference into the shared arena
    pub const fn shared(index: u32) -> Self {
        Self(index | Self::SHARED_BIT)
    }

    /// Rebuild from [`ObjectRef::raw`]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw encoding, including the shared bit
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Slot index inside the owning arena
    pub const fn index(self) -> usize {
        (self.0 & !Self::SHARED_BIT) as usize
    }

    /// Whether the object lives in the shared heap
    pub const fn is_shared(self) -> bool {
        self.0 & Self::SHARED_BIT != 0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_shared() {
            write!(f, "ObjectRef(shared:{})", self.index())
        } else {
            write!(f, "ObjectRef({})", self.index())
        }
    }
}

/// A tagged machine word: inline primitive or heap reference
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaggedValue(u64);

impl TaggedValue {
    /// `undefined`
    pub const UNDEFINED: Self = Self(VALUE_UNDEFINED);
    /// `null`
    pub const NULL: Self = Self(VALUE_NULL);
    /// `true`
    pub const TRUE: Self = Self(VALUE_TRUE);
    /// `false`
    pub const FALSE: Self = Self(VALUE_FALSE);
    /// Array hole marker
    pub const HOLE: Self = Self(VALUE_HOLE);

    /// Reinterpret a raw word
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw word
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Boolean value
    pub const fn boolean(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    /// 32-bit integer
    pub const fn int(i: i32) -> Self {
        Self(TAG_INT | (i as u32 as u64))
    }

    /// IEEE double; all NaNs collapse to one bit pattern
    pub fn double(d: f64) -> Self {
        let bits = if d.is_nan() { CANONICAL_NAN } else { d.to_bits() };
        Self(bits.wrapping_add(DOUBLE_OFFSET))
    }

    /// Number, stored as int when it is an exact int32
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && !(n == 0.0 && n.is_sign_negative())
        {
            Self::int(n as i32)
        } else {
            Self::double(n)
        }
    }

    /// Strong heap reference
    pub const fn object(r: ObjectRef) -> Self {
        Self(TAG_HEAP | r.raw() as u64)
    }

    /// Weak heap reference
    pub const fn weak_object(r: ObjectRef) -> Self {
        Self(TAG_HEAP | TAG_WEAK | r.raw() as u64)
    }

    /// Whether this word is a heap reference (strong or weak)
    pub const fn is_heap_object(self) -> bool {
        self.0 & TAG_MASK == 0 && self.0 & TAG_HEAP != 0
    }

    /// Whether this is a weak heap reference
    pub const fn is_weak(self) -> bool {
        self.is_heap_object() && self.0 & TAG_WEAK != 0
    }

    /// Weak form of a heap reference; primitives are returned unchanged
    pub const fn to_weak(self) -> Self {
        if self.is_heap_object() {
            Self(self.0 | TAG_WEAK)
        } else {
            self
        }
    }

    /// Strong form of a heap reference; primitives are returned unchanged
    pub const fn to_strong(self) -> Self {
        if self.is_heap_object() {
            Self(self.0 & !TAG_WEAK)
        } else {
            self
        }
    }

    /// Referenced object, if any
    pub const fn as_object(self) -> Option<ObjectRef> {
        if self.is_heap_object() {
            Some(ObjectRef::from_raw(self.0 as u32))
        } else {
            None
        }
    }

    /// Whether this is an int32
    pub const fn is_int(self) -> bool {
        self.0 & TAG_MASK == TAG_INT
    }

    /// Int32 payload
    pub const fn as_int(self) -> Option<i32> {
        if self.is_int() {
            Some(self.0 as u32 as i32)
        } else {
            None
        }
    }

    /// Whether this is a boxed double
    pub const fn is_double(self) -> bool {
        let tag = self.0 & TAG_MASK;
        tag != 0 && tag != TAG_INT
    }

    /// Numeric value of an int or double
    pub fn as_number(self) -> Option<f64> {
        if let Some(i) = self.as_int() {
            Some(i as f64)
        } else if self.is_double() {
            Some(f64::from_bits(self.0.wrapping_sub(DOUBLE_OFFSET)))
        } else {
            None
        }
    }

    /// Boolean payload
    pub const fn as_boolean(self) -> Option<bool> {
        match self.0 {
            VALUE_TRUE => Some(true),
            VALUE_FALSE => Some(false),
            _ => None,
        }
    }

    /// `undefined`
    pub const fn is_undefined(self) -> bool {
        self.0 == VALUE_UNDEFINED
    }

    /// `null`
    pub const fn is_null(self) -> bool {
        self.0 == VALUE_NULL
    }

    /// Array hole
    pub const fn is_hole(self) -> bool {
        self.0 == VALUE_HOLE
    }
}

impl Default for TaggedValue {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl From<ObjectRef> for TaggedValue {
    fn from(r: ObjectRef) -> Self {
        Self::object(r)
    }
}

impl fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(r) = self.as_object() {
            if self.is_weak() {
                write!(f, "Weak({:?})", r)
            } else {
                write!(f, "{:?}", r)
            }
        } else if let Some(i) = self.as_int() {
            write!(f, "Int({})", i)
        } else if let Some(n) = self.as_number() {
            write!(f, "Double({})", n)
        } else if let Some(b) = self.as_boolean() {
            write!(f, "{}", b)
        } else if self.is_undefined() {
            write!(f, "undefined")
        } else if self.is_null() {
            write!(f, "null")
        } else if self.is_hole() {
            write!(f, "hole")
        } else {
            write!(f, "TaggedValue({:#x})", self.0)
        }
    }
}
