//! Wire tags
//!
//! Byte values `0x00..=0x06` are "new object" tags carrying the target
//! space; named flags start at `0x07` and keep a fixed order.

use otter_heap::SpaceKind;

/// Destination space of a deserialized object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum SerializedObjectSpace {
    Old = 0,
    NonMovable = 1,
    MachineCode = 2,
    Huge = 3,
    SharedOld = 4,
    SharedNonMovable = 5,
    SharedHuge = 6,
}

impl SerializedObjectSpace {
    /// Number of spaces
    pub const COUNT: usize = 7;

    /// Every space in id order
    pub const ALL: [SerializedObjectSpace; 7] = [
        SerializedObjectSpace::Old,
        SerializedObjectSpace::NonMovable,
        SerializedObjectSpace::MachineCode,
        SerializedObjectSpace::Huge,
        SerializedObjectSpace::SharedOld,
        SerializedObjectSpace::SharedNonMovable,
        SerializedObjectSpace::SharedHuge,
    ];

    /// Decode a space id
    pub fn from_u8(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Serialized space of an object living in `space`
    pub fn from_space(space: SpaceKind) -> Self {
        match space {
            SpaceKind::Young | SpaceKind::Old | SpaceKind::ReadOnly => SerializedObjectSpace::Old,
            SpaceKind::NonMovable => SerializedObjectSpace::NonMovable,
            SpaceKind::MachineCode => SerializedObjectSpace::MachineCode,
            SpaceKind::Huge => SerializedObjectSpace::Huge,
            SpaceKind::SharedOld => SerializedObjectSpace::SharedOld,
            SpaceKind::SharedNonMovable => SerializedObjectSpace::SharedNonMovable,
            SpaceKind::SharedHuge => SerializedObjectSpace::SharedHuge,
        }
    }

    /// Heap space to allocate into on decode
    pub fn to_space(self) -> SpaceKind {
        match self {
            SerializedObjectSpace::Old => SpaceKind::Old,
            SerializedObjectSpace::NonMovable => SpaceKind::NonMovable,
            SerializedObjectSpace::MachineCode => SpaceKind::MachineCode,
            SerializedObjectSpace::Huge => SpaceKind::Huge,
            SerializedObjectSpace::SharedOld => SpaceKind::SharedOld,
            SerializedObjectSpace::SharedNonMovable => SpaceKind::SharedNonMovable,
            SerializedObjectSpace::SharedHuge => SpaceKind::SharedHuge,
        }
    }

    /// Huge variant of the same heap
    pub fn huge_variant(self) -> Self {
        if self.is_shared() {
            SerializedObjectSpace::SharedHuge
        } else {
            SerializedObjectSpace::Huge
        }
    }

    /// Whether the space belongs to the shared heap
    pub fn is_shared(self) -> bool {
        matches!(
            self,
            SerializedObjectSpace::SharedOld
                | SerializedObjectSpace::SharedNonMovable
                | SerializedObjectSpace::SharedHuge
        )
    }

    /// Whether objects get a region each
    pub fn is_huge(self) -> bool {
        matches!(self, SerializedObjectSpace::Huge | SerializedObjectSpace::SharedHuge)
    }
}

/// Tag preceding every encoded unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodeFlag {
    /// Full object encoding into the given space
    NewObject(SerializedObjectSpace),
    /// Back-reference by emission index
    Reference,
    /// Next unit is a weak reference
    Weak,
    /// Inline tagged primitive
    Primitive,
    /// Length-prefixed raw bytes
    MultiRawData,
    /// Index into the snapshot environment
    RootObject,
    /// Next unit is a prototype
    ObjectProto,
    /// Inline array buffer contents
    ArrayBuffer,
    /// Transferred array buffer storage
    TransferArrayBuffer,
    /// Shared array buffer storage
    SharedArrayBuffer,
    /// Sendable array buffer storage
    SendableArrayBuffer,
    /// Native binding attach record
    NativeBindingObject,
    /// Error kind and message
    JsError,
    /// Inline regexp bytecode
    JsRegExp,
    /// Index into the shared-object chunk
    SharedObject,
}

impl EncodeFlag {
    const NAMED_BASE: u8 = 0x07;

    /// Wire byte
    pub fn to_u8(self) -> u8 {
        match self {
            EncodeFlag::NewObject(space) => space as u8,
            EncodeFlag::Reference => Self::NAMED_BASE,
            EncodeFlag::Weak => Self::NAMED_BASE + 1,
            EncodeFlag::Primitive => Self::NAMED_BASE + 2,
            EncodeFlag::MultiRawData => Self::NAMED_BASE + 3,
            EncodeFlag::RootObject => Self::NAMED_BASE + 4,
            EncodeFlag::ObjectProto => Self::NAMED_BASE + 5,
            EncodeFlag::ArrayBuffer => Self::NAMED_BASE + 6,
            EncodeFlag::TransferArrayBuffer => Self::NAMED_BASE + 7,
            EncodeFlag::SharedArrayBuffer => Self::NAMED_BASE + 8,
            EncodeFlag::SendableArrayBuffer => Self::NAMED_BASE + 9,
            EncodeFlag::NativeBindingObject => Self::NAMED_BASE + 10,
            EncodeFlag::JsError => Self::NAMED_BASE + 11,
            EncodeFlag::JsRegExp => Self::NAMED_BASE + 12,
            EncodeFlag::SharedObject => Self::NAMED_BASE + 13,
        }
    }

    /// Decode a wire byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        if byte < Self::NAMED_BASE {
            return SerializedObjectSpace::from_u8(byte).map(EncodeFlag::NewObject);
        }
        Some(match byte - Self::NAMED_BASE {
            0 => EncodeFlag::Reference,
            1 => EncodeFlag::Weak,
            2 => EncodeFlag::Primitive,
            3 => EncodeFlag::MultiRawData,
            4 => EncodeFlag::RootObject,
            5 => EncodeFlag::ObjectProto,
            6 => EncodeFlag::ArrayBuffer,
            7 => EncodeFlag::TransferArrayBuffer,
            8 => EncodeFlag::SharedArrayBuffer,
            9 => EncodeFlag::SendableArrayBuffer,
            10 => EncodeFlag::NativeBindingObject,
            11 => EncodeFlag::JsError,
            12 => EncodeFlag::JsRegExp,
            13 => EncodeFlag::SharedObject,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_byte_values() {
        assert_eq!(EncodeFlag::NewObject(SerializedObjectSpace::Old).to_u8(), 0x00);
        assert_eq!(EncodeFlag::NewObject(SerializedObjectSpace::SharedHuge).to_u8(), 0x06);
        assert_eq!(EncodeFlag::Reference.to_u8(), 0x07);
        assert_eq!(EncodeFlag::Primitive.to_u8(), 0x09);
        assert_eq!(EncodeFlag::RootObject.to_u8(), 0x0B);
        assert_eq!(EncodeFlag::SharedObject.to_u8(), 0x14);
        assert_eq!(EncodeFlag::from_u8(0x15), None);
        for byte in 0..=0x14u8 {
            assert_eq!(EncodeFlag::from_u8(byte).map(EncodeFlag::to_u8), Some(byte));
        }
    }

    #[test]
    fn test_space_mapping() {
        assert_eq!(SerializedObjectSpace::from_space(SpaceKind::Young), SerializedObjectSpace::Old);
        assert_eq!(
            SerializedObjectSpace::from_space(SpaceKind::SharedNonMovable).to_space(),
            SpaceKind::SharedNonMovable
        );
        assert_eq!(SerializedObjectSpace::SharedOld.huge_variant(), SerializedObjectSpace::SharedHuge);
    }
}
