//! Physical-extent records from the container's extent-reference tree.
//!
//! Both the key and the value pack a 4-bit tag into the top of a 64-bit
//! word. The masked-access helpers below are the supported API; the raw
//! words stay available for forensic display.

use deku::prelude::*;

use crate::object::{Oid, Paddr};

/// Low 60 bits of a packed extent word.
pub const PEXT_PAYLOAD_MASK: u64 = 0x0fff_ffff_ffff_ffff;
/// High 4 bits of a packed extent word.
pub const PEXT_TAG_SHIFT: u32 = 60;

/// Kind tag carried in the top nibble of [`PhysExtentValue::len_and_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtentKind {
    Any,
    New,
    Update,
    /// Reserved; never valid on disk.
    Dead,
}

impl ExtentKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Any),
            1 => Some(Self::New),
            2 => Some(Self::Update),
            3 => Some(Self::Dead),
            _ => None,
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Self::Any => 0,
            Self::New => 1,
            Self::Update => 2,
            Self::Dead => 3,
        }
    }
}

/// Key of a physical-extent record: the starting block address in the low
/// 60 bits, an object-type tag in the high 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct PhysExtentKey {
    pub oid_and_type: u64,
}

impl PhysExtentKey {
    pub const PACKED_SIZE: usize = 8;

    pub fn new(block_address: Paddr, type_tag: u8) -> Self {
        Self {
            oid_and_type: (block_address & PEXT_PAYLOAD_MASK)
                | (u64::from(type_tag) << PEXT_TAG_SHIFT),
        }
    }

    /// Starting physical block address of the extent.
    pub fn block_address(&self) -> Paddr {
        self.oid_and_type & PEXT_PAYLOAD_MASK
    }

    /// The high 4 bits. Exposed as-is; on-disk meaning is not interpreted.
    pub fn object_type_tag(&self) -> u8 {
        (self.oid_and_type >> PEXT_TAG_SHIFT) as u8
    }
}

/// Value of a physical-extent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct PhysExtentValue {
    pub len_and_kind: u64,
    pub owning_obj_id: Oid,
    pub refcnt: i32,
}

impl PhysExtentValue {
    pub const PACKED_SIZE: usize = 20;

    pub fn new(length: u64, kind: ExtentKind, owning_obj_id: Oid, refcnt: i32) -> Self {
        Self {
            len_and_kind: (length & PEXT_PAYLOAD_MASK)
                | (u64::from(kind.tag()) << PEXT_TAG_SHIFT),
            owning_obj_id,
            refcnt,
        }
    }

    /// Length of the extent in blocks.
    pub fn length(&self) -> u64 {
        self.len_and_kind & PEXT_PAYLOAD_MASK
    }

    pub fn kind_tag(&self) -> u8 {
        (self.len_and_kind >> PEXT_TAG_SHIFT) as u8
    }

    pub fn kind(&self) -> Option<ExtentKind> {
        ExtentKind::from_tag(self.kind_tag())
    }
}

/// A decoded physical-extent record: key plus value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysExtentRecord {
    pub key: PhysExtentKey,
    pub value: PhysExtentValue,
}

impl PhysExtentRecord {
    pub fn new(key: PhysExtentKey, value: PhysExtentValue) -> Self {
        Self { key, value }
    }

    /// First block past the extent.
    pub fn end_block_address(&self) -> Paddr {
        self.key.block_address() + self.value.length()
    }

    /// Whether `block` falls inside the extent's half-open block range.
    pub fn contains_block(&self, block: Paddr) -> bool {
        block >= self.key.block_address() && block < self.end_block_address()
    }

    /// More than one owner still references the extent.
    pub fn is_shared(&self) -> bool {
        self.value.refcnt > 1
    }

    /// No owner references the extent any more.
    pub fn can_be_deleted(&self) -> bool {
        self.value.refcnt == 0
    }
}
