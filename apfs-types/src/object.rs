//! The 32-byte object header shared by nearly every on-disk object, and
//! the type/flag vocabulary packed into its `type` word.
//!
//! Described in the Apple File System Reference > Objects.

use deku::prelude::*;

/// 64-bit object identifier.
pub type Oid = u64;

/// 64-bit transaction identifier.
pub type Xid = u64;

/// Physical block address. Apple defines `paddr_t` as signed; it is
/// treated as unsigned here, as no negative addresses occur on disk.
pub type Paddr = u64;

/// Low 16 bits of the `type` word: the object type tag.
pub const OBJECT_TYPE_MASK: u32 = 0x0000_ffff;
/// High 16 bits of the `type` word: storage class and flags.
pub const OBJECT_TYPE_FLAGS_MASK: u32 = 0xffff_0000;
/// The two bits selecting the storage class.
pub const OBJ_STORAGETYPE_MASK: u32 = 0xc000_0000;

/// Storage class: resolved through an object map.
pub const OBJ_VIRTUAL: u32 = 0x0000_0000;
/// Storage class: stored in the checkpoint data area.
pub const OBJ_EPHEMERAL: u32 = 0x8000_0000;
/// Storage class: the object identifier is a physical block address.
pub const OBJ_PHYSICAL: u32 = 0x4000_0000;

/// The object is stored without an object header; its header bytes on
/// disk are zero and its checksum is not meaningful.
pub const OBJ_NOHEADER: u32 = 0x2000_0000;
/// The object is encrypted.
pub const OBJ_ENCRYPTED: u32 = 0x1000_0000;
/// An ephemeral object that is not persisted across unmounts.
pub const OBJ_NONPERSISTENT: u32 = 0x0800_0000;

pub const OBJECT_TYPE_NX_SUPERBLOCK: u32 = 0x01;
pub const OBJECT_TYPE_BTREE: u32 = 0x02;
pub const OBJECT_TYPE_BTREE_NODE: u32 = 0x03;
pub const OBJECT_TYPE_SPACEMAN: u32 = 0x05;
pub const OBJECT_TYPE_SPACEMAN_CAB: u32 = 0x06;
pub const OBJECT_TYPE_SPACEMAN_CIB: u32 = 0x07;
pub const OBJECT_TYPE_SPACEMAN_BITMAP: u32 = 0x08;
pub const OBJECT_TYPE_SPACEMAN_FREE_QUEUE: u32 = 0x09;
pub const OBJECT_TYPE_EXTENT_LIST_TREE: u32 = 0x0a;
pub const OBJECT_TYPE_OMAP: u32 = 0x0b;
pub const OBJECT_TYPE_CHECKPOINT_MAP: u32 = 0x0c;
pub const OBJECT_TYPE_FS: u32 = 0x0d;
pub const OBJECT_TYPE_FSTREE: u32 = 0x0e;
pub const OBJECT_TYPE_BLOCKREFTREE: u32 = 0x0f;
pub const OBJECT_TYPE_SNAPMETATREE: u32 = 0x10;
pub const OBJECT_TYPE_NX_REAPER: u32 = 0x11;
pub const OBJECT_TYPE_NX_REAP_LIST: u32 = 0x12;
pub const OBJECT_TYPE_OMAP_SNAPSHOT: u32 = 0x13;
pub const OBJECT_TYPE_ER_STATE: u32 = 0x14;

/// How a referenced object is resolved to a block. Exactly one class
/// applies to every object; both storage-type bits set at once is
/// structurally invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Virtual,
    Ephemeral,
    Physical,
}

/// Decode the storage class from a raw `type` word. Returns `None` when
/// both storage-type bits are set, which never occurs in a well-formed
/// container.
pub fn storage_class(object_type: u32) -> Option<StorageClass> {
    match object_type & OBJ_STORAGETYPE_MASK {
        OBJ_VIRTUAL => Some(StorageClass::Virtual),
        OBJ_EPHEMERAL => Some(StorageClass::Ephemeral),
        OBJ_PHYSICAL => Some(StorageClass::Physical),
        _ => None,
    }
}

/// Object header (`obj_phys_t`), the 32-byte prefix of checksummed
/// objects. The checksum covers the whole block with these first eight
/// bytes zeroed; it is stored as eight little-endian bytes regardless of
/// the byte order the rest of the object was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct ObjectHeader {
    pub checksum: [u8; 8],
    pub oid: Oid,
    pub xid: Xid,
    pub object_type: u32,
    pub subtype: u32,
}

impl ObjectHeader {
    pub const PACKED_SIZE: usize = 32;

    /// The low 16 bits of the `type` word.
    pub fn type_tag(&self) -> u32 {
        self.object_type & OBJECT_TYPE_MASK
    }

    /// The high 16 bits of the `type` word: storage class plus flags.
    pub fn type_flags(&self) -> u32 {
        self.object_type & OBJECT_TYPE_FLAGS_MASK
    }

    pub fn storage_class(&self) -> Option<StorageClass> {
        storage_class(self.object_type)
    }

    pub fn is_encrypted(&self) -> bool {
        self.object_type & OBJ_ENCRYPTED != 0
    }

    pub fn is_nonpersistent(&self) -> bool {
        self.object_type & OBJ_NONPERSISTENT != 0
    }

    /// Whether the object carries its header on disk. `NOHEADER` objects
    /// zero these 32 bytes and skip checksum protection.
    pub fn has_header(&self) -> bool {
        self.object_type & OBJ_NOHEADER == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_word_is_split_into_tag_and_flags() {
        let header = ObjectHeader {
            object_type: OBJ_PHYSICAL | OBJ_ENCRYPTED | OBJECT_TYPE_BTREE_NODE,
            ..Default::default()
        };
        assert_eq!(header.type_tag(), OBJECT_TYPE_BTREE_NODE);
        assert_eq!(header.type_flags(), OBJ_PHYSICAL | OBJ_ENCRYPTED);
        assert_eq!(header.storage_class(), Some(StorageClass::Physical));
        assert!(header.is_encrypted());
        assert!(header.has_header());
    }

    #[test]
    fn storage_classes_are_mutually_exclusive() {
        assert_eq!(storage_class(OBJ_VIRTUAL), Some(StorageClass::Virtual));
        assert_eq!(storage_class(OBJ_EPHEMERAL), Some(StorageClass::Ephemeral));
        assert_eq!(storage_class(OBJ_PHYSICAL), Some(StorageClass::Physical));
        // Both bits at once never occurs in a well-formed container.
        assert_eq!(storage_class(OBJ_EPHEMERAL | OBJ_PHYSICAL), None);
    }

    #[test]
    fn noheader_objects_report_missing_header() {
        let header = ObjectHeader {
            object_type: OBJ_NOHEADER | OBJECT_TYPE_BTREE_NODE,
            ..Default::default()
        };
        assert!(!header.has_header());
    }

    #[test]
    fn header_layout_is_32_bytes() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0xAA; 8]);
        raw.extend_from_slice(&0x1234_u64.to_le_bytes());
        raw.extend_from_slice(&0x99_u64.to_le_bytes());
        raw.extend_from_slice(&(OBJ_PHYSICAL | OBJECT_TYPE_SPACEMAN).to_le_bytes());
        raw.extend_from_slice(&0_u32.to_le_bytes());
        assert_eq!(raw.len(), ObjectHeader::PACKED_SIZE);

        let (_rest, header) = ObjectHeader::from_bytes((&raw, 0)).unwrap();
        assert_eq!(header.checksum, [0xAA; 8]);
        assert_eq!(header.oid, 0x1234);
        assert_eq!(header.xid, 0x99);
        assert_eq!(header.type_tag(), OBJECT_TYPE_SPACEMAN);
    }
}
