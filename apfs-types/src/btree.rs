//! B-tree node and info layouts.
//!
//! APFS keeps nearly all metadata in copy-on-write B-trees. A node is a
//! checksummed object whose data area holds a table of contents followed
//! by key and value bytes; the root node additionally carries a trailing
//! [`BtreeInfo`] footer summarizing the whole tree.
//!
//! Described in the Apple File System Reference > B-Trees.

use deku::prelude::*;

use crate::object::ObjectHeader;

/// Sentinel offset meaning "no such location".
pub const BTOFF_INVALID: u16 = 0xffff;

/// The node is the root of its tree and carries a [`BtreeInfo`] footer.
pub const BTNODE_ROOT: u16 = 0x0001;
/// The node is a leaf; holds key/value records rather than child links.
pub const BTNODE_LEAF: u16 = 0x0002;
/// Keys and values are fixed-size; the table of contents uses [`KvOff`].
pub const BTNODE_FIXED_KV_SIZE: u16 = 0x0004;
/// The node belongs to a hashed (sealed-volume) tree.
pub const BTNODE_HASHED: u16 = 0x0008;
/// The node is stored without an object header.
pub const BTNODE_NOHEADER: u16 = 0x0010;

/// Keys are plain unsigned 64-bit integers.
pub const BTREE_UINT64_KEYS: u32 = 0x0000_0001;
/// The tree is expected to grow by appending at the right edge.
pub const BTREE_SEQUENTIAL_INSERT: u32 = 0x0000_0002;
/// The table of contents may reference keys with no value.
pub const BTREE_ALLOW_GHOSTS: u32 = 0x0000_0004;
/// Child nodes are referenced by ephemeral object identifier.
pub const BTREE_EPHEMERAL: u32 = 0x0000_0008;
/// Child nodes are referenced by physical block address.
pub const BTREE_PHYSICAL: u32 = 0x0000_0010;
/// The tree is not persisted across unmounts.
pub const BTREE_NONPERSISTENT: u32 = 0x0000_0020;
/// Key/value pairs are not aligned to eight-byte boundaries.
pub const BTREE_KV_NONALIGNED: u32 = 0x0000_0040;
/// Non-leaf nodes store a hash of their children.
pub const BTREE_HASHED: u32 = 0x0000_0080;
/// Nodes are stored without object headers.
pub const BTREE_NOHEADER: u32 = 0x0000_0100;

/// An offset/length pair locating a range inside a node's data area
/// (`nloc_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct Nloc {
    pub off: u16,
    pub len: u16,
}

impl Nloc {
    pub const PACKED_SIZE: usize = 4;

    pub fn new(off: u16, len: u16) -> Self {
        Self { off, len }
    }

    pub fn offset(&self) -> u16 {
        self.off
    }

    pub fn length(&self) -> u16 {
        self.len
    }

    /// An `nloc` with offset [`BTOFF_INVALID`] references nothing.
    pub fn is_valid(&self) -> bool {
        self.off != BTOFF_INVALID
    }

    /// One past the last byte referenced, in data-area coordinates.
    pub fn end(&self) -> usize {
        self.off as usize + self.len as usize
    }
}

/// Fixed-size table-of-contents entry (`kvoff_t`): key and value offsets
/// for trees whose key and value widths are constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct KvOff {
    pub k: u16,
    pub v: u16,
}

impl KvOff {
    pub const PACKED_SIZE: usize = 4;
}

/// Variable-size table-of-contents entry (`kvloc_t`): key and value
/// locations with explicit lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct KvLoc {
    pub k: Nloc,
    pub v: Nloc,
}

impl KvLoc {
    pub const PACKED_SIZE: usize = 8;
}

/// Static half of the B-tree summary (`btree_info_fixed_t`). Zero
/// `key_size` or `val_size` means the dimension is variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct BtreeInfoFixed {
    pub flags: u32,
    pub node_size: u32,
    pub key_size: u32,
    pub val_size: u32,
}

impl BtreeInfoFixed {
    pub const PACKED_SIZE: usize = 16;
}

/// B-tree summary (`btree_info_t`), stored as the trailing footer of the
/// root node's data area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct BtreeInfo {
    pub fixed: BtreeInfoFixed,
    pub longest_key: u64,
    pub longest_val: u64,
    pub key_count: u64,
    pub node_count: u64,
}

impl BtreeInfo {
    pub const PACKED_SIZE: usize = 48;

    pub fn has_fixed_kv_size(&self) -> bool {
        self.fixed.key_size != 0 && self.fixed.val_size != 0
    }

    pub fn has_uint64_keys(&self) -> bool {
        self.fixed.flags & BTREE_UINT64_KEYS != 0
    }

    pub fn allows_ghosts(&self) -> bool {
        self.fixed.flags & BTREE_ALLOW_GHOSTS != 0
    }

    pub fn is_physical(&self) -> bool {
        self.fixed.flags & BTREE_PHYSICAL != 0
    }

    pub fn is_ephemeral(&self) -> bool {
        self.fixed.flags & BTREE_EPHEMERAL != 0
    }
}

/// On-disk B-tree node (`btree_node_phys_t`): a 56-byte header followed
/// by the data area. Offsets inside [`Self::data`] are relative to its
/// first byte.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct BtreeNodePhys {
    pub header: ObjectHeader,
    pub flags: u16,
    pub level: u16,
    pub nkeys: u32,
    pub table_space: Nloc,
    pub free_space: Nloc,
    pub key_free_list: Nloc,
    pub val_free_list: Nloc,
    #[deku(
        reader = "BtreeNodePhys::read_data(deku::rest)",
        writer = "BtreeNodePhys::write_data(deku::output, &self.data)"
    )]
    pub data: Vec<u8>,
}

impl BtreeNodePhys {
    /// Bytes before the data area begins.
    pub const HEADER_SIZE: usize = 56;

    fn read_data(
        rest: &deku::bitvec::BitSlice<u8, deku::bitvec::Msb0>,
    ) -> Result<(&deku::bitvec::BitSlice<u8, deku::bitvec::Msb0>, Vec<u8>), DekuError> {
        let bytes = rest.to_bitvec().into_vec();
        let empty = &rest[rest.len()..];
        Ok((empty, bytes))
    }

    fn write_data(
        output: &mut deku::bitvec::BitVec<u8, deku::bitvec::Msb0>,
        data: &[u8],
    ) -> Result<(), DekuError> {
        data.write(output, ())
    }

    pub fn is_root(&self) -> bool {
        self.flags & BTNODE_ROOT != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & BTNODE_LEAF != 0
    }

    pub fn has_fixed_kv_size(&self) -> bool {
        self.flags & BTNODE_FIXED_KV_SIZE != 0
    }

    pub fn is_hashed(&self) -> bool {
        self.flags & BTNODE_HASHED != 0
    }

    pub fn has_header(&self) -> bool {
        self.flags & BTNODE_NOHEADER == 0
    }

    /// Size in bytes of one table-of-contents entry for this node.
    pub fn toc_entry_size(&self) -> usize {
        if self.has_fixed_kv_size() {
            KvOff::PACKED_SIZE
        } else {
            KvLoc::PACKED_SIZE
        }
    }

    /// Total on-disk size of the node.
    pub fn node_size(&self) -> usize {
        Self::HEADER_SIZE + self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nloc_reports_offset_length_and_validity() {
        let loc = Nloc::new(100, 50);
        assert_eq!(loc.offset(), 100);
        assert_eq!(loc.length(), 50);
        assert_eq!(loc.end(), 150);
        assert!(loc.is_valid());

        let invalid = Nloc::new(BTOFF_INVALID, 10);
        assert!(!invalid.is_valid());
    }

    #[test]
    fn node_flags_decode() {
        let node = BtreeNodePhys {
            header: ObjectHeader::default(),
            flags: BTNODE_ROOT | BTNODE_LEAF | BTNODE_FIXED_KV_SIZE,
            level: 0,
            nkeys: 0,
            table_space: Nloc::default(),
            free_space: Nloc::default(),
            key_free_list: Nloc::default(),
            val_free_list: Nloc::default(),
            data: Vec::new(),
        };
        assert!(node.is_root());
        assert!(node.is_leaf());
        assert!(node.has_fixed_kv_size());
        assert!(!node.is_hashed());
        assert!(node.has_header());
        assert_eq!(node.toc_entry_size(), KvOff::PACKED_SIZE);
    }

    #[test]
    fn btree_info_footer_is_48_bytes() {
        let info = BtreeInfo {
            fixed: BtreeInfoFixed {
                flags: BTREE_UINT64_KEYS | BTREE_PHYSICAL,
                node_size: 4096,
                key_size: 8,
                val_size: 8,
            },
            longest_key: 8,
            longest_val: 8,
            key_count: 42,
            node_count: 3,
        };
        let raw = info.to_bytes().unwrap();
        assert_eq!(raw.len(), BtreeInfo::PACKED_SIZE);
        assert!(info.has_fixed_kv_size());
        assert!(info.has_uint64_keys());
        assert!(info.is_physical());
        assert!(!info.allows_ghosts());

        let (_rest, back) = BtreeInfo::from_bytes((&raw, 0)).unwrap();
        assert_eq!(back, info);
    }
}
