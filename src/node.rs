//! B-tree node engine: table-of-contents access and binary search over
//! a single decoded node.
//!
//! A node is decoded once from its block and never mutated. Decoding
//! verifies the checksum (unless the node is flagged headerless) and
//! that the key count fits the table of contents; byte ranges referenced
//! by individual entries are checked lazily when the entry is read, so
//! that a damaged table can still be inspected entry by entry.

use std::cmp::Ordering;

use apfs_types::Endian;
use apfs_types::btree::{BTOFF_INVALID, BtreeInfo, BtreeNodePhys, Nloc};
use apfs_types::object::{Oid, Xid};

use crate::checksum;
use crate::error::{Error, Result};
use crate::reader;
use crate::records;

/// One table-of-contents entry resolved to its key and value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry<'a> {
    pub index: usize,
    pub key: &'a [u8],
    /// `None` for ghost keys: a key listed without a value.
    pub value: Option<&'a [u8]>,
}

/// A decoded B-tree node plus the byte order it was decoded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtreeNode {
    phys: BtreeNodePhys,
    endian: Endian,
}

impl BtreeNode {
    /// Key width for fixed-layout tables. OID-keyed index trees use
    /// eight-byte keys; other widths come from the root footer.
    pub const FIXED_KEY_SIZE: usize = 8;
    /// Value width for fixed-layout tables.
    pub const FIXED_VALUE_SIZE: usize = 8;

    /// Decode a node from its block.
    ///
    /// Headerless nodes (`BTNODE_NOHEADER`) skip checksum verification;
    /// whoever referenced the node is assumed to have validated its
    /// integrity by other means.
    pub fn decode(block: &[u8], endian: Endian) -> Result<Self> {
        if block.len() < BtreeNodePhys::HEADER_SIZE {
            return Err(Error::InsufficientData {
                needed: BtreeNodePhys::HEADER_SIZE,
                actual: block.len(),
            });
        }
        let phys: BtreeNodePhys = records::decode_record(block, endian)?;
        if phys.has_header() && !checksum::verify_block(block) {
            return Err(Error::ChecksumMismatch {
                oid: phys.header.oid,
                xid: phys.header.xid,
            });
        }

        let node = Self { phys, endian };
        let needed = node.key_count() * node.phys.toc_entry_size();
        if (node.phys.table_space.len as usize) < needed {
            return Err(Error::Malformed(format!(
                "node {:#x}: {} keys do not fit a {}-byte table of contents",
                node.oid(),
                node.key_count(),
                node.phys.table_space.len
            )));
        }
        Ok(node)
    }

    pub fn oid(&self) -> Oid {
        self.phys.header.oid
    }

    pub fn xid(&self) -> Xid {
        self.phys.header.xid
    }

    /// Subtype tag of the containing tree, as recorded in the header.
    pub fn subtype(&self) -> u32 {
        self.phys.header.subtype
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn key_count(&self) -> usize {
        self.phys.nkeys as usize
    }

    pub fn level(&self) -> u16 {
        self.phys.level
    }

    pub fn flags(&self) -> u16 {
        self.phys.flags
    }

    pub fn is_root(&self) -> bool {
        self.phys.is_root()
    }

    pub fn is_leaf(&self) -> bool {
        self.phys.is_leaf()
    }

    pub fn has_fixed_kv_size(&self) -> bool {
        self.phys.has_fixed_kv_size()
    }

    pub fn is_hashed(&self) -> bool {
        self.phys.is_hashed()
    }

    pub fn has_header(&self) -> bool {
        self.phys.has_header()
    }

    pub fn table_space(&self) -> Nloc {
        self.phys.table_space
    }

    pub fn free_space(&self) -> Nloc {
        self.phys.free_space
    }

    pub fn key_free_list(&self) -> Nloc {
        self.phys.key_free_list
    }

    pub fn value_free_list(&self) -> Nloc {
        self.phys.val_free_list
    }

    /// The node's data area, everything past the 56-byte header.
    pub fn data(&self) -> &[u8] {
        &self.phys.data
    }

    /// Total on-disk size of the node.
    pub fn node_size(&self) -> usize {
        self.phys.node_size()
    }

    pub fn toc_entry_size(&self) -> usize {
        self.phys.toc_entry_size()
    }

    /// The B-tree summary footer at the tail of a root node's data area.
    pub fn root_info(&self) -> Result<BtreeInfo> {
        if !self.is_root() {
            return Err(Error::Malformed(format!(
                "node {:#x} is not a root and carries no footer",
                self.oid()
            )));
        }
        let data = self.data();
        if data.len() < BtreeInfo::PACKED_SIZE {
            return Err(Error::InsufficientData {
                needed: BtreeInfo::PACKED_SIZE,
                actual: data.len(),
            });
        }
        records::btree_info(&data[data.len() - BtreeInfo::PACKED_SIZE..], self.endian)
    }

    fn entry_error(&self, index: usize, what: &str) -> Error {
        Error::Malformed(format!(
            "node {:#x}: entry {index} {what} outside data area",
            self.oid()
        ))
    }

    /// Resolve table-of-contents entry `index` to its key and value
    /// bytes. Fails with `Malformed` when the entry points outside the
    /// node.
    pub fn entry(&self, index: usize) -> Result<NodeEntry<'_>> {
        let count = self.key_count();
        if index >= count {
            return Err(Error::OutOfRange {
                what: "table of contents",
                index,
                len: count,
            });
        }
        let data = self.data();
        let table = self.phys.table_space;
        let base = table.off as usize + index * self.toc_entry_size();
        if table.off == BTOFF_INVALID || base + self.toc_entry_size() > data.len() {
            return Err(self.entry_error(index, "table slot"));
        }

        if self.has_fixed_kv_size() {
            let key_off = reader::read_u16(data, base, self.endian)? as usize;
            let val_off = reader::read_u16(data, base + 2, self.endian)? as usize;
            let key = reader::read_bytes(data, key_off, Self::FIXED_KEY_SIZE)
                .map_err(|_| self.entry_error(index, "key"))?;
            let value = if val_off == BTOFF_INVALID as usize {
                None
            } else {
                Some(
                    reader::read_bytes(data, val_off, Self::FIXED_VALUE_SIZE)
                        .map_err(|_| self.entry_error(index, "value"))?,
                )
            };
            Ok(NodeEntry { index, key, value })
        } else {
            let key_off = reader::read_u16(data, base, self.endian)? as usize;
            let key_len = reader::read_u16(data, base + 2, self.endian)? as usize;
            let val_off = reader::read_u16(data, base + 4, self.endian)? as usize;
            let val_len = reader::read_u16(data, base + 6, self.endian)? as usize;
            let key = reader::read_bytes(data, key_off, key_len)
                .map_err(|_| self.entry_error(index, "key"))?;
            let value = if val_off == BTOFF_INVALID as usize {
                None
            } else {
                Some(
                    reader::read_bytes(data, val_off, val_len)
                        .map_err(|_| self.entry_error(index, "value"))?,
                )
            };
            Ok(NodeEntry { index, key, value })
        }
    }

    /// The leading 64-bit object identifier of entry `index`'s key.
    pub fn key_oid(&self, index: usize) -> Result<Oid> {
        let entry = self.entry(index)?;
        reader::read_u64(entry.key, 0, self.endian)
            .map_err(|_| self.entry_error(index, "key oid"))
    }

    /// The `(oid, xid)` composite key of entry `index`.
    pub fn key_oid_xid(&self, index: usize) -> Result<(Oid, Xid)> {
        let entry = self.entry(index)?;
        let oid = reader::read_u64(entry.key, 0, self.endian)
            .map_err(|_| self.entry_error(index, "key oid"))?;
        let xid = reader::read_u64(entry.key, 8, self.endian)
            .map_err(|_| self.entry_error(index, "key xid"))?;
        Ok((oid, xid))
    }

    /// The child object identifier stored in entry `index` of a non-leaf
    /// node.
    pub fn child_oid(&self, index: usize) -> Result<Oid> {
        if self.is_leaf() {
            return Err(Error::Malformed(format!(
                "node {:#x} is a leaf and has no children",
                self.oid()
            )));
        }
        let entry = self.entry(index)?;
        let value = entry
            .value
            .ok_or_else(|| self.entry_error(index, "child pointer"))?;
        reader::read_u64(value, 0, self.endian)
            .map_err(|_| self.entry_error(index, "child pointer"))
    }

    /// Binary search by object identifier.
    ///
    /// In a leaf, the exact entry or `NotFound`. In an internal node,
    /// the entry whose key is the greatest one not exceeding `target`,
    /// i.e. the child to descend into; `NotFound` when every key is
    /// greater than `target`.
    pub fn find_by_oid(&self, target: Oid) -> Result<NodeEntry<'_>> {
        if self.key_count() == 0 {
            return Err(Error::NotFound);
        }
        let mut low: isize = 0;
        let mut high: isize = self.key_count() as isize - 1;
        while low <= high {
            let mid = ((low + high) / 2) as usize;
            match self.key_oid(mid)?.cmp(&target) {
                Ordering::Equal => return self.entry(mid),
                Ordering::Less => low = mid as isize + 1,
                Ordering::Greater => high = mid as isize - 1,
            }
        }
        if high < 0 || self.is_leaf() {
            return Err(Error::NotFound);
        }
        self.entry(high as usize)
    }

    /// Binary search by `(oid, xid)` composite key, as object maps use.
    ///
    /// In a leaf, the entry for `target_oid` with the greatest
    /// `xid <= target_xid`; `NotFound` when the object has no version
    /// that old. In an internal node, the descent entry for the
    /// composite ordering.
    pub fn find_by_oid_xid(&self, target_oid: Oid, target_xid: Xid) -> Result<NodeEntry<'_>> {
        if self.key_count() == 0 {
            return Err(Error::NotFound);
        }
        let mut low: isize = 0;
        let mut high: isize = self.key_count() as isize - 1;
        while low <= high {
            let mid = ((low + high) / 2) as usize;
            match self.key_oid_xid(mid)?.cmp(&(target_oid, target_xid)) {
                Ordering::Equal => return self.entry(mid),
                Ordering::Less => low = mid as isize + 1,
                Ordering::Greater => high = mid as isize - 1,
            }
        }
        if high < 0 {
            return Err(Error::NotFound);
        }
        let index = high as usize;
        if self.is_leaf() && self.key_oid_xid(index)?.0 != target_oid {
            return Err(Error::NotFound);
        }
        self.entry(index)
    }
}
