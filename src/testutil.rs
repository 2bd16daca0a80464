//! Builders for synthetic, correctly checksummed nodes and trees.
//!
//! Only compiled for tests. Fixtures are assembled through the same
//! deku layouts the parser reads, then sealed with the block checksum.

use apfs_types::Endian;
use apfs_types::btree::{
    BTNODE_FIXED_KV_SIZE, BTNODE_LEAF, BTNODE_ROOT, BTOFF_INVALID, BtreeInfo, BtreeInfoFixed,
    BtreeNodePhys, Nloc,
};
use apfs_types::object::{OBJ_PHYSICAL, OBJECT_TYPE_BTREE_NODE, ObjectHeader, Oid, Xid};

use crate::checksum;
use crate::records;
use crate::source::MemoryBlockSource;

pub(crate) fn u64_bytes(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub(crate) fn u64_bytes_be(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// A 16-byte `(oid, xid)` composite key, little-endian.
pub(crate) fn composite_key(oid: u64, xid: u64) -> Vec<u8> {
    let mut key = oid.to_le_bytes().to_vec();
    key.extend_from_slice(&xid.to_le_bytes());
    key
}

/// Description of a node to synthesize. The builder lays the table of
/// contents at the start of the data area, keys after it, values after
/// the keys, and the root footer (when requested) at the data tail.
pub(crate) struct NodeSpec {
    pub oid: Oid,
    pub xid: Xid,
    pub subtype: u32,
    pub level: u16,
    pub root: bool,
    pub fixed: bool,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Total block size; zero sizes the node to fit its content.
    pub node_size: usize,
    pub endian: Endian,
    /// Drop every value and mark the entries as ghosts.
    pub ghost_values: bool,
    /// Point the first key outside the data area.
    pub corrupt_first_key_offset: bool,
    /// Extra bytes claimed by `table_space` beyond the entries.
    pub table_len_extra: usize,
}

impl NodeSpec {
    fn new(entries: Vec<(Vec<u8>, Vec<u8>)>, level: u16, fixed: bool) -> Self {
        Self {
            oid: 0x1000,
            xid: 1,
            subtype: 0,
            level,
            root: false,
            fixed,
            entries,
            node_size: 0,
            endian: Endian::Little,
            ghost_values: false,
            corrupt_first_key_offset: false,
            table_len_extra: 0,
        }
    }

    pub fn fixed_leaf(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self::new(entries, 0, true)
    }

    pub fn variable_leaf(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self::new(entries, 0, false)
    }

    pub fn fixed_internal(entries: Vec<(Vec<u8>, Vec<u8>)>, level: u16) -> Self {
        Self::new(entries, level, true)
    }

    /// An empty node at `level` whose leaf flag agrees with the level.
    pub fn leaf_like(level: u16) -> Self {
        Self::new(Vec::new(), level, true)
    }

    pub fn with_oid(mut self, oid: Oid) -> Self {
        self.oid = oid;
        self
    }

    pub fn with_root(mut self) -> Self {
        self.root = true;
        self
    }

    fn write_u16(&self, buf: &mut [u8], at: usize, value: u16) {
        let raw = match self.endian {
            Endian::Little => value.to_le_bytes(),
            _ => value.to_be_bytes(),
        };
        buf[at..at + 2].copy_from_slice(&raw);
    }

    pub fn build(&self) -> Vec<u8> {
        let n = self.entries.len();
        let entry_size = if self.fixed { 4 } else { 8 };
        let toc_len = n * entry_size + self.table_len_extra;

        let keys_len: usize = self.entries.iter().map(|(k, _)| k.len()).sum();
        let vals_len: usize = if self.ghost_values {
            0
        } else {
            self.entries.iter().map(|(_, v)| v.len()).sum()
        };
        let footer_len = if self.root { BtreeInfo::PACKED_SIZE } else { 0 };
        let used = toc_len + keys_len + vals_len;

        let data_len = match self.node_size {
            0 => used + footer_len + 16,
            size => size - BtreeNodePhys::HEADER_SIZE,
        };
        assert!(used + footer_len <= data_len, "node_size too small for entries");
        let mut data = vec![0u8; data_len];

        // Keys first, then values, both packed after the table.
        let mut key_cursor = toc_len;
        let mut val_cursor = toc_len + keys_len;
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if self.fixed {
                assert_eq!(key.len(), 8, "fixed nodes use 8-byte keys");
                if !self.ghost_values {
                    assert_eq!(value.len(), 8, "fixed nodes use 8-byte values");
                }
            }
            let toc_at = index * entry_size;
            let key_off = if self.corrupt_first_key_offset && index == 0 {
                data_len
            } else {
                key_cursor
            };
            if self.fixed {
                self.write_u16(&mut data, toc_at, key_off as u16);
                let val_off = if self.ghost_values {
                    BTOFF_INVALID
                } else {
                    val_cursor as u16
                };
                self.write_u16(&mut data, toc_at + 2, val_off);
            } else {
                self.write_u16(&mut data, toc_at, key_off as u16);
                self.write_u16(&mut data, toc_at + 2, key.len() as u16);
                if self.ghost_values {
                    self.write_u16(&mut data, toc_at + 4, BTOFF_INVALID);
                    self.write_u16(&mut data, toc_at + 6, 0);
                } else {
                    self.write_u16(&mut data, toc_at + 4, val_cursor as u16);
                    self.write_u16(&mut data, toc_at + 6, value.len() as u16);
                }
            }

            data[key_cursor..key_cursor + key.len()].copy_from_slice(key);
            key_cursor += key.len();
            if !self.ghost_values {
                data[val_cursor..val_cursor + value.len()].copy_from_slice(value);
                val_cursor += value.len();
            }
        }

        if self.root {
            let info = BtreeInfo {
                fixed: BtreeInfoFixed {
                    flags: 0,
                    node_size: (BtreeNodePhys::HEADER_SIZE + data_len) as u32,
                    key_size: if self.fixed { 8 } else { 0 },
                    val_size: if self.fixed { 8 } else { 0 },
                },
                longest_key: 16,
                longest_val: 8,
                key_count: n as u64,
                node_count: 1,
            };
            let footer = records::encode_record(&info, self.endian).unwrap();
            let at = data_len - footer.len();
            data[at..].copy_from_slice(&footer);
        }

        let mut flags = 0u16;
        if self.level == 0 {
            flags |= BTNODE_LEAF;
        }
        if self.root {
            flags |= BTNODE_ROOT;
        }
        if self.fixed {
            flags |= BTNODE_FIXED_KV_SIZE;
        }

        let free_off = used;
        let free_len = data_len - used - footer_len;
        let phys = BtreeNodePhys {
            header: ObjectHeader {
                checksum: [0; 8],
                oid: self.oid,
                xid: self.xid,
                object_type: OBJ_PHYSICAL | OBJECT_TYPE_BTREE_NODE,
                subtype: self.subtype,
            },
            flags,
            level: self.level,
            nkeys: n as u32,
            table_space: Nloc::new(0, toc_len as u16),
            free_space: Nloc::new(free_off as u16, free_len as u16),
            key_free_list: Nloc::new(BTOFF_INVALID, 0),
            val_free_list: Nloc::new(BTOFF_INVALID, 0),
            data,
        };

        let mut block = records::encode_record(&phys, self.endian).unwrap();
        checksum::seal_block(&mut block);
        block
    }
}

/// A synthetic tree held in a [`MemoryBlockSource`].
pub(crate) struct TreeFixture {
    pub source: MemoryBlockSource,
    pub root_oid: Oid,
    pub leaf_oids: Vec<Oid>,
    pub all_oids: Vec<Oid>,
}

/// A root over one level of leaves. Leaf values are `key * 10`.
pub(crate) fn two_level_tree(leaf_keys: &[Vec<u64>]) -> TreeFixture {
    let mut source = MemoryBlockSource::new();
    let mut next_oid = 100u64;
    let mut leaf_oids = Vec::new();
    let mut root_entries = Vec::new();

    for keys in leaf_keys {
        let entries = keys
            .iter()
            .map(|&key| (u64_bytes(key), u64_bytes(key * 10)))
            .collect();
        let spec = NodeSpec::fixed_leaf(entries).with_oid(next_oid);
        source.insert(next_oid, spec.build());
        root_entries.push((u64_bytes(keys[0]), u64_bytes(next_oid)));
        leaf_oids.push(next_oid);
        next_oid += 1;
    }

    let root_oid = next_oid;
    let spec = NodeSpec::fixed_internal(root_entries, 1)
        .with_oid(root_oid)
        .with_root();
    source.insert(root_oid, spec.build());

    let mut all_oids = leaf_oids.clone();
    all_oids.push(root_oid);
    TreeFixture {
        source,
        root_oid,
        leaf_oids,
        all_oids,
    }
}

/// A root over internal nodes over leaves. Each inner `Vec<Vec<u64>>`
/// becomes one internal node and its leaves. Leaf values are `key * 10`.
pub(crate) fn three_level_tree(groups: &[Vec<Vec<u64>>]) -> TreeFixture {
    let mut source = MemoryBlockSource::new();
    let mut next_oid = 200u64;
    let mut leaf_oids = Vec::new();
    let mut all_oids = Vec::new();
    let mut root_entries = Vec::new();

    for group in groups {
        let mut internal_entries = Vec::new();
        for keys in group {
            let entries = keys
                .iter()
                .map(|&key| (u64_bytes(key), u64_bytes(key * 10)))
                .collect();
            let spec = NodeSpec::fixed_leaf(entries).with_oid(next_oid);
            source.insert(next_oid, spec.build());
            internal_entries.push((u64_bytes(keys[0]), u64_bytes(next_oid)));
            leaf_oids.push(next_oid);
            all_oids.push(next_oid);
            next_oid += 1;
        }
        let internal_oid = next_oid;
        let first_key = group[0][0];
        let spec = NodeSpec::fixed_internal(internal_entries, 1).with_oid(internal_oid);
        source.insert(internal_oid, spec.build());
        root_entries.push((u64_bytes(first_key), u64_bytes(internal_oid)));
        all_oids.push(internal_oid);
        next_oid += 1;
    }

    let root_oid = next_oid;
    let spec = NodeSpec::fixed_internal(root_entries, 2)
        .with_oid(root_oid)
        .with_root();
    source.insert(root_oid, spec.build());
    all_oids.push(root_oid);

    TreeFixture {
        source,
        root_oid,
        leaf_oids,
        all_oids,
    }
}

/// An internal node that lists itself as its only child.
pub(crate) fn self_cycle_tree() -> TreeFixture {
    let mut source = MemoryBlockSource::new();
    let oid = 0x50u64;
    let spec = NodeSpec::fixed_internal(vec![(u64_bytes(1), u64_bytes(oid))], 1)
        .with_oid(oid)
        .with_root();
    source.insert(oid, spec.build());
    TreeFixture {
        source,
        root_oid: oid,
        leaf_oids: Vec::new(),
        all_oids: vec![oid],
    }
}
