//! Object-map records.
//!
//! An object map is a B-tree from `(oid, xid)` to a physical location,
//! giving every virtual object one entry per snapshot it was modified in.
//! A lookup at transaction `x` wants the entry with the greatest
//! `xid <= x` for the object, which is what the node engine's composite
//! search implements.

use deku::prelude::*;

use crate::object::{ObjectHeader, Oid, Paddr, Xid};

/// The object's entry is a deleted placeholder.
pub const OMAP_VAL_DELETED: u32 = 0x0000_0001;
/// The entry is shared with an earlier snapshot.
pub const OMAP_VAL_SAVED: u32 = 0x0000_0002;
/// The object's blocks are encrypted.
pub const OMAP_VAL_ENCRYPTED: u32 = 0x0000_0004;
/// The object is stored without an object header.
pub const OMAP_VAL_NOHEADER: u32 = 0x0000_0008;
/// The low bit of the crypto generation used for the object.
pub const OMAP_VAL_CRYPTO_GENERATION: u32 = 0x0000_0010;

/// Object-map B-tree key (`omap_key_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct OmapKey {
    pub oid: Oid,
    pub xid: Xid,
}

impl OmapKey {
    pub const PACKED_SIZE: usize = 16;
}

/// Object-map B-tree value (`omap_val_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct OmapValue {
    pub flags: u32,
    pub size: u32,
    pub paddr: Paddr,
}

impl OmapValue {
    pub const PACKED_SIZE: usize = 16;

    pub fn is_deleted(&self) -> bool {
        self.flags & OMAP_VAL_DELETED != 0
    }

    pub fn has_header(&self) -> bool {
        self.flags & OMAP_VAL_NOHEADER == 0
    }
}

/// The object-map object itself (`omap_phys_t`): bookkeeping plus the
/// identifier of the mapping B-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct OmapPhys {
    pub header: ObjectHeader,
    pub flags: u32,
    pub snap_count: u32,
    pub tree_type: u32,
    pub snapshot_tree_type: u32,
    pub tree_oid: Oid,
    pub snapshot_tree_oid: Oid,
    pub most_recent_snap: Xid,
    pub pending_revert_min: Xid,
    pub pending_revert_max: Xid,
}

impl OmapPhys {
    pub const PACKED_SIZE: usize = 88;
}
