//! Container superblock (`NXSB`) layout.
//!
//! Only the fields needed to bootstrap forensic queries are modelled:
//! geometry, the checkpoint descriptor area, and the object identifiers
//! anchoring the space manager, object map, reaper, and volumes.

use deku::prelude::*;

use crate::object::{ObjectHeader, Oid, Paddr, Xid};

/// `"NXSB"` read little-endian.
pub const NX_MAGIC: u32 = 0x4253_584e;

/// Capacity of the volume identifier table.
pub const NX_MAX_FILE_SYSTEMS: usize = 100;

/// Container superblock (`nx_superblock_t`), truncated after the volume
/// table. Trailing counters and checkpoint state past the table are not
/// modelled.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct NxSuperblock {
    pub header: ObjectHeader,
    pub magic: u32,
    pub block_size: u32,
    pub block_count: u64,
    pub features: u64,
    pub readonly_compatible_features: u64,
    pub incompatible_features: u64,
    pub uuid: [u8; 16],
    pub next_oid: Oid,
    pub next_xid: Xid,
    pub xp_desc_blocks: u32,
    pub xp_data_blocks: u32,
    pub xp_desc_base: Paddr,
    pub xp_data_base: Paddr,
    pub xp_desc_next: u32,
    pub xp_data_next: u32,
    pub xp_desc_index: u32,
    pub xp_desc_len: u32,
    pub xp_data_index: u32,
    pub xp_data_len: u32,
    pub spaceman_oid: Oid,
    pub omap_oid: Oid,
    pub reaper_oid: Oid,
    pub test_type: u32,
    pub max_file_systems: u32,
    pub fs_oids: [Oid; NX_MAX_FILE_SYSTEMS],
}

impl NxSuperblock {
    pub const PACKED_SIZE: usize = 984;

    /// Volume identifiers actually in use.
    pub fn volume_oids(&self) -> impl Iterator<Item = Oid> + '_ {
        let count = (self.max_file_systems as usize).min(NX_MAX_FILE_SYSTEMS);
        self.fs_oids[..count].iter().copied().filter(|&oid| oid != 0)
    }
}
