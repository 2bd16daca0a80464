//! Encryption-rolling state records.
//!
//! Only the rolling *state* is modelled: progress counters and the
//! identifiers of the trees tracking it. Key material never appears in
//! these records and is out of scope for this crate.

use deku::prelude::*;

use crate::object::{ObjectHeader, Oid, Xid};

/// `'FLAB'`: magic opening both encryption-rolling state layouts.
pub const ER_MAGIC: u32 = 0x464c_4142;

/// Version tag of the original layout.
pub const ER_VERSION_V1: u32 = 1;
/// Version tag of the current layout.
pub const ER_VERSION_CURRENT: u32 = 2;

/// Current encryption-rolling state layout (`er_state_phys_t`), 120
/// bytes. The blockmap and recovery-list identifiers are opaque object
/// identifiers; their storage class is not recorded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct ErStatePhys {
    pub header: ObjectHeader,
    pub magic: u32,
    pub version: u32,
    pub flags: u64,
    pub snap_xid: Xid,
    pub current_fext_obj_id: u64,
    pub file_offset: u64,
    pub progress: u64,
    pub total_blk_to_encrypt: u64,
    pub blockmap_oid: Oid,
    pub tidemark_obj_id: u64,
    pub recovery_extents_count: u64,
    pub recovery_list_oid: Oid,
}

impl ErStatePhys {
    pub const PACKED_SIZE: usize = 120;

    /// Rolled blocks over total, as a percentage; zero for an idle state.
    pub fn progress_pct(&self) -> f64 {
        if self.total_blk_to_encrypt == 0 {
            0.0
        } else {
            self.progress as f64 / self.total_blk_to_encrypt as f64 * 100.0
        }
    }
}

/// Version-1 encryption-rolling state layout (`er_state_phys_v1_t`), 128
/// bytes plus a trailing checksum blob sized by `checksum_count`.
#[derive(Debug, Clone, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct ErStatePhysV1 {
    pub header: ObjectHeader,
    pub magic: u32,
    pub version: u32,
    pub flags: u64,
    pub snap_xid: Xid,
    pub current_fext_obj_id: u64,
    pub file_offset: u64,
    pub fext_pbn: u64,
    pub paddr: u64,
    pub progress: u64,
    pub total_blk_to_encrypt: u64,
    pub blockmap_oid: u64,
    pub checksum_count: u32,
    pub reserved: u32,
    pub fext_cid: u64,
    #[deku(count = "checksum_count")]
    pub checksum: Vec<u8>,
}

impl ErStatePhysV1 {
    /// Size of the fixed part, before the checksum blob.
    pub const MIN_PACKED_SIZE: usize = 128;
}
