//! Space-manager layouts: the spaceman superblock, its per-device
//! bookkeeping, free queues, the chunk-info hierarchy, and allocation
//! zones.
//!
//! The space manager accounts for every block in the container through a
//! three-level hierarchy: chunk-info blocks (CIBs) describe runs of
//! chunks, CIB-address blocks (CABs) collect CIBs for large devices, and
//! the device records in the spaceman superblock anchor the roots.
//!
//! Described in the Apple File System Reference > Space Manager.

use deku::prelude::*;

use crate::object::{ObjectHeader, Oid, Paddr, Xid};

/// Number of devices a container manages (main plus fusion tier 2).
pub const SD_COUNT: usize = 2;
/// Number of free queues (internal pool, main, tier 2).
pub const SFQ_COUNT: usize = 3;
/// Allocation zones per device in the datazone.
pub const SM_DATA_ZONE_ALLOC_ZONE_COUNT: usize = 8;
/// Previous-boundary slots retained per allocation zone.
pub const SM_ALLOC_ZONE_NUM_PREVIOUS_BOUNDARIES: usize = 7;
/// End boundary marking an allocation zone as unused.
pub const SM_ALLOC_ZONE_INVALID_END_BOUNDARY: u64 = 0;

/// The container keeps per-transaction spaceman versions.
pub const SM_FLAG_VERSIONED: u32 = 0x0000_0001;

/// Device slot within the spaceman superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Main,
    Tier2,
}

impl DeviceClass {
    pub fn index(&self) -> usize {
        match self {
            Self::Main => 0,
            Self::Tier2 => 1,
        }
    }
}

/// Free-queue slot within the spaceman superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreeQueueClass {
    InternalPool,
    Main,
    Tier2,
}

impl FreeQueueClass {
    pub fn index(&self) -> usize {
        match self {
            Self::InternalPool => 0,
            Self::Main => 1,
            Self::Tier2 => 2,
        }
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Accounting for one run of blocks (`chunk_info_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct ChunkInfo {
    pub xid: Xid,
    pub addr: Paddr,
    pub block_count: u32,
    pub free_count: u32,
    pub bitmap_addr: Paddr,
}

impl ChunkInfo {
    pub const PACKED_SIZE: usize = 32;

    /// Blocks in use. Saturates to zero when `free_count` exceeds
    /// `block_count`, which only happens on damaged containers.
    pub fn used_count(&self) -> u32 {
        self.block_count.saturating_sub(self.free_count)
    }

    pub fn is_full(&self) -> bool {
        self.free_count == 0
    }

    pub fn is_empty(&self) -> bool {
        self.free_count == self.block_count
    }

    pub fn utilization_pct(&self) -> f64 {
        percentage(self.used_count() as u64, self.block_count as u64)
    }
}

/// Chunk-info block (`chunk_info_block_t`): an object header plus an
/// array of [`ChunkInfo`] records.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct ChunkInfoBlock {
    pub header: ObjectHeader,
    pub index: u32,
    pub chunk_info_count: u32,
    #[deku(count = "chunk_info_count")]
    pub chunk_info: Vec<ChunkInfo>,
}

impl ChunkInfoBlock {
    /// Size of the fixed part, before the chunk-info array.
    pub const MIN_PACKED_SIZE: usize = 40;
}

/// CIB-address block (`cib_addr_block_t`): an object header plus an
/// array of CIB block addresses.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct CibAddrBlock {
    pub header: ObjectHeader,
    pub index: u32,
    pub cib_count: u32,
    #[deku(count = "cib_count")]
    pub cib_addr: Vec<Paddr>,
}

impl CibAddrBlock {
    /// Size of the fixed part, before the address array.
    pub const MIN_PACKED_SIZE: usize = 40;
}

/// Per-device accounting inside the spaceman superblock
/// (`spaceman_device_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct SpacemanDevice {
    pub block_count: u64,
    pub chunk_count: u64,
    pub cib_count: u32,
    pub cab_count: u32,
    pub free_count: u64,
    /// Address of the device's CAB (or single CIB) root; zero when the
    /// device is absent.
    pub cab_oid: Oid,
    pub addr_offset: u32,
    pub reserved: u32,
    pub reserved2: u64,
}

impl SpacemanDevice {
    pub const PACKED_SIZE: usize = 56;

    pub fn used_count(&self) -> u64 {
        self.block_count.saturating_sub(self.free_count)
    }

    pub fn utilization_pct(&self) -> f64 {
        percentage(self.used_count(), self.block_count)
    }

    pub fn free_pct(&self) -> f64 {
        percentage(self.free_count.min(self.block_count), self.block_count)
    }

    pub fn is_active(&self) -> bool {
        self.block_count > 0 && self.cab_oid != 0
    }
}

/// Free-queue descriptor (`spaceman_free_queue_t`). The queue's entries
/// live in a B-tree keyed by `(xid, paddr)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct SpacemanFreeQueue {
    pub count: u64,
    /// B-tree holding the queue. Opaque object identifier; storage class
    /// is not guessed here.
    pub tree_oid: Oid,
    pub oldest_xid: Xid,
    pub tree_node_limit: u16,
    pub pad16: u16,
    pub pad32: u32,
    pub reserved: u64,
}

impl SpacemanFreeQueue {
    pub const PACKED_SIZE: usize = 40;

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Key of a free-queue B-tree entry (`spaceman_free_queue_key_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct FreeQueueKey {
    pub xid: Xid,
    pub paddr: Paddr,
}

impl FreeQueueKey {
    pub const PACKED_SIZE: usize = 16;
}

/// A decoded free-queue entry: the run of `count` blocks at
/// [`FreeQueueKey::paddr`] freed in transaction [`FreeQueueKey::xid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeQueueEntry {
    pub key: FreeQueueKey,
    pub count: u64,
}

impl FreeQueueEntry {
    pub const PACKED_SIZE: usize = 24;

    /// First byte address past the run, for a given block size.
    pub fn end_address(&self, block_size: u64) -> u64 {
        self.key.paddr + self.count * block_size
    }

    /// Whether a run starting at `addr` would extend this one without a
    /// gap.
    pub fn is_contiguous_with(&self, addr: u64, block_size: u64) -> bool {
        self.end_address(block_size) == addr
    }

    /// Start and one-past-end byte addresses of the freed run.
    pub fn address_range(&self, block_size: u64) -> (u64, u64) {
        (self.key.paddr, self.end_address(block_size))
    }

    /// Total bytes covered by the freed run.
    pub fn total_free_space(&self, block_size: u64) -> u64 {
        self.count * block_size
    }
}

/// Start/end pair bounding an allocation zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct AllocationZoneBoundaries {
    pub zone_start: u64,
    pub zone_end: u64,
}

impl AllocationZoneBoundaries {
    pub const PACKED_SIZE: usize = 16;

    /// A zone whose end boundary is the invalid sentinel is unused.
    pub fn is_empty(&self) -> bool {
        self.zone_end == SM_ALLOC_ZONE_INVALID_END_BOUNDARY
    }
}

/// Allocation-zone record (`spaceman_allocation_zone_info_phys_t`):
/// current boundaries plus a ring of the seven previous ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct AllocationZoneInfo {
    pub current_boundaries: AllocationZoneBoundaries,
    pub previous_boundaries: [AllocationZoneBoundaries; SM_ALLOC_ZONE_NUM_PREVIOUS_BOUNDARIES],
    pub zone_id: u16,
    pub previous_boundary_index: u16,
    pub reserved: u32,
}

impl AllocationZoneInfo {
    pub const PACKED_SIZE: usize = 136;

    pub fn is_valid(&self) -> bool {
        !self.current_boundaries.is_empty()
    }

    /// The most recently retired boundary pair, if any slot has been
    /// written. `previous_boundary_index` points at the slot that will be
    /// overwritten next, so the newest entry is the one before it.
    pub fn latest_previous_boundaries(&self) -> Option<AllocationZoneBoundaries> {
        let index = self.previous_boundary_index as usize;
        let count = SM_ALLOC_ZONE_NUM_PREVIOUS_BOUNDARIES;
        let slot = self.previous_boundaries[(index + count - 1) % count];
        if slot.is_empty() { None } else { Some(slot) }
    }

    /// Ring slot access in oldest-to-newest order.
    pub fn previous_boundaries_at(&self, age: usize) -> AllocationZoneBoundaries {
        let count = SM_ALLOC_ZONE_NUM_PREVIOUS_BOUNDARIES;
        let base = self.previous_boundary_index as usize;
        self.previous_boundaries[(base + age) % count]
    }
}

/// The space-manager superblock (`spaceman_phys_t`).
///
/// The datazone is stored flattened: device 0's eight zones, then device
/// 1's. [`Self::allocation_zone`] applies the indexing.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian",
    ctx_default = "deku::ctx::Endian::Little"
)]
pub struct SpacemanPhys {
    pub header: ObjectHeader,
    pub block_size: u32,
    pub blocks_per_chunk: u32,
    pub chunks_per_cib: u32,
    pub cibs_per_cab: u32,
    pub dev: [SpacemanDevice; SD_COUNT],
    pub flags: u32,
    pub ip_bm_tx_multiplier: u32,
    pub ip_block_count: u64,
    pub ip_bm_size_in_blocks: u32,
    pub ip_bm_block_count: u32,
    pub ip_bm_base: Paddr,
    pub ip_base: Paddr,
    pub fs_reserve_block_count: u64,
    pub fs_reserve_alloc_count: u64,
    pub fq: [SpacemanFreeQueue; SFQ_COUNT],
    pub ip_bm_free_head: u16,
    pub ip_bm_free_tail: u16,
    pub ip_bm_xid_offset: u32,
    pub ip_bitmap_offset: u32,
    pub ip_bm_free_next_offset: u32,
    pub version: u32,
    pub struct_size: u32,
    pub reserved: [u8; 164],
    pub datazone: [AllocationZoneInfo; SD_COUNT * SM_DATA_ZONE_ALLOC_ZONE_COUNT],
}

impl SpacemanPhys {
    pub const PACKED_SIZE: usize = 2700;

    pub fn is_versioned(&self) -> bool {
        self.flags & SM_FLAG_VERSIONED != 0
    }

    pub fn device(&self, class: DeviceClass) -> &SpacemanDevice {
        &self.dev[class.index()]
    }

    pub fn main_device(&self) -> &SpacemanDevice {
        self.device(DeviceClass::Main)
    }

    pub fn tier2_device(&self) -> &SpacemanDevice {
        self.device(DeviceClass::Tier2)
    }

    pub fn has_fusion_device(&self) -> bool {
        self.tier2_device().block_count > 0
    }

    pub fn free_queue(&self, class: FreeQueueClass) -> &SpacemanFreeQueue {
        &self.fq[class.index()]
    }

    /// Allocation zone `zone` of `device`, in the flattened datazone.
    pub fn allocation_zone(&self, device: DeviceClass, zone: usize) -> &AllocationZoneInfo {
        &self.datazone[device.index() * SM_DATA_ZONE_ALLOC_ZONE_COUNT + zone]
    }

    pub fn allocation_zones(&self, device: DeviceClass) -> &[AllocationZoneInfo] {
        let start = device.index() * SM_DATA_ZONE_ALLOC_ZONE_COUNT;
        &self.datazone[start..start + SM_DATA_ZONE_ALLOC_ZONE_COUNT]
    }
}

impl Default for SpacemanPhys {
    fn default() -> Self {
        Self {
            header: ObjectHeader::default(),
            block_size: 0,
            blocks_per_chunk: 0,
            chunks_per_cib: 0,
            cibs_per_cab: 0,
            dev: [SpacemanDevice::default(); SD_COUNT],
            flags: 0,
            ip_bm_tx_multiplier: 0,
            ip_block_count: 0,
            ip_bm_size_in_blocks: 0,
            ip_bm_block_count: 0,
            ip_bm_base: 0,
            ip_base: 0,
            fs_reserve_block_count: 0,
            fs_reserve_alloc_count: 0,
            fq: [SpacemanFreeQueue::default(); SFQ_COUNT],
            ip_bm_free_head: 0,
            ip_bm_free_tail: 0,
            ip_bm_xid_offset: 0,
            ip_bitmap_offset: 0,
            ip_bm_free_next_offset: 0,
            version: 0,
            struct_size: 0,
            reserved: [0; 164],
            datazone: [AllocationZoneInfo::default(); SD_COUNT * SM_DATA_ZONE_ALLOC_ZONE_COUNT],
        }
    }
}
