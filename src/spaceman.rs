//! Space-manager walker: from the spaceman superblock down through the
//! CAB → CIB → chunk-info hierarchy, with the derived utilization
//! figures forensic reports want.

use apfs_types::Endian;
use apfs_types::object::Paddr;
use apfs_types::spaceman::{
    AllocationZoneInfo, ChunkInfo, ChunkInfoBlock, CibAddrBlock, DeviceClass, FreeQueueClass,
    SM_DATA_ZONE_ALLOC_ZONE_COUNT, SpacemanDevice, SpacemanFreeQueue, SpacemanPhys,
};
use log::debug;

use crate::error::{Error, Result};
use crate::object;
use crate::records;
use crate::source::BlockSource;

/// Walks the block hierarchy anchored by a decoded spaceman superblock.
/// CAB and CIB blocks are read through the block source by physical
/// address and checksum-verified before use.
pub struct SpacemanWalker<S: BlockSource> {
    spaceman: SpacemanPhys,
    source: S,
    endian: Endian,
}

impl<S: BlockSource> SpacemanWalker<S> {
    pub fn new(spaceman: SpacemanPhys, source: S, endian: Endian) -> Self {
        Self {
            spaceman,
            source,
            endian,
        }
    }

    /// Decode the spaceman superblock from its block, verifying the
    /// checksum and object type first.
    pub fn decode(block: &[u8], source: S, endian: Endian) -> Result<Self> {
        object::verify_and_decode_header(block, endian)?;
        let spaceman = records::spaceman(block, endian)?;
        Ok(Self::new(spaceman, source, endian))
    }

    pub fn spaceman(&self) -> &SpacemanPhys {
        &self.spaceman
    }

    pub fn block_size(&self) -> u32 {
        self.spaceman.block_size
    }

    pub fn version(&self) -> u32 {
        self.spaceman.version
    }

    pub fn blocks_per_chunk(&self) -> u32 {
        self.spaceman.blocks_per_chunk
    }

    pub fn chunks_per_cib(&self) -> u32 {
        self.spaceman.chunks_per_cib
    }

    pub fn cibs_per_cab(&self) -> u32 {
        self.spaceman.cibs_per_cab
    }

    pub fn flags(&self) -> u32 {
        self.spaceman.flags
    }

    pub fn is_versioned(&self) -> bool {
        self.spaceman.is_versioned()
    }

    pub fn main_device(&self) -> &SpacemanDevice {
        self.spaceman.main_device()
    }

    pub fn tier2_device(&self) -> &SpacemanDevice {
        self.spaceman.tier2_device()
    }

    pub fn has_fusion_device(&self) -> bool {
        self.spaceman.has_fusion_device()
    }

    pub fn free_queue(&self, class: FreeQueueClass) -> &SpacemanFreeQueue {
        self.spaceman.free_queue(class)
    }

    /// All allocation zones of a device, current plus previous rings.
    pub fn data_zone_info(&self, device: DeviceClass) -> &[AllocationZoneInfo] {
        self.spaceman.allocation_zones(device)
    }

    /// One allocation zone, bounds-checked.
    pub fn allocation_zone(
        &self,
        device: DeviceClass,
        zone: usize,
    ) -> Result<&AllocationZoneInfo> {
        if zone >= SM_DATA_ZONE_ALLOC_ZONE_COUNT {
            return Err(Error::OutOfRange {
                what: "allocation zone",
                index: zone,
                len: SM_DATA_ZONE_ALLOC_ZONE_COUNT,
            });
        }
        Ok(self.spaceman.allocation_zone(device, zone))
    }

    /// Read and validate the CAB block at `addr`.
    pub fn read_cab(&self, addr: Paddr) -> Result<CibAddrBlock> {
        let block = self.source.read_node(addr)?;
        object::verify_and_decode_header(&block, self.endian)?;
        records::cib_addr_block(&block, self.endian)
    }

    /// Read and validate the CIB block at `addr`.
    pub fn read_cib(&self, addr: Paddr) -> Result<ChunkInfoBlock> {
        let block = self.source.read_node(addr)?;
        object::verify_and_decode_header(&block, self.endian)?;
        records::chunk_info_block(&block, self.endian)
    }

    /// The CAB anchoring `device`'s chunk hierarchy. `NotFound` for a
    /// device that is absent or has no hierarchy.
    pub fn device_cab(&self, device: DeviceClass) -> Result<CibAddrBlock> {
        let record = self.spaceman.device(device);
        if !record.is_active() {
            return Err(Error::NotFound);
        }
        self.read_cab(record.cab_oid)
    }

    /// CIB address `index` of a CAB, bounds-checked.
    pub fn cib_addr(&self, cab: &CibAddrBlock, index: usize) -> Result<Paddr> {
        cab.cib_addr.get(index).copied().ok_or(Error::OutOfRange {
            what: "CIB address",
            index,
            len: cab.cib_addr.len(),
        })
    }

    /// Chunk `index` of a CIB, bounds-checked.
    pub fn chunk<'a>(&self, cib: &'a ChunkInfoBlock, index: usize) -> Result<&'a ChunkInfo> {
        cib.chunk_info.get(index).ok_or(Error::OutOfRange {
            what: "chunk info",
            index,
            len: cib.chunk_info.len(),
        })
    }

    /// Visit every chunk below a CAB, CIBs in address order, chunks in
    /// table order.
    pub fn for_each_chunk<F>(&self, cab: &CibAddrBlock, mut visit: F) -> Result<()>
    where
        F: FnMut(&ChunkInfo) -> Result<()>,
    {
        for &addr in &cab.cib_addr {
            let cib = self.read_cib(addr)?;
            debug!(
                "cib {:#x}: {} chunks",
                addr,
                cib.chunk_info.len()
            );
            for chunk in &cib.chunk_info {
                visit(chunk)?;
            }
        }
        Ok(())
    }

    /// Total blocks accounted below a CAB.
    pub fn calculate_total_blocks(&self, cab: &CibAddrBlock) -> Result<u64> {
        let mut total = 0u64;
        self.for_each_chunk(cab, |chunk| {
            total += u64::from(chunk.block_count);
            Ok(())
        })?;
        Ok(total)
    }

    /// Total free blocks accounted below a CAB.
    pub fn calculate_total_free_blocks(&self, cab: &CibAddrBlock) -> Result<u64> {
        let mut total = 0u64;
        self.for_each_chunk(cab, |chunk| {
            total += u64::from(chunk.free_count);
            Ok(())
        })?;
        Ok(total)
    }

    /// Utilization across every chunk below a CAB, as a percentage;
    /// zero when the CAB accounts for no blocks.
    pub fn calculate_overall_utilization(&self, cab: &CibAddrBlock) -> Result<f64> {
        let mut blocks = 0u64;
        let mut free = 0u64;
        self.for_each_chunk(cab, |chunk| {
            blocks += u64::from(chunk.block_count);
            free += u64::from(chunk.free_count);
            Ok(())
        })?;
        if blocks == 0 {
            return Ok(0.0);
        }
        Ok((blocks - free.min(blocks)) as f64 / blocks as f64 * 100.0)
    }
}
