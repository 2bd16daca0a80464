//! Validated decode entry points for the fixed-layout records.
//!
//! The layouts themselves live in `apfs-types`; the functions here add
//! what the raw layouts cannot express: minimum sizes, magic constants,
//! object-type expectations, and kind-tag legality. Decoders never
//! perform I/O and never return a record that failed its declared
//! validation.

use apfs_types::Endian;
use apfs_types::btree::BtreeInfo;
use apfs_types::container::{NX_MAGIC, NxSuperblock};
use apfs_types::encryption::{ER_MAGIC, ErStatePhys, ErStatePhysV1};
use apfs_types::extent::{
    ExtentKind, PhysExtentKey, PhysExtentRecord, PhysExtentValue,
};
use apfs_types::object::{
    OBJECT_TYPE_BLOCKREFTREE, OBJECT_TYPE_MASK, OBJECT_TYPE_NX_SUPERBLOCK, OBJECT_TYPE_OMAP,
    OBJECT_TYPE_SPACEMAN, OBJECT_TYPE_SPACEMAN_CAB, OBJECT_TYPE_SPACEMAN_CIB,
    OBJECT_TYPE_SPACEMAN_FREE_QUEUE, ObjectHeader,
};
use apfs_types::omap::{OmapPhys, OmapValue};
use apfs_types::spaceman::{
    AllocationZoneInfo, ChunkInfo, ChunkInfoBlock, CibAddrBlock, FreeQueueEntry, FreeQueueKey,
    SpacemanDevice, SpacemanFreeQueue, SpacemanPhys,
};
use deku::bitvec::{BitSlice, BitVec, Msb0};
use deku::{DekuRead, DekuWrite};

use crate::error::{Error, Result};
use crate::reader;

/// Decode any deku record with an explicit byte order. Trailing bytes
/// are permitted; records are routinely decoded out of whole blocks.
pub fn decode_record<'a, T>(bytes: &'a [u8], endian: Endian) -> Result<T>
where
    T: DekuRead<'a, Endian>,
{
    let bits = BitSlice::from_slice(bytes);
    let (_rest, value) = T::read(bits, endian)?;
    Ok(value)
}

/// Encode any deku record with an explicit byte order. The parser never
/// writes to disk; this exists for fixtures and round-trip checks.
pub fn encode_record<T>(value: &T, endian: Endian) -> Result<Vec<u8>>
where
    T: DekuWrite<Endian>,
{
    let mut bits = BitVec::<u8, Msb0>::new();
    value.write(&mut bits, endian)?;
    Ok(bits.into_vec())
}

fn require_len(bytes: &[u8], needed: usize) -> Result<()> {
    if bytes.len() < needed {
        return Err(Error::InsufficientData {
            needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn require_type(header: &ObjectHeader, expected: u32) -> Result<()> {
    if header.type_tag() != expected {
        return Err(Error::WrongObjectType {
            expected,
            found: header.type_tag(),
        });
    }
    Ok(())
}

fn require_magic(bytes: &[u8], offset: usize, expected: u32, endian: Endian) -> Result<()> {
    let found = reader::read_u32(bytes, offset, endian)?;
    if found != expected {
        return Err(Error::BadMagic { expected, found });
    }
    Ok(())
}

/// B-tree summary, as found in the root node's footer.
pub fn btree_info(bytes: &[u8], endian: Endian) -> Result<BtreeInfo> {
    require_len(bytes, BtreeInfo::PACKED_SIZE)?;
    decode_record(bytes, endian)
}

/// Current-layout encryption-rolling state.
pub fn er_state(bytes: &[u8], endian: Endian) -> Result<ErStatePhys> {
    require_len(bytes, ErStatePhys::PACKED_SIZE)?;
    require_magic(bytes, ObjectHeader::PACKED_SIZE, ER_MAGIC, endian)?;
    decode_record(bytes, endian)
}

/// Version-1 encryption-rolling state, including its checksum blob.
pub fn er_state_v1(bytes: &[u8], endian: Endian) -> Result<ErStatePhysV1> {
    require_len(bytes, ErStatePhysV1::MIN_PACKED_SIZE)?;
    require_magic(bytes, ObjectHeader::PACKED_SIZE, ER_MAGIC, endian)?;
    let blob_len = reader::read_u32(bytes, 112, endian)? as usize;
    require_len(bytes, ErStatePhysV1::MIN_PACKED_SIZE + blob_len)?;
    decode_record(bytes, endian)
}

/// A single chunk-info record.
pub fn chunk_info(bytes: &[u8], endian: Endian) -> Result<ChunkInfo> {
    require_len(bytes, ChunkInfo::PACKED_SIZE)?;
    decode_record(bytes, endian)
}

/// A chunk-info block. The object type must be `SPACEMAN_CIB` and the
/// buffer must hold the whole chunk-info array.
pub fn chunk_info_block(bytes: &[u8], endian: Endian) -> Result<ChunkInfoBlock> {
    require_len(bytes, ChunkInfoBlock::MIN_PACKED_SIZE)?;
    let count = reader::read_u32(bytes, 36, endian)? as usize;
    require_len(
        bytes,
        ChunkInfoBlock::MIN_PACKED_SIZE + count * ChunkInfo::PACKED_SIZE,
    )?;
    let block: ChunkInfoBlock = decode_record(bytes, endian)?;
    require_type(&block.header, OBJECT_TYPE_SPACEMAN_CIB)?;
    Ok(block)
}

/// A CIB-address block. The object type must be `SPACEMAN_CAB` and the
/// buffer must hold the whole address array.
pub fn cib_addr_block(bytes: &[u8], endian: Endian) -> Result<CibAddrBlock> {
    require_len(bytes, CibAddrBlock::MIN_PACKED_SIZE)?;
    let count = reader::read_u32(bytes, 36, endian)? as usize;
    require_len(bytes, CibAddrBlock::MIN_PACKED_SIZE + count * 8)?;
    let block: CibAddrBlock = decode_record(bytes, endian)?;
    require_type(&block.header, OBJECT_TYPE_SPACEMAN_CAB)?;
    Ok(block)
}

/// The space-manager superblock.
pub fn spaceman(bytes: &[u8], endian: Endian) -> Result<SpacemanPhys> {
    require_len(bytes, SpacemanPhys::PACKED_SIZE)?;
    let sm: SpacemanPhys = decode_record(bytes, endian)?;
    require_type(&sm.header, OBJECT_TYPE_SPACEMAN)?;
    Ok(sm)
}

/// A standalone per-device record.
pub fn spaceman_device(bytes: &[u8], endian: Endian) -> Result<SpacemanDevice> {
    require_len(bytes, SpacemanDevice::PACKED_SIZE)?;
    decode_record(bytes, endian)
}

/// A free-queue descriptor.
pub fn free_queue(bytes: &[u8], endian: Endian) -> Result<SpacemanFreeQueue> {
    require_len(bytes, SpacemanFreeQueue::PACKED_SIZE)?;
    decode_record(bytes, endian)
}

/// A free-queue B-tree entry assembled from its key and value bytes. A
/// missing value (a ghost entry) records a single freed block.
pub fn free_queue_entry(
    key_bytes: &[u8],
    value_bytes: Option<&[u8]>,
    endian: Endian,
) -> Result<FreeQueueEntry> {
    require_len(key_bytes, FreeQueueKey::PACKED_SIZE)?;
    let key: FreeQueueKey = decode_record(key_bytes, endian)?;
    let count = match value_bytes {
        Some(bytes) => reader::read_u64(bytes, 0, endian)?,
        None => 1,
    };
    Ok(FreeQueueEntry { key, count })
}

/// An allocation-zone record.
pub fn allocation_zone(bytes: &[u8], endian: Endian) -> Result<AllocationZoneInfo> {
    require_len(bytes, AllocationZoneInfo::PACKED_SIZE)?;
    decode_record(bytes, endian)
}

/// The container superblock. Checks type and magic; checksum
/// verification happens per block via [`crate::object`].
pub fn nx_superblock(bytes: &[u8], endian: Endian) -> Result<NxSuperblock> {
    require_len(bytes, NxSuperblock::PACKED_SIZE)?;
    require_magic(bytes, ObjectHeader::PACKED_SIZE, NX_MAGIC, endian)?;
    let sb: NxSuperblock = decode_record(bytes, endian)?;
    require_type(&sb.header, OBJECT_TYPE_NX_SUPERBLOCK)?;
    Ok(sb)
}

/// The object-map object anchoring a mapping B-tree.
pub fn omap(bytes: &[u8], endian: Endian) -> Result<OmapPhys> {
    require_len(bytes, OmapPhys::PACKED_SIZE)?;
    let omap: OmapPhys = decode_record(bytes, endian)?;
    require_type(&omap.header, OBJECT_TYPE_OMAP)?;
    Ok(omap)
}

/// A physical-extent record assembled from its key and value bytes and
/// checked for on-disk legality.
pub fn phys_extent_record(
    key_bytes: &[u8],
    value_bytes: &[u8],
    endian: Endian,
) -> Result<PhysExtentRecord> {
    require_len(key_bytes, PhysExtentKey::PACKED_SIZE)?;
    require_len(value_bytes, PhysExtentValue::PACKED_SIZE)?;
    let key: PhysExtentKey = decode_record(key_bytes, endian)?;
    let value: PhysExtentValue = decode_record(value_bytes, endian)?;
    let record = PhysExtentRecord::new(key, value);
    validate_extent_record(&record)?;
    Ok(record)
}

/// On-disk legality of a physical-extent record: nonzero length, a kind
/// that may appear on disk, a non-negative reference count.
pub fn validate_extent_record(record: &PhysExtentRecord) -> Result<()> {
    if record.value.length() == 0 {
        return Err(Error::Malformed(format!(
            "extent at {:#x} has zero length",
            record.key.block_address()
        )));
    }
    match record.value.kind() {
        Some(ExtentKind::Dead) | None => {
            return Err(Error::InvalidKind(record.value.kind_tag()));
        }
        Some(_) => {}
    }
    if record.value.refcnt < 0 {
        return Err(Error::Malformed(format!(
            "extent at {:#x} has negative refcount {}",
            record.key.block_address(),
            record.value.refcnt
        )));
    }
    Ok(())
}

/// A leaf value interpreted by the subtype of the tree it came from.
/// This is the one dispatch point where on-disk meaning varies by tree.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    ObjectMap(OmapValue),
    ExtentRef(PhysExtentValue),
    /// Count of freed blocks; ghost entries stand for one block.
    FreeQueue(u64),
    /// Subtype not modelled; raw bytes passed through.
    Raw(Vec<u8>),
}

/// Interpret a leaf value by its tree's subtype tag. `None` value bytes
/// denote a ghost entry.
pub fn interpret_leaf_value(
    subtype: u32,
    value_bytes: Option<&[u8]>,
    endian: Endian,
) -> Result<LeafValue> {
    match subtype & OBJECT_TYPE_MASK {
        OBJECT_TYPE_SPACEMAN_FREE_QUEUE => {
            let count = match value_bytes {
                Some(bytes) => reader::read_u64(bytes, 0, endian)?,
                None => 1,
            };
            Ok(LeafValue::FreeQueue(count))
        }
        OBJECT_TYPE_OMAP => {
            let bytes = value_bytes.ok_or(Error::NotFound)?;
            require_len(bytes, OmapValue::PACKED_SIZE)?;
            Ok(LeafValue::ObjectMap(decode_record(bytes, endian)?))
        }
        OBJECT_TYPE_BLOCKREFTREE => {
            let bytes = value_bytes.ok_or(Error::NotFound)?;
            require_len(bytes, PhysExtentValue::PACKED_SIZE)?;
            Ok(LeafValue::ExtentRef(decode_record(bytes, endian)?))
        }
        _ => Ok(LeafValue::Raw(
            value_bytes.map(<[u8]>::to_vec).unwrap_or_default(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use apfs_types::object::OBJ_PHYSICAL;
    use apfs_types::omap::OmapKey;

    use super::*;

    fn header_of(type_word: u32) -> ObjectHeader {
        ObjectHeader {
            object_type: type_word,
            ..Default::default()
        }
    }

    fn round_trip<T>(value: &T, endian: Endian)
    where
        T: for<'a> DekuRead<'a, Endian> + DekuWrite<Endian> + PartialEq + std::fmt::Debug,
    {
        let bytes = encode_record(value, endian).unwrap();
        let back: T = decode_record(&bytes, endian).unwrap();
        assert_eq!(&back, value);
    }

    #[test]
    fn records_round_trip_in_both_byte_orders() {
        let chunk = ChunkInfo {
            xid: 9,
            addr: 0x8000,
            block_count: 200,
            free_count: 40,
            bitmap_addr: 0x9000,
        };
        let key = OmapKey { oid: 5, xid: 30 };
        let value = PhysExtentValue::new(64, ExtentKind::New, 0x77, 3);
        let queue = SpacemanFreeQueue {
            count: 12,
            tree_oid: 0x88,
            oldest_xid: 2,
            tree_node_limit: 128,
            ..Default::default()
        };
        for endian in [Endian::Little, Endian::Big] {
            round_trip(&chunk, endian);
            round_trip(&key, endian);
            round_trip(&value, endian);
            round_trip(&queue, endian);
        }
    }

    #[test]
    fn cib_decoder_rejects_other_object_types() {
        let block = ChunkInfoBlock {
            header: header_of(OBJ_PHYSICAL | OBJECT_TYPE_SPACEMAN_CAB),
            index: 0,
            chunk_info_count: 0,
            chunk_info: Vec::new(),
        };
        let bytes = encode_record(&block, Endian::Little).unwrap();
        assert!(matches!(
            chunk_info_block(&bytes, Endian::Little),
            Err(Error::WrongObjectType {
                expected: OBJECT_TYPE_SPACEMAN_CIB,
                ..
            })
        ));
    }

    #[test]
    fn cib_decoder_requires_the_whole_array() {
        let block = ChunkInfoBlock {
            header: header_of(OBJ_PHYSICAL | OBJECT_TYPE_SPACEMAN_CIB),
            index: 0,
            chunk_info_count: 2,
            chunk_info: vec![ChunkInfo::default(), ChunkInfo::default()],
        };
        let bytes = encode_record(&block, Endian::Little).unwrap();
        assert!(chunk_info_block(&bytes, Endian::Little).is_ok());
        // Truncating inside the array must fail up front.
        assert!(matches!(
            chunk_info_block(&bytes[..bytes.len() - 1], Endian::Little),
            Err(Error::InsufficientData { .. })
        ));
    }

    #[test]
    fn cab_decoder_checks_type_and_array_fit() {
        let block = CibAddrBlock {
            header: header_of(OBJ_PHYSICAL | OBJECT_TYPE_SPACEMAN_CAB),
            index: 0,
            cib_count: 3,
            cib_addr: vec![0x100, 0x200, 0x300],
        };
        let bytes = encode_record(&block, Endian::Little).unwrap();
        let back = cib_addr_block(&bytes, Endian::Little).unwrap();
        assert_eq!(back.cib_addr, vec![0x100, 0x200, 0x300]);

        assert!(matches!(
            cib_addr_block(&bytes[..bytes.len() - 4], Endian::Little),
            Err(Error::InsufficientData { .. })
        ));
    }

    #[test]
    fn er_state_requires_its_magic() {
        let mut state = ErStatePhys {
            magic: ER_MAGIC,
            version: 2,
            ..Default::default()
        };
        let bytes = encode_record(&state, Endian::Little).unwrap();
        assert!(er_state(&bytes, Endian::Little).is_ok());

        state.magic = 0x1234_5678;
        let bytes = encode_record(&state, Endian::Little).unwrap();
        assert!(matches!(
            er_state(&bytes, Endian::Little),
            Err(Error::BadMagic {
                expected: ER_MAGIC,
                found: 0x1234_5678
            })
        ));
    }

    #[test]
    fn er_state_v1_checks_blob_fit() {
        let state = ErStatePhysV1 {
            magic: ER_MAGIC,
            version: 1,
            checksum_count: 8,
            checksum: vec![0xee; 8],
            ..Default::default()
        };
        let bytes = encode_record(&state, Endian::Little).unwrap();
        let back = er_state_v1(&bytes, Endian::Little).unwrap();
        assert_eq!(back.checksum.len(), 8);

        assert!(matches!(
            er_state_v1(&bytes[..bytes.len() - 2], Endian::Little),
            Err(Error::InsufficientData { .. })
        ));
    }

    #[test]
    fn dead_extents_are_invalid_on_disk() {
        let key = encode_record(&PhysExtentKey::new(0x1000, 0), Endian::Little).unwrap();
        let dead = encode_record(
            &PhysExtentValue::new(8, ExtentKind::Dead, 0x9, 1),
            Endian::Little,
        )
        .unwrap();
        assert!(matches!(
            phys_extent_record(&key, &dead, Endian::Little),
            Err(Error::InvalidKind(3))
        ));

        let live = encode_record(
            &PhysExtentValue::new(8, ExtentKind::New, 0x9, 1),
            Endian::Little,
        )
        .unwrap();
        let record = phys_extent_record(&key, &live, Endian::Little).unwrap();
        assert_eq!(record.key.block_address(), 0x1000);
        assert_eq!(record.value.length(), 8);
    }

    #[test]
    fn zero_length_and_negative_refcount_extents_are_malformed() {
        let zero_len = PhysExtentRecord::new(
            PhysExtentKey::new(0x1000, 0),
            PhysExtentValue::new(0, ExtentKind::New, 0, 1),
        );
        assert!(matches!(
            validate_extent_record(&zero_len),
            Err(Error::Malformed(_))
        ));

        let negative = PhysExtentRecord::new(
            PhysExtentKey::new(0x1000, 0),
            PhysExtentValue::new(4, ExtentKind::Update, 0, -1),
        );
        assert!(matches!(
            validate_extent_record(&negative),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn leaf_values_dispatch_on_subtype() {
        let omap_value = OmapValue {
            flags: 0,
            size: 4096,
            paddr: 0x500,
        };
        let bytes = encode_record(&omap_value, Endian::Little).unwrap();
        assert_eq!(
            interpret_leaf_value(OBJECT_TYPE_OMAP, Some(&bytes), Endian::Little).unwrap(),
            LeafValue::ObjectMap(omap_value)
        );

        let count = 24u64.to_le_bytes();
        assert_eq!(
            interpret_leaf_value(
                OBJECT_TYPE_SPACEMAN_FREE_QUEUE,
                Some(&count),
                Endian::Little
            )
            .unwrap(),
            LeafValue::FreeQueue(24)
        );
        // Ghost free-queue entries record a single block.
        assert_eq!(
            interpret_leaf_value(OBJECT_TYPE_SPACEMAN_FREE_QUEUE, None, Endian::Little).unwrap(),
            LeafValue::FreeQueue(1)
        );

        assert_eq!(
            interpret_leaf_value(0x99, Some(&[1, 2, 3]), Endian::Little).unwrap(),
            LeafValue::Raw(vec![1, 2, 3])
        );
    }

    #[test]
    fn free_queue_entries_assemble_from_key_and_value() {
        let key = FreeQueueKey {
            xid: 4,
            paddr: 0x2000,
        };
        let key_bytes = encode_record(&key, Endian::Little).unwrap();
        let entry =
            free_queue_entry(&key_bytes, Some(&6u64.to_le_bytes()), Endian::Little).unwrap();
        assert_eq!(entry.count, 6);
        assert_eq!(entry.key.paddr, 0x2000);

        let ghost = free_queue_entry(&key_bytes, None, Endian::Little).unwrap();
        assert_eq!(ghost.count, 1);
    }

    #[test]
    fn nx_superblock_checks_magic() {
        let sb = NxSuperblock {
            header: header_of(OBJ_PHYSICAL | OBJECT_TYPE_NX_SUPERBLOCK),
            magic: NX_MAGIC,
            block_size: 4096,
            block_count: 1,
            features: 0,
            readonly_compatible_features: 0,
            incompatible_features: 0,
            uuid: [0; 16],
            next_oid: 0,
            next_xid: 0,
            xp_desc_blocks: 0,
            xp_data_blocks: 0,
            xp_desc_base: 0,
            xp_data_base: 0,
            xp_desc_next: 0,
            xp_data_next: 0,
            xp_desc_index: 0,
            xp_desc_len: 0,
            xp_data_index: 0,
            xp_data_len: 0,
            spaceman_oid: 0,
            omap_oid: 0,
            reaper_oid: 0,
            test_type: 0,
            max_file_systems: 0,
            fs_oids: [0; 100],
        };
        let bytes = encode_record(&sb, Endian::Little).unwrap();
        assert!(nx_superblock(&bytes, Endian::Little).is_ok());

        let mut wrong = bytes.clone();
        wrong[32] ^= 0xff;
        assert!(matches!(
            nx_superblock(&wrong, Endian::Little),
            Err(Error::BadMagic { .. })
        ));
    }
}
