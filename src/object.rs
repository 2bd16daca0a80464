//! Object-header decoding with integrity checking.
//!
//! Nearly every APFS object opens with the 32-byte header and is
//! protected by Fletcher-64 over its whole block. Decoding and
//! verification are exposed as one operation so callers cannot observe
//! a header whose block failed its checksum.

use apfs_types::Endian;
use apfs_types::object::{ObjectHeader, StorageClass};

use crate::checksum;
use crate::error::{Error, Result};
use crate::records;

/// Decode the header without touching the checksum. Useful for probing
/// blocks that are allowed to be stale, e.g. the checkpoint scan.
pub fn decode_header(block: &[u8], endian: Endian) -> Result<ObjectHeader> {
    if block.len() < ObjectHeader::PACKED_SIZE {
        return Err(Error::InsufficientData {
            needed: ObjectHeader::PACKED_SIZE,
            actual: block.len(),
        });
    }
    records::decode_record(block, endian)
}

/// Decode the header and verify the block's Fletcher-64 checksum.
///
/// Objects flagged `NOHEADER` store no header bytes and are skipped
/// here; integrity of such objects is the caller's responsibility (the
/// structure referencing them typically carries its own protection).
pub fn verify_and_decode_header(block: &[u8], endian: Endian) -> Result<ObjectHeader> {
    let header = decode_header(block, endian)?;
    require_storage_class(&header)?;
    if header.has_header() {
        verify_block_checksum(block, &header)?;
    }
    Ok(header)
}

/// Recompute the block checksum and compare against the stored bytes.
pub fn verify_block_checksum(block: &[u8], header: &ObjectHeader) -> Result<()> {
    if !checksum::verify_block(block) {
        return Err(Error::ChecksumMismatch {
            oid: header.oid,
            xid: header.xid,
        });
    }
    Ok(())
}

/// The storage class of a well-formed object is exactly one of
/// virtual, ephemeral, physical.
pub fn require_storage_class(header: &ObjectHeader) -> Result<StorageClass> {
    header.storage_class().ok_or_else(|| {
        Error::Malformed(format!(
            "object {:#x} sets both storage-type bits ({:#010x})",
            header.oid, header.object_type
        ))
    })
}
