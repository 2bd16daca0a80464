//! Endian-parameterized primitive reads out of a contiguous byte buffer.
//!
//! The engine uses these for the offset arithmetic inside B-tree nodes,
//! where table-of-contents entries point at arbitrary byte positions.
//! Whole records go through deku instead; see [`crate::records`].

use apfs_types::Endian;

use crate::error::{Error, Result};

/// Borrow `len` bytes at `offset`, or report how much was missing.
pub fn read_bytes(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or(Error::InsufficientData {
            needed: usize::MAX,
            actual: buf.len(),
        })?;
    if end > buf.len() {
        return Err(Error::InsufficientData {
            needed: end,
            actual: buf.len(),
        });
    }
    Ok(&buf[offset..end])
}

pub fn read_u16(buf: &[u8], offset: usize, endian: Endian) -> Result<u16> {
    let bytes = read_bytes(buf, offset, 2)?;
    let raw = [bytes[0], bytes[1]];
    Ok(match endian {
        Endian::Little => u16::from_le_bytes(raw),
        Endian::Big => u16::from_be_bytes(raw),
    })
}

pub fn read_u32(buf: &[u8], offset: usize, endian: Endian) -> Result<u32> {
    let bytes = read_bytes(buf, offset, 4)?;
    let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
    Ok(match endian {
        Endian::Little => u32::from_le_bytes(raw),
        Endian::Big => u32::from_be_bytes(raw),
    })
}

pub fn read_i32(buf: &[u8], offset: usize, endian: Endian) -> Result<i32> {
    Ok(read_u32(buf, offset, endian)? as i32)
}

pub fn read_u64(buf: &[u8], offset: usize, endian: Endian) -> Result<u64> {
    let bytes = read_bytes(buf, offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(match endian {
        Endian::Little => u64::from_le_bytes(raw),
        Endian::Big => u64::from_be_bytes(raw),
    })
}
