//! Fletcher-64 as APFS uses it: 32-bit little-endian word accumulation
//! modulo `2^32 - 1`, folded so that a checksum computed over a block
//! whose first eight bytes are zero can be stored in those eight bytes
//! and make the whole block sum to zero.

/// Modulus for both running sums.
const FLETCHER_MOD: u64 = u32::MAX as u64;

/// Fletcher-64 over `data`, consumed as little-endian 32-bit words. A
/// trailing partial word is zero-padded; on-disk objects are multiples
/// of four bytes, so that path only serves synthetic buffers.
pub fn fletcher64(data: &[u8]) -> u64 {
    let mut sum1: u64 = 0;
    let mut sum2: u64 = 0;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum1 = (sum1 + u64::from(u32::from_le_bytes(word))) % FLETCHER_MOD;
        sum2 = (sum2 + sum1) % FLETCHER_MOD;
    }

    let ck_low = FLETCHER_MOD - ((sum1 + sum2) % FLETCHER_MOD);
    let ck_high = FLETCHER_MOD - ((sum1 + ck_low) % FLETCHER_MOD);
    ck_low | (ck_high << 32)
}

/// Checksum of an object block: Fletcher-64 over the block with the
/// stored checksum field (the first eight bytes) zeroed. The scratch
/// copy is dropped on return.
pub fn block_checksum(block: &[u8]) -> u64 {
    let mut scratch = block.to_vec();
    let prefix = scratch.len().min(8);
    scratch[..prefix].fill(0);
    fletcher64(&scratch)
}

/// Whether the block's stored checksum matches a recomputation. The
/// stored form is eight little-endian bytes at the start of the block.
pub fn verify_block(block: &[u8]) -> bool {
    if block.len() < 8 {
        return false;
    }
    block[..8] == block_checksum(block).to_le_bytes()
}

/// Stamp a freshly built block with its checksum. Only useful for
/// synthesizing fixtures; the parser itself never writes.
pub fn seal_block(block: &mut [u8]) {
    let checksum = block_checksum(block);
    block[..8].copy_from_slice(&checksum.to_le_bytes());
}
