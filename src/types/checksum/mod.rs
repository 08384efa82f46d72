#![forbid(unsafe_code)]

//! CRC32 helpers for on-disk structures.

/// Checksums `payload` mixed with the block number it lives in, so a block written
/// to the wrong offset fails verification.
pub fn block_crc32(block_no: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&block_no.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
