use std::ops::Range;

use crate::primitives::bytes::ord;
use crate::types::{block_crc32, BlockNo, CbtreeError, Result};

pub const MAGIC: [u8; 4] = *b"CBTR";
pub const FORMAT_VERSION: u16 = 1;

const HDR_MAGIC: Range<usize> = 0..4;
const HDR_FORMAT_VERSION: Range<usize> = 4..6;
const HDR_BLOCK_SIZE: Range<usize> = 8..12;
const HDR_NEXT_BLOCK: Range<usize> = 16..24;
const HDR_FREE_HEAD: Range<usize> = 24..32;
const HDR_USER: Range<usize> = 32..40;
const HDR_CRC: Range<usize> = 40..44;

/// Bytes of block 0 covered by the header.
pub const HEADER_LEN: usize = HDR_CRC.end;

/// Store metadata persisted in block 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreHeader {
    /// Size of every block in bytes.
    pub block_size: u32,
    /// Next never-used block number.
    pub next_block: BlockNo,
    /// Head of the free-block chain; block 0 means empty.
    pub free_head: BlockNo,
    /// Opaque slot owned by the store's user (the tree keeps its root tag here).
    pub user: u64,
}

impl StoreHeader {
    /// Header of a newly created store.
    pub fn fresh(block_size: u32) -> Self {
        Self {
            block_size,
            next_block: BlockNo(1),
            free_head: BlockNo(0),
            user: 0,
        }
    }

    /// Writes the header and its checksum into the front of `dst`.
    pub fn encode(&self, dst: &mut [u8]) {
        dst[..HEADER_LEN].fill(0);
        dst[HDR_MAGIC].copy_from_slice(&MAGIC);
        dst[HDR_FORMAT_VERSION].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        ord::put_u32_be(&mut dst[HDR_BLOCK_SIZE], self.block_size);
        ord::put_u64_be(&mut dst[HDR_NEXT_BLOCK], self.next_block.0);
        ord::put_u64_be(&mut dst[HDR_FREE_HEAD], self.free_head.0);
        ord::put_u64_be(&mut dst[HDR_USER], self.user);
        let crc = block_crc32(0, &dst[..HDR_CRC.start]);
        ord::put_u32_be(&mut dst[HDR_CRC], crc);
    }

    /// Parses and verifies a header.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_LEN {
            return Err(CbtreeError::Corruption("store header truncated"));
        }
        if src[HDR_MAGIC] != MAGIC {
            return Err(CbtreeError::Corruption("store magic mismatch"));
        }
        let version = u16::from_be_bytes([src[HDR_FORMAT_VERSION.start], src[HDR_FORMAT_VERSION.start + 1]]);
        if version != FORMAT_VERSION {
            return Err(CbtreeError::Corruption("unsupported store format version"));
        }
        let stored_crc = ord::get_u32_be(&src[HDR_CRC])?;
        if stored_crc != block_crc32(0, &src[..HDR_CRC.start]) {
            return Err(CbtreeError::Corruption("store header checksum mismatch"));
        }
        Ok(Self {
            block_size: ord::get_u32_be(&src[HDR_BLOCK_SIZE])?,
            next_block: BlockNo(ord::get_u64_be(&src[HDR_NEXT_BLOCK])?),
            free_head: BlockNo(ord::get_u64_be(&src[HDR_FREE_HEAD])?),
            user: ord::get_u64_be(&src[HDR_USER])?,
        })
    }
}
