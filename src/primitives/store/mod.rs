#![forbid(unsafe_code)]

//! Block storage: fixed-size blocks of slotted records plus a user header slot.

mod frame;
mod header;
mod record;
mod space;

pub use header::StoreHeader;
pub use record::{max_record_len, RecordBlock, Records};
pub use space::{BlockSpace, SpaceInfo};

use crate::types::{BlockNo, CbtreeError, Result};

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
const MIN_BLOCK_SIZE: u32 = 256;
const MAX_BLOCK_SIZE: u32 = 64 * 1024;

/// Storage consumed by the tree.
pub trait BlockStore: Send + Sync + 'static {
    /// Size of every block in bytes.
    fn block_size(&self) -> usize;
    /// Hands out an unused, zeroed block.
    fn allocate(&self) -> Result<BlockNo>;
    /// Returns `block` to the allocator.
    fn remove(&self, block: BlockNo) -> Result<()>;
    /// Record view over an allocated block.
    fn get(&self, block: BlockNo) -> Result<RecordBlock>;
    /// Reads the user header slot.
    fn user_header(&self) -> u64;
    /// Overwrites the user header slot.
    fn put_user_header(&self, value: u64) -> Result<()>;
    /// Persists dirty state, where the medium supports it.
    fn flush(&self) -> Result<()>;
    /// Largest record any block accepts.
    fn max_record_len(&self) -> usize {
        max_record_len(self.block_size())
    }
}

/// Knobs for opening or creating a [`BlockSpace`].
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Block size for newly created stores; existing stores keep their own.
    pub block_size: u32,
    /// Create the store when the file is missing or empty.
    pub create_if_missing: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            create_if_missing: true,
        }
    }
}

impl StoreOptions {
    /// Sets the block size.
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets whether a missing store may be created.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(CbtreeError::Invalid(
                "block size must be a power of two between 256 and 65536",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_validation() {
        assert!(StoreOptions::default().validate().is_ok());
        assert!(StoreOptions::default().block_size(256).validate().is_ok());
        assert!(StoreOptions::default().block_size(1000).validate().is_err());
        assert!(StoreOptions::default().block_size(128).validate().is_err());
        assert!(StoreOptions::default().block_size(1 << 17).validate().is_err());
    }
}
