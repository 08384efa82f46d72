use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use super::frame::Frame;
use super::header::{StoreHeader, HEADER_LEN};
use super::record::RecordBlock;
use super::{BlockStore, StoreOptions};
use crate::primitives::bytes::ord;
use crate::primitives::io::{FileIo, MemIo, StdFileIo};
use crate::types::{BlockNo, CbtreeError, Result};

/// Summary of a store's allocation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SpaceInfo {
    /// Block size in bytes.
    pub block_size: usize,
    /// Blocks ever handed out, header excluded.
    pub high_water: u64,
    /// Blocks currently on the free chain.
    pub free_blocks: u64,
    /// Value of the user header slot.
    pub user_header: u64,
}

/// Block store over any [`FileIo`] medium. Block 0 holds the [`StoreHeader`]; freed
/// blocks are zeroed and chained through their first eight bytes.
pub struct BlockSpace<F: FileIo> {
    io: F,
    block_size: usize,
    frames: Mutex<FxHashMap<BlockNo, Arc<Frame>>>,
    header: Mutex<StoreHeader>,
    header_dirty: AtomicBool,
}

impl BlockSpace<MemIo> {
    /// Creates an empty volatile store.
    pub fn in_memory(options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let header = StoreHeader::fresh(options.block_size);
        Ok(Self::with_header(MemIo::new(), header))
    }
}

impl BlockSpace<StdFileIo> {
    /// Opens the store at `path`, creating it when empty and allowed by `options`.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        let io = StdFileIo::open(path)?;
        if io.is_empty()? {
            if !options.create_if_missing {
                return Err(CbtreeError::Invalid("store file is empty"));
            }
            let space = Self::with_header(io, StoreHeader::fresh(options.block_size));
            space.header_dirty.store(true, Ordering::Release);
            space.flush()?;
            debug!(target: "cbtree::store", path = %path.display(), block_size = options.block_size, "created block store");
            return Ok(space);
        }
        let mut raw = [0u8; HEADER_LEN];
        io.read_at(0, &mut raw)?;
        let header = StoreHeader::decode(&raw)?;
        if header.block_size != options.block_size {
            debug!(
                target: "cbtree::store",
                stored = header.block_size,
                requested = options.block_size,
                "using stored block size"
            );
        }
        debug!(target: "cbtree::store", path = %path.display(), next_block = header.next_block.0, "opened block store");
        Ok(Self::with_header(io, header))
    }
}

impl<F: FileIo> BlockSpace<F> {
    fn with_header(io: F, header: StoreHeader) -> Self {
        Self {
            io,
            block_size: header.block_size as usize,
            frames: Mutex::new(FxHashMap::default()),
            header: Mutex::new(header),
            header_dirty: AtomicBool::new(false),
        }
    }

    /// Allocation counters and header slot.
    pub fn info(&self) -> Result<SpaceInfo> {
        let header = self.header.lock().clone();
        let mut free_blocks = 0u64;
        let mut cursor = header.free_head;
        while cursor.0 != 0 {
            free_blocks += 1;
            if free_blocks > header.next_block.0 {
                return Err(CbtreeError::Corruption("free chain cycle"));
            }
            let frame = self.frame(cursor)?;
            cursor = self.next_free(&frame)?;
        }
        Ok(SpaceInfo {
            block_size: self.block_size,
            high_water: header.next_block.0 - 1,
            free_blocks,
            user_header: header.user,
        })
    }

    fn check_block(&self, block: BlockNo) -> Result<()> {
        if block.0 == 0 || block >= self.header.lock().next_block {
            return Err(CbtreeError::Invalid("block number out of range"));
        }
        Ok(())
    }

    fn frame(&self, block: BlockNo) -> Result<Arc<Frame>> {
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&block) {
            return Ok(Arc::clone(frame));
        }
        let offset = block.0 * self.block_size as u64;
        let mut bytes = vec![0u8; self.block_size].into_boxed_slice();
        if offset + self.block_size as u64 <= self.io.len()? {
            self.io.read_at(offset, &mut bytes)?;
        }
        let frame = Arc::new(Frame::from_bytes(block, bytes));
        frames.insert(block, Arc::clone(&frame));
        Ok(frame)
    }

    fn next_free(&self, frame: &Frame) -> Result<BlockNo> {
        Ok(BlockNo(ord::get_u64_be(&frame.read())?))
    }
}

impl<F: FileIo> BlockStore for BlockSpace<F> {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate(&self) -> Result<BlockNo> {
        let mut header = self.header.lock();
        let block = if header.free_head.0 != 0 {
            let block = header.free_head;
            let frame = self.frame(block)?;
            header.free_head = self.next_free(&frame)?;
            frame.write().fill(0);
            block
        } else {
            let block = header.next_block;
            header.next_block = BlockNo(block.0 + 1);
            let frame = Arc::new(Frame::zeroed(block, self.block_size));
            frame.mark_dirty();
            self.frames.lock().insert(block, frame);
            block
        };
        self.header_dirty.store(true, Ordering::Release);
        Ok(block)
    }

    fn remove(&self, block: BlockNo) -> Result<()> {
        self.check_block(block)?;
        let mut header = self.header.lock();
        let frame = self.frame(block)?;
        {
            let mut buf = frame.write();
            buf.fill(0);
            ord::put_u64_be(&mut buf, header.free_head.0);
        }
        header.free_head = block;
        self.header_dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn get(&self, block: BlockNo) -> Result<RecordBlock> {
        self.check_block(block)?;
        Ok(RecordBlock::new(self.frame(block)?))
    }

    fn user_header(&self) -> u64 {
        self.header.lock().user
    }

    fn put_user_header(&self, value: u64) -> Result<()> {
        self.header.lock().user = value;
        self.header_dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let header = self.header.lock();
        let frames: Vec<Arc<Frame>> = self.frames.lock().values().cloned().collect();
        for frame in frames {
            if frame.take_dirty() {
                let bytes = frame.read();
                self.io.write_at(frame.block.0 * self.block_size as u64, &bytes)?;
            }
        }
        if self.header_dirty.swap(false, Ordering::AcqRel) {
            let mut block = vec![0u8; self.block_size];
            header.encode(&mut block);
            self.io.write_at(0, &block)?;
        }
        self.io.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small() -> StoreOptions {
        StoreOptions::default().block_size(256)
    }

    #[test]
    fn allocation_reuses_freed_blocks() -> Result<()> {
        let space = BlockSpace::in_memory(small())?;
        let a = space.allocate()?;
        let b = space.allocate()?;
        assert_eq!((a, b), (BlockNo(1), BlockNo(2)));

        space.get(b)?.push(b"payload")?;
        space.remove(b)?;
        space.remove(a)?;
        assert_eq!(space.info()?.free_blocks, 2);

        assert_eq!(space.allocate()?, a);
        let reused = space.allocate()?;
        assert_eq!(reused, b);
        assert_eq!(space.get(reused)?.size(), 0);
        assert_eq!(space.allocate()?, BlockNo(3));
        Ok(())
    }

    #[test]
    fn header_block_and_unallocated_blocks_are_rejected() -> Result<()> {
        let space = BlockSpace::in_memory(small())?;
        assert!(matches!(space.get(BlockNo(0)), Err(CbtreeError::Invalid(_))));
        assert!(matches!(space.get(BlockNo(1)), Err(CbtreeError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn file_store_persists_blocks_and_user_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("blocks.cbt");
        let block = {
            let space = BlockSpace::open(&path, small())?;
            let block = space.allocate()?;
            space.get(block)?.push(b"kept")?;
            space.put_user_header(99)?;
            space.flush()?;
            block
        };
        let space = BlockSpace::open(&path, StoreOptions::default())?;
        assert_eq!(space.block_size(), 256);
        assert_eq!(space.user_header(), 99);
        assert_eq!(space.get(block)?.get(0)?, b"kept".to_vec());
        assert_eq!(space.allocate()?, BlockNo(block.0 + 1));
        Ok(())
    }

    #[test]
    fn open_without_create_rejects_missing_store() -> Result<()> {
        let dir = tempdir()?;
        let options = small().create_if_missing(false);
        assert!(BlockSpace::open(dir.path().join("absent.cbt"), options).is_err());
        Ok(())
    }
}
