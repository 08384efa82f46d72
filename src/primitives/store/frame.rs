use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::BlockNo;

/// In-memory image of one block.
pub struct Frame {
    pub block: BlockNo,
    buf: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Frame {
    pub fn zeroed(block: BlockNo, block_size: usize) -> Self {
        Self::from_bytes(block, vec![0u8; block_size].into_boxed_slice())
    }

    pub fn from_bytes(block: BlockNo, bytes: Box<[u8]>) -> Self {
        Self {
            block,
            buf: RwLock::new(bytes),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buf.read()
    }

    /// Write access; marks the frame dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.dirty.store(true, Ordering::Release);
        self.buf.write()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}
