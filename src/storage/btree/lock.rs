use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    RawRwLock, RwLock,
};

use crate::primitives::store::RecordBlock;
use crate::types::{BlockNo, CbtreeError, Result};

/// Fair read/write lock over one block plus a one-way validity flag.
///
/// Once invalidated a lock object stays invalid; the cache hands out a fresh one
/// for the same block after a refresh. The block handle is reachable only through
/// a guard.
pub(crate) struct BlockLock {
    block: RecordBlock,
    inner: Arc<RwLock<()>>,
    valid: AtomicBool,
}

impl BlockLock {
    pub(crate) fn new(block: RecordBlock) -> Self {
        Self {
            block,
            inner: Arc::new(RwLock::new(())),
            valid: AtomicBool::new(true),
        }
    }

    pub(crate) fn block_no(&self) -> BlockNo {
        self.block.block()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Shared access; `SplitConflict` if the block was invalidated.
    pub(crate) fn read(self: &Arc<Self>) -> Result<BlockReadGuard> {
        let guard = self.inner.read_arc();
        if !self.is_valid() {
            ArcRwLockReadGuard::unlock_fair(guard);
            return Err(CbtreeError::SplitConflict);
        }
        Ok(BlockReadGuard {
            owner: Arc::clone(self),
            guard: Some(guard),
        })
    }

    /// Exclusive access; `SplitConflict` if the block was invalidated.
    pub(crate) fn write(self: &Arc<Self>) -> Result<BlockWriteGuard> {
        let guard = self.inner.write_arc();
        if !self.is_valid() {
            ArcRwLockWriteGuard::unlock_fair(guard);
            return Err(CbtreeError::SplitConflict);
        }
        Ok(BlockWriteGuard {
            owner: Arc::clone(self),
            guard: Some(guard),
        })
    }

    /// Runs `f` under a read guard.
    pub(crate) fn read_with<R>(self: &Arc<Self>, f: impl FnOnce(&RecordBlock) -> Result<R>) -> Result<R> {
        let guard = self.read()?;
        f(guard.block())
    }

    /// Runs `f` under a write guard.
    pub(crate) fn write_with<R>(self: &Arc<Self>, f: impl FnOnce(&BlockWriteGuard) -> Result<R>) -> Result<R> {
        let guard = self.write()?;
        f(&guard)
    }
}

/// Shared hold on a block, released with a fair unlock.
pub(crate) struct BlockReadGuard {
    owner: Arc<BlockLock>,
    guard: Option<ArcRwLockReadGuard<RawRwLock, ()>>,
}

impl BlockReadGuard {
    pub(crate) fn block(&self) -> &RecordBlock {
        &self.owner.block
    }
}

impl Drop for BlockReadGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            ArcRwLockReadGuard::unlock_fair(guard);
        }
    }
}

/// Exclusive hold on a block. The only handle through which a lock can be invalidated.
pub(crate) struct BlockWriteGuard {
    owner: Arc<BlockLock>,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
}

impl BlockWriteGuard {
    pub(crate) fn block(&self) -> &RecordBlock {
        &self.owner.block
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.owner.is_valid()
    }

    /// Marks the lock object permanently stale. Holders of the same object fail their
    /// next acquisition with `SplitConflict`.
    pub(crate) fn invalidate(&self) {
        self.owner.valid.store(false, Ordering::Release);
    }
}

impl Drop for BlockWriteGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            ArcRwLockWriteGuard::unlock_fair(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::store::{BlockSpace, BlockStore, StoreOptions};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn lock() -> Arc<BlockLock> {
        let space = BlockSpace::in_memory(StoreOptions::default().block_size(256)).unwrap();
        let block = space.allocate().unwrap();
        Arc::new(BlockLock::new(space.get(block).unwrap()))
    }

    #[test]
    fn invalidated_lock_refuses_both_modes() {
        let lock = lock();
        {
            let guard = lock.write().unwrap();
            guard.block().push(b"x").unwrap();
            guard.invalidate();
            assert!(!guard.is_valid());
        }
        assert!(matches!(lock.read(), Err(CbtreeError::SplitConflict)));
        assert!(matches!(lock.write(), Err(CbtreeError::SplitConflict)));
        // A refused acquisition must not leave the lock held.
        assert!(lock.inner.try_write().is_some());
    }

    #[test]
    fn waiter_sees_invalidation_after_release() {
        let lock = lock();
        let guard = lock.write().unwrap();
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                tx.send(()).unwrap();
                lock.read().map(|_| ())
            })
        };
        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        guard.invalidate();
        drop(guard);
        assert!(matches!(waiter.join().unwrap(), Err(CbtreeError::SplitConflict)));
    }

    #[test]
    fn closure_helpers_release_on_error() {
        let lock = lock();
        let result: Result<()> = lock.write_with(|_| Err(CbtreeError::Invariant("boom")));
        assert!(matches!(result, Err(CbtreeError::Invariant("boom"))));
        let size = lock.read_with(|block| Ok(block.size())).unwrap();
        assert_eq!(size, 0);
    }

    #[test]
    fn dropped_guards_hand_the_lock_to_a_queued_writer() {
        let lock = lock();
        let reader = lock.read().unwrap();
        assert_eq!(reader.block().block(), lock.block_no());
        let (tx, rx) = mpsc::channel();
        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                tx.send(()).unwrap();
                let guard = lock.write()?;
                guard.block().push(b"queued")?;
                Ok::<_, CbtreeError>(())
            })
        };
        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        drop(reader);
        writer.join().unwrap().unwrap();
        let records = lock.read_with(|block| Ok(block.size())).unwrap();
        assert_eq!(records, 1);
        assert!(lock.inner.try_write().is_some());
    }
}
