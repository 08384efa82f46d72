use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use rustc_hash::FxHasher;

use super::lock::BlockLock;
use crate::primitives::store::BlockStore;
use crate::types::{BlockNo, Result};

/// Block number → lock object, over the block store.
///
/// Entries are weak: a lock object lives only while some operation holds it, and
/// an unreferenced block simply gets a fresh object on its next access.
pub(crate) struct BlockLockCache {
    store: Arc<dyn BlockStore>,
    locks: DashMap<BlockNo, Weak<BlockLock>, BuildHasherDefault<FxHasher>>,
    prune_at: AtomicUsize,
    high_water: usize,
}

impl BlockLockCache {
    pub(crate) fn new(store: Arc<dyn BlockStore>, high_water: usize) -> Self {
        let high_water = high_water.max(16);
        Self {
            store,
            locks: DashMap::default(),
            prune_at: AtomicUsize::new(high_water),
            high_water,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Cached lock for `block`, created on first use.
    pub(crate) fn get(&self, block: BlockNo) -> Result<Arc<BlockLock>> {
        if let Some(lock) = self.locks.get(&block).and_then(|entry| entry.upgrade()) {
            return Ok(lock);
        }
        let lock = {
            let mut entry = self.locks.entry(block).or_default();
            if let Some(lock) = entry.upgrade() {
                return Ok(lock);
            }
            let lock = Arc::new(BlockLock::new(self.store.get(block)?));
            *entry = Arc::downgrade(&lock);
            lock
        };
        self.maybe_prune();
        Ok(lock)
    }

    pub(crate) fn allocate(&self) -> Result<BlockNo> {
        self.store.allocate()
    }

    /// Evicts the cached lock and frees the block.
    pub(crate) fn remove(&self, block: BlockNo) -> Result<()> {
        self.locks.remove(&block);
        self.store.remove(block)
    }

    /// Evicts the cached lock only; the block stays allocated.
    pub(crate) fn refresh(&self, block: BlockNo) {
        self.locks.remove(&block);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }

    fn maybe_prune(&self) {
        let threshold = self.prune_at.load(Ordering::Relaxed);
        if self.locks.len() < threshold {
            return;
        }
        if self
            .prune_at
            .compare_exchange(threshold, usize::MAX, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.locks.retain(|_, lock| lock.strong_count() > 0);
        let next = (self.locks.len() * 2).max(self.high_water);
        self.prune_at.store(next, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::store::{BlockSpace, StoreOptions};

    fn cache(high_water: usize) -> BlockLockCache {
        let store = BlockSpace::in_memory(StoreOptions::default().block_size(256)).unwrap();
        BlockLockCache::new(Arc::new(store), high_water)
    }

    #[test]
    fn get_returns_same_object_while_held() -> Result<()> {
        let cache = cache(64);
        let block = cache.allocate()?;
        let first = cache.get(block)?;
        let second = cache.get(block)?;
        assert!(Arc::ptr_eq(&first, &second));
        Ok(())
    }

    #[test]
    fn refresh_replaces_invalidated_object() -> Result<()> {
        let cache = cache(64);
        let block = cache.allocate()?;
        let stale = cache.get(block)?;
        {
            let guard = stale.write()?;
            guard.block().push(b"kept")?;
            guard.invalidate();
        }
        assert!(cache.get(block)?.read().is_err());

        cache.refresh(block);
        let fresh = cache.get(block)?;
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(fresh.read()?.block().get(0)?, b"kept".to_vec());
        Ok(())
    }

    #[test]
    fn remove_frees_block_for_reuse() -> Result<()> {
        let cache = cache(64);
        let block = cache.allocate()?;
        let _held = cache.get(block)?;
        cache.remove(block)?;
        assert_eq!(cache.allocate()?, block);
        Ok(())
    }

    #[test]
    fn dead_entries_are_pruned() -> Result<()> {
        let cache = cache(16);
        for _ in 0..64 {
            let block = cache.allocate()?;
            drop(cache.get(block)?);
        }
        assert!(cache.len() <= 32, "cache kept {} entries", cache.len());
        Ok(())
    }
}
