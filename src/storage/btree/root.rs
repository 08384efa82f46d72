use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::primitives::store::BlockStore;
use crate::types::{CbtreeError, NodeTag, Result};

/// Root as observed at the start of an operation. Compared, never dereferenced.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct RootSnapshot {
    pub(crate) version: u64,
    pub(crate) tag: Option<NodeTag>,
}

/// Versioned holder of the root tag, persisted in the store's user header.
pub(crate) struct RootHolder {
    store: Arc<dyn BlockStore>,
    state: RwLock<RootSnapshot>,
}

impl RootHolder {
    pub(crate) fn open(store: Arc<dyn BlockStore>) -> Self {
        let tag = NodeTag::from_raw(store.user_header());
        debug!(target: "cbtree::root", root = ?tag.map(|tag| tag.to_string()), "root holder opened");
        Self {
            store,
            state: RwLock::new(RootSnapshot { version: 0, tag }),
        }
    }

    pub(crate) fn snapshot(&self) -> RootSnapshot {
        *self.state.read()
    }

    /// Snapshot plus the root resolved by `resolve` while the holder is read-locked,
    /// so the root cannot be swapped out between the two.
    pub(crate) fn current<T>(
        &self,
        resolve: impl FnOnce(NodeTag) -> Result<T>,
    ) -> Result<(RootSnapshot, Option<T>)> {
        let state = self.state.read();
        let root = state.tag.map(resolve).transpose()?;
        Ok((*state, root))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.read().tag.is_none()
    }

    /// Runs `compute` and installs the root tag it returns, provided the holder still
    /// matches `expected`. `SplitConflict` otherwise; `compute` is not run.
    pub(crate) fn replace<R>(
        &self,
        expected: RootSnapshot,
        compute: impl FnOnce() -> Result<(Option<NodeTag>, R)>,
    ) -> Result<R> {
        let mut state = self.state.write();
        if *state != expected {
            return Err(CbtreeError::SplitConflict);
        }
        let (tag, out) = compute()?;
        self.store.put_user_header(tag.map_or(0, NodeTag::raw))?;
        state.version += 1;
        state.tag = tag;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::store::{BlockSpace, StoreOptions};
    use crate::types::{BlockNo, NodeKind};

    fn holder() -> (Arc<dyn BlockStore>, RootHolder) {
        let store: Arc<dyn BlockStore> =
            Arc::new(BlockSpace::in_memory(StoreOptions::default().block_size(256)).unwrap());
        let holder = RootHolder::open(Arc::clone(&store));
        (store, holder)
    }

    #[test]
    fn replace_bumps_version_and_persists_tag() -> Result<()> {
        let (store, holder) = holder();
        let before = holder.snapshot();
        assert!(before.tag.is_none() && holder.is_empty());

        let tag = NodeTag::new(BlockNo(3), NodeKind::Leaf);
        holder.replace(before, || Ok((Some(tag), ())))?;

        let after = holder.snapshot();
        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.tag, Some(tag));
        assert_eq!(store.user_header(), tag.raw());

        let reopened = RootHolder::open(store);
        assert_eq!(reopened.snapshot().tag, Some(tag));
        Ok(())
    }

    #[test]
    fn stale_snapshot_is_a_conflict() -> Result<()> {
        let (_store, holder) = holder();
        let stale = holder.snapshot();
        holder.replace(stale, || Ok((None, ())))?;

        let mut ran = false;
        let result = holder.replace(stale, || {
            ran = true;
            Ok((None, ()))
        });
        assert!(matches!(result, Err(CbtreeError::SplitConflict)));
        assert!(!ran);
        Ok(())
    }

    #[test]
    fn failed_compute_leaves_holder_untouched() {
        let (_store, holder) = holder();
        let before = holder.snapshot();
        let result: Result<()> = holder.replace(before, || Err(CbtreeError::Invariant("nope")));
        assert!(matches!(result, Err(CbtreeError::Invariant("nope"))));
        assert_eq!(holder.snapshot(), before);
    }

    #[test]
    fn current_resolves_only_a_present_root() -> Result<()> {
        let (_store, holder) = holder();
        let (_, none) = holder.current(|_| -> Result<()> { Err(CbtreeError::Invariant("unreachable")) })?;
        assert!(none.is_none());

        let tag = NodeTag::new(BlockNo(5), NodeKind::Branch);
        holder.replace(holder.snapshot(), || Ok((Some(tag), ())))?;
        let (snapshot, resolved) = holder.current(|tag| Ok(tag.block()))?;
        assert_eq!(snapshot.tag, Some(tag));
        assert_eq!(resolved, Some(BlockNo(5)));
        Ok(())
    }
}
