use super::branch::{detach, step_right};
use super::codecs::{KeyCodec, ValCodec};
use super::lock::BlockWriteGuard;
use super::node::{LeafNode, LeafView, Node, Path};
use super::split::{split_into_parent, SplitAction};
use super::tree::BTree;
use crate::types::{CbtreeError, Result};

impl<'t, K, V> LeafNode<'t, K, V>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    pub(crate) fn get(&self, key: &K) -> Result<Option<V>> {
        self.lock.read_with(|block| {
            let view = LeafView::new(self.tree, block);
            match view.search(key)? {
                Ok(index) => view.value_at(index).map(Some),
                Err(_) => Ok(None),
            }
        })
    }

    /// Upserts the encoded pair, splitting this leaf (and ancestors as needed) until
    /// some leaf has room for it.
    pub(crate) fn put(&self, key: &K, record: &[u8], path: Path<'_, 't, K, V>) -> Result<()> {
        let mut leaf = self.clone();
        let mut guard = leaf.lock.write()?;
        loop {
            if apply_put(self.tree, &guard, key, record)? {
                return Ok(());
            }
            let size = guard.block().size();
            if size < 2 {
                return Err(CbtreeError::Invariant("leaf too small to split"));
            }
            let split_at = size / 2;
            let split_key = LeafView::<K, V>::new(self.tree, guard.block()).key_at(split_at)?;
            let action = SplitAction::new(Node::Leaf(leaf), guard, split_at, split_key, key.clone());
            let landing = split_into_parent(self.tree, path, action)?;
            leaf = landing.node.into_leaf()?;
            guard = landing.guard;
        }
    }

    pub(crate) fn remove(&self, key: &K, path: Path<'_, 't, K, V>) -> Result<()> {
        let emptied = self.lock.write_with(|guard| {
            let Ok(index) = LeafView::<K, V>::new(self.tree, guard.block()).search(key)? else {
                return Ok(false);
            };
            let emptied = guard.block().size() == 1;
            if emptied {
                detach(self.tree, path, self.tag)?;
                guard.invalidate();
            }
            guard.block().remove(index)?;
            self.tree.counters().inc_removals();
            Ok(emptied)
        })?;
        if emptied {
            self.tree.free_node(self.tag)?;
        }
        Ok(())
    }

    pub(crate) fn start(&self, from: Option<&K>, path: Path<'_, 't, K, V>) -> Result<Vec<(K, V)>> {
        let pairs = self.lock.read_with(|block| {
            let view = LeafView::new(self.tree, block);
            let index = match from {
                Some(key) => view.search(key)?.unwrap_or_else(|insert_at| insert_at),
                None => 0,
            };
            view.pairs_from(index)
        })?;
        if pairs.is_empty() {
            return step_right(path, self.tag);
        }
        Ok(pairs)
    }

    pub(crate) fn next(&self, after: &K, path: Path<'_, 't, K, V>) -> Result<Vec<(K, V)>> {
        let pairs = self.lock.read_with(|block| {
            let view = LeafView::new(self.tree, block);
            let index = match view.search(after)? {
                Ok(found) => found + 1,
                Err(insert_at) => insert_at,
            };
            view.pairs_from(index)
        })?;
        if pairs.is_empty() {
            return step_right(path, self.tag);
        }
        Ok(pairs)
    }
}

/// Overwrites or inserts in place. `Ok(false)` when the leaf has no room.
fn apply_put<K: KeyCodec, V: ValCodec>(
    tree: &BTree<K, V>,
    guard: &BlockWriteGuard,
    key: &K,
    record: &[u8],
) -> Result<bool> {
    let block = guard.block();
    match LeafView::<K, V>::new(tree, block).search(key)? {
        Ok(index) => {
            let fits = block.set(index, record)?;
            if fits {
                tree.counters().inc_updates();
            }
            Ok(fits)
        }
        Err(index) => {
            let fits = block.add(index, record)?;
            if fits {
                tree.counters().inc_inserts();
            }
            Ok(fits)
        }
    }
}
