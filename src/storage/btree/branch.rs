use tracing::{debug, trace};

use super::codecs::{KeyCodec, ValCodec};
use super::node::{BranchNode, BranchView, Node, Path};
use super::retry::BranchRetry;
use super::tree::BTree;
use crate::primitives::store::RecordBlock;
use crate::types::{CbtreeError, NodeTag, Result};

impl<'t, K, V> BranchNode<'t, K, V>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    fn view<'a>(&self, block: &'a RecordBlock) -> BranchView<'a, 't, K, V> {
        BranchView::new(self.tree, block)
    }

    fn retry(&self) -> BranchRetry<'_> {
        BranchRetry::new(&self.lock, self.tree.counters())
    }

    /// Child owning `key`. Its lock object is resolved while this branch is read-locked.
    pub(crate) fn child_for(&self, key: &K) -> Result<Node<'t, K, V>> {
        self.lock.read_with(|block| {
            let view = self.view(block);
            let index = view.route(key)?;
            self.tree.node(view.child_at(index)?)
        })
    }

    pub(crate) fn first_child(&self) -> Result<Node<'t, K, V>> {
        self.lock.read_with(|block| {
            let view = self.view(block);
            if view.len() == 0 {
                return Err(CbtreeError::Invariant("branch has no entries"));
            }
            self.tree.node(view.child_at(0)?)
        })
    }

    fn child_from(&self, from: Option<&K>) -> Result<Node<'t, K, V>> {
        match from {
            Some(key) => self.child_for(key),
            None => self.first_child(),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Result<Option<V>> {
        self.retry().run(|| self.child_for(key)?.get(key))
    }

    pub(crate) fn put(&self, key: &K, record: &[u8], path: Path<'_, 't, K, V>) -> Result<()> {
        let below = path.below(self);
        self.retry()
            .run(|| self.child_for(key)?.put(key, record, below.as_path()))
    }

    pub(crate) fn remove(&self, key: &K, path: Path<'_, 't, K, V>) -> Result<()> {
        let below = path.below(self);
        self.retry()
            .run(|| self.child_for(key)?.remove(key, below.as_path()))
    }

    pub(crate) fn start(&self, from: Option<&K>, path: Path<'_, 't, K, V>) -> Result<Vec<(K, V)>> {
        let below = path.below(self);
        self.retry()
            .run(|| self.child_from(from)?.start(from, below.as_path()))
    }

    pub(crate) fn next(&self, after: &K, path: Path<'_, 't, K, V>) -> Result<Vec<(K, V)>> {
        let below = path.below(self);
        self.retry()
            .run(|| self.child_for(after)?.next(after, below.as_path()))
    }

    /// Proposes a separator strictly inside `(lower, upper)` for parallel partitioning.
    pub(crate) fn try_split(
        &self,
        lower: Option<&K>,
        upper: Option<&K>,
        path: Path<'_, 't, K, V>,
    ) -> Result<Option<K>> {
        let proposal = self.lock.read_with(|block| {
            let view = self.view(block);
            if view.len() == 0 {
                return Err(CbtreeError::Invariant("search on empty branch"));
            }
            if view.child_at(0)?.is_leaf() {
                return Ok(None);
            }
            let start = match lower {
                Some(key) => view.route(key)?,
                None => 0,
            };
            let end = match upper {
                Some(key) => view.route(key)?,
                None => view.len() - 1,
            };
            if start >= end {
                return Ok(None);
            }
            let key = view.key_at((start + end + 1) / 2)?;
            if let Some(upper) = upper {
                if self.tree.compare(&key, upper).is_eq() {
                    return Ok(None);
                }
            }
            Ok(Some(key))
        })?;
        if proposal.is_some() {
            return Ok(proposal);
        }
        let below = path.below(self);
        self.retry()
            .run(|| self.child_from(lower)?.try_split(lower, upper, below.as_path()))
    }

    /// Drops `child`'s entry. A branch left empty leaves its own parent first; a root
    /// branch left with one child hands the root to that child.
    pub(crate) fn remove_child(&self, child: NodeTag, path: Path<'_, 't, K, V>) -> Result<()> {
        let guard = self.lock.write()?;
        let view = self.view(guard.block());
        let slot = view
            .position_of(child)?
            .ok_or(CbtreeError::Invariant("removed child missing from its parent"))?;
        let size = view.len();
        if size == 1 {
            detach(self.tree, path, self.tag)?;
            guard.invalidate();
            guard.block().remove(slot)?;
            return self.tree.free_node(self.tag);
        }
        guard.block().remove(slot)?;
        if size == 2 && path.split_last().is_none() {
            let survivor = view.child_at(0)?;
            match self.tree.root().replace(path.root, || Ok((Some(survivor), ()))) {
                Ok(()) => {
                    guard.invalidate();
                    self.tree.counters().inc_height_decreases();
                    debug!(target: "cbtree::root", old = %self.tag, new = %survivor, "root collapsed into its only child");
                    drop(guard);
                    self.tree.free_node(self.tag)?;
                }
                Err(CbtreeError::SplitConflict) => {
                    trace!(target: "cbtree::root", root = %self.tag, "root changed, collapse skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Pairs from the subtree right of `child`, climbing when `child` is the last entry.
    pub(crate) fn after_child(&self, child: NodeTag, path: Path<'_, 't, K, V>) -> Result<Vec<(K, V)>> {
        let sibling = self.lock.read_with(|block| {
            let view = self.view(block);
            let Some(index) = view.position_of(child)? else {
                return Err(CbtreeError::SplitConflict);
            };
            if index + 1 < view.len() {
                self.tree.node(view.child_at(index + 1)?).map(Some)
            } else {
                Ok(None)
            }
        })?;
        match sibling {
            Some(node) => {
                let below = path.below(self);
                node.start(None, below.as_path())
            }
            None => step_right(path, self.tag),
        }
    }
}

/// Removes `child` from whatever holds it: its parent branch, or the root holder.
pub(crate) fn detach<'t, K, V>(tree: &'t BTree<K, V>, path: Path<'_, 't, K, V>, child: NodeTag) -> Result<()>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    match path.split_last() {
        Some((parent, above)) => parent.remove_child(child, above),
        None => tree.clear_root(path.root, child),
    }
}

/// Continues a scan in the subtree right of `child`; empty at the end of the tree.
pub(crate) fn step_right<'t, K, V>(path: Path<'_, 't, K, V>, child: NodeTag) -> Result<Vec<(K, V)>>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    match path.split_last() {
        Some((parent, above)) => parent.after_child(child, above),
        None => Ok(Vec::new()),
    }
}
