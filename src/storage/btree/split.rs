//! Two-phase node splits and their upward propagation.
//!
//! A split runs as prepare → separator insertion in the parent → commit, or undo when
//! the parent has no room. Every step holds the write guard of the node being split;
//! the guard moves with the action and a committed split hands back a guard on the
//! half that owns the pending key.

use std::cmp::Ordering;

use tracing::{trace, warn};

use super::codecs::{encode_separator, separator_len, KeyCodec, ValCodec};
use super::lock::BlockWriteGuard;
use super::node::{BranchView, Landing, LeafView, Node, Path};
use super::tree::BTree;
use crate::types::{CbtreeError, NodeKind, NodeTag, Result};

/// A node that must split: records `[split_at..]` move to a new sibling, `split_key`
/// becomes the separator, and `route_key` names the key whose mutation is waiting.
pub(crate) struct SplitAction<'t, K, V> {
    existing: Node<'t, K, V>,
    guard: BlockWriteGuard,
    split_at: usize,
    split_key: K,
    route_key: K,
}

impl<'t, K, V> SplitAction<'t, K, V>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    pub(crate) fn new(
        existing: Node<'t, K, V>,
        guard: BlockWriteGuard,
        split_at: usize,
        split_key: K,
        route_key: K,
    ) -> Self {
        Self {
            existing,
            guard,
            split_at,
            split_key,
            route_key,
        }
    }

    pub(crate) fn existing_tag(&self) -> NodeTag {
        self.existing.tag()
    }

    pub(crate) fn split_key(&self) -> &K {
        &self.split_key
    }

    /// Key of the existing node's first entry; the separator it keeps in a new root.
    pub(crate) fn first_key(&self) -> Result<K> {
        let tree = self.existing.tree();
        let block = self.guard.block();
        match self.existing {
            Node::Leaf(_) => LeafView::new(tree, block).key_at(0),
            Node::Branch(_) => BranchView::new(tree, block).key_at(0),
        }
    }

    /// Copies the upper half into a fresh sibling, then invalidates the existing
    /// node's lock. Nothing is truncated until `commit`.
    pub(crate) fn prepare(self) -> Result<PreparedSplit<'t, K, V>> {
        let tree = self.existing.tree();
        let moved = self.guard.block().read(|records| {
            (self.split_at..records.len())
                .map(|index| records.get(index).map(<[u8]>::to_vec))
                .collect::<Result<Vec<_>>>()
        })?;
        if moved.is_empty() || self.split_at == 0 {
            return Err(CbtreeError::Invariant("split point leaves an empty half"));
        }
        let (sibling, sibling_guard) = tree.allocate_node(self.existing.tag().kind())?;
        for record in &moved {
            let pushed = sibling_guard.block().push(record);
            if !matches!(pushed, Ok(true)) {
                sibling_guard.invalidate();
                drop(sibling_guard);
                tree.free_node(sibling.tag())?;
                pushed?;
                return Err(CbtreeError::Invariant("split sibling cannot hold its entries"));
            }
        }
        self.guard.invalidate();
        Ok(PreparedSplit {
            tree,
            existing: self.existing,
            guard: Some(self.guard),
            split_at: self.split_at,
            separator: self.split_key,
            route_key: self.route_key,
            sibling,
            sibling_guard: Some(sibling_guard),
        })
    }
}

/// A split whose sibling is filled and whose existing node is invalidated but not
/// yet truncated. Must end in `commit` or `undo`; dropping it rolls back.
pub(crate) struct PreparedSplit<'t, K, V> {
    tree: &'t BTree<K, V>,
    existing: Node<'t, K, V>,
    guard: Option<BlockWriteGuard>,
    split_at: usize,
    separator: K,
    route_key: K,
    sibling: Node<'t, K, V>,
    sibling_guard: Option<BlockWriteGuard>,
}

impl<'t, K, V> PreparedSplit<'t, K, V>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    pub(crate) fn separator(&self) -> &K {
        &self.separator
    }

    pub(crate) fn sibling_tag(&self) -> NodeTag {
        self.sibling.tag()
    }

    /// Truncates the existing node and returns the write-locked half that owns the
    /// route key. The other half is released.
    pub(crate) fn commit(mut self) -> Result<Landing<'t, K, V>> {
        let tree = self.tree;
        let (Some(guard), Some(sibling_guard)) = (self.guard.take(), self.sibling_guard.take()) else {
            return Err(CbtreeError::Invariant("split resolved twice"));
        };
        guard.block().truncate(self.split_at);
        let existing = self.existing.tag();
        tree.refresh(existing);
        match existing.kind() {
            NodeKind::Leaf => tree.counters().inc_leaf_splits(),
            NodeKind::Branch => tree.counters().inc_branch_splits(),
        }
        trace!(
            target: "cbtree::split",
            existing = %existing,
            sibling = %self.sibling.tag(),
            at = self.split_at,
            "split committed"
        );
        if tree.compare(&self.route_key, &self.separator) == Ordering::Less {
            drop(sibling_guard);
            let node = tree.node(existing)?;
            let fresh = node.lock().write()?;
            drop(guard);
            Ok(Landing { node, guard: fresh })
        } else {
            drop(guard);
            Ok(Landing {
                node: self.sibling.clone(),
                guard: sibling_guard,
            })
        }
    }

    /// Discards the sibling and hands back an equivalent action over a fresh lock on
    /// the untouched existing node.
    pub(crate) fn undo(mut self) -> Result<SplitAction<'t, K, V>> {
        let tree = self.tree;
        let old_guard = self.rollback()?;
        let existing = self.existing.tag();
        let node = tree.node(existing)?;
        let guard = node.lock().write()?;
        drop(old_guard);
        trace!(target: "cbtree::split", existing = %existing, "split undone");
        Ok(SplitAction::new(
            node,
            guard,
            self.split_at,
            self.separator.clone(),
            self.route_key.clone(),
        ))
    }

    /// Frees the sibling and evicts the invalidated lock of the existing node. Returns
    /// the existing node's old guard, still held.
    fn rollback(&mut self) -> Result<Option<BlockWriteGuard>> {
        let sibling_guard = self.sibling_guard.take();
        let guard = self.guard.take();
        if let Some(sibling_guard) = sibling_guard {
            sibling_guard.invalidate();
            drop(sibling_guard);
            self.tree.free_node(self.sibling.tag())?;
        }
        self.tree.refresh(self.existing.tag());
        Ok(guard)
    }
}

impl<K, V> Drop for PreparedSplit<'_, K, V> {
    fn drop(&mut self) {
        let Some(sibling_guard) = self.sibling_guard.take() else {
            return;
        };
        sibling_guard.invalidate();
        drop(sibling_guard);
        let sibling = self.sibling.tag();
        if let Err(err) = self.tree.free_node(sibling) {
            warn!(target: "cbtree::split", sibling = %sibling, %err, "failed to free abandoned sibling");
        }
        self.tree.refresh(self.existing.tag());
        warn!(
            target: "cbtree::split",
            existing = %self.existing.tag(),
            "prepared split dropped unresolved, rolled back"
        );
    }
}

/// Installs `action`'s separator in the parent recorded at the end of `path`,
/// splitting the parent first when it has no room. A node without a parent grows a
/// new root.
pub(crate) fn split_into_parent<'t, K, V>(
    tree: &'t BTree<K, V>,
    path: Path<'_, 't, K, V>,
    action: SplitAction<'t, K, V>,
) -> Result<Landing<'t, K, V>>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    let Some((parent, above)) = path.split_last() else {
        return tree.grow_root(path.root, action);
    };
    let mut action = action;
    let mut parent_node = Node::Branch(parent.clone());
    let mut parent_guard = parent.lock.write()?;
    let mut escalated = false;
    loop {
        let needed = separator_len(action.split_key());
        if parent_guard.block().can_take(needed) {
            let child = action.existing_tag();
            let prepared = action.prepare()?;
            let record = encode_separator(prepared.separator(), prepared.sibling_tag());
            let slot = BranchView::new(tree, parent_guard.block())
                .position_of(child)?
                .ok_or(CbtreeError::Invariant("split child missing from its parent"))?;
            if parent_guard.block().add(slot + 1, &record)? {
                return prepared.commit();
            }
            action = prepared.undo()?;
        }
        // The chain above a split parent is only known for the original parent.
        if escalated {
            return Err(CbtreeError::SplitConflict);
        }
        escalated = true;

        let size = parent_guard.block().size();
        if size < 2 {
            return Err(CbtreeError::Invariant("branch too small to split"));
        }
        let mid = size / 2;
        let mid_key = BranchView::new(tree, parent_guard.block()).key_at(mid)?;
        let up = SplitAction::new(parent_node, parent_guard, mid, mid_key, action.split_key().clone());
        let landing = split_into_parent(tree, above, up)?;
        parent_node = landing.node;
        parent_guard = landing.guard;
    }
}
