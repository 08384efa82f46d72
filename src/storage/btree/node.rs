//! Disposable node handles, the parent chain recorded during descent, and typed
//! views over a locked block.

use std::cmp::Ordering;
use std::sync::Arc;

use smallvec::SmallVec;

use super::codecs::{
    decode_leaf_key, decode_leaf_pair, decode_leaf_value, decode_separator_child,
    decode_separator_key, KeyCodec, ValCodec,
};
use super::lock::{BlockLock, BlockWriteGuard};
use super::root::RootSnapshot;
use super::tree::BTree;
use crate::primitives::store::RecordBlock;
use crate::types::{CbtreeError, NodeKind, NodeTag, Result};

/// Tag plus the lock object resolved for it. Lives for one operation.
pub(crate) struct Handle<'t, K, V> {
    pub(crate) tree: &'t BTree<K, V>,
    pub(crate) tag: NodeTag,
    pub(crate) lock: Arc<BlockLock>,
}

impl<K, V> Clone for Handle<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree,
            tag: self.tag,
            lock: Arc::clone(&self.lock),
        }
    }
}

pub(crate) struct LeafNode<'t, K, V>(pub(crate) Handle<'t, K, V>);

pub(crate) struct BranchNode<'t, K, V>(pub(crate) Handle<'t, K, V>);

impl<K, V> Clone for LeafNode<'_, K, V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K, V> Clone for BranchNode<'_, K, V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<'t, K, V> std::ops::Deref for LeafNode<'t, K, V> {
    type Target = Handle<'t, K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'t, K, V> std::ops::Deref for BranchNode<'t, K, V> {
    type Target = Handle<'t, K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub(crate) enum Node<'t, K, V> {
    Leaf(LeafNode<'t, K, V>),
    Branch(BranchNode<'t, K, V>),
}

impl<K, V> Clone for Node<'_, K, V> {
    fn clone(&self) -> Self {
        match self {
            Node::Leaf(leaf) => Node::Leaf(leaf.clone()),
            Node::Branch(branch) => Node::Branch(branch.clone()),
        }
    }
}

impl<'t, K, V> Node<'t, K, V> {
    pub(crate) fn from_handle(handle: Handle<'t, K, V>) -> Self {
        match handle.tag.kind() {
            NodeKind::Leaf => Node::Leaf(LeafNode(handle)),
            NodeKind::Branch => Node::Branch(BranchNode(handle)),
        }
    }

    fn handle(&self) -> &Handle<'t, K, V> {
        match self {
            Node::Leaf(leaf) => &leaf.0,
            Node::Branch(branch) => &branch.0,
        }
    }

    pub(crate) fn tree(&self) -> &'t BTree<K, V> {
        self.handle().tree
    }

    pub(crate) fn tag(&self) -> NodeTag {
        self.handle().tag
    }

    pub(crate) fn lock(&self) -> &Arc<BlockLock> {
        &self.handle().lock
    }

    pub(crate) fn into_leaf(self) -> Result<LeafNode<'t, K, V>> {
        match self {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Branch(_) => Err(CbtreeError::Invariant("expected a leaf")),
        }
    }
}

impl<'t, K, V> Node<'t, K, V>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    pub(crate) fn get(&self, key: &K) -> Result<Option<V>> {
        match self {
            Node::Leaf(leaf) => leaf.get(key),
            Node::Branch(branch) => branch.get(key),
        }
    }

    pub(crate) fn put(&self, key: &K, record: &[u8], path: Path<'_, 't, K, V>) -> Result<()> {
        match self {
            Node::Leaf(leaf) => leaf.put(key, record, path),
            Node::Branch(branch) => branch.put(key, record, path),
        }
    }

    pub(crate) fn remove(&self, key: &K, path: Path<'_, 't, K, V>) -> Result<()> {
        match self {
            Node::Leaf(leaf) => leaf.remove(key, path),
            Node::Branch(branch) => branch.remove(key, path),
        }
    }

    pub(crate) fn start(&self, from: Option<&K>, path: Path<'_, 't, K, V>) -> Result<Vec<(K, V)>> {
        match self {
            Node::Leaf(leaf) => leaf.start(from, path),
            Node::Branch(branch) => branch.start(from, path),
        }
    }

    pub(crate) fn next(&self, after: &K, path: Path<'_, 't, K, V>) -> Result<Vec<(K, V)>> {
        match self {
            Node::Leaf(leaf) => leaf.next(after, path),
            Node::Branch(branch) => branch.next(after, path),
        }
    }

    pub(crate) fn try_split(
        &self,
        lower: Option<&K>,
        upper: Option<&K>,
        path: Path<'_, 't, K, V>,
    ) -> Result<Option<K>> {
        match self {
            Node::Leaf(_) => Ok(None),
            Node::Branch(branch) => branch.try_split(lower, upper, path),
        }
    }
}

/// Ancestors of the node being operated on, root first, plus the root version they
/// were read under.
pub(crate) struct Path<'p, 't, K, V> {
    pub(crate) root: RootSnapshot,
    chain: &'p [BranchNode<'t, K, V>],
}

impl<K, V> Clone for Path<'_, '_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for Path<'_, '_, K, V> {}

impl<'p, 't, K, V> Path<'p, 't, K, V> {
    pub(crate) fn at_root(root: RootSnapshot) -> Self {
        Self { root, chain: &[] }
    }

    /// Immediate parent and the path above it; `None` when the node is the root.
    pub(crate) fn split_last(&self) -> Option<(&'p BranchNode<'t, K, V>, Path<'p, 't, K, V>)> {
        let (parent, above) = self.chain.split_last()?;
        Some((
            parent,
            Path {
                root: self.root,
                chain: above,
            },
        ))
    }

    pub(crate) fn below(&self, branch: &BranchNode<'t, K, V>) -> PathBuf<'t, K, V> {
        let mut chain: SmallVec<[BranchNode<'t, K, V>; 8]> = self.chain.iter().cloned().collect();
        chain.push(branch.clone());
        PathBuf {
            root: self.root,
            chain,
        }
    }
}

pub(crate) struct PathBuf<'t, K, V> {
    root: RootSnapshot,
    chain: SmallVec<[BranchNode<'t, K, V>; 8]>,
}

impl<'t, K, V> PathBuf<'t, K, V> {
    pub(crate) fn as_path(&self) -> Path<'_, 't, K, V> {
        Path {
            root: self.root,
            chain: &self.chain,
        }
    }
}

/// Write-locked half of a split that owns the pending key.
pub(crate) struct Landing<'t, K, V> {
    pub(crate) node: Node<'t, K, V>,
    pub(crate) guard: BlockWriteGuard,
}

pub(crate) struct LeafView<'a, 't, K, V> {
    tree: &'t BTree<K, V>,
    block: &'a RecordBlock,
}

impl<'a, 't, K: KeyCodec, V: ValCodec> LeafView<'a, 't, K, V> {
    pub(crate) fn new(tree: &'t BTree<K, V>, block: &'a RecordBlock) -> Self {
        Self { tree, block }
    }

    pub(crate) fn key_at(&self, index: usize) -> Result<K> {
        self.block.read(|records| decode_leaf_key(records.get(index)?))
    }

    pub(crate) fn value_at(&self, index: usize) -> Result<V> {
        self.block.read(|records| decode_leaf_value(records.get(index)?))
    }

    /// `Ok(index)` of `key`, or `Err(insertion point)`.
    pub(crate) fn search(&self, key: &K) -> Result<std::result::Result<usize, usize>> {
        self.block.read(|records| {
            let (mut low, mut high) = (0, records.len());
            while low < high {
                let mid = (low + high) / 2;
                let probe: K = decode_leaf_key(records.get(mid)?)?;
                match self.tree.compare(&probe, key) {
                    Ordering::Less => low = mid + 1,
                    Ordering::Greater => high = mid,
                    Ordering::Equal => return Ok(Ok(mid)),
                }
            }
            Ok(Err(low))
        })
    }

    pub(crate) fn pairs_from(&self, start: usize) -> Result<Vec<(K, V)>> {
        self.block.read(|records| {
            (start..records.len())
                .map(|index| decode_leaf_pair(records.get(index)?))
                .collect()
        })
    }
}

pub(crate) struct BranchView<'a, 't, K, V> {
    tree: &'t BTree<K, V>,
    block: &'a RecordBlock,
}

impl<'a, 't, K: KeyCodec, V> BranchView<'a, 't, K, V> {
    pub(crate) fn new(tree: &'t BTree<K, V>, block: &'a RecordBlock) -> Self {
        Self { tree, block }
    }

    pub(crate) fn len(&self) -> usize {
        self.block.size()
    }

    pub(crate) fn key_at(&self, index: usize) -> Result<K> {
        self.block.read(|records| decode_separator_key(records.get(index)?))
    }

    pub(crate) fn child_at(&self, index: usize) -> Result<NodeTag> {
        self.block.read(|records| decode_separator_child(records.get(index)?))
    }

    /// Index of the child owning `key`: the last separator ≤ `key`, with entry 0 as
    /// the fallback. Entry 0's key is never compared.
    pub(crate) fn route(&self, key: &K) -> Result<usize> {
        self.block.read(|records| {
            if records.is_empty() {
                return Err(CbtreeError::Invariant("search on empty branch"));
            }
            let (mut low, mut high) = (1usize, records.len() - 1);
            while low <= high {
                let mid = (low + high) / 2;
                let probe: K = decode_separator_key(records.get(mid)?)?;
                match self.tree.compare(&probe, key) {
                    Ordering::Less => low = mid + 1,
                    Ordering::Greater => high = mid - 1,
                    Ordering::Equal => return Ok(mid),
                }
            }
            Ok(low - 1)
        })
    }

    pub(crate) fn position_of(&self, child: NodeTag) -> Result<Option<usize>> {
        self.block.read(|records| {
            for index in 0..records.len() {
                if decode_separator_child(records.get(index)?)? == child {
                    return Ok(Some(index));
                }
            }
            Ok(None)
        })
    }
}
