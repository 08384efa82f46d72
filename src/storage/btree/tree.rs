use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::cache::BlockLockCache;
use super::codecs::{encode_leaf_record, encode_separator, separator_len, KeyCodec, ValCodec};
use super::cursor::Scan;
use super::lock::BlockWriteGuard;
use super::node::{Handle, Landing, Node, Path};
use super::root::{RootHolder, RootSnapshot};
use super::split::SplitAction;
use super::stats::{BTreeStats, BTreeStatsSnapshot};
use crate::primitives::store::BlockStore;
use crate::types::{CbtreeError, NodeKind, NodeTag, Result};

/// Total order used to arrange keys.
pub type Comparator<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

/// Configuration knobs for the B-tree.
#[derive(Clone, Debug)]
pub struct BTreeOptions {
    /// Root-level restarts within a single call after which a warning is logged.
    pub restart_warn_threshold: u64,
    /// Number of cached lock entries that triggers pruning of dead ones.
    pub lock_cache_high_water: usize,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self {
            restart_warn_threshold: 64,
            lock_cache_high_water: 1024,
        }
    }
}

/// Concurrent B-tree over a [`BlockStore`].
///
/// Every node lives in one block guarded by its own fair read/write lock; there is
/// no tree-wide lock. Structural changes invalidate the affected block locks and the
/// operations that trip over them restart.
pub struct BTree<K, V> {
    cache: BlockLockCache,
    root: RootHolder,
    compare: Comparator<K>,
    stats: Arc<BTreeStats>,
    options: BTreeOptions,
    _values: PhantomData<fn() -> V>,
}

impl<K, V> fmt::Debug for BTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.root.snapshot();
        f.debug_struct("BTree")
            .field("root", &snapshot.tag)
            .field("root_version", &snapshot.version)
            .field("options", &self.options)
            .finish()
    }
}

impl<K, V> BTree<K, V> {
    pub(crate) fn compare(&self, a: &K, b: &K) -> Ordering {
        self.stats.inc_comparisons();
        (self.compare)(a, b)
    }

    pub(crate) fn counters(&self) -> &BTreeStats {
        &self.stats
    }

    pub(crate) fn root(&self) -> &RootHolder {
        &self.root
    }

    /// Handle for `tag`. Callers resolve children while holding the parent's guard.
    pub(crate) fn node(&self, tag: NodeTag) -> Result<Node<'_, K, V>> {
        let lock = self.cache.get(tag.block())?;
        Ok(Node::from_handle(Handle {
            tree: self,
            tag,
            lock,
        }))
    }

    /// Fresh, empty, write-locked node of `kind`.
    pub(crate) fn allocate_node(&self, kind: NodeKind) -> Result<(Node<'_, K, V>, BlockWriteGuard)> {
        let block = self.cache.allocate()?;
        let node = self.node(NodeTag::new(block, kind))?;
        let guard = node.lock().write()?;
        self.stats.inc_allocations();
        Ok((node, guard))
    }

    pub(crate) fn free_node(&self, tag: NodeTag) -> Result<()> {
        self.cache.remove(tag.block())?;
        self.stats.inc_frees();
        Ok(())
    }

    /// Drops the cached lock for `tag` so the next access gets a valid one.
    pub(crate) fn refresh(&self, tag: NodeTag) {
        self.cache.refresh(tag.block());
    }

    /// Hands the root to nobody. Only valid while `child` is still the root.
    pub(crate) fn clear_root(&self, expected: RootSnapshot, child: NodeTag) -> Result<()> {
        if expected.tag != Some(child) {
            return Err(CbtreeError::SplitConflict);
        }
        self.root.replace(expected, || Ok((None, ())))?;
        self.stats.inc_height_decreases();
        debug!(target: "cbtree::root", old = %child, "tree emptied");
        Ok(())
    }

    /// Current root snapshot and a handle on the root node, resolved under the
    /// holder's lock.
    pub(crate) fn root_node(&self) -> Result<(RootSnapshot, Option<Node<'_, K, V>>)> {
        self.root.current(|tag| self.node(tag))
    }

    /// Runs `op` against the current root, restarting on split-conflict.
    fn with_root<'t, R>(
        &'t self,
        mut op: impl FnMut(Option<Node<'t, K, V>>, RootSnapshot) -> Result<R>,
    ) -> Result<R> {
        let mut restarts = 0u64;
        loop {
            let (snapshot, root) = self.root_node()?;
            match op(root, snapshot) {
                Err(CbtreeError::SplitConflict) => {
                    restarts += 1;
                    self.stats.inc_restarts();
                    self.stats.record_restart_depth(restarts);
                    trace!(target: "cbtree::retry", restarts, root = ?snapshot.tag, "root restart");
                    if restarts == self.options.restart_warn_threshold {
                        warn!(
                            target: "cbtree::retry",
                            restarts,
                            failed_restarts = self.stats.failed_restarts(),
                            root = ?snapshot.tag,
                            "operation keeps restarting at the root"
                        );
                    }
                }
                other => return other,
            }
        }
    }

    /// Live statistics counters.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot of the statistics counters.
    pub fn diagnostics(&self) -> BTreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// The comparator keys are ordered by.
    pub fn comparator(&self) -> Comparator<K> {
        Arc::clone(&self.compare)
    }

    /// Options the tree was opened with.
    pub fn options(&self) -> &BTreeOptions {
        &self.options
    }

    /// True when the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Persists the store's dirty blocks and header.
    pub fn flush(&self) -> Result<()> {
        self.cache.store().flush()
    }
}

impl<K, V> BTree<K, V>
where
    K: KeyCodec + Clone + Ord + 'static,
    V: ValCodec,
{
    /// Opens the tree persisted in `store` (or an empty one), ordered by `K: Ord`.
    pub fn open(store: Arc<dyn BlockStore>, options: BTreeOptions) -> Result<Self> {
        Self::open_with_comparator(store, options, Arc::new(|a: &K, b: &K| a.cmp(b)))
    }
}

impl<K, V> BTree<K, V>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    /// Opens the tree persisted in `store` (or an empty one), ordered by `compare`.
    ///
    /// The comparator must agree with the one the tree was built with.
    pub fn open_with_comparator(
        store: Arc<dyn BlockStore>,
        options: BTreeOptions,
        compare: Comparator<K>,
    ) -> Result<Self> {
        let root = RootHolder::open(Arc::clone(&store));
        let cache = BlockLockCache::new(store, options.lock_cache_high_water);
        Ok(Self {
            cache,
            root,
            compare,
            stats: Arc::new(BTreeStats::default()),
            options,
            _values: PhantomData,
        })
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.stats.inc_gets();
        self.with_root(|root, _| match root {
            Some(node) => node.get(key),
            None => Ok(None),
        })
    }

    /// Inserts `key` or overwrites its value.
    pub fn put(&self, key: K, value: V) -> Result<&Self> {
        let record = encode_leaf_record(&key, &value);
        let max = self.cache.store().max_record_len();
        let separator = separator_len(&key);
        if record.len() > max || separator > max {
            return Err(CbtreeError::RecordTooLarge {
                len: record.len().max(separator),
                max,
            });
        }
        self.with_root(|root, snapshot| match root {
            Some(node) => node.put(&key, &record, Path::at_root(snapshot)),
            None => self.plant_root(snapshot, &record),
        })?;
        Ok(self)
    }

    /// Removes `key`; absent keys are ignored.
    pub fn remove(&self, key: &K) -> Result<&Self> {
        self.with_root(|root, snapshot| match root {
            Some(node) => node.remove(key, Path::at_root(snapshot)),
            None => Ok(()),
        })?;
        Ok(self)
    }

    /// Ascending pairs in `[lower, upper)`; either bound may be open.
    pub fn scan(&self, lower: Option<K>, upper: Option<K>) -> Scan<'_, K, V> {
        Scan::new(self, lower, upper)
    }

    /// Ascending pairs from `key` (inclusive) to the end.
    pub fn scan_from(&self, key: K) -> Scan<'_, K, V> {
        self.scan(Some(key), None)
    }

    /// Ascending pairs from the start up to `key` (exclusive).
    pub fn scan_to(&self, key: K) -> Scan<'_, K, V> {
        self.scan(None, Some(key))
    }

    /// Ascending pairs in `[lower, upper)`.
    pub fn scan_between(&self, lower: K, upper: K) -> Scan<'_, K, V> {
        self.scan(Some(lower), Some(upper))
    }

    /// Every pair in ascending order.
    pub fn scan_all(&self) -> Scan<'_, K, V> {
        self.scan(None, None)
    }

    /// Number of levels; 0 for an empty tree.
    pub fn height(&self) -> Result<usize> {
        self.with_root(|root, _| {
            let Some(mut node) = root else {
                return Ok(0);
            };
            let mut height = 1;
            while let Node::Branch(branch) = &node {
                let child = branch.first_child()?;
                node = child;
                height += 1;
            }
            Ok(height)
        })
    }

    /// Number of entries, counted by a full scan.
    pub fn len(&self) -> Result<usize> {
        self.scan_all().try_fold(0, |count, item| item.map(|_| count + 1))
    }

    /// First leaf-sized batch at or after `from` (the first key when `None`).
    pub(crate) fn start_batch(&self, from: Option<&K>) -> Result<Vec<(K, V)>> {
        self.with_root(|root, snapshot| match root {
            Some(node) => node.start(from, Path::at_root(snapshot)),
            None => Ok(Vec::new()),
        })
    }

    /// Next leaf-sized batch strictly after `after`.
    pub(crate) fn next_batch(&self, after: &K) -> Result<Vec<(K, V)>> {
        self.with_root(|root, snapshot| match root {
            Some(node) => node.next(after, Path::at_root(snapshot)),
            None => Ok(Vec::new()),
        })
    }

    /// A separator strictly inside `(lower, upper)`, if the branch levels offer one.
    pub(crate) fn split_point(&self, lower: Option<&K>, upper: Option<&K>) -> Result<Option<K>> {
        self.with_root(|root, snapshot| match root {
            Some(node) => node.try_split(lower, upper, Path::at_root(snapshot)),
            None => Ok(None),
        })
    }

    /// First insertion into an empty tree.
    fn plant_root(&self, expected: RootSnapshot, record: &[u8]) -> Result<()> {
        self.root.replace(expected, || {
            let (leaf, guard) = self.allocate_node(NodeKind::Leaf)?;
            if !guard.block().push(record)? {
                drop(guard);
                self.free_node(leaf.tag())?;
                return Err(CbtreeError::Invariant("record does not fit an empty leaf"));
            }
            self.stats.inc_inserts();
            self.stats.inc_height_increases();
            debug!(target: "cbtree::root", root = %leaf.tag(), "first leaf planted");
            Ok((Some(leaf.tag()), ()))
        })
    }

    /// Splits the root node held by `action` under a new branch root.
    pub(crate) fn grow_root<'t>(
        &'t self,
        expected: RootSnapshot,
        action: SplitAction<'t, K, V>,
    ) -> Result<Landing<'t, K, V>> {
        if expected.tag != Some(action.existing_tag()) {
            return Err(CbtreeError::SplitConflict);
        }
        self.root.replace(expected, move || {
            let existing = action.existing_tag();
            let first_key = action.first_key()?;
            let prepared = action.prepare()?;
            let (root, root_guard) = self.allocate_node(NodeKind::Branch)?;
            let left = encode_separator(&first_key, existing);
            let right = encode_separator(prepared.separator(), prepared.sibling_tag());
            if !(root_guard.block().push(&left)? && root_guard.block().push(&right)?) {
                drop(root_guard);
                self.free_node(root.tag())?;
                return Err(CbtreeError::Invariant("new root cannot hold two separators"));
            }
            let sibling = prepared.sibling_tag();
            let landing = prepared.commit()?;
            self.stats.inc_height_increases();
            debug!(
                target: "cbtree::root",
                root = %root.tag(),
                left = %existing,
                right = %sibling,
                "root split"
            );
            Ok((Some(root.tag()), landing))
        })
    }
}
