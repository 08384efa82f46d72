use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;

/// Snapshot of tree counters at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BTreeStatsSnapshot {
    /// Point lookups served
    pub gets: u64,
    /// Puts that added a new key
    pub inserts: u64,
    /// Puts that overwrote an existing key
    pub updates: u64,
    /// Removes that deleted a key
    pub removals: u64,
    /// Key comparisons performed
    pub comparisons: u64,
    /// Split conflicts answered with a retry
    pub restarts: u64,
    /// Split conflicts a branch gave up on and passed upward
    pub failed_restarts: u64,
    /// Most restarts a single root-level call needed
    pub max_restarts: u64,
    /// Leaf splits committed
    pub leaf_splits: u64,
    /// Branch splits committed
    pub branch_splits: u64,
    /// Root replacements that added a level
    pub height_increases: u64,
    /// Root replacements that removed a level
    pub height_decreases: u64,
    /// Blocks allocated for nodes
    pub allocations: u64,
    /// Node blocks returned to the store
    pub frees: u64,
}

/// Thread-safe counters for tree operations.
#[derive(Default)]
pub struct BTreeStats {
    gets: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removals: AtomicU64,
    comparisons: AtomicU64,
    restarts: AtomicU64,
    failed_restarts: AtomicU64,
    max_restarts: AtomicU64,
    leaf_splits: AtomicU64,
    branch_splits: AtomicU64,
    height_increases: AtomicU64,
    height_decreases: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl BTreeStats {
    /// Returns the number of point lookups.
    pub fn gets(&self) -> u64 {
        self.gets.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of restarts.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of conflicts a branch passed upward.
    pub fn failed_restarts(&self) -> u64 {
        self.failed_restarts.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of committed leaf splits.
    pub fn leaf_splits(&self) -> u64 {
        self.leaf_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of committed branch splits.
    pub fn branch_splits(&self) -> u64 {
        self.branch_splits.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_gets(&self) {
        self.gets.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_inserts(&self) {
        self.inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_updates(&self) {
        self.updates.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_removals(&self) {
        self.removals.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_comparisons(&self) {
        self.comparisons.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_restarts(&self) {
        self.restarts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_failed_restarts(&self) {
        self.failed_restarts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_restart_depth(&self, depth: u64) {
        self.max_restarts.fetch_max(depth, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_branch_splits(&self) {
        self.branch_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_height_increases(&self) {
        self.height_increases.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_height_decreases(&self) {
        self.height_decreases.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_allocations(&self) {
        self.allocations.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_frees(&self) {
        self.frees.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all counters.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(AtomicOrdering::Relaxed);
        BTreeStatsSnapshot {
            gets: load(&self.gets),
            inserts: load(&self.inserts),
            updates: load(&self.updates),
            removals: load(&self.removals),
            comparisons: load(&self.comparisons),
            restarts: load(&self.restarts),
            failed_restarts: load(&self.failed_restarts),
            max_restarts: load(&self.max_restarts),
            leaf_splits: load(&self.leaf_splits),
            branch_splits: load(&self.branch_splits),
            height_increases: load(&self.height_increases),
            height_decreases: load(&self.height_decreases),
            allocations: load(&self.allocations),
            frees: load(&self.frees),
        }
    }

    /// Emits current counters to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "cbtree::stats",
            gets = snapshot.gets,
            inserts = snapshot.inserts,
            updates = snapshot.updates,
            removals = snapshot.removals,
            comparisons = snapshot.comparisons,
            restarts = snapshot.restarts,
            failed_restarts = snapshot.failed_restarts,
            max_restarts = snapshot.max_restarts,
            leaf_splits = snapshot.leaf_splits,
            branch_splits = snapshot.branch_splits,
            height_increases = snapshot.height_increases,
            height_decreases = snapshot.height_decreases,
            allocations = snapshot.allocations,
            frees = snapshot.frees,
            "btree stats snapshot"
        );
    }
}
