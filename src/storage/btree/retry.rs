use std::sync::Arc;

use tracing::trace;

use super::lock::BlockLock;
use super::stats::BTreeStats;
use crate::types::{CbtreeError, Result};

/// Bounded retry around a branch's delegation to a child.
///
/// A split-conflict below a still-valid branch gets one more try with a fresh child
/// resolution; a second one, or any conflict once the branch itself is invalid, goes
/// up to the caller.
///
/// Levels compound: a conflict that no branch can absorb, such as a root split
/// against a stale root snapshot, re-runs the subtree below each valid level once,
/// roughly `2^height` attempts before the root retries. Deep, narrow trees (long
/// keys in small blocks) show this as `failed_restarts` tracking `restarts`.
pub(crate) struct BranchRetry<'a> {
    lock: &'a Arc<BlockLock>,
    stats: &'a BTreeStats,
}

impl<'a> BranchRetry<'a> {
    pub(crate) fn new(lock: &'a Arc<BlockLock>, stats: &'a BTreeStats) -> Self {
        Self { lock, stats }
    }

    pub(crate) fn run<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut restarted = false;
        loop {
            if !self.lock.is_valid() {
                return Err(CbtreeError::SplitConflict);
            }
            match op() {
                Err(CbtreeError::SplitConflict) if !restarted => {
                    restarted = true;
                    self.stats.inc_restarts();
                    trace!(target: "cbtree::retry", block = %self.lock.block_no(), "branch restart");
                }
                Err(CbtreeError::SplitConflict) => {
                    self.stats.inc_failed_restarts();
                    trace!(target: "cbtree::retry", block = %self.lock.block_no(), "branch restart failed");
                    return Err(CbtreeError::SplitConflict);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::store::{BlockSpace, BlockStore, StoreOptions};

    fn lock() -> Arc<BlockLock> {
        let space = BlockSpace::in_memory(StoreOptions::default().block_size(256)).unwrap();
        let block = space.allocate().unwrap();
        Arc::new(BlockLock::new(space.get(block).unwrap()))
    }

    #[test]
    fn one_conflict_is_absorbed() {
        let lock = lock();
        let stats = BTreeStats::default();
        let mut calls = 0;
        let out = BranchRetry::new(&lock, &stats).run(|| {
            calls += 1;
            if calls == 1 {
                Err(CbtreeError::SplitConflict)
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 2);
        assert_eq!(stats.restarts(), 1);
        assert_eq!(stats.snapshot().failed_restarts, 0);
    }

    #[test]
    fn second_conflict_propagates() {
        let lock = lock();
        let stats = BTreeStats::default();
        let out: Result<()> = BranchRetry::new(&lock, &stats).run(|| Err(CbtreeError::SplitConflict));
        assert!(matches!(out, Err(CbtreeError::SplitConflict)));
        assert_eq!(stats.restarts(), 1);
        assert_eq!(stats.snapshot().failed_restarts, 1);
    }

    #[test]
    fn nested_levels_each_retry_once() {
        let (upper, lower) = (lock(), lock());
        let stats = BTreeStats::default();
        let mut calls = 0;
        let out: Result<()> = BranchRetry::new(&upper, &stats).run(|| {
            BranchRetry::new(&lower, &stats).run(|| {
                calls += 1;
                Err(CbtreeError::SplitConflict)
            })
        });
        assert!(matches!(out, Err(CbtreeError::SplitConflict)));
        assert_eq!(calls, 4);
        assert_eq!(stats.restarts(), 3);
        assert_eq!(stats.failed_restarts(), 3);
    }

    #[test]
    fn invalid_branch_does_not_retry() {
        let lock = lock();
        lock.write().unwrap().invalidate();
        let stats = BTreeStats::default();
        let mut calls = 0;
        let out: Result<()> = BranchRetry::new(&lock, &stats).run(|| {
            calls += 1;
            Ok(())
        });
        assert!(matches!(out, Err(CbtreeError::SplitConflict)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn other_errors_pass_through() {
        let lock = lock();
        let stats = BTreeStats::default();
        let out: Result<()> = BranchRetry::new(&lock, &stats).run(|| Err(CbtreeError::Invariant("x")));
        assert!(matches!(out, Err(CbtreeError::Invariant("x"))));
        assert_eq!(stats.restarts(), 0);
    }
}
