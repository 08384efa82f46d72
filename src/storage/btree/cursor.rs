use std::cmp::Ordering;
use std::vec;

use rayon::iter::plumbing::{bridge_unindexed, Folder, UnindexedConsumer, UnindexedProducer};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::trace;

use super::codecs::{KeyCodec, ValCodec};
use super::tree::BTree;
use crate::types::Result;

/// Lazy ascending scan over `[lower, upper)`.
///
/// Pairs are pulled one leaf-sized batch at a time; each refill descends from the
/// root again, resuming strictly after the last key handed out. No lock is held
/// between calls to `next`.
pub struct Scan<'t, K, V> {
    tree: &'t BTree<K, V>,
    lower: Option<K>,
    upper: Option<K>,
    resume: Option<K>,
    batch: vec::IntoIter<(K, V)>,
    done: bool,
}

impl<'t, K, V> Scan<'t, K, V>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    pub(crate) fn new(tree: &'t BTree<K, V>, lower: Option<K>, upper: Option<K>) -> Self {
        let done = match (&lower, &upper) {
            (Some(lower), Some(upper)) => tree.compare(lower, upper) != Ordering::Less,
            _ => false,
        };
        Self {
            tree,
            lower,
            upper,
            resume: None,
            batch: Vec::new().into_iter(),
            done,
        }
    }

    /// Current exclusive upper bound.
    pub fn upper(&self) -> Option<&K> {
        self.upper.as_ref()
    }

    fn below_upper(&self, key: &K) -> bool {
        match &self.upper {
            Some(upper) => self.tree.compare(key, upper) == Ordering::Less,
            None => true,
        }
    }

    fn refill(&mut self) -> Result<bool> {
        let batch = match &self.resume {
            Some(after) => self.tree.next_batch(after)?,
            None => self.tree.start_batch(self.lower.as_ref())?,
        };
        if batch.is_empty() {
            return Ok(false);
        }
        self.batch = batch.into_iter();
        Ok(true)
    }

    /// Hands the upper part of the remaining range to a new scan.
    ///
    /// On success this scan stops before the returned scan's first key. `None` when
    /// the tree offers no separator inside the remaining range.
    pub fn split(&mut self) -> Option<Self> {
        if self.done {
            return None;
        }
        let from = self.resume.as_ref().or(self.lower.as_ref());
        let key = match self.tree.split_point(from, self.upper.as_ref()) {
            Ok(Some(key)) => key,
            Ok(None) => return None,
            Err(err) => {
                trace!(target: "cbtree::scan", %err, "scan split declined");
                return None;
            }
        };
        let sibling = Scan {
            tree: self.tree,
            lower: Some(key.clone()),
            upper: self.upper.take(),
            resume: None,
            batch: Vec::new().into_iter(),
            done: false,
        };
        self.upper = Some(key);
        Some(sibling)
    }

    /// Adapts the scan to a rayon parallel iterator that preserves key order.
    pub fn par_iter(self) -> ParScan<'t, K, V> {
        ParScan { scan: self }
    }
}

impl<K, V> Iterator for Scan<'_, K, V>
where
    K: KeyCodec + Clone,
    V: ValCodec,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some((key, value)) = self.batch.next() {
                if !self.below_upper(&key) {
                    self.done = true;
                    return None;
                }
                self.resume = Some(key.clone());
                return Some(Ok((key, value)));
            }
            match self.refill() {
                Ok(true) => {}
                Ok(false) => self.done = true,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Rayon adapter over a [`Scan`], split along branch separators.
pub struct ParScan<'t, K, V> {
    scan: Scan<'t, K, V>,
}

impl<'t, K, V> IntoParallelIterator for Scan<'t, K, V>
where
    K: KeyCodec + Clone + Send,
    V: ValCodec + Send,
{
    type Iter = ParScan<'t, K, V>;
    type Item = Result<(K, V)>;

    fn into_par_iter(self) -> Self::Iter {
        ParScan { scan: self }
    }
}

impl<K, V> ParallelIterator for ParScan<'_, K, V>
where
    K: KeyCodec + Clone + Send,
    V: ValCodec + Send,
{
    type Item = Result<(K, V)>;

    fn drive_unindexed<C>(self, consumer: C) -> C::Result
    where
        C: UnindexedConsumer<Self::Item>,
    {
        bridge_unindexed(ScanProducer { scan: self.scan }, consumer)
    }
}

struct ScanProducer<'t, K, V> {
    scan: Scan<'t, K, V>,
}

impl<K, V> UnindexedProducer for ScanProducer<'_, K, V>
where
    K: KeyCodec + Clone + Send,
    V: ValCodec + Send,
{
    type Item = Result<(K, V)>;

    fn split(mut self) -> (Self, Option<Self>) {
        let upper = self.scan.split().map(|scan| ScanProducer { scan });
        (self, upper)
    }

    fn fold_with<F>(self, folder: F) -> F
    where
        F: Folder<Self::Item>,
    {
        folder.consume_iter(self.scan)
    }
}
