//! Index structures built on the block store.

/// Concurrent B-tree.
pub mod btree;
