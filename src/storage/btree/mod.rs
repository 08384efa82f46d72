#![forbid(unsafe_code)]

//! Concurrent B-tree with per-block locks.
//!
//! Nodes are blocks of a [`BlockStore`](crate::primitives::store::BlockStore).
//! Readers hold one block lock at a time; writers take locks upward only, and a
//! structural change invalidates the locks it makes stale so that the operations
//! caught mid-descent restart from a retry coordinator.

/// Encoding and decoding utilities for keys and values.
pub mod codecs;

mod branch;
mod cache;
mod cursor;
mod leaf;
mod lock;
mod node;
mod retry;
mod root;
mod split;
mod stats;
mod tree;

pub use codecs::{KeyCodec, ValCodec};
pub use cursor::{ParScan, Scan};
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::{BTree, BTreeOptions, Comparator};
