//! Concurrent B-tree over a block store.
//!
//! Reads, upserts, removals and ordered range scans run in parallel without a
//! tree-wide lock. Scans can be split along branch separators and driven by rayon.

#![warn(missing_docs)]

pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::store::{BlockSpace, BlockStore, StoreOptions};
pub use storage::btree::{BTree, BTreeOptions, BTreeStatsSnapshot, KeyCodec, Scan, ValCodec};
pub use types::{CbtreeError, Result};
