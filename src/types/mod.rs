#![forbid(unsafe_code)]

//! Shared identifiers and the crate-wide error type.

use std::fmt;

pub mod checksum;

pub use checksum::block_crc32;

/// Physical block number inside a block store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockNo(pub u64);

/// Tree node identifier: `(block_no << 1) | kind`, kind 0 = leaf, 1 = branch.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeTag(u64);

/// Node kind encoded in the low bit of a [`NodeTag`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NodeKind {
    /// Terminal level holding key/value pairs.
    Leaf,
    /// Internal level holding separator entries.
    Branch,
}

impl NodeTag {
    /// Largest possible tag; used when sizing a separator entry before its child exists.
    pub const MAX: NodeTag = NodeTag(u64::MAX);

    /// Builds a tag for a node of `kind` stored in `block`.
    pub fn new(block: BlockNo, kind: NodeKind) -> Self {
        let bit = match kind {
            NodeKind::Leaf => 0,
            NodeKind::Branch => 1,
        };
        NodeTag((block.0 << 1) | bit)
    }

    /// Rebuilds a tag from its persisted form; 0 means "no node".
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(NodeTag(raw))
    }

    /// Persisted form of the tag.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Block holding this node.
    pub fn block(self) -> BlockNo {
        BlockNo(self.0 >> 1)
    }

    /// Kind decoded from the low bit.
    pub fn kind(self) -> NodeKind {
        if self.0 & 1 == 0 {
            NodeKind::Leaf
        } else {
            NodeKind::Branch
        }
    }

    /// True when the tag names a leaf.
    pub fn is_leaf(self) -> bool {
        self.kind() == NodeKind::Leaf
    }
}

impl fmt::Display for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_leaf() { "leaf" } else { "branch" };
        write!(f, "{kind}@{}", self.block())
    }
}

/// Errors surfaced by the block store and the tree.
#[derive(thiserror::Error, Debug)]
pub enum CbtreeError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes could not be decoded.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A record exceeds the largest record a block can hold.
    #[error("record of {len} bytes exceeds block limit of {max} bytes")]
    RecordTooLarge {
        /// Encoded length of the rejected record.
        len: usize,
        /// Largest accepted record length.
        max: usize,
    },
    /// A lock was acquired on a block invalidated by a concurrent structural change.
    #[error("split conflict")]
    SplitConflict,
    /// A structural invariant of the tree was found broken.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

impl CbtreeError {
    /// True for the retryable structural-conflict signal.
    pub fn is_split_conflict(&self) -> bool {
        matches!(self, CbtreeError::SplitConflict)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CbtreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_block_and_kind() {
        let leaf = NodeTag::new(BlockNo(7), NodeKind::Leaf);
        let branch = NodeTag::new(BlockNo(7), NodeKind::Branch);
        assert_eq!(leaf.raw(), 14);
        assert_eq!(branch.raw(), 15);
        assert!(leaf.is_leaf());
        assert!(!branch.is_leaf());
        assert_eq!(branch.block(), BlockNo(7));
        assert_eq!(NodeTag::from_raw(15), Some(branch));
        assert_eq!(NodeTag::from_raw(0), None);
    }

    #[test]
    fn split_conflict_is_recognized() {
        assert!(CbtreeError::SplitConflict.is_split_conflict());
        assert!(!CbtreeError::Invariant("x").is_split_conflict());
    }
}
