//! Low-level primitives underneath the tree.
//!
//! Includes byte encoders, positioned I/O and the block store.

/// Byte-level encoders.
pub mod bytes;

/// Positioned I/O over files and memory.
pub mod io;

/// Fixed-size blocks of slotted records.
///
/// Allocation, the free chain, the user header slot and persistence.
pub mod store;
