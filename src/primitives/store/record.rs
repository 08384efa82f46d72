//! Slotted variable-length record layout.
//!
//! ```text
//! [count: u32][rec 0][rec 1]...[rec n-1] .. free .. [end n-1]...[end 1][end 0]
//! ```
//! Records are packed upward from offset 4. The directory at the tail stores each
//! record's end offset, growing downward. Record `i` starts where `i - 1` ends.

use std::sync::Arc;

use super::frame::Frame;
use crate::types::{BlockNo, CbtreeError, Result};

const COUNT_LEN: usize = 4;
const SLOT_LEN: usize = 4;

/// Largest record a block of `block_size` bytes accepts; two of them always fit.
pub fn max_record_len(block_size: usize) -> usize {
    (block_size - COUNT_LEN - 2 * SLOT_LEN) / 2
}

/// Handle to one block's records. Each call briefly locks the block's frame; callers
/// serialize structural access through the tree's block locks.
#[derive(Clone)]
pub struct RecordBlock {
    frame: Arc<Frame>,
}

impl RecordBlock {
    pub(crate) fn new(frame: Arc<Frame>) -> Self {
        Self { frame }
    }

    /// Block number backing this handle.
    pub fn block(&self) -> BlockNo {
        self.frame.block
    }

    /// Largest record length this block accepts.
    pub fn max_record_len(&self) -> usize {
        max_record_len(self.frame.read().len())
    }

    /// Number of records.
    pub fn size(&self) -> usize {
        Layout::count(&self.frame.read())
    }

    /// Copy of record `index`.
    pub fn get(&self, index: usize) -> Result<Vec<u8>> {
        self.read(|records| records.get(index).map(<[u8]>::to_vec))
    }

    /// Runs `f` over a borrowed view of the records without copying them.
    pub fn read<R>(&self, f: impl FnOnce(&Records<'_>) -> R) -> R {
        let buf = self.frame.read();
        f(&Records { buf: &buf })
    }

    /// True if a record of `len` bytes can be added without overflowing.
    pub fn can_take(&self, len: usize) -> bool {
        let buf = self.frame.read();
        len <= max_record_len(buf.len()) && len + SLOT_LEN <= Layout::free(&buf)
    }

    /// Inserts `record` at `index`, shifting later records. `Ok(false)` when full.
    pub fn add(&self, index: usize, record: &[u8]) -> Result<bool> {
        let mut buf = self.frame.write();
        Layout::add(&mut buf, index, record)
    }

    /// Appends `record` after the last record.
    pub fn push(&self, record: &[u8]) -> Result<bool> {
        let mut buf = self.frame.write();
        let count = Layout::count(&buf);
        Layout::add(&mut buf, count, record)
    }

    /// Replaces record `index`. `Ok(false)` when the longer record does not fit.
    pub fn set(&self, index: usize, record: &[u8]) -> Result<bool> {
        let mut buf = self.frame.write();
        Layout::set(&mut buf, index, record)
    }

    /// Deletes record `index`.
    pub fn remove(&self, index: usize) -> Result<()> {
        let mut buf = self.frame.write();
        Layout::remove(&mut buf, index)
    }

    /// Keeps the first `count` records.
    pub fn truncate(&self, count: usize) {
        let mut buf = self.frame.write();
        if count < Layout::count(&buf) {
            Layout::set_count(&mut buf, count);
        }
    }
}

/// Borrowed read view over a block's records.
pub struct Records<'a> {
    buf: &'a [u8],
}

impl<'a> Records<'a> {
    /// Number of records.
    pub fn len(&self) -> usize {
        Layout::count(self.buf)
    }

    /// True when the block holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `index` as a slice of the block.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index >= self.len() {
            return Err(CbtreeError::Invalid("record index out of range"));
        }
        let start = Layout::start(self.buf, index);
        let end = Layout::end(self.buf, index);
        self.buf
            .get(start..end)
            .ok_or(CbtreeError::Corruption("record directory out of bounds"))
    }
}

struct Layout;

impl Layout {
    fn count(buf: &[u8]) -> usize {
        u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize
    }

    fn set_count(buf: &mut [u8], count: usize) {
        buf[..COUNT_LEN].copy_from_slice(&(count as u32).to_be_bytes());
    }

    fn slot_pos(buf: &[u8], index: usize) -> usize {
        buf.len() - SLOT_LEN * (index + 1)
    }

    fn end(buf: &[u8], index: usize) -> usize {
        let pos = Self::slot_pos(buf, index);
        u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize
    }

    fn set_end(buf: &mut [u8], index: usize, end: usize) {
        let pos = Self::slot_pos(buf, index);
        buf[pos..pos + SLOT_LEN].copy_from_slice(&(end as u32).to_be_bytes());
    }

    fn start(buf: &[u8], index: usize) -> usize {
        if index == 0 {
            COUNT_LEN
        } else {
            Self::end(buf, index - 1)
        }
    }

    fn data_end(buf: &[u8]) -> usize {
        Self::start(buf, Self::count(buf))
    }

    fn free(buf: &[u8]) -> usize {
        let directory = buf.len() - SLOT_LEN * Self::count(buf);
        directory.saturating_sub(Self::data_end(buf))
    }

    fn check_len(buf: &[u8], len: usize) -> Result<()> {
        let max = max_record_len(buf.len());
        if len > max {
            return Err(CbtreeError::RecordTooLarge { len, max });
        }
        Ok(())
    }

    fn add(buf: &mut [u8], index: usize, record: &[u8]) -> Result<bool> {
        Self::check_len(buf, record.len())?;
        let count = Self::count(buf);
        if index > count {
            return Err(CbtreeError::Invalid("record index out of range"));
        }
        if record.len() + SLOT_LEN > Self::free(buf) {
            return Ok(false);
        }
        let len = record.len();
        let start = Self::start(buf, index);
        let data_end = Self::data_end(buf);
        buf.copy_within(start..data_end, start + len);
        for j in (index..count).rev() {
            let end = Self::end(buf, j);
            Self::set_end(buf, j + 1, end + len);
        }
        Self::set_end(buf, index, start + len);
        buf[start..start + len].copy_from_slice(record);
        Self::set_count(buf, count + 1);
        Ok(true)
    }

    fn set(buf: &mut [u8], index: usize, record: &[u8]) -> Result<bool> {
        Self::check_len(buf, record.len())?;
        let count = Self::count(buf);
        if index >= count {
            return Err(CbtreeError::Invalid("record index out of range"));
        }
        let start = Self::start(buf, index);
        let end = Self::end(buf, index);
        let old_len = end - start;
        let new_len = record.len();
        if new_len > old_len && new_len - old_len > Self::free(buf) {
            return Ok(false);
        }
        let data_end = Self::data_end(buf);
        let new_end = start + new_len;
        buf.copy_within(end..data_end, new_end);
        for j in index..count {
            let shifted = Self::end(buf, j) + new_len - old_len;
            Self::set_end(buf, j, shifted);
        }
        buf[start..new_end].copy_from_slice(record);
        Ok(true)
    }

    fn remove(buf: &mut [u8], index: usize) -> Result<()> {
        let count = Self::count(buf);
        if index >= count {
            return Err(CbtreeError::Invalid("record index out of range"));
        }
        let start = Self::start(buf, index);
        let end = Self::end(buf, index);
        let len = end - start;
        let data_end = Self::data_end(buf);
        buf.copy_within(end..data_end, start);
        for j in index + 1..count {
            let shifted = Self::end(buf, j) - len;
            Self::set_end(buf, j - 1, shifted);
        }
        Self::set_end(buf, count - 1, 0);
        Self::set_count(buf, count - 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(size: usize) -> RecordBlock {
        RecordBlock::new(Arc::new(Frame::zeroed(BlockNo(1), size)))
    }

    fn contents(block: &RecordBlock) -> Vec<Vec<u8>> {
        (0..block.size()).map(|i| block.get(i).unwrap()).collect()
    }

    #[test]
    fn add_set_remove_keep_order() {
        let b = block(128);
        assert!(b.push(b"bb").unwrap());
        assert!(b.add(0, b"a").unwrap());
        assert!(b.add(2, b"cccc").unwrap());
        assert_eq!(contents(&b), vec![b"a".to_vec(), b"bb".to_vec(), b"cccc".to_vec()]);

        assert!(b.set(1, b"BBBBBB").unwrap());
        assert!(b.set(2, b"c").unwrap());
        assert_eq!(contents(&b), vec![b"a".to_vec(), b"BBBBBB".to_vec(), b"c".to_vec()]);

        b.remove(0).unwrap();
        assert_eq!(contents(&b), vec![b"BBBBBB".to_vec(), b"c".to_vec()]);
        b.truncate(1);
        assert_eq!(contents(&b), vec![b"BBBBBB".to_vec()]);
    }

    #[test]
    fn full_block_rejects_without_corrupting() {
        let b = block(64);
        let record = [7u8; 10];
        let mut added = 0;
        while b.can_take(record.len()) {
            assert!(b.push(&record).unwrap());
            added += 1;
        }
        assert!(added >= 2);
        assert!(!b.push(&record).unwrap());
        assert!(!b.set(0, &[1u8; 24]).unwrap());
        assert_eq!(b.size(), added);
        assert!(contents(&b).iter().all(|r| r == &record));
    }

    #[test]
    fn oversized_record_is_rejected() {
        let b = block(64);
        let max = b.max_record_len();
        assert!(b.push(&vec![1u8; max]).unwrap());
        assert!(b.push(&vec![2u8; max]).unwrap());
        match b.add(0, &vec![0u8; max + 1]) {
            Err(CbtreeError::RecordTooLarge { len, max: limit }) => {
                assert_eq!(len, max + 1);
                assert_eq!(limit, max);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let b = block(64);
        assert!(matches!(b.get(0), Err(CbtreeError::Invalid(_))));
        assert!(matches!(b.add(1, b"x"), Err(CbtreeError::Invalid(_))));
        assert!(matches!(b.remove(0), Err(CbtreeError::Invalid(_))));
    }
}
