//! Key and value codecs, and the two record shapes built from them.
//!
//! Leaf record: `varint(key_len) ++ key ++ value`.
//! Separator record: `child_tag (u64 BE) ++ key`.

use crate::primitives::bytes::{ord, var};
use crate::types::{CbtreeError, NodeTag, Result};

/// Trait implemented by key types stored in the tree.
pub trait KeyCodec: Sized {
    /// Encode `key` into `out`.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Decode a key from its encoded representation.
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Trait implemented by value types stored in the tree.
pub trait ValCodec: Sized {
    /// Encode `value` into `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Decode a value from `src`.
    fn decode_val(src: &[u8]) -> Result<Self>;
}

fn fixed8(bytes: &[u8], what: &'static str) -> Result<[u8; 8]> {
    bytes.try_into().map_err(|_| CbtreeError::Corruption(what))
}

impl KeyCodec for u64 {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(u64::from_be_bytes(fixed8(bytes, "u64 key length mismatch")?))
    }
}

impl ValCodec for u64 {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(u64::from_be_bytes(fixed8(src, "u64 value length mismatch")?))
    }
}

impl KeyCodec for i64 {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 8];
        ord::put_i64_be(&mut buf, *key);
        out.extend_from_slice(&buf);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 8 {
            return Err(CbtreeError::Corruption("i64 key length mismatch"));
        }
        ord::get_i64_be(bytes)
    }
}

impl ValCodec for i64 {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(i64::from_be_bytes(fixed8(src, "i64 value length mismatch")?))
    }
}

impl KeyCodec for String {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key.as_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CbtreeError::Corruption("string key not UTF-8"))
    }
}

impl ValCodec for String {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value.as_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        String::from_utf8(src.to_vec()).map_err(|_| CbtreeError::Corruption("string value not UTF-8"))
    }
}

impl KeyCodec for Vec<u8> {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl ValCodec for Vec<u8> {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(src.to_vec())
    }
}

pub(crate) fn encode_leaf_record<K: KeyCodec, V: ValCodec>(key: &K, value: &V) -> Vec<u8> {
    let mut encoded_key = Vec::new();
    K::encode_key(key, &mut encoded_key);
    let mut out = Vec::with_capacity(encoded_key.len() + 10);
    var::encode_u64(encoded_key.len() as u64, &mut out);
    out.extend_from_slice(&encoded_key);
    V::encode_val(value, &mut out);
    out
}

fn split_leaf_record(record: &[u8]) -> Result<(&[u8], &[u8])> {
    let mut off = 0;
    let key_len = var::decode_u64(record, &mut off)? as usize;
    let key_end = off
        .checked_add(key_len)
        .filter(|end| *end <= record.len())
        .ok_or(CbtreeError::Corruption("leaf record key truncated"))?;
    Ok((&record[off..key_end], &record[key_end..]))
}

pub(crate) fn decode_leaf_key<K: KeyCodec>(record: &[u8]) -> Result<K> {
    K::decode_key(split_leaf_record(record)?.0)
}

pub(crate) fn decode_leaf_value<V: ValCodec>(record: &[u8]) -> Result<V> {
    V::decode_val(split_leaf_record(record)?.1)
}

pub(crate) fn decode_leaf_pair<K: KeyCodec, V: ValCodec>(record: &[u8]) -> Result<(K, V)> {
    let (key, value) = split_leaf_record(record)?;
    Ok((K::decode_key(key)?, V::decode_val(value)?))
}

pub(crate) fn encode_separator<K: KeyCodec>(key: &K, child: NodeTag) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&child.raw().to_be_bytes());
    K::encode_key(key, &mut out);
    out
}

/// Encoded length of a separator for `key`, whatever its child.
pub(crate) fn separator_len<K: KeyCodec>(key: &K) -> usize {
    encode_separator(key, NodeTag::MAX).len()
}

pub(crate) fn decode_separator_child(record: &[u8]) -> Result<NodeTag> {
    let raw = ord::get_u64_be(record)?;
    NodeTag::from_raw(raw).ok_or(CbtreeError::Corruption("separator with empty child tag"))
}

pub(crate) fn decode_separator_key<K: KeyCodec>(record: &[u8]) -> Result<K> {
    let key = record
        .get(8..)
        .ok_or(CbtreeError::Corruption("separator record truncated"))?;
    K::decode_key(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockNo, NodeKind};

    #[test]
    fn leaf_record_splits_key_and_value() {
        let record = encode_leaf_record(&"alpha".to_string(), &42u64);
        assert_eq!(decode_leaf_key::<String>(&record).unwrap(), "alpha");
        assert_eq!(decode_leaf_value::<u64>(&record).unwrap(), 42);
        let (k, v): (String, u64) = decode_leaf_pair(&record).unwrap();
        assert_eq!((k.as_str(), v), ("alpha", 42));
    }

    #[test]
    fn empty_value_and_empty_key_are_legal() {
        let record = encode_leaf_record(&Vec::<u8>::new(), &Vec::<u8>::new());
        assert_eq!(record, vec![0]);
        let (k, v): (Vec<u8>, Vec<u8>) = decode_leaf_pair(&record).unwrap();
        assert!(k.is_empty() && v.is_empty());
    }

    #[test]
    fn separator_carries_child_tag() {
        let child = NodeTag::new(BlockNo(9), NodeKind::Branch);
        let record = encode_separator(&-3i64, child);
        assert_eq!(decode_separator_child(&record).unwrap(), child);
        assert_eq!(decode_separator_key::<i64>(&record).unwrap(), -3);
        assert_eq!(separator_len(&-3i64), record.len());
    }

    #[test]
    fn truncated_records_are_corruption() {
        assert!(matches!(
            decode_leaf_key::<u64>(&[5, 1, 2]),
            Err(CbtreeError::Corruption(_))
        ));
        assert!(decode_separator_child(&[0u8; 4]).is_err());
        assert!(decode_separator_child(&[0u8; 8]).is_err());
    }
}
