#![forbid(unsafe_code)]
//! Fixed-width and varint encoders shared by the block store and the codecs.

pub mod ord {
    //! Big-endian encoders whose byte order matches numeric order.

    use crate::types::{CbtreeError, Result};

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const SIGN_BIT: u64 = 1 << 63;

    /// Writes `v` big-endian into the first eight bytes of `dst`.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        dst[..U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u64 from the first eight bytes of `src`.
    pub fn get_u64_be(src: &[u8]) -> Result<u64> {
        let head: [u8; U64_LEN] = src
            .get(..U64_LEN)
            .and_then(|head| head.try_into().ok())
            .ok_or(CbtreeError::Corruption("u64 field truncated"))?;
        Ok(u64::from_be_bytes(head))
    }

    /// Writes a big-endian u32.
    pub fn put_u32_be(dst: &mut [u8], v: u32) {
        dst[..4].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u32.
    pub fn get_u32_be(src: &[u8]) -> Result<u32> {
        let head: [u8; 4] = src
            .get(..4)
            .and_then(|head| head.try_into().ok())
            .ok_or(CbtreeError::Corruption("u32 field truncated"))?;
        Ok(u32::from_be_bytes(head))
    }

    /// Encodes a signed i64 with the sign bit flipped so negatives sort first.
    pub fn put_i64_be(dst: &mut [u8], v: i64) {
        put_u64_be(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Decodes an order-preserving i64.
    pub fn get_i64_be(src: &[u8]) -> Result<i64> {
        Ok((get_u64_be(src)? ^ SIGN_BIT) as i64)
    }
}

pub mod var {
    //! Unsigned LEB128 varints.

    use crate::types::{CbtreeError, Result};

    /// Appends `v` as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Number of bytes `encode_u64` produces for `v`.
    pub fn encoded_len(v: u64) -> usize {
        let bits = 64 - v.leading_zeros() as usize;
        bits.max(1).div_ceil(7)
    }

    /// Decodes a varint starting at `*off`, advancing the offset past it.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(CbtreeError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = u64::from(byte & 0x7f);
            if i == 9 && payload > 1 {
                return Err(CbtreeError::Corruption("varint overflows u64"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(CbtreeError::Corruption("varint longer than 10 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::{ord, var};
    use proptest::prelude::*;

    #[test]
    fn i64_sign_flip_orders_negatives_first() {
        let mut neg = [0u8; 8];
        let mut pos = [0u8; 8];
        ord::put_i64_be(&mut neg, -5);
        ord::put_i64_be(&mut pos, 3);
        assert!(neg < pos);
        assert_eq!(ord::get_i64_be(&neg).unwrap(), -5);
        assert_eq!(ord::get_i64_be(&pos).unwrap(), 3);
    }

    #[test]
    fn short_fields_are_corruption() {
        assert!(ord::get_u64_be(&[1, 2, 3]).is_err());
        assert!(ord::get_u32_be(&[1]).is_err());
    }

    #[test]
    fn varint_edges() {
        for v in [0u64, 127, 128, 16_383, 16_384, u64::MAX] {
            let mut buf = Vec::new();
            var::encode_u64(v, &mut buf);
            assert_eq!(buf.len(), var::encoded_len(v));
            let mut off = 0;
            assert_eq!(var::decode_u64(&buf, &mut off).unwrap(), v);
            assert_eq!(off, buf.len());
        }
    }

    #[test]
    fn varint_rejects_truncated_and_overlong() {
        let mut off = 0;
        assert!(var::decode_u64(&[0x80], &mut off).is_err());
        let mut off = 0;
        assert!(var::decode_u64(&[0x81; 11], &mut off).is_err());
    }

    proptest! {
        #[test]
        fn i64_encoding_preserves_order(a in any::<i64>(), b in any::<i64>()) {
            let mut ea = [0u8; 8];
            let mut eb = [0u8; 8];
            ord::put_i64_be(&mut ea, a);
            ord::put_i64_be(&mut eb, b);
            prop_assert_eq!(ea.cmp(&eb), a.cmp(&b));
        }
    }
}
