// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Conversions between P4Runtime's canonical byte strings and the fixed-width
//! byte strings expected by the SDK.
//!
//! A canonical byte string is big-endian, carries no leading zero bytes, and
//! is never empty: the value zero is encoded as a single `0x00` byte.  None of
//! these routines fail.  Values that are too wide for their destination are
//! silently truncated to their least significant bytes.

/// Returns the number of bytes needed to hold `bits` bits.
pub fn num_bits_to_num_bytes(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Returns a byte string of exactly `num_bytes` bytes.  Short inputs are
/// padded with leading zeroes, and long inputs keep only their trailing
/// `num_bytes` bytes.
pub fn to_padded_byte_string(bytes: &[u8], num_bytes: usize) -> Vec<u8> {
    let padded = if bytes.len() >= num_bytes {
        bytes[bytes.len() - num_bytes..].to_vec()
    } else {
        let mut padded = vec![0u8; num_bytes - bytes.len()];
        padded.extend_from_slice(bytes);
        padded
    };
    assert_eq!(padded.len(), num_bytes);
    padded
}

/// Strips all leading zero bytes, leaving at least one byte behind.
pub fn to_canonical_byte_string(bytes: &[u8]) -> Vec<u8> {
    match bytes.iter().position(|b| *b != 0) {
        Some(first) => bytes[first..].to_vec(),
        None => vec![0],
    }
}

/// Encodes a u32 as a canonical byte string.
pub fn uint32_to_byte_stream(val: u32) -> Vec<u8> {
    to_canonical_byte_string(&val.to_be_bytes())
}

/// Encodes a u64 as a canonical byte string.
pub fn uint64_to_byte_stream(val: u64) -> Vec<u8> {
    to_canonical_byte_string(&val.to_be_bytes())
}

/// Unsigned integers that can be decoded from a big-endian byte string.
pub trait FromByteStream: Sized {
    fn from_be_slice(bytes: &[u8]) -> Self;
}

macro_rules! from_byte_stream {
    ($($t:ty),*) => {
        $(
            impl FromByteStream for $t {
                fn from_be_slice(bytes: &[u8]) -> Self {
                    const WIDTH: usize = std::mem::size_of::<$t>();
                    let mut raw = [0u8; WIDTH];
                    raw.copy_from_slice(&to_padded_byte_string(bytes, WIDTH));
                    <$t>::from_be_bytes(raw)
                }
            }
        )*
    };
}

from_byte_stream!(u8, u16, u32, u64, u128);

/// Decodes a big-endian byte string into an unsigned integer.  Bytes that do
/// not fit in `T` are discarded from the most significant end.
pub fn byte_stream_to_uint<T: FromByteStream>(bytes: &[u8]) -> T {
    T::from_be_slice(bytes)
}

/// Returns a byte string of `bits` one bits, right-aligned in the minimum
/// number of bytes.
pub fn all_ones_byte_string(bits: usize) -> Vec<u8> {
    let mut ones = vec![0xffu8; num_bits_to_num_bytes(bits)];
    let extra = bits % 8;
    if extra != 0 {
        ones[0] = (1u8 << extra) - 1;
    }
    ones
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_num_bytes() {
        assert_eq!(num_bits_to_num_bytes(0), 0);
        assert_eq!(num_bits_to_num_bytes(1), 1);
        assert_eq!(num_bits_to_num_bytes(8), 1);
        assert_eq!(num_bits_to_num_bytes(9), 2);
        assert_eq!(num_bits_to_num_bytes(32), 4);
    }

    #[test]
    fn test_padding() {
        assert_eq!(to_padded_byte_string(&[0x01], 2), vec![0x00, 0x01]);
        assert_eq!(to_padded_byte_string(&[0x01, 0x04], 2), vec![0x01, 0x04]);
        assert_eq!(
            to_padded_byte_string(&[0xaa, 0x01, 0x04], 2),
            vec![0x01, 0x04]
        );
        assert_eq!(to_padded_byte_string(&[], 3), vec![0, 0, 0]);
        assert_eq!(to_padded_byte_string(&[0x12], 0), Vec::<u8>::new());
    }

    #[test]
    fn test_padding_idempotent() {
        let inputs: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0x12, 0x34],
            vec![0, 0, 0, 5],
            vec![0xff; 9],
        ];
        for b in &inputs {
            for n in 0..12 {
                let once = to_padded_byte_string(b, n);
                assert_eq!(to_padded_byte_string(&once, n), once);
            }
        }
    }

    #[test]
    fn test_canonical() {
        assert_eq!(to_canonical_byte_string(&[0, 0, 0, 5]), vec![5]);
        assert_eq!(to_canonical_byte_string(&[0, 0]), vec![0]);
        assert_eq!(to_canonical_byte_string(&[]), vec![0]);
        assert_eq!(to_canonical_byte_string(&[1, 0]), vec![1, 0]);
    }

    #[test]
    fn test_uint_streams() {
        assert_eq!(uint32_to_byte_stream(0), vec![0]);
        assert_eq!(uint32_to_byte_stream(260), vec![0x01, 0x04]);
        assert_eq!(uint64_to_byte_stream(u64::MAX), vec![0xff; 8]);
        assert_eq!(byte_stream_to_uint::<u32>(&[0x01, 0x04]), 260);
        assert_eq!(byte_stream_to_uint::<u32>(&[0, 0, 0, 0, 5]), 5);
        // Too wide: only the low bytes survive.
        assert_eq!(byte_stream_to_uint::<u16>(&[0x01, 0x02, 0x03]), 0x0203);
        assert_eq!(byte_stream_to_uint::<u64>(&[]), 0);
    }

    #[test]
    fn test_all_ones() {
        assert_eq!(all_ones_byte_string(0), Vec::<u8>::new());
        assert_eq!(all_ones_byte_string(4), vec![0x0f]);
        assert_eq!(all_ones_byte_string(8), vec![0xff]);
        assert_eq!(all_ones_byte_string(9), vec![0x01, 0xff]);
        assert_eq!(all_ones_byte_string(32), vec![0xff; 4]);
    }
}
