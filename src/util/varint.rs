//! Variable-length integer encoding utilities.
//!
//! LEB128-style encoding: 7 value bits per byte, high bit set on every byte
//! except the last. The `vint` postings codec builds its chunk layout on
//! these primitives.

use std::io::Write;

use crate::error::{Result, XystonError};

/// Longest possible encoding of a u32 (5 bytes) and a u64 (10 bytes).
const MAX_LEN_U32: usize = 5;
const MAX_LEN_U64: usize = 10;

/// Number of bytes the encoding of `value` occupies.
fn encoded_len(value: u64) -> usize {
    let payload_bits = 64 - value.leading_zeros() as usize;
    payload_bits.div_ceil(7).max(1)
}

/// Encode `value` into the front of `buf`, returning the bytes used.
/// `buf` must hold at least `encoded_len(value)` bytes.
fn fill(buf: &mut [u8], value: u64) -> usize {
    let used = encoded_len(value);

    for (shift, slot) in buf[..used].iter_mut().enumerate() {
        *slot = 0x80 | ((value >> (7 * shift)) & 0x7F) as u8;
    }
    buf[used - 1] &= 0x7F;

    used
}

/// Decode one varint from the front of `bytes`, accepting at most `max_len`
/// bytes. Returns the value and the bytes consumed.
fn take(bytes: &[u8], max_len: usize) -> Result<(u64, usize)> {
    let mut value = 0u64;

    for (i, &byte) in bytes.iter().enumerate() {
        if i == max_len {
            return Err(XystonError::codec("varint too long for target width"));
        }

        value |= u64::from(byte & 0x7F) << (7 * i);

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(XystonError::codec("varint ended mid-sequence"))
}

/// Encode a u32 value using variable-length encoding.
pub fn encode_u32(value: u32) -> Vec<u8> {
    let mut buf = [0u8; MAX_LEN_U32];
    let used = fill(&mut buf, u64::from(value));
    buf[..used].to_vec()
}

/// Decode a u32 value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed. Fails on a truncated
/// sequence and on encodings that do not fit a u32.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, used) = take(bytes, MAX_LEN_U32)?;
    let value =
        u32::try_from(value).map_err(|_| XystonError::codec("varint overflows u32"))?;

    Ok((value, used))
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut buf = [0u8; MAX_LEN_U64];
    let used = fill(&mut buf, value);
    buf[..used].to_vec()
}

/// Decode a u64 value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    take(bytes, MAX_LEN_U64)
}

/// Write a variable-length encoded u32 to a writer.
///
/// Returns the number of bytes written.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<usize> {
    let mut buf = [0u8; MAX_LEN_U32];
    let used = fill(&mut buf, u64::from(value));
    writer.write_all(&buf[..used])?;

    Ok(used)
}

/// Write a variable-length encoded u64 to a writer.
///
/// Returns the number of bytes written.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let mut buf = [0u8; MAX_LEN_U64];
    let used = fill(&mut buf, value);
    writer.write_all(&buf[..used])?;

    Ok(used)
}
