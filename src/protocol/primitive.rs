//! Wire primitives: fixed-width little-endian integers and length-encoded values.
//!
//! Readers return the value and the rest of the input. A short input yields
//! [`Error::UnexpectedEof`]; resumable callers probe with [`lenenc_prefix`] first.

use crate::error::{Error, Result};

/// First byte of a length-encoded value meaning SQL NULL (row context only).
pub const LENENC_NULL: u8 = 0xFB;

#[inline]
fn split(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::UnexpectedEof);
    }
    Ok(data.split_at(len))
}

pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    let (head, rest) = split(data, 1)?;
    Ok((head[0], rest))
}

pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    let (head, rest) = split(data, 2)?;
    Ok((u16::from_le_bytes([head[0], head[1]]), rest))
}

pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    let (head, rest) = split(data, 3)?;
    Ok((u32::from_le_bytes([head[0], head[1], head[2], 0]), rest))
}

pub fn read_int_4(data: &[u8]) -> Result<(u32, &[u8])> {
    let (head, rest) = split(data, 4)?;
    Ok((u32::from_le_bytes([head[0], head[1], head[2], head[3]]), rest))
}

pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    let (head, rest) = split(data, 8)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(head);
    Ok((u64::from_le_bytes(bytes), rest))
}

/// Total encoded size of a length-encoded integer, given its first byte.
///
/// `0xFB` (NULL) and `0xFF` (ERR marker) occupy a single byte.
#[inline]
pub fn lenenc_int_len(first: u8) -> usize {
    match first {
        0xFC => 3,
        0xFD => 4,
        0xFE => 9,
        _ => 1,
    }
}

/// Length prefix of a row value, decoded without consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenencPrefix {
    /// `0xFB`: SQL NULL
    Null,
    /// Declared length and the number of prefix bytes
    Length { len: u64, prefix_len: usize },
    /// The prefix itself is not fully available
    Incomplete,
}

pub fn lenenc_prefix(data: &[u8]) -> LenencPrefix {
    let Some(&first) = data.first() else {
        return LenencPrefix::Incomplete;
    };
    if first == LENENC_NULL {
        return LenencPrefix::Null;
    }
    let prefix_len = lenenc_int_len(first);
    if data.len() < prefix_len {
        return LenencPrefix::Incomplete;
    }
    match read_int_lenenc(data) {
        Ok((len, _)) => LenencPrefix::Length { len, prefix_len },
        Err(_) => LenencPrefix::Incomplete,
    }
}

pub fn read_int_lenenc(data: &[u8]) -> Result<(u64, &[u8])> {
    let (first, rest) = read_int_1(data)?;
    match first {
        0xFC => read_int_2(rest).map(|(v, rest)| (u64::from(v), rest)),
        0xFD => read_int_3(rest).map(|(v, rest)| (u64::from(v), rest)),
        0xFE => read_int_8(rest),
        v => Ok((u64::from(v), rest)),
    }
}

pub fn read_string_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    split(data, len)
}

pub fn read_string_lenenc(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_int_lenenc(data)?;
    let len = usize::try_from(len).map_err(|_| Error::InvalidPacket)?;
    read_string_fix(rest, len)
}

pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn write_int_2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_3(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 0xFB {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xFC);
        write_int_2(out, value as u16);
    } else if value < (1 << 24) {
        out.push(0xFD);
        write_int_3(out, value as u32);
    } else {
        out.push(0xFE);
        write_int_8(out, value);
    }
}

pub fn write_bytes_lenenc(out: &mut Vec<u8>, data: &[u8]) {
    write_int_lenenc(out, data.len() as u64);
    out.extend_from_slice(data);
}
