//! Binary protocol layouts for temporal values, and the row NULL bitmap.
use crate::value::{Date, DateTime, Time};
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

// ============================================================================
// Temporal Types
// ============================================================================

/// TIMESTAMP - 4 bytes (DATE/DATETIME/TIMESTAMP with date only)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp4 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
}

impl Timestamp4 {
    pub fn date(&self) -> Date {
        Date {
            year: self.year.get(),
            month: self.month,
            day: self.day,
        }
    }
}

/// TIMESTAMP - 7 bytes (DATE/DATETIME/TIMESTAMP without microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp7 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp7 {
    pub fn datetime(&self) -> DateTime {
        DateTime {
            date: Date {
                year: self.year.get(),
                month: self.month,
                day: self.day,
            },
            hour: self.hour,
            minute: self.minute,
            second: self.second,
            microsecond: 0,
        }
    }
}

/// TIMESTAMP - 11 bytes (DATE/DATETIME/TIMESTAMP with microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp11 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

impl Timestamp11 {
    pub fn datetime(&self) -> DateTime {
        DateTime {
            date: Date {
                year: self.year.get(),
                month: self.month,
                day: self.day,
            },
            hour: self.hour,
            minute: self.minute,
            second: self.second,
            microsecond: self.microsecond.get(),
        }
    }
}

/// TIME - 8 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time8 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Time8 {
    pub fn time(&self) -> Time {
        Time {
            negative: self.is_negative != 0,
            days: self.days.get(),
            hour: self.hour,
            minute: self.minute,
            second: self.second,
            microsecond: 0,
        }
    }
}

/// TIME - 12 bytes: negative (1), days (4 LE), hour (1), minute (1), second (1), microsecond (4 LE)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time12 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

impl Time12 {
    pub fn time(&self) -> Time {
        Time {
            negative: self.is_negative != 0,
            days: self.days.get(),
            hour: self.hour,
            minute: self.minute,
            second: self.second,
            microsecond: self.microsecond.get(),
        }
    }
}

// ============================================================================
// NULL Bitmap
// ============================================================================

/// Bytes of the NULL bitmap of a binary row: `(column_count + 7 + 2) / 8`
#[inline]
pub fn null_bitmap_len(column_count: usize) -> usize {
    (column_count + 9) >> 3
}

/// NULL bitmap for binary protocol rows
///
/// Each bit marks a NULL column (1 = NULL). Result set rows reserve the first two bits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NullBitmap {
    bitmap: Vec<u8>,
}

impl NullBitmap {
    const OFFSET: usize = 2;

    pub fn for_result_set(bitmap: &[u8]) -> Self {
        Self {
            bitmap: bitmap.to_vec(),
        }
    }

    pub fn is_null(&self, idx: usize) -> bool {
        let bit_pos = idx + Self::OFFSET;
        let byte_pos = bit_pos >> 3;
        let bit_offset = bit_pos & 7;

        match self.bitmap.get(byte_pos) {
            Some(byte) => (byte & (1 << bit_offset)) != 0,
            None => false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bitmap
    }
}
