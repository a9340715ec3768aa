//! Column value decoding for text and binary rows.
//!
//! Every decoder reports how many bytes it consumed, or [`Decoded::NeedMore`] without consuming
//! anything when the value is not fully buffered.

use zerocopy::FromBytes;

use crate::collation::{Charset, CustomCollations, charset_of};
use crate::constant::ColumnType;
use crate::error::{Error, Result, eyre};
use crate::protocol::command::column_definition::ColumnDefinition;
use crate::protocol::primitive::*;
use crate::protocol::value::{Time8, Time12, Timestamp4, Timestamp7, Timestamp11};
use crate::value::{Date, DateTime, Time, Value, ZeroDateBehavior};

/// Row encoding of a result set, chosen once when its metadata is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowProtocol {
    /// `COM_QUERY`: every value is a length-encoded string
    Text,
    /// `COM_STMT_EXECUTE`: NULL bitmap, then typed fixed or length-encoded values
    Binary,
}

/// Settings a column decode depends on.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext<'a> {
    pub zero_date: ZeroDateBehavior,
    /// Length-encoded values longer than this are not decoded in memory
    pub big_column_threshold: usize,
    pub collations: &'a CustomCollations,
}

#[derive(Debug, PartialEq)]
pub enum Decoded {
    Value { value: Value, consumed: usize },
    /// Not enough bytes; nothing consumed
    NeedMore,
    /// The value must be spooled: skip `prefix_len` bytes, then stream `len` bytes
    BigColumn { prefix_len: usize, len: u64 },
}

enum Lenenc<'a> {
    Null,
    Bytes { bytes: &'a [u8], consumed: usize },
    Incomplete,
    Big { prefix_len: usize, len: u64 },
}

fn lenenc_bytes<'a>(data: &'a [u8], ctx: &CodecContext<'_>) -> Result<Lenenc<'a>> {
    match lenenc_prefix(data) {
        LenencPrefix::Null => Ok(Lenenc::Null),
        LenencPrefix::Incomplete => Ok(Lenenc::Incomplete),
        LenencPrefix::Length { len, prefix_len } => {
            if len > ctx.big_column_threshold as u64 {
                return Ok(Lenenc::Big { prefix_len, len });
            }
            let len = usize::try_from(len).map_err(|_| Error::InvalidPacket)?;
            let consumed = prefix_len + len;
            Ok(match data.get(prefix_len..consumed) {
                Some(bytes) => Lenenc::Bytes { bytes, consumed },
                None => Lenenc::Incomplete,
            })
        }
    }
}

impl RowProtocol {
    /// Decode one column from the start of `data`.
    ///
    /// Binary NULLs come from the row's bitmap and are never passed here.
    pub fn decode_column(
        self,
        data: &[u8],
        column: &ColumnDefinition,
        ctx: &CodecContext<'_>,
    ) -> Result<Decoded> {
        match self {
            RowProtocol::Text => decode_text(data, column, ctx),
            RowProtocol::Binary => decode_binary(data, column, ctx),
        }
    }
}

fn decode_text(data: &[u8], column: &ColumnDefinition, ctx: &CodecContext<'_>) -> Result<Decoded> {
    match lenenc_bytes(data, ctx)? {
        Lenenc::Null => Ok(Decoded::Value {
            value: Value::Null,
            consumed: 1,
        }),
        Lenenc::Incomplete => Ok(Decoded::NeedMore),
        Lenenc::Big { prefix_len, len } => Ok(Decoded::BigColumn { prefix_len, len }),
        Lenenc::Bytes { bytes, consumed } => Ok(Decoded::Value {
            value: text_value(bytes, column, ctx)?,
            consumed,
        }),
    }
}

fn text_value(bytes: &[u8], column: &ColumnDefinition, ctx: &CodecContext<'_>) -> Result<Value> {
    match column.column_type {
        ColumnType::MYSQL_TYPE_NULL => Ok(Value::Null),

        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG => {
            let text = ascii(bytes, column)?;
            let parsed = if column.is_unsigned() {
                text.parse().map(Value::UnsignedInt)
            } else {
                text.parse().map(Value::SignedInt)
            };
            parsed.map_err(|_| malformed(column, text))
        }

        ColumnType::MYSQL_TYPE_YEAR => {
            let text = ascii(bytes, column)?;
            text.parse()
                .map(Value::UnsignedInt)
                .map_err(|_| malformed(column, text))
        }

        ColumnType::MYSQL_TYPE_FLOAT => {
            let text = ascii(bytes, column)?;
            text.parse()
                .map(Value::Float)
                .map_err(|_| malformed(column, text))
        }

        ColumnType::MYSQL_TYPE_DOUBLE => {
            let text = ascii(bytes, column)?;
            text.parse()
                .map(Value::Double)
                .map_err(|_| malformed(column, text))
        }

        ColumnType::MYSQL_TYPE_DATE
        | ColumnType::MYSQL_TYPE_NEWDATE
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            let text = ascii(bytes, column)?;
            let datetime = parse_datetime(text).ok_or_else(|| malformed(column, text))?;
            temporal_value(datetime, column, ctx)
        }

        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            let text = ascii(bytes, column)?;
            parse_time(text)
                .map(Value::Time)
                .ok_or_else(|| malformed(column, text))
        }

        _ => bytes_value(bytes, column, ctx),
    }
}

fn decode_binary(
    data: &[u8],
    column: &ColumnDefinition,
    ctx: &CodecContext<'_>,
) -> Result<Decoded> {
    let unsigned = column.is_unsigned();
    let fixed = |width: usize| data.get(..width);

    let (value, consumed) = match column.column_type {
        ColumnType::MYSQL_TYPE_NULL => (Value::Null, 0),

        ColumnType::MYSQL_TYPE_TINY => {
            let Some(bytes) = fixed(1) else {
                return Ok(Decoded::NeedMore);
            };
            let (val, _) = read_int_1(bytes)?;
            let value = if unsigned {
                Value::UnsignedInt(u64::from(val))
            } else {
                Value::SignedInt(i64::from(val as i8))
            };
            (value, 1)
        }

        ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
            let Some(bytes) = fixed(2) else {
                return Ok(Decoded::NeedMore);
            };
            let (val, _) = read_int_2(bytes)?;
            let value = if unsigned || column.column_type == ColumnType::MYSQL_TYPE_YEAR {
                Value::UnsignedInt(u64::from(val))
            } else {
                Value::SignedInt(i64::from(val as i16))
            };
            (value, 2)
        }

        ColumnType::MYSQL_TYPE_INT24 | ColumnType::MYSQL_TYPE_LONG => {
            let Some(bytes) = fixed(4) else {
                return Ok(Decoded::NeedMore);
            };
            let (val, _) = read_int_4(bytes)?;
            let value = if unsigned {
                Value::UnsignedInt(u64::from(val))
            } else {
                Value::SignedInt(i64::from(val as i32))
            };
            (value, 4)
        }

        ColumnType::MYSQL_TYPE_LONGLONG => {
            let Some(bytes) = fixed(8) else {
                return Ok(Decoded::NeedMore);
            };
            let (val, _) = read_int_8(bytes)?;
            let value = if unsigned {
                Value::UnsignedInt(val)
            } else {
                Value::SignedInt(val as i64)
            };
            (value, 8)
        }

        ColumnType::MYSQL_TYPE_FLOAT => {
            let Some(bytes) = fixed(4) else {
                return Ok(Decoded::NeedMore);
            };
            let (val, _) = read_int_4(bytes)?;
            (Value::Float(f32::from_bits(val)), 4)
        }

        ColumnType::MYSQL_TYPE_DOUBLE => {
            let Some(bytes) = fixed(8) else {
                return Ok(Decoded::NeedMore);
            };
            let (val, _) = read_int_8(bytes)?;
            (Value::Double(f64::from_bits(val)), 8)
        }

        // Temporal types carry their own length byte
        ColumnType::MYSQL_TYPE_DATE
        | ColumnType::MYSQL_TYPE_NEWDATE
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            let Some((len, body)) = length_prefixed(data) else {
                return Ok(Decoded::NeedMore);
            };
            let datetime = match len {
                0 => DateTime::default(),
                4 => DateTime {
                    date: Timestamp4::ref_from_bytes(body)
                        .map_err(|_| Error::InvalidPacket)?
                        .date(),
                    ..DateTime::default()
                },
                7 => Timestamp7::ref_from_bytes(body)
                    .map_err(|_| Error::InvalidPacket)?
                    .datetime(),
                11 => Timestamp11::ref_from_bytes(body)
                    .map_err(|_| Error::InvalidPacket)?
                    .datetime(),
                _ => {
                    return Err(Error::LibraryBug(eyre!(
                        "invalid timestamp length: {}",
                        len
                    )));
                }
            };
            (temporal_value(datetime, column, ctx)?, 1 + body.len())
        }

        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            let Some((len, body)) = length_prefixed(data) else {
                return Ok(Decoded::NeedMore);
            };
            let time = match len {
                0 => Time::default(),
                8 => Time8::ref_from_bytes(body)
                    .map_err(|_| Error::InvalidPacket)?
                    .time(),
                12 => Time12::ref_from_bytes(body)
                    .map_err(|_| Error::InvalidPacket)?
                    .time(),
                _ => return Err(Error::LibraryBug(eyre!("invalid time length: {}", len))),
            };
            (Value::Time(time), 1 + body.len())
        }

        // Everything else is a length-encoded byte string
        _ => match lenenc_bytes(data, ctx)? {
            Lenenc::Null => return Err(Error::InvalidPacket),
            Lenenc::Incomplete => return Ok(Decoded::NeedMore),
            Lenenc::Big { prefix_len, len } => {
                return Ok(Decoded::BigColumn { prefix_len, len });
            }
            Lenenc::Bytes { bytes, consumed } => (bytes_value(bytes, column, ctx)?, consumed),
        },
    };

    Ok(Decoded::Value { value, consumed })
}

/// A 1-byte length followed by that many bytes
fn length_prefixed(data: &[u8]) -> Option<(u8, &[u8])> {
    let (&len, rest) = data.split_first()?;
    Some((len, rest.get(..usize::from(len))?))
}

/// String-like columns, shared by both row encodings.
fn bytes_value(bytes: &[u8], column: &ColumnDefinition, ctx: &CodecContext<'_>) -> Result<Value> {
    match column.column_type {
        // JSON columns report the binary collation but always hold utf8mb4
        ColumnType::MYSQL_TYPE_JSON => Ok(Value::Json(utf8_lossy(bytes))),

        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            Ok(Value::Decimal(ascii(bytes, column)?.to_owned()))
        }

        ColumnType::MYSQL_TYPE_SET => {
            let text = decode_charset(bytes, charset_of(column.charset, ctx.collations));
            let items = if text.is_empty() {
                Vec::new()
            } else {
                text.split(',').map(ToString::to_string).collect()
            };
            Ok(Value::Set(items))
        }

        ColumnType::MYSQL_TYPE_BIT => {
            if bytes.len() > 8 {
                return Err(Error::LibraryBug(eyre!(
                    "BIT value of {} bytes in column `{}`",
                    bytes.len(),
                    column.name
                )));
            }
            Ok(Value::Bit(
                bytes
                    .iter()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            ))
        }

        ColumnType::MYSQL_TYPE_GEOMETRY => {
            let (srid, wkb) = read_int_4(bytes).map_err(|_| malformed(column, "geometry"))?;
            Ok(Value::Geometry {
                srid,
                wkb: wkb.to_vec(),
            })
        }

        _ => match charset_of(column.charset, ctx.collations) {
            Charset::Binary => Ok(Value::Bytes(bytes.to_vec())),
            Charset::Other => Ok(match simdutf8::basic::from_utf8(bytes) {
                Ok(text) => Value::Text(text.to_owned()),
                Err(_) => Value::Bytes(bytes.to_vec()),
            }),
            charset => Ok(Value::Text(decode_charset(bytes, charset))),
        },
    }
}

fn decode_charset(bytes: &[u8], charset: Charset) -> String {
    match charset {
        Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        _ => utf8_lossy(bytes),
    }
}

fn utf8_lossy(bytes: &[u8]) -> String {
    match simdutf8::basic::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn ascii<'a>(bytes: &'a [u8], column: &ColumnDefinition) -> Result<&'a str> {
    simdutf8::basic::from_utf8(bytes).map_err(|_| {
        Error::LibraryBug(eyre!(
            "non-text value in {:?} column `{}`",
            column.column_type,
            column.name
        ))
    })
}

fn malformed(column: &ColumnDefinition, text: &str) -> Error {
    Error::LibraryBug(eyre!(
        "invalid {:?} value {:?} in column `{}`",
        column.column_type,
        text,
        column.name
    ))
}

fn temporal_value(datetime: DateTime, column: &ColumnDefinition, ctx: &CodecContext<'_>) -> Result<Value> {
    let is_date = matches!(
        column.column_type,
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE
    );

    if datetime.date.is_zero() {
        return match ctx.zero_date {
            ZeroDateBehavior::Exception => Err(Error::ZeroDateTime(column.name.clone())),
            ZeroDateBehavior::ConvertToNull => Ok(Value::Null),
            ZeroDateBehavior::Round if is_date => Ok(Value::Date(Date::ROUNDED)),
            ZeroDateBehavior::Round => Ok(Value::DateTime(DateTime::ROUNDED)),
        };
    }

    Ok(if is_date {
        Value::Date(datetime.date)
    } else {
        Value::DateTime(datetime)
    })
}

/// `YYYY-MM-DD[ hh:mm:ss[.ffffff]]`
fn parse_datetime(text: &str) -> Option<DateTime> {
    let (date_part, time_part) = match text.split_once(' ') {
        Some((date, time)) => (date, Some(time)),
        None => (text, None),
    };

    let mut fields = date_part.splitn(3, '-');
    let date = Date {
        year: fields.next()?.parse().ok()?,
        month: fields.next()?.parse().ok()?,
        day: fields.next()?.parse().ok()?,
    };

    let mut datetime = DateTime {
        date,
        ..DateTime::default()
    };
    if let Some(time) = time_part {
        let (hours, minute, second, microsecond) = parse_clock(time)?;
        datetime.hour = u8::try_from(hours).ok().filter(|h| *h < 24)?;
        datetime.minute = minute;
        datetime.second = second;
        datetime.microsecond = microsecond;
    }
    Some(datetime)
}

/// `[-]h+:mm:ss[.ffffff]`
fn parse_time(text: &str) -> Option<Time> {
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (hours, minute, second, microsecond) = parse_clock(text)?;
    Some(Time {
        negative,
        days: u32::try_from(hours / 24).ok()?,
        hour: (hours % 24) as u8,
        minute,
        second,
        microsecond,
    })
}

fn parse_clock(text: &str) -> Option<(u64, u8, u8, u32)> {
    let (clock, fraction) = match text.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (text, None),
    };
    let mut fields = clock.splitn(3, ':');
    let hours = fields.next()?.parse().ok()?;
    let minute = fields.next()?.parse().ok().filter(|m| *m < 60)?;
    let second = fields.next()?.parse().ok().filter(|s| *s < 60)?;
    let microsecond = match fraction {
        None => 0,
        Some(fraction) => parse_fraction(fraction)?,
    };
    Some((hours, minute, second, microsecond))
}

fn parse_fraction(fraction: &str) -> Option<u32> {
    if fraction.is_empty() || fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = fraction.parse().ok()?;
    Some(value * 10u32.pow(6 - fraction.len() as u32))
}
