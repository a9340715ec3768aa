//! Decoded column values.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::spool::SpooledValue;

/// A decoded column value.
///
/// Rows hand these out by value; a [`Value::Spooled`] owns its temp file.
#[derive(Debug, PartialEq)]
pub enum Value {
    Null,
    /// TINYINT, SMALLINT, MEDIUMINT, INT, BIGINT
    SignedInt(i64),
    /// The same types with the UNSIGNED flag, and YEAR
    UnsignedInt(u64),
    Float(f32),
    Double(f64),
    /// DECIMAL / NEWDECIMAL in their exact textual form
    Decimal(String),
    /// Character data decoded with the column's charset
    Text(String),
    /// Binary-collation strings and blobs
    Bytes(Vec<u8>),
    Json(String),
    Set(Vec<String>),
    Bit(u64),
    Geometry { srid: u32, wkb: Vec<u8> },
    Date(Date),
    DateTime(DateTime),
    Time(Time),
    /// A value too large to hold in memory, kept in a temp file
    Spooled(SpooledValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_spooled(&self) -> Option<&SpooledValue> {
        match self {
            Value::Spooled(spooled) => Some(spooled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    /// Substitute for `0000-00-00` under [`ZeroDateBehavior::Round`]
    pub const ROUNDED: Date = Date {
        year: 1,
        month: 1,
        day: 1,
    };

    pub fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateTime {
    pub date: Date,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl DateTime {
    /// Substitute for `0000-00-00 00:00:00` under [`ZeroDateBehavior::Round`]
    pub const ROUNDED: DateTime = DateTime {
        date: Date::ROUNDED,
        hour: 0,
        minute: 0,
        second: 0,
        microsecond: 0,
    };
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}",
            self.date, self.hour, self.minute, self.second
        )?;
        if self.microsecond != 0 {
            write!(f, ".{:06}", self.microsecond)?;
        }
        Ok(())
    }
}

/// TIME value; MySQL allows -838:59:59 to 838:59:59, so hours spill into `days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Time {
    pub negative: bool,
    pub days: u32,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl Time {
    pub fn total_hours(&self) -> u64 {
        u64::from(self.days) * 24 + u64::from(self.hour)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.total_hours(),
            self.minute,
            self.second
        )?;
        if self.microsecond != 0 {
            write!(f, ".{:06}", self.microsecond)?;
        }
        Ok(())
    }
}

/// What to produce for a `0000-00-00` DATE / DATETIME / TIMESTAMP value.
///
/// There is no default: every [`crate::Opts`] names one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroDateBehavior {
    /// Fail the decode with [`Error::ZeroDateTime`]
    Exception,
    /// Substitute `0001-01-01` (and midnight for DATETIME / TIMESTAMP)
    Round,
    /// Produce [`Value::Null`]
    ConvertToNull,
}

impl FromStr for ZeroDateBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exception" => Ok(Self::Exception),
            "round" => Ok(Self::Round),
            "convertToNull" => Ok(Self::ConvertToNull),
            other => Err(Error::BadConfigError(format!(
                "zeroDateTimeBehavior must be one of exception, round, convertToNull; got `{other}`"
            ))),
        }
    }
}

/// Conversion from a decoded [`Value`] into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    Err(Error::BadUsageError(format!(
        "cannot convert {value:?} into {target}"
    )))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::SignedInt(v) => Ok(*v),
            Value::UnsignedInt(v) => i64::try_from(*v).map_err(|_| {
                Error::BadUsageError(format!("{v} does not fit in i64"))
            }),
            Value::Bit(v) => i64::try_from(*v).map_err(|_| {
                Error::BadUsageError(format!("{v} does not fit in i64"))
            }),
            _ => mismatch(value, "i64"),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::UnsignedInt(v) | Value::Bit(v) => Ok(*v),
            Value::SignedInt(v) => u64::try_from(*v).map_err(|_| {
                Error::BadUsageError(format!("{v} does not fit in u64"))
            }),
            _ => mismatch(value, "u64"),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Double(v) => Ok(*v),
            Value::Float(v) => Ok(f64::from(*v)),
            Value::Decimal(v) => v
                .parse()
                .map_err(|_| Error::BadUsageError(format!("`{v}` is not a number"))),
            _ => mismatch(value, "f64"),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::SignedInt(v) => Ok(*v != 0),
            Value::UnsignedInt(v) | Value::Bit(v) => Ok(*v != 0),
            _ => mismatch(value, "bool"),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Json(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|e| Error::BadUsageError(format!("column is not UTF-8: {e}"))),
            Value::Set(items) => Ok(items.join(",")),
            Value::SignedInt(v) => Ok(v.to_string()),
            Value::UnsignedInt(v) => Ok(v.to_string()),
            Value::Date(v) => Ok(v.to_string()),
            Value::DateTime(v) => Ok(v.to_string()),
            Value::Time(v) => Ok(v.to_string()),
            _ => mismatch(value, "String"),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) | Value::Json(s) | Value::Decimal(s) => Ok(s.as_bytes().to_vec()),
            Value::Geometry { wkb, .. } => Ok(wkb.clone()),
            Value::Spooled(spooled) => spooled.read_all(),
            _ => mismatch(value, "Vec<u8>"),
        }
    }
}

impl FromValue for Date {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(v) => Ok(*v),
            Value::DateTime(v) => Ok(v.date),
            _ => mismatch(value, "Date"),
        }
    }
}

impl FromValue for DateTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::DateTime(v) => Ok(*v),
            Value::Date(date) => Ok(DateTime {
                date: *date,
                ..DateTime::default()
            }),
            _ => mismatch(value, "DateTime"),
        }
    }
}

impl FromValue for Time {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Time(v) => Ok(*v),
            _ => mismatch(value, "Time"),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(feature = "with-chrono")]
mod chrono_impls {
    use super::*;
    use crate::error::eyre;

    impl TryFrom<Date> for chrono::NaiveDate {
        type Error = Error;

        fn try_from(date: Date) -> Result<Self> {
            chrono::NaiveDate::from_ymd_opt(
                i32::from(date.year),
                u32::from(date.month),
                u32::from(date.day),
            )
            .ok_or_else(|| Error::BadUsageError(format!("invalid date {date}")))
        }
    }

    impl TryFrom<DateTime> for chrono::NaiveDateTime {
        type Error = Error;

        fn try_from(value: DateTime) -> Result<Self> {
            let date = chrono::NaiveDate::try_from(value.date)?;
            date.and_hms_micro_opt(
                u32::from(value.hour),
                u32::from(value.minute),
                u32::from(value.second),
                value.microsecond,
            )
            .ok_or_else(|| Error::BadUsageError(format!("invalid datetime {value}")))
        }
    }

    impl TryFrom<Time> for chrono::Duration {
        type Error = Error;

        fn try_from(time: Time) -> Result<Self> {
            let seconds = time.total_hours() * 3600
                + u64::from(time.minute) * 60
                + u64::from(time.second);
            let seconds = i64::try_from(seconds).map_err(|_| Error::LibraryBug(eyre!("time overflow")))?;
            let duration = chrono::Duration::seconds(seconds)
                + chrono::Duration::microseconds(i64::from(time.microsecond));
            Ok(if time.negative { -duration } else { duration })
        }
    }

    impl FromValue for chrono::NaiveDate {
        fn from_value(value: &Value) -> Result<Self> {
            Date::from_value(value)?.try_into()
        }
    }

    impl FromValue for chrono::NaiveDateTime {
        fn from_value(value: &Value) -> Result<Self> {
            DateTime::from_value(value)?.try_into()
        }
    }

    impl FromValue for chrono::Duration {
        fn from_value(value: &Value) -> Result<Self> {
            Time::from_value(value)?.try_into()
        }
    }
}
