//! Tagged value codec.
//!
//! Every value is written as one leading tag byte followed by zero or more
//! payload bytes. Small values fold their payload into the tag byte itself
//! (*embedded* form), everything else uses a fixed tag followed by varint
//! length or value and the payload (*full* form).
//!
//! ```text
//! | tag range   | entry                     | embedded value        |
//! |-------------|---------------------------|-----------------------|
//! | 0x00..=0x3f | INT                       | 0..=63                |
//! | 0x40..=0x7f | CHARACTER                 | length 1..=64         |
//! | 0x80..=0x9f | ROW                       | element count 1..=32  |
//! | 0xa0..=0xbf | ARRAY                     | element count 1..=32  |
//! | 0xc0..=0xcf | INT                       | -16..=-1              |
//! | 0xd0..=0xdf | OCTET                     | length 1..=16         |
//! | 0xe0..=0xe7 | BIT                       | bit count 1..=8       |
//! | 0xe8..      | full form tags, see [`tag`] |                     |
//! | 0xff        | END_OF_CONTENTS           |                       |
//! ```
//!
//! Rows and arrays are written as a count followed by that many independently
//! tagged values, so both sides can stream nested contents without
//! materializing them up front.
//!
//! - [`ValueWriter`]
//! - [`ValueReader`]
//! - [`Value`]
use bytes::Bytes;
use std::{fmt, str::Utf8Error, string::FromUtf8Error};

pub mod varint;
pub mod tag;
mod reader;
mod writer;

#[cfg(feature = "time")]
pub mod time;

pub use reader::{MAX_DEPTH, ValueReader};
pub use writer::ValueWriter;

/// Logical type of the next entry in a value stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// `NULL`, or a value of unknown type.
    Null,
    Int,
    Float4,
    Float8,
    Decimal,
    Character,
    Octet,
    Bit,
    Date,
    TimeOfDay,
    TimePoint,
    TimeOfDayWithTimeZone,
    TimePointWithTimeZone,
    DateTimeInterval,
    Row,
    Array,
    /// Pseudo entry marking the end of a value sequence.
    EndOfContents,
}

impl EntryType {
    /// Returns the entry type the given tag byte introduces, if the tag is assigned.
    pub fn of(tag: u8) -> Option<EntryType> {
        use tag::*;
        let ty = match tag {
            EMBED_POSITIVE_INT..EMBED_CHARACTER => EntryType::Int,
            EMBED_CHARACTER..EMBED_ROW => EntryType::Character,
            EMBED_ROW..EMBED_ARRAY => EntryType::Row,
            EMBED_ARRAY..EMBED_NEGATIVE_INT => EntryType::Array,
            EMBED_NEGATIVE_INT..EMBED_OCTET => EntryType::Int,
            EMBED_OCTET..EMBED_BIT => EntryType::Octet,
            EMBED_BIT..UNKNOWN => EntryType::Bit,
            UNKNOWN => EntryType::Null,
            INT => EntryType::Int,
            FLOAT4 => EntryType::Float4,
            FLOAT8 => EntryType::Float8,
            DECIMAL_COMPACT | DECIMAL => EntryType::Decimal,
            TIME_OF_DAY_WITH_TIME_ZONE => EntryType::TimeOfDayWithTimeZone,
            TIME_POINT_WITH_TIME_ZONE => EntryType::TimePointWithTimeZone,
            CHARACTER => EntryType::Character,
            OCTET => EntryType::Octet,
            BIT => EntryType::Bit,
            DATE => EntryType::Date,
            TIME_OF_DAY => EntryType::TimeOfDay,
            TIME_POINT => EntryType::TimePoint,
            DATETIME_INTERVAL => EntryType::DateTimeInterval,
            ROW => EntryType::Row,
            ARRAY => EntryType::Array,
            END_OF_CONTENTS => EntryType::EndOfContents,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntryType::Null => "NULL",
            EntryType::Int => "INT",
            EntryType::Float4 => "FLOAT4",
            EntryType::Float8 => "FLOAT8",
            EntryType::Decimal => "DECIMAL",
            EntryType::Character => "CHARACTER",
            EntryType::Octet => "OCTET",
            EntryType::Bit => "BIT",
            EntryType::Date => "DATE",
            EntryType::TimeOfDay => "TIME_OF_DAY",
            EntryType::TimePoint => "TIME_POINT",
            EntryType::TimeOfDayWithTimeZone => "TIME_OF_DAY_WITH_TIME_ZONE",
            EntryType::TimePointWithTimeZone => "TIME_POINT_WITH_TIME_ZONE",
            EntryType::DateTimeInterval => "DATETIME_INTERVAL",
            EntryType::Row => "ROW",
            EntryType::Array => "ARRAY",
            EntryType::EndOfContents => "END_OF_CONTENTS",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ===== Value types =====

/// An owned SQL value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float4(f32),
    Float8(f64),
    Decimal(Decimal),
    Character(String),
    Octet(Bytes),
    Bit(BitString),
    /// Days since `1970-01-01`.
    Date(i64),
    /// Nanoseconds since midnight.
    TimeOfDay(u64),
    TimePoint(TimePoint),
    TimeOfDayWithTimeZone(TimeOfDayWithTimeZone),
    TimePointWithTimeZone(TimePointWithTimeZone),
    DateTimeInterval(DateTimeInterval),
    Row(Vec<Value>),
    Array(Vec<Value>),
}

impl Value {
    /// Returns the [`EntryType`] this value is written as.
    ///
    /// Note that integral decimals are written as [`EntryType::Int`] on the wire.
    pub fn entry_type(&self) -> EntryType {
        match self {
            Value::Null => EntryType::Null,
            Value::Int(_) => EntryType::Int,
            Value::Float4(_) => EntryType::Float4,
            Value::Float8(_) => EntryType::Float8,
            Value::Decimal(_) => EntryType::Decimal,
            Value::Character(_) => EntryType::Character,
            Value::Octet(_) => EntryType::Octet,
            Value::Bit(_) => EntryType::Bit,
            Value::Date(_) => EntryType::Date,
            Value::TimeOfDay(_) => EntryType::TimeOfDay,
            Value::TimePoint(_) => EntryType::TimePoint,
            Value::TimeOfDayWithTimeZone(_) => EntryType::TimeOfDayWithTimeZone,
            Value::TimePointWithTimeZone(_) => EntryType::TimePointWithTimeZone,
            Value::DateTimeInterval(_) => EntryType::DateTimeInterval,
            Value::Row(_) => EntryType::Row,
            Value::Array(_) => EntryType::Array,
        }
    }

    /// Return `true` if value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Decimal number, `coefficient * 10^exponent`.
///
/// Coefficients within `i64` range use the compact wire form, wider
/// coefficients up to 16 bytes of two's complement use the full form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decimal {
    pub coefficient: i128,
    pub exponent: i32,
}

impl Decimal {
    pub const fn new(coefficient: i128, exponent: i32) -> Self {
        Self { coefficient, exponent }
    }

    /// Strip trailing zeros of the coefficient while the exponent is negative.
    pub fn reduce(self) -> Self {
        let Decimal { mut coefficient, mut exponent } = self;
        while exponent < 0 && coefficient != 0 && coefficient % 10 == 0 {
            coefficient /= 10;
            exponent += 1;
        }
        if coefficient == 0 {
            exponent = exponent.max(0);
        }
        Self { coefficient, exponent }
    }

    /// Returns the value as `i64` if it is integral and within range.
    pub fn to_i64(self) -> Option<i64> {
        let Decimal { coefficient, exponent } = self.reduce();
        if exponent < 0 {
            return None;
        }
        let scale = 10i128.checked_pow(exponent.try_into().ok()?)?;
        coefficient.checked_mul(scale)?.try_into().ok()
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self { coefficient: value.into(), exponent: 0 }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exponent >= 0 {
            write!(f, "{}", self.coefficient)?;
            for _ in 0..self.exponent {
                f.write_str("0")?;
            }
            return Ok(());
        }

        let digits = self.coefficient.unsigned_abs().to_string();
        let scale = self.exponent.unsigned_abs() as usize;
        if self.coefficient < 0 {
            f.write_str("-")?;
        }
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{int}.{frac}")
        } else {
            write!(f, "0.{}{digits}", "0".repeat(scale - digits.len()))
        }
    }
}

/// Packed bit string, least significant bit first in each byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitString {
    len: usize,
    data: Bytes,
}

impl BitString {
    /// Create bit string from packed `data` holding `len` bits.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not exactly `len.div_ceil(8)` bytes.
    pub fn new(len: usize, data: Bytes) -> Self {
        assert_eq!(data.len(), len.div_ceil(8), "bit string length mismatch");
        Self { len, data }
    }

    /// Returns the number of bits.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the packed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the `nth` bit.
    pub fn get(&self, nth: usize) -> Option<bool> {
        if nth >= self.len {
            return None;
        }
        Some(self.data[nth / 8] & (1 << (nth % 8)) != 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| self.data[i / 8] & (1 << (i % 8)) != 0)
    }
}

impl FromIterator<bool> for BitString {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        let mut data = Vec::new();
        let mut len = 0;
        for bit in iter {
            if len % 8 == 0 {
                data.push(0u8);
            }
            if bit {
                data[len / 8] |= 1 << (len % 8);
            }
            len += 1;
        }
        Self { len, data: data.into() }
    }
}

/// Point in time as seconds and nanoseconds since the unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimePoint {
    pub seconds: i64,
    /// Nanosecond adjustment, `0..1_000_000_000`.
    pub nanos: u32,
}

/// Time of day with its offset from UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeOfDayWithTimeZone {
    /// Nanoseconds since midnight.
    pub nanos: u64,
    pub offset_minutes: i32,
}

/// Point in time with its offset from UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimePointWithTimeZone {
    pub time_point: TimePoint,
    pub offset_minutes: i32,
}

/// Calendar interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateTimeInterval {
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub nanos: i64,
}

// ===== Error =====

/// An error when decoding a value stream.
pub enum ValueError {
    /// Input ended in the middle of a value.
    BrokenEncoding,
    /// Accessor invoked against an incompatible entry.
    TypeMismatch {
        expected: EntryType,
        found: EntryType,
    },
    /// Tag byte is not assigned to any entry type.
    UnknownTag(u8),
    /// Decoded number does not fit the target type.
    Overflow(&'static str),
    /// Character value is not utf8.
    Utf8(Utf8Error),
}

impl ValueError {
    pub(crate) fn mismatch(expected: EntryType, found: EntryType) -> Self {
        Self::TypeMismatch { expected, found }
    }
}

impl std::error::Error for ValueError { }

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenEncoding => f.write_str("broken value encoding, unexpected end of input"),
            Self::TypeMismatch { expected, found } => write!(f, "expected `{expected}` found `{found}`"),
            Self::UnknownTag(tag) => write!(f, "unknown value tag 0x{tag:02x}"),
            Self::Overflow(what) => write!(f, "{what} out of range"),
            Self::Utf8(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Debug for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for ValueError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));
