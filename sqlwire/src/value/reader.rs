use bytes::{Buf, Bytes};

use super::{
    BitString, DateTimeInterval, Decimal, EntryType, TimeOfDayWithTimeZone, TimePoint,
    TimePointWithTimeZone, Value, ValueError, tag::*, varint,
};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Maximum nesting of rows and arrays materialized by [`ValueReader::read_value`].
pub const MAX_DEPTH: usize = 64;

/// Reads tagged values from a buffer.
///
/// Every accessor checks the next tag first, invoking an accessor against an
/// incompatible entry returns [`ValueError::TypeMismatch`] and consumes nothing.
/// `NULL` fails every typed accessor, use [`read_null`][1] or
/// [`try_read_null`][2] for nullable entries.
///
/// Decoded values own their bytes, they never alias the input buffer.
///
/// [1]: ValueReader::read_null
/// [2]: ValueReader::try_read_null
#[derive(Debug, Clone, Default)]
pub struct ValueReader {
    buf: Bytes,
}

impl ValueReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Returns the type of the next entry without consuming it.
    ///
    /// Exhausted input is reported as [`EntryType::EndOfContents`].
    pub fn peek_type(&self) -> Result<EntryType, ValueError> {
        match self.buf.first() {
            Some(&tag) => EntryType::of(tag).ok_or(ValueError::UnknownTag(tag)),
            None => Ok(EntryType::EndOfContents),
        }
    }

    pub fn read_null(&mut self) -> Result<(), ValueError> {
        self.header(EntryType::Null).map(drop)
    }

    /// Consume the next entry if it is `NULL`.
    pub fn try_read_null(&mut self) -> Result<bool, ValueError> {
        match self.peek_type()? {
            EntryType::Null => self.read_null().map(|_| true),
            _ => Ok(false),
        }
    }

    /// Consume an explicit end of contents, or accept exhausted input.
    pub fn read_end_of_contents(&mut self) -> Result<(), ValueError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.header(EntryType::EndOfContents).map(drop)
    }

    pub fn read_int(&mut self) -> Result<i64, ValueError> {
        let tag = self.header(EntryType::Int)?;
        self.int_body(tag)
    }

    pub fn read_float4(&mut self) -> Result<f32, ValueError> {
        self.header(EntryType::Float4)?;
        self.require(size_of::<u32>())?;
        Ok(f32::from_bits(self.buf.get_u32()))
    }

    pub fn read_float8(&mut self) -> Result<f64, ValueError> {
        self.header(EntryType::Float8)?;
        self.require(size_of::<u64>())?;
        Ok(f64::from_bits(self.buf.get_u64()))
    }

    /// Read decimal, integral values written as INT are accepted.
    pub fn read_decimal(&mut self) -> Result<Decimal, ValueError> {
        let found = self.peek_type()?;
        if found == EntryType::Int {
            return self.read_int().map(Decimal::from);
        }

        let tag = self.header(EntryType::Decimal)?;
        let mut read = self.buf.clone();
        let exponent = varint::read_signed(&mut read)?;
        let exponent = i32::try_from(exponent).map_err(|_| ValueError::Overflow("decimal exponent"))?;

        let coefficient = match tag {
            DECIMAL_COMPACT => varint::read_signed(&mut read)?.into(),
            _ => {
                let len = varint::read_unsigned(&mut read)? as usize;
                if len > size_of::<i128>() {
                    return Err(ValueError::Overflow("decimal coefficient"));
                }
                if read.len() < len {
                    return Err(ValueError::BrokenEncoding);
                }
                let bytes = read.split_to(len);
                let fill = match bytes.first() {
                    Some(b) if b & 0x80 != 0 => 0xff,
                    _ => 0x00,
                };
                let mut be = [fill; size_of::<i128>()];
                be[size_of::<i128>() - len..].copy_from_slice(&bytes);
                i128::from_be_bytes(be)
            }
        };

        self.buf = read;
        Ok(Decimal { coefficient, exponent })
    }

    pub fn read_character(&mut self) -> Result<String, ValueError> {
        let tag = self.header(EntryType::Character)?;
        let len = self.sized_body(tag, EMBED_CHARACTER, CHARACTER)?;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn read_octet(&mut self) -> Result<Bytes, ValueError> {
        let tag = self.header(EntryType::Octet)?;
        let len = self.sized_body(tag, EMBED_OCTET, OCTET)?;
        let bytes = self.take(len)?;
        Ok(Bytes::copy_from_slice(&bytes))
    }

    pub fn read_bit(&mut self) -> Result<BitString, ValueError> {
        let tag = self.header(EntryType::Bit)?;
        let len = self.sized_body(tag, EMBED_BIT, BIT)?;
        let bytes = self.take(len.div_ceil(8))?;
        Ok(BitString::new(len, Bytes::copy_from_slice(&bytes)))
    }

    /// Read date as days since `1970-01-01`.
    pub fn read_date(&mut self) -> Result<i64, ValueError> {
        self.header(EntryType::Date)?;
        self.commit(varint::read_signed)
    }

    /// Read time of day as nanoseconds since midnight.
    pub fn read_time_of_day(&mut self) -> Result<u64, ValueError> {
        self.header(EntryType::TimeOfDay)?;
        self.commit(varint::read_unsigned)
    }

    pub fn read_time_point(&mut self) -> Result<TimePoint, ValueError> {
        self.header(EntryType::TimePoint)?;
        self.commit(time_point)
    }

    pub fn read_time_of_day_with_time_zone(&mut self) -> Result<TimeOfDayWithTimeZone, ValueError> {
        self.header(EntryType::TimeOfDayWithTimeZone)?;
        self.commit(|read| {
            Ok(TimeOfDayWithTimeZone {
                nanos: varint::read_unsigned(read)?,
                offset_minutes: offset(read)?,
            })
        })
    }

    pub fn read_time_point_with_time_zone(&mut self) -> Result<TimePointWithTimeZone, ValueError> {
        self.header(EntryType::TimePointWithTimeZone)?;
        self.commit(|read| {
            Ok(TimePointWithTimeZone {
                time_point: time_point(read)?,
                offset_minutes: offset(read)?,
            })
        })
    }

    pub fn read_date_time_interval(&mut self) -> Result<DateTimeInterval, ValueError> {
        self.header(EntryType::DateTimeInterval)?;
        self.commit(|read| {
            let field = |read: &mut Bytes, what| -> Result<i32, ValueError> {
                i32::try_from(varint::read_signed(read)?).map_err(|_| ValueError::Overflow(what))
            };
            Ok(DateTimeInterval {
                year: field(read, "interval year")?,
                month: field(read, "interval month")?,
                day: field(read, "interval day")?,
                nanos: varint::read_signed(read)?,
            })
        })
    }

    /// Read a row header, returns the number of elements that follow.
    pub fn read_row_begin(&mut self) -> Result<usize, ValueError> {
        let tag = self.header(EntryType::Row)?;
        self.sized_body(tag, EMBED_ROW, ROW)
    }

    /// Read an array header, returns the number of elements that follow.
    pub fn read_array_begin(&mut self) -> Result<usize, ValueError> {
        let tag = self.header(EntryType::Array)?;
        self.sized_body(tag, EMBED_ARRAY, ARRAY)
    }

    /// Read and materialize the next value.
    ///
    /// Returns [`None`] at end of contents, consuming the marker if present.
    /// Rows and arrays nested deeper than [`MAX_DEPTH`] fail with
    /// [`ValueError::Overflow`].
    pub fn read_value(&mut self) -> Result<Option<Value>, ValueError> {
        let mut read = self.clone();
        let value = read.value(0)?;
        *self = read;
        Ok(value)
    }

    /// Consume the next value.
    ///
    /// With `deep`, rows and arrays are skipped together with their elements,
    /// otherwise only their header is consumed.
    ///
    /// Returns `false` and consumes nothing if the input ends before the value
    /// is complete, or if the next entry is end of contents.
    pub fn skip(&mut self, deep: bool) -> Result<bool, ValueError> {
        let mut read = self.clone();
        match read.skip_value(deep) {
            Ok(true) => {
                *self = read;
                Ok(true)
            }
            Ok(false) | Err(ValueError::BrokenEncoding) => Ok(false),
            Err(err) => Err(err),
        }
    }

    // ===== internal =====

    /// Check the next entry type and consume the tag byte.
    fn header(&mut self, expected: EntryType) -> Result<u8, ValueError> {
        let Some(&tag) = self.buf.first() else {
            return Err(ValueError::BrokenEncoding);
        };
        let found = EntryType::of(tag).ok_or(ValueError::UnknownTag(tag))?;
        if found != expected {
            return Err(ValueError::mismatch(expected, found));
        }
        self.buf.advance(1);
        Ok(tag)
    }

    fn int_body(&mut self, tag: u8) -> Result<i64, ValueError> {
        match tag {
            EMBED_POSITIVE_INT..EMBED_CHARACTER => Ok((tag - EMBED_POSITIVE_INT).into()),
            EMBED_NEGATIVE_INT..EMBED_OCTET => {
                Ok(i64::from(tag - EMBED_NEGATIVE_INT) + EMBED_NEGATIVE_INT_MIN)
            }
            _ => self.commit(varint::read_signed),
        }
    }

    fn sized_body(&mut self, tag: u8, embed: u8, full: u8) -> Result<usize, ValueError> {
        if tag == full {
            let len = self.commit(varint::read_unsigned)?;
            return usize::try_from(len).map_err(|_| ValueError::Overflow("length"));
        }
        Ok((tag - embed) as usize + 1)
    }

    /// Run `f` against a copy of the input, keep its progress only on success.
    fn commit<T>(&mut self, f: impl FnOnce(&mut Bytes) -> Result<T, ValueError>) -> Result<T, ValueError> {
        let mut read = self.buf.clone();
        let value = f(&mut read)?;
        self.buf = read;
        Ok(value)
    }

    fn require(&self, len: usize) -> Result<(), ValueError> {
        match self.buf.len() < len {
            true => Err(ValueError::BrokenEncoding),
            false => Ok(()),
        }
    }

    fn take(&mut self, len: usize) -> Result<Bytes, ValueError> {
        self.require(len)?;
        Ok(self.buf.split_to(len))
    }

    fn value(&mut self, depth: usize) -> Result<Option<Value>, ValueError> {
        let value = match self.peek_type()? {
            EntryType::EndOfContents => {
                self.read_end_of_contents()?;
                return Ok(None);
            }
            EntryType::Null => self.read_null().map(|_| Value::Null)?,
            EntryType::Int => Value::Int(self.read_int()?),
            EntryType::Float4 => Value::Float4(self.read_float4()?),
            EntryType::Float8 => Value::Float8(self.read_float8()?),
            EntryType::Decimal => Value::Decimal(self.read_decimal()?),
            EntryType::Character => Value::Character(self.read_character()?),
            EntryType::Octet => Value::Octet(self.read_octet()?),
            EntryType::Bit => Value::Bit(self.read_bit()?),
            EntryType::Date => Value::Date(self.read_date()?),
            EntryType::TimeOfDay => Value::TimeOfDay(self.read_time_of_day()?),
            EntryType::TimePoint => Value::TimePoint(self.read_time_point()?),
            EntryType::TimeOfDayWithTimeZone => {
                Value::TimeOfDayWithTimeZone(self.read_time_of_day_with_time_zone()?)
            }
            EntryType::TimePointWithTimeZone => {
                Value::TimePointWithTimeZone(self.read_time_point_with_time_zone()?)
            }
            EntryType::DateTimeInterval => Value::DateTimeInterval(self.read_date_time_interval()?),
            EntryType::Row => Value::Row(self.elements(EntryType::Row, depth)?),
            EntryType::Array => Value::Array(self.elements(EntryType::Array, depth)?),
        };
        Ok(Some(value))
    }

    fn elements(&mut self, ty: EntryType, depth: usize) -> Result<Vec<Value>, ValueError> {
        if depth >= MAX_DEPTH {
            return Err(ValueError::Overflow("nesting depth"));
        }
        let len = self.begin(ty)?;
        let mut elements = Vec::with_capacity(len.min(self.buf.len()));
        for _ in 0..len {
            match self.value(depth + 1)? {
                Some(value) => elements.push(value),
                // end of contents in the middle of elements
                None => return Err(ValueError::BrokenEncoding),
            }
        }
        Ok(elements)
    }

    fn begin(&mut self, ty: EntryType) -> Result<usize, ValueError> {
        match ty {
            EntryType::Row => self.read_row_begin(),
            _ => self.read_array_begin(),
        }
    }

    /// Skip without recursion, nesting is tracked as a count of entries left.
    fn skip_value(&mut self, deep: bool) -> Result<bool, ValueError> {
        let mut rest = 1usize;
        while rest > 0 {
            rest -= 1;
            match self.peek_type()? {
                EntryType::EndOfContents => return Ok(false),
                ty @ (EntryType::Row | EntryType::Array) => {
                    let len = self.begin(ty)?;
                    if deep {
                        rest = rest.checked_add(len).ok_or(ValueError::Overflow("length"))?;
                    }
                }
                _ => {
                    self.value(0)?;
                }
            }
        }
        Ok(true)
    }
}

fn time_point(read: &mut Bytes) -> Result<TimePoint, ValueError> {
    let seconds = varint::read_signed(read)?;
    let nanos = varint::read_unsigned(read)?;
    if nanos >= NANOS_PER_SECOND {
        return Err(ValueError::Overflow("time point nanosecond adjustment"));
    }
    Ok(TimePoint { seconds, nanos: nanos as u32 })
}

fn offset(read: &mut Bytes) -> Result<i32, ValueError> {
    i32::try_from(varint::read_signed(read)?).map_err(|_| ValueError::Overflow("time zone offset"))
}
