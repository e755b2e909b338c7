use bytes::BufMut;

use super::{
    BitString, DateTimeInterval, Decimal, TimeOfDayWithTimeZone, TimePoint, TimePointWithTimeZone,
    Value, tag::*, varint,
};

/// Writes tagged values into a [`BufMut`].
///
/// Rows and arrays are written as [`write_row_begin`][1] followed by exactly that
/// many values, the writer does not track nesting.
///
/// [1]: ValueWriter::write_row_begin
#[derive(Debug, Default)]
pub struct ValueWriter<B> {
    buf: B,
}

impl<B: BufMut> ValueWriter<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    pub fn get_ref(&self) -> &B {
        &self.buf
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    pub fn write_null(&mut self) {
        self.buf.put_u8(UNKNOWN);
    }

    pub fn write_end_of_contents(&mut self) {
        self.buf.put_u8(END_OF_CONTENTS);
    }

    pub fn write_int(&mut self, value: i64) {
        match value {
            0..=EMBED_POSITIVE_INT_MAX => self.buf.put_u8(EMBED_POSITIVE_INT + value as u8),
            EMBED_NEGATIVE_INT_MIN..0 => {
                self.buf.put_u8(EMBED_NEGATIVE_INT + (value - EMBED_NEGATIVE_INT_MIN) as u8)
            }
            _ => {
                self.buf.put_u8(INT);
                varint::write_signed(&mut self.buf, value);
            }
        }
    }

    pub fn write_float4(&mut self, value: f32) {
        self.buf.put_u8(FLOAT4);
        self.buf.put_u32(value.to_bits());
    }

    pub fn write_float8(&mut self, value: f64) {
        self.buf.put_u8(FLOAT8);
        self.buf.put_u64(value.to_bits());
    }

    /// Integral decimals within `i64` are written as INT.
    pub fn write_decimal(&mut self, value: Decimal) {
        if let Some(int) = value.to_i64() {
            return self.write_int(int);
        }

        let Decimal { coefficient, exponent } = value.reduce();
        match i64::try_from(coefficient) {
            Ok(compact) => {
                self.buf.put_u8(DECIMAL_COMPACT);
                varint::write_signed(&mut self.buf, exponent.into());
                varint::write_signed(&mut self.buf, compact);
            }
            Err(_) => {
                let bytes = coefficient.to_be_bytes();
                let skip = redundant_sign_bytes(&bytes);
                self.buf.put_u8(DECIMAL);
                varint::write_signed(&mut self.buf, exponent.into());
                varint::write_unsigned(&mut self.buf, (bytes.len() - skip) as u64);
                self.buf.put_slice(&bytes[skip..]);
            }
        }
    }

    pub fn write_character(&mut self, value: &str) {
        self.write_sized(value.len(), EMBED_CHARACTER, EMBED_CHARACTER_MAX, CHARACTER);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn write_octet(&mut self, value: &[u8]) {
        self.write_sized(value.len(), EMBED_OCTET, EMBED_OCTET_MAX, OCTET);
        self.buf.put_slice(value);
    }

    pub fn write_bit(&mut self, value: &BitString) {
        self.write_sized(value.len(), EMBED_BIT, EMBED_BIT_MAX, BIT);
        self.buf.put_slice(value.as_bytes());
    }

    /// Write date as days since `1970-01-01`.
    pub fn write_date(&mut self, epoch_day: i64) {
        self.buf.put_u8(DATE);
        varint::write_signed(&mut self.buf, epoch_day);
    }

    /// Write time of day as nanoseconds since midnight.
    pub fn write_time_of_day(&mut self, nanos: u64) {
        self.buf.put_u8(TIME_OF_DAY);
        varint::write_unsigned(&mut self.buf, nanos);
    }

    pub fn write_time_point(&mut self, value: TimePoint) {
        self.buf.put_u8(TIME_POINT);
        self.put_time_point(value);
    }

    pub fn write_time_of_day_with_time_zone(&mut self, value: TimeOfDayWithTimeZone) {
        self.buf.put_u8(TIME_OF_DAY_WITH_TIME_ZONE);
        varint::write_unsigned(&mut self.buf, value.nanos);
        varint::write_signed(&mut self.buf, value.offset_minutes.into());
    }

    pub fn write_time_point_with_time_zone(&mut self, value: TimePointWithTimeZone) {
        self.buf.put_u8(TIME_POINT_WITH_TIME_ZONE);
        self.put_time_point(value.time_point);
        varint::write_signed(&mut self.buf, value.offset_minutes.into());
    }

    pub fn write_date_time_interval(&mut self, value: DateTimeInterval) {
        self.buf.put_u8(DATETIME_INTERVAL);
        varint::write_signed(&mut self.buf, value.year.into());
        varint::write_signed(&mut self.buf, value.month.into());
        varint::write_signed(&mut self.buf, value.day.into());
        varint::write_signed(&mut self.buf, value.nanos);
    }

    /// Begin a row, caller must write exactly `elements` values afterwards.
    pub fn write_row_begin(&mut self, elements: usize) {
        self.write_sized(elements, EMBED_ROW, EMBED_ROW_MAX, ROW);
    }

    /// Begin an array, caller must write exactly `elements` values afterwards.
    pub fn write_array_begin(&mut self, elements: usize) {
        self.write_sized(elements, EMBED_ARRAY, EMBED_ARRAY_MAX, ARRAY);
    }

    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.write_null(),
            Value::Int(v) => self.write_int(*v),
            Value::Float4(v) => self.write_float4(*v),
            Value::Float8(v) => self.write_float8(*v),
            Value::Decimal(v) => self.write_decimal(*v),
            Value::Character(v) => self.write_character(v),
            Value::Octet(v) => self.write_octet(v),
            Value::Bit(v) => self.write_bit(v),
            Value::Date(v) => self.write_date(*v),
            Value::TimeOfDay(v) => self.write_time_of_day(*v),
            Value::TimePoint(v) => self.write_time_point(*v),
            Value::TimeOfDayWithTimeZone(v) => self.write_time_of_day_with_time_zone(*v),
            Value::TimePointWithTimeZone(v) => self.write_time_point_with_time_zone(*v),
            Value::DateTimeInterval(v) => self.write_date_time_interval(*v),
            Value::Row(elements) => {
                self.write_row_begin(elements.len());
                elements.iter().for_each(|e| self.write_value(e));
            }
            Value::Array(elements) => {
                self.write_array_begin(elements.len());
                elements.iter().for_each(|e| self.write_value(e));
            }
        }
    }

    /// Embedded tag when `1..=max`, otherwise full tag and unsigned varint length.
    fn write_sized(&mut self, len: usize, embed: u8, max: usize, full: u8) {
        if (1..=max).contains(&len) {
            self.buf.put_u8(embed + (len - 1) as u8);
        } else {
            self.buf.put_u8(full);
            varint::write_unsigned(&mut self.buf, len as u64);
        }
    }

    fn put_time_point(&mut self, value: TimePoint) {
        varint::write_signed(&mut self.buf, value.seconds);
        varint::write_unsigned(&mut self.buf, value.nanos.into());
    }
}

/// Count leading bytes that only repeat the sign of the following byte.
fn redundant_sign_bytes(bytes: &[u8]) -> usize {
    let mut skip = 0;
    while skip + 1 < bytes.len() {
        let (head, next) = (bytes[skip], bytes[skip + 1]);
        let redundant = (head == 0x00 && next & 0x80 == 0) || (head == 0xff && next & 0x80 != 0);
        if !redundant {
            break;
        }
        skip += 1;
    }
    skip
}

#[cfg(test)]
mod test {
    use super::*;

    fn written(f: impl FnOnce(&mut ValueWriter<Vec<u8>>)) -> Vec<u8> {
        let mut w = ValueWriter::new(vec![]);
        f(&mut w);
        w.into_inner()
    }

    #[test]
    fn int_embedding_boundaries() {
        assert_eq!(written(|w| w.write_int(0)), [0x00]);
        assert_eq!(written(|w| w.write_int(63)), [0x3f]);
        assert_eq!(written(|w| w.write_int(64)), [INT, 0x80, 0x01]);
        assert_eq!(written(|w| w.write_int(-1)), [0xcf]);
        assert_eq!(written(|w| w.write_int(-16)), [0xc0]);
        assert_eq!(written(|w| w.write_int(-17)), [INT, 0x21]);
    }

    #[test]
    fn sized_embedding_boundaries() {
        let len = |n: usize, f: fn(&mut ValueWriter<Vec<u8>>, usize)| written(|w| f(w, n))[0];

        let character = |w: &mut ValueWriter<Vec<u8>>, n| w.write_character(&"a".repeat(n));
        assert_eq!(len(1, character), EMBED_CHARACTER);
        assert_eq!(len(64, character), EMBED_CHARACTER + 63);
        assert_eq!(len(0, character), CHARACTER);
        assert_eq!(len(65, character), CHARACTER);

        let octet = |w: &mut ValueWriter<Vec<u8>>, n| w.write_octet(&vec![7; n]);
        assert_eq!(len(1, octet), EMBED_OCTET);
        assert_eq!(len(16, octet), EMBED_OCTET + 15);
        assert_eq!(len(0, octet), OCTET);
        assert_eq!(len(17, octet), OCTET);

        let bit = |w: &mut ValueWriter<Vec<u8>>, n| w.write_bit(&std::iter::repeat_n(true, n).collect());
        assert_eq!(len(1, bit), EMBED_BIT);
        assert_eq!(len(8, bit), EMBED_BIT + 7);
        assert_eq!(len(0, bit), BIT);
        assert_eq!(len(9, bit), BIT);

        let row = |w: &mut ValueWriter<Vec<u8>>, n| w.write_row_begin(n);
        assert_eq!(len(1, row), EMBED_ROW);
        assert_eq!(len(32, row), EMBED_ROW + 31);
        assert_eq!(len(0, row), ROW);
        assert_eq!(len(33, row), ROW);

        let array = |w: &mut ValueWriter<Vec<u8>>, n| w.write_array_begin(n);
        assert_eq!(len(1, array), EMBED_ARRAY);
        assert_eq!(len(32, array), EMBED_ARRAY + 31);
        assert_eq!(len(0, array), ARRAY);
        assert_eq!(len(33, array), ARRAY);
    }

    #[test]
    fn full_form_layout() {
        assert_eq!(written(|w| w.write_character("")), [CHARACTER, 0x00]);
        assert_eq!(written(|w| w.write_row_begin(33)), [ROW, 33]);
        assert_eq!(written(|w| w.write_float4(1.0)), [FLOAT4, 0x3f, 0x80, 0x00, 0x00]);
        assert_eq!(written(|w| w.write_date(-1)), [DATE, 0x01]);
        assert_eq!(
            written(|w| w.write_time_point(TimePoint { seconds: 1, nanos: 5 })),
            [TIME_POINT, 0x02, 0x05]
        );
    }

    #[test]
    fn decimal_forms() {
        assert_eq!(written(|w| w.write_decimal(Decimal::new(100, -2))), [0x01]);
        assert_eq!(written(|w| w.write_decimal(Decimal::new(125, -1))), [DECIMAL_COMPACT, 0x01, 0xfa, 0x01]);

        let wide = Decimal::new(i64::MAX as i128 * 10 + 1, -1);
        let buf = written(|w| w.write_decimal(wide));
        assert_eq!(&buf[..3], [DECIMAL, 0x01, 0x09]);
        assert_eq!(buf.len(), 3 + 9);
    }

    #[test]
    fn sign_bytes() {
        assert_eq!(redundant_sign_bytes(&1i128.to_be_bytes()), 15);
        assert_eq!(redundant_sign_bytes(&(-1i128).to_be_bytes()), 15);
        assert_eq!(redundant_sign_bytes(&128i128.to_be_bytes()), 14);
        assert_eq!(redundant_sign_bytes(&(-129i128).to_be_bytes()), 14);
    }
}
