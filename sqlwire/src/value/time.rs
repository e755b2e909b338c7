//! Conversion between wire values and [`time`] types.
use ::time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use super::{TimeOfDayWithTimeZone, TimePoint, TimePointWithTimeZone, Value, ValueError};

/// Julian day of `1970-01-01`.
const UNIX_EPOCH_JULIAN_DAY: i64 = 2_440_588;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Returns days since `1970-01-01`.
pub fn epoch_day(date: Date) -> i64 {
    i64::from(date.to_julian_day()) - UNIX_EPOCH_JULIAN_DAY
}

pub fn date_from_epoch_day(epoch_day: i64) -> Result<Date, ValueError> {
    epoch_day
        .checked_add(UNIX_EPOCH_JULIAN_DAY)
        .and_then(|julian| i32::try_from(julian).ok())
        .and_then(|julian| Date::from_julian_day(julian).ok())
        .ok_or(ValueError::Overflow("date"))
}

/// Returns nanoseconds since midnight.
pub fn nanos_of_day(time: Time) -> u64 {
    let (h, m, s, nano) = time.as_hms_nano();
    (u64::from(h) * 3600 + u64::from(m) * 60 + u64::from(s)) * NANOS_PER_SECOND + u64::from(nano)
}

pub fn time_from_nanos_of_day(nanos: u64) -> Result<Time, ValueError> {
    let seconds = nanos / NANOS_PER_SECOND;
    let nano = (nanos % NANOS_PER_SECOND) as u32;
    let h = u8::try_from(seconds / 3600).map_err(|_| ValueError::Overflow("time of day"))?;
    Time::from_hms_nano(h, (seconds / 60 % 60) as u8, (seconds % 60) as u8, nano)
        .map_err(|_| ValueError::Overflow("time of day"))
}

fn offset_minutes(offset: UtcOffset) -> i32 {
    offset.whole_minutes().into()
}

fn offset_from_minutes(minutes: i32) -> Result<UtcOffset, ValueError> {
    minutes
        .checked_mul(60)
        .and_then(|seconds| UtcOffset::from_whole_seconds(seconds).ok())
        .ok_or(ValueError::Overflow("time zone offset"))
}

impl From<OffsetDateTime> for TimePoint {
    fn from(value: OffsetDateTime) -> Self {
        Self { seconds: value.unix_timestamp(), nanos: value.nanosecond() }
    }
}

impl From<PrimitiveDateTime> for TimePoint {
    fn from(value: PrimitiveDateTime) -> Self {
        value.assume_utc().into()
    }
}

impl TryFrom<TimePoint> for OffsetDateTime {
    type Error = ValueError;

    fn try_from(value: TimePoint) -> Result<Self, Self::Error> {
        OffsetDateTime::from_unix_timestamp(value.seconds)
            .and_then(|utc| utc.replace_nanosecond(value.nanos))
            .map_err(|_| ValueError::Overflow("time point"))
    }
}

impl TryFrom<TimePoint> for PrimitiveDateTime {
    type Error = ValueError;

    fn try_from(value: TimePoint) -> Result<Self, Self::Error> {
        let utc = OffsetDateTime::try_from(value)?;
        Ok(PrimitiveDateTime::new(utc.date(), utc.time()))
    }
}

impl From<OffsetDateTime> for TimePointWithTimeZone {
    fn from(value: OffsetDateTime) -> Self {
        Self { time_point: value.into(), offset_minutes: offset_minutes(value.offset()) }
    }
}

impl TryFrom<TimePointWithTimeZone> for OffsetDateTime {
    type Error = ValueError;

    fn try_from(value: TimePointWithTimeZone) -> Result<Self, Self::Error> {
        let offset = offset_from_minutes(value.offset_minutes)?;
        let utc = OffsetDateTime::try_from(value.time_point)?;
        utc.checked_to_offset(offset).ok_or(ValueError::Overflow("time point"))
    }
}

impl From<(Time, UtcOffset)> for TimeOfDayWithTimeZone {
    fn from((time, offset): (Time, UtcOffset)) -> Self {
        Self { nanos: nanos_of_day(time), offset_minutes: offset_minutes(offset) }
    }
}

impl TryFrom<TimeOfDayWithTimeZone> for (Time, UtcOffset) {
    type Error = ValueError;

    fn try_from(value: TimeOfDayWithTimeZone) -> Result<Self, Self::Error> {
        Ok((time_from_nanos_of_day(value.nanos)?, offset_from_minutes(value.offset_minutes)?))
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Value::Date(epoch_day(value))
    }
}

impl From<Time> for Value {
    fn from(value: Time) -> Self {
        Value::TimeOfDay(nanos_of_day(value))
    }
}

impl From<PrimitiveDateTime> for Value {
    fn from(value: PrimitiveDateTime) -> Self {
        Value::TimePoint(value.into())
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::TimePointWithTimeZone(value.into())
    }
}
