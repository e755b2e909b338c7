//! Variable length integer.
//!
//! Unsigned integers are written as groups of 7 bits, least significant group
//! first, with the continuation bit (`0x80`) set on every group but the last.
//! At most 8 such groups are written. If bits remain after 56 bits, one final
//! byte carries the top 8 bits verbatim, which caps a `u64` at 9 bytes.
//!
//! Signed integers are zig-zag mapped onto unsigned first, so small negative
//! numbers stay short.
use bytes::{Buf, BufMut};

use super::ValueError;

/// Maximum encoded length of a 64 bit integer.
pub const MAX_LEN: usize = 9;

const GROUPS: usize = 8;

/// Write unsigned varint.
pub fn write_unsigned(buf: &mut impl BufMut, value: u64) {
    let mut value = value;
    for _ in 0..GROUPS {
        if value < 0x80 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8(value as u8 | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Write zig-zag signed varint.
pub fn write_signed(buf: &mut impl BufMut, value: i64) {
    write_unsigned(buf, zigzag(value));
}

/// Read unsigned varint.
///
/// Returns [`ValueError::BrokenEncoding`] if input ends before the last group.
pub fn read_unsigned(buf: &mut impl Buf) -> Result<u64, ValueError> {
    let mut value = 0u64;
    for i in 0..GROUPS {
        if !buf.has_remaining() {
            return Err(ValueError::BrokenEncoding);
        }
        let group = buf.get_u8();
        value |= u64::from(group & 0x7f) << (i * 7);
        if group & 0x80 == 0 {
            return Ok(value);
        }
    }
    if !buf.has_remaining() {
        return Err(ValueError::BrokenEncoding);
    }
    Ok(value | u64::from(buf.get_u8()) << (GROUPS * 7))
}

/// Read zig-zag signed varint.
pub fn read_signed(buf: &mut impl Buf) -> Result<i64, ValueError> {
    read_unsigned(buf).map(unzigzag)
}

/// Returns the encoded length of unsigned `value`.
pub const fn unsigned_len(value: u64) -> usize {
    let bits = (u64::BITS - value.leading_zeros()) as usize;
    if bits > GROUPS * 7 {
        MAX_LEN
    } else if bits == 0 {
        1
    } else {
        bits.div_ceil(7)
    }
}

/// Returns the encoded length of signed `value`.
pub const fn signed_len(value: i64) -> usize {
    unsigned_len(zigzag(value))
}

const fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

const fn unzigzag(value: u64) -> i64 {
    if value & 1 == 0 {
        (value >> 1) as i64
    } else {
        !(value >> 1) as i64
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unsigned(value: u64) -> Vec<u8> {
        let mut buf = vec![];
        write_unsigned(&mut buf, value);
        buf
    }

    fn signed(value: i64) -> Vec<u8> {
        let mut buf = vec![];
        write_signed(&mut buf, value);
        buf
    }

    #[test]
    fn unsigned_boundaries() {
        let mut values = vec![0, 1, u64::MAX, u64::MAX - 1];
        for groups in 1..=9u32 {
            let edge = 1u64.checked_shl(groups * 7).unwrap_or(u64::MAX);
            values.extend([edge.saturating_sub(1), edge, edge.saturating_add(1)]);
        }

        for value in values {
            let buf = unsigned(value);
            assert_eq!(buf.len(), unsigned_len(value), "length of {value}");
            assert!(buf.len() <= MAX_LEN);
            assert_eq!(read_unsigned(&mut &buf[..]).unwrap(), value);
        }
    }

    #[test]
    fn group_lengths() {
        assert_eq!(unsigned(0), [0x00]);
        assert_eq!(unsigned(127), [0x7f]);
        assert_eq!(unsigned(128), [0x80, 0x01]);
        assert_eq!(unsigned(16383).len(), 2);
        assert_eq!(unsigned(16384).len(), 3);
        assert_eq!(unsigned((1 << 56) - 1).len(), 8);
        assert_eq!(unsigned(1 << 56).len(), 9);
        assert_eq!(unsigned(u64::MAX), [0xff; 9]);
    }

    #[test]
    fn signed_zigzag() {
        assert_eq!(signed(0), [0x00]);
        assert_eq!(signed(-1), [0x01]);
        assert_eq!(signed(1), [0x02]);
        assert_eq!(signed(-64), [0x7f]);
        assert_eq!(signed(64), [0x80, 0x01]);

        for value in [0, 1, -1, 63, -64, 64, -65, i32::MAX as i64, i32::MIN as i64, i64::MAX, i64::MIN] {
            let buf = signed(value);
            assert_eq!(buf.len(), signed_len(value));
            assert_eq!(read_signed(&mut &buf[..]).unwrap(), value);
        }
        assert_eq!(signed(i64::MIN).len(), MAX_LEN);
    }

    #[test]
    fn truncated_input() {
        assert!(matches!(read_unsigned(&mut &[][..]), Err(ValueError::BrokenEncoding)));
        assert!(matches!(read_unsigned(&mut &[0x80][..]), Err(ValueError::BrokenEncoding)));
        assert!(matches!(read_unsigned(&mut &[0xff; 8][..]), Err(ValueError::BrokenEncoding)));
    }

    #[test]
    fn leaves_trailing_input() {
        let mut buf = &[0x80, 0x01, 0x2a][..];
        assert_eq!(read_unsigned(&mut buf).unwrap(), 128);
        assert_eq!(buf, [0x2a]);
    }
}
