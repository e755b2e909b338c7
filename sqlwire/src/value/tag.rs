//! Tag byte assignment.

/// `0..=63`, value is `tag - EMBED_POSITIVE_INT`.
pub const EMBED_POSITIVE_INT: u8 = 0x00;
/// Character of 1 to 64 bytes, length is `tag - EMBED_CHARACTER + 1`.
pub const EMBED_CHARACTER: u8 = 0x40;
/// Row of 1 to 32 elements.
pub const EMBED_ROW: u8 = 0x80;
/// Array of 1 to 32 elements.
pub const EMBED_ARRAY: u8 = 0xa0;
/// `-16..=-1`, value is `tag - EMBED_NEGATIVE_INT - 16`.
pub const EMBED_NEGATIVE_INT: u8 = 0xc0;
/// Octet of 1 to 16 bytes.
pub const EMBED_OCTET: u8 = 0xd0;
/// Bit string of 1 to 8 bits.
pub const EMBED_BIT: u8 = 0xe0;

pub const UNKNOWN: u8 = 0xe8;
pub const INT: u8 = 0xe9;
pub const FLOAT4: u8 = 0xea;
pub const FLOAT8: u8 = 0xeb;
pub const DECIMAL_COMPACT: u8 = 0xec;
pub const DECIMAL: u8 = 0xed;
pub const TIME_OF_DAY_WITH_TIME_ZONE: u8 = 0xee;
pub const TIME_POINT_WITH_TIME_ZONE: u8 = 0xef;
pub const CHARACTER: u8 = 0xf0;
pub const OCTET: u8 = 0xf1;
pub const BIT: u8 = 0xf2;
pub const DATE: u8 = 0xf3;
pub const TIME_OF_DAY: u8 = 0xf4;
pub const TIME_POINT: u8 = 0xf5;
pub const DATETIME_INTERVAL: u8 = 0xf6;
pub const ROW: u8 = 0xf8;
pub const ARRAY: u8 = 0xf9;
pub const END_OF_CONTENTS: u8 = 0xff;

pub const EMBED_POSITIVE_INT_MAX: i64 = 63;
pub const EMBED_NEGATIVE_INT_MIN: i64 = -16;
pub const EMBED_CHARACTER_MAX: usize = 64;
pub const EMBED_OCTET_MAX: usize = 16;
pub const EMBED_BIT_MAX: usize = 8;
pub const EMBED_ROW_MAX: usize = 32;
pub const EMBED_ARRAY_MAX: usize = 32;
