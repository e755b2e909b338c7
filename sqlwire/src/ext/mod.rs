/// Length is `usize` in rust, while the wire header wants fixed width integers.
pub trait UsizeExt {
    /// Convert to frame length, this will panic when overflow instead of wrapping.
    fn to_u32(self) -> u32;
    /// Convert to slot number, this will panic when overflow instead of wrapping.
    fn to_u16(self) -> u16;
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("payload too large for frame header")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("slot number too large for frame header")
    }
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::FmtExt;

    #[test]
    fn lossy_escapes_control_bytes() {
        assert_eq!(b"rs\x00\x01".lossy().to_string(), "rs\\x00\\x01");
        assert_eq!(format!("{:?}", b"ok".lossy()), "b\"ok\"");
    }
}
