//! Integer width classes
//!
//! A `NumberSize` is one of nine byte widths (0..=8). Pointer and length
//! fields pick the smallest class that fits so small stores keep small
//! headers.

use crate::codec::enums::Enumerated;
use crate::error::{Error, Result};
use crate::io::{ContentReader, ContentWriter};
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumberSize {
    Void,
    Byte,
    Short,
    Smedium,
    Int,
    Big,
    Large,
    Greater,
    Long,
}

impl NumberSize {
    pub const ALL: [NumberSize; 9] = [
        NumberSize::Void,
        NumberSize::Byte,
        NumberSize::Short,
        NumberSize::Smedium,
        NumberSize::Int,
        NumberSize::Big,
        NumberSize::Large,
        NumberSize::Greater,
        NumberSize::Long,
    ];

    /// Width in bytes
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Width in bits
    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// Largest value the class can hold
    pub fn max_size(self) -> u64 {
        match self {
            NumberSize::Void => 0,
            NumberSize::Long => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }

    pub fn can_fit(self, value: u64) -> bool {
        value <= self.max_size()
    }

    pub fn ensure_can_fit(self, value: u64) -> Result<()> {
        if self.can_fit(value) {
            Ok(())
        } else {
            Err(Error::WidthOverflow { value, size: self })
        }
    }

    /// Next wider class; `Long` has none
    pub fn next(self) -> Option<NumberSize> {
        Self::ALL.get(self as usize + 1).copied()
    }

    /// Next narrower class; `Void` has none
    pub fn prev(self) -> Option<NumberSize> {
        (self as usize).checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Smallest class that can hold `value`
    pub fn by_size(value: u64) -> NumberSize {
        let bytes = (64 - value.leading_zeros() as usize + 7) / 8;
        Self::ALL[bytes]
    }

    /// Smallest class with at least `bits` bits, if any
    pub fn by_bits(bits: u32) -> Option<NumberSize> {
        Self::ALL.get(((bits + 7) / 8) as usize).copied()
    }

    pub fn write<W: Write + ?Sized>(self, out: &mut W, value: u64) -> Result<()> {
        self.ensure_can_fit(value)?;
        out.write_word(value, self.bytes())
    }

    pub fn read<R: Read + ?Sized>(self, input: &mut R) -> Result<u64> {
        input.read_word(self.bytes())
    }
}

impl Enumerated for NumberSize {
    const VARIANTS: &'static [Self] = &NumberSize::ALL;

    fn ordinal(&self) -> usize {
        *self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_by_size() {
        assert_eq!(NumberSize::by_size(0), NumberSize::Void);
        assert_eq!(NumberSize::by_size(1), NumberSize::Byte);
        assert_eq!(NumberSize::by_size(255), NumberSize::Byte);
        assert_eq!(NumberSize::by_size(256), NumberSize::Short);
        assert_eq!(NumberSize::by_size(1 << 24), NumberSize::Int);
        assert_eq!(NumberSize::by_size(u64::MAX), NumberSize::Long);
    }

    #[test]
    fn test_by_size_is_smallest_fit() {
        for size in NumberSize::ALL {
            let max = size.max_size();
            assert_eq!(NumberSize::by_size(max), size);
            if let Some(next) = size.next() {
                assert_eq!(NumberSize::by_size(max + 1), next);
            }
        }
    }

    #[test]
    fn test_ordering_and_steps() {
        assert!(NumberSize::Byte < NumberSize::Short);
        assert_eq!(NumberSize::Void.prev(), None);
        assert_eq!(NumberSize::Long.next(), None);
        assert_eq!(NumberSize::Int.next(), Some(NumberSize::Big));
        assert_eq!(NumberSize::Int.prev(), Some(NumberSize::Smedium));
        assert_eq!(NumberSize::by_bits(9), Some(NumberSize::Short));
        assert_eq!(NumberSize::by_bits(65), None);
    }

    #[test]
    fn test_overflow() {
        let mut out = Vec::new();
        let err = NumberSize::Short.write(&mut out, 70_000).unwrap_err();
        assert!(matches!(err, Error::WidthOverflow { value: 70_000, size: NumberSize::Short }));
        assert!(out.is_empty());
    }

    #[test]
    fn test_read_write() -> Result<()> {
        let mut out = Vec::new();
        NumberSize::Smedium.write(&mut out, 0xABCDEF)?;
        NumberSize::Void.write(&mut out, 0)?;
        NumberSize::Long.write(&mut out, u64::MAX)?;
        assert_eq!(out.len(), 11);

        let mut input = Cursor::new(out);
        assert_eq!(NumberSize::Smedium.read(&mut input)?, 0xABCDEF);
        assert_eq!(NumberSize::Void.read(&mut input)?, 0);
        assert_eq!(NumberSize::Long.read(&mut input)?, u64::MAX);
        Ok(())
    }
}
