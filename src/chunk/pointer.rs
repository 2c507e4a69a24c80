//! Chunk pointers

use crate::codec::{EnumUniverse, NumberSize};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// Absolute byte offset of a chunk header within the store.
///
/// Offset 0 holds the magic marker, so no chunk ever lives there and the
/// zero pointer doubles as "no chunk" in persisted lists and next fields.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChunkPointer(u64);

impl ChunkPointer {
    pub const NULL: ChunkPointer = ChunkPointer(0);

    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `None` for the zero sentinel
    pub fn non_null(self) -> Option<ChunkPointer> {
        (!self.is_null()).then_some(self)
    }

    /// Smallest width class that can hold this pointer
    pub fn width(self) -> NumberSize {
        NumberSize::by_size(self.0)
    }

    /// Self-describing encoding: one width byte, then the offset at that width
    pub fn write_dynamic<W: Write + ?Sized>(self, out: &mut W) -> Result<()> {
        let width = self.width();
        EnumUniverse::<NumberSize>::new().write_single(out, Some(width))?;
        width.write(out, self.0)
    }

    pub fn read_dynamic<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        let width = EnumUniverse::<NumberSize>::new()
            .read_single(input)?
            .ok_or(Error::IllegalBitValue { bit: 0 })?;
        Ok(Self(width.read(input)?))
    }

    /// Encoded length of `write_dynamic`
    pub fn dynamic_size(self) -> u64 {
        1 + self.width().bytes() as u64
    }
}

impl From<u64> for ChunkPointer {
    fn from(offset: u64) -> Self {
        Self(offset)
    }
}

impl fmt::Display for ChunkPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_null_sentinel() {
        assert!(ChunkPointer::NULL.is_null());
        assert_eq!(ChunkPointer::default(), ChunkPointer::NULL);
        assert_eq!(ChunkPointer::new(0).non_null(), None);
        assert_eq!(ChunkPointer::new(26).non_null(), Some(ChunkPointer::new(26)));
    }

    #[test]
    fn test_display() {
        assert_eq!(ChunkPointer::new(1024).to_string(), "*1024");
    }

    #[test]
    fn test_dynamic_encoding() -> Result<()> {
        let mut out = Vec::new();
        for offset in [0u64, 26, 300, 1 << 40] {
            ChunkPointer::new(offset).write_dynamic(&mut out)?;
        }
        assert_eq!(out.len() as u64, 1 + 2 + 3 + 7);

        let mut input = Cursor::new(out);
        for offset in [0u64, 26, 300, 1 << 40] {
            assert_eq!(ChunkPointer::read_dynamic(&mut input)?.get(), offset);
        }
        Ok(())
    }
}
