//! Byte-oriented reader/writer helpers
//!
//! Every codec in the crate talks to plain `std::io::Read`/`Write`; these
//! extension traits add the fixed-width integer and bulk routines on top.
//! Multi-byte words are little-endian.

use crate::error::Result;
use std::io::{Read, Write};

/// Byte-level reads on top of `Read`
pub trait ContentReader: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Read `len` bytes into a fresh buffer
    fn read_n(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a little-endian word of `bytes` bytes (0..=8)
    fn read_word(&mut self, bytes: usize) -> Result<u64> {
        debug_assert!(bytes <= 8);
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf[..bytes])?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Copy `len` bytes into `out`
    fn transfer_to<W: Write + ?Sized>(&mut self, out: &mut W, len: u64) -> Result<()>
    where
        Self: Sized,
    {
        let copied = std::io::copy(&mut self.take(len), out)?;
        if copied != len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("transfer ended after {} of {} bytes", copied, len),
            )
            .into());
        }
        Ok(())
    }
}

impl<R: Read + ?Sized> ContentReader for R {}

/// Byte-level writes on top of `Write`
pub trait ContentWriter: Write {
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])?;
        Ok(())
    }

    /// Write the low `bytes` bytes of `value`, little-endian
    fn write_word(&mut self, value: u64, bytes: usize) -> Result<()> {
        debug_assert!(bytes <= 8);
        self.write_all(&value.to_le_bytes()[..bytes])?;
        Ok(())
    }
}

impl<W: Write + ?Sized> ContentWriter for W {}

/// Writer adapter that counts bytes passed through
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_word_layout() -> Result<()> {
        let mut out = Vec::new();
        out.write_word(0x0102_0304, 3)?;
        assert_eq!(out, vec![0x04, 0x03, 0x02]);

        let mut input = Cursor::new(out);
        assert_eq!(input.read_word(3)?, 0x02_0304);
        Ok(())
    }

    #[test]
    fn test_transfer_short_input() {
        let mut input = Cursor::new(vec![1u8, 2, 3]);
        let mut out = Vec::new();
        assert!(input.transfer_to(&mut out, 5).is_err());
    }

    #[test]
    fn test_counting_writer() -> Result<()> {
        let mut w = CountingWriter::new(Vec::new());
        w.write_u8(7)?;
        w.write_word(u64::MAX, 8)?;
        assert_eq!(w.written(), 9);
        assert_eq!(w.into_inner().len(), 9);
        Ok(())
    }
}
