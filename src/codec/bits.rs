//! Bit-granular readers and writers
//!
//! Bits are packed LSB-first: stream bit `i` is bit `i % 8` of byte `i / 8`.
//! A finished stream is padded to a whole byte with one-bits, and readers
//! verify that padding, which is how truncated or shifted streams get caught.

use crate::error::{Error, Result};
use crate::io::ContentReader;
use std::io::{Read, Write};

/// Largest bit count a single `read_bits`/`write_bits` call accepts
pub const MAX_BITS: u32 = 63;

/// Mask with the low `count` bits set
pub(crate) fn ones(count: u32) -> u64 {
    if count >= 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

/// Index of the lowest zero bit in the low `width` bits of `value`.
///
/// Binary search over the window; the caller guarantees a zero exists.
pub(crate) fn first_zero_bit(value: u64, width: u32) -> u32 {
    let (mut lo, mut hi) = (0u32, width);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        let span = ones(mid - lo);
        if (value >> lo) & span == span {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

pub(crate) fn check_count(count: u32) -> Result<()> {
    if count > MAX_BITS {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("bit count {} exceeds {}", count, MAX_BITS),
        )
        .into());
    }
    Ok(())
}

pub trait BitWriter {
    /// Write the low `count` bits of `value` (0 ≤ count ≤ 63)
    fn write_bits(&mut self, value: u64, count: u32) -> Result<()>;

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_bits(value as u64, 1)
    }

    fn write_bools(&mut self, values: &[bool]) -> Result<()> {
        for window in values.chunks(MAX_BITS as usize) {
            let packed = window
                .iter()
                .enumerate()
                .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << i));
            self.write_bits(packed, window.len() as u32)?;
        }
        Ok(())
    }

    fn fill_n_one(&mut self, count: u32) -> Result<()> {
        let mut left = count;
        while left > 0 {
            let step = left.min(MAX_BITS);
            self.write_bits(ones(step), step)?;
            left -= step;
        }
        Ok(())
    }
}

pub trait BitReader {
    /// Read `count` bits (0 ≤ count ≤ 63)
    fn read_bits(&mut self, count: u32) -> Result<u64>;

    /// Bits consumed so far, used to locate integrity failures
    fn bits_read(&self) -> u64;

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    fn read_bools(&mut self, len: usize) -> Result<Vec<bool>> {
        let mut out = Vec::with_capacity(len);
        let mut left = len;
        while left > 0 {
            let step = left.min(MAX_BITS as usize);
            let packed = self.read_bits(step as u32)?;
            out.extend((0..step).map(|i| (packed >> i) & 1 == 1));
            left -= step;
        }
        Ok(out)
    }

    /// Consume `count` bits that must all be ones.
    ///
    /// Fails with `Error::IllegalBitValue` naming the first zero bit.
    fn check_n_one(&mut self, count: u32) -> Result<()> {
        let mut left = count;
        while left > 0 {
            let step = left.min(MAX_BITS);
            let start = self.bits_read();
            let value = self.read_bits(step)?;
            if value != ones(step) {
                let bit = start + first_zero_bit(value, step) as u64;
                return Err(Error::IllegalBitValue { bit });
            }
            left -= step;
        }
        Ok(())
    }
}

/// Streaming bit writer over a byte sink, buffering up to 63 bits
pub struct BitOutputStream<W: Write> {
    out: W,
    buffer: u64,
    buffered: u32,
    written: u64,
    expected: Option<u64>,
}

impl<W: Write> BitOutputStream<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            buffer: 0,
            buffered: 0,
            written: 0,
            expected: None,
        }
    }

    /// Declare how many bits must be written before `finish`
    pub fn require_written(&mut self, bits: u64) {
        self.expected = Some(bits);
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn push(&mut self, value: u64, count: u32) {
        self.buffer |= (value & ones(count)) << self.buffered;
        self.buffered += count;
    }

    fn flush_bytes(&mut self) -> Result<()> {
        let whole = self.buffered / 8;
        if whole == 0 {
            return Ok(());
        }
        self.out
            .write_all(&self.buffer.to_le_bytes()[..whole as usize])?;
        self.buffer = if whole == 8 { 0 } else { self.buffer >> (whole * 8) };
        self.buffered -= whole * 8;
        Ok(())
    }

    /// Pad to a byte boundary with ones, verify the declared bit count and
    /// hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        if let Some(expected) = self.expected {
            if expected != self.written {
                return Err(Error::BitCount {
                    expected,
                    actual: self.written,
                });
            }
        }
        let pad = (8 - self.buffered % 8) % 8;
        self.push(ones(pad), pad);
        self.flush_bytes()?;
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> BitWriter for BitOutputStream<W> {
    fn write_bits(&mut self, value: u64, count: u32) -> Result<()> {
        check_count(count)?;
        if count == 0 {
            return Ok(());
        }
        if self.buffered + count > MAX_BITS {
            // fill the register, drain whole bytes, then take the remainder
            let first = MAX_BITS - self.buffered;
            self.push(value, first);
            self.flush_bytes()?;
            self.push(value >> first, count - first);
        } else {
            self.push(value, count);
        }
        self.written += count as u64;
        self.flush_bytes()
    }
}

/// Streaming bit reader over a byte source
pub struct BitInputStream<R: Read> {
    input: R,
    buffer: u64,
    buffered: u32,
    read: u64,
    expected: Option<u64>,
}

impl<R: Read> BitInputStream<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            buffer: 0,
            buffered: 0,
            read: 0,
            expected: None,
        }
    }

    /// Declare how many bits must be read before `finish`
    pub fn require_read(&mut self, bits: u64) {
        self.expected = Some(bits);
    }

    fn fill(&mut self, need: u32) -> Result<()> {
        while self.buffered < need {
            let byte = self.input.read_u8()?;
            self.buffer |= (byte as u64) << self.buffered;
            self.buffered += 8;
        }
        Ok(())
    }

    /// Verify the declared bit count and the one-bit padding of the
    /// current byte, then hand back the source.
    pub fn finish(mut self) -> Result<R> {
        if let Some(expected) = self.expected {
            if expected != self.read {
                return Err(Error::BitCount {
                    expected,
                    actual: self.read,
                });
            }
        }
        let pad = self.buffered % 8;
        self.check_n_one(pad)?;
        Ok(self.input)
    }
}

impl<R: Read> BitReader for BitInputStream<R> {
    fn read_bits(&mut self, count: u32) -> Result<u64> {
        check_count(count)?;
        if count == 0 {
            return Ok(0);
        }
        if count > 56 {
            let low = self.read_bits(32)?;
            let high = self.read_bits(count - 32)?;
            return Ok(low | (high << 32));
        }
        self.fill(count)?;
        let value = self.buffer & ones(count);
        self.buffer >>= count;
        self.buffered -= count;
        self.read += count as u64;
        Ok(value)
    }

    fn bits_read(&self) -> u64 {
        self.read
    }
}
