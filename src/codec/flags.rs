//! Fixed-capacity flag registers
//!
//! A `FlagWriter` packs small fields into exactly one `NumberSize`-wide
//! integer, known up front. `AutoPop` fills the unused high bits with ones
//! before exporting, the same padding convention `BitOutputStream` uses, so
//! `FlagReader::check_rest_all_one_and_throw` catches corrupt registers.

use super::bits::{check_count, first_zero_bit, ones, BitReader, BitWriter};
use super::number_size::NumberSize;
use crate::error::{Error, Result};
use crate::io::{ContentReader, ContentWriter};
use std::io::{Read, Write};

#[derive(Debug, Clone)]
pub struct FlagWriter {
    register: u64,
    size: NumberSize,
    written: u32,
}

impl FlagWriter {
    pub fn new(size: NumberSize) -> Self {
        Self {
            register: 0,
            size,
            written: 0,
        }
    }

    /// Writer that pads with ones and emits the register into `out` on `finish`
    pub fn auto_pop<W: Write>(size: NumberSize, out: W) -> AutoPop<W> {
        AutoPop {
            writer: Self::new(size),
            out,
        }
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn remaining(&self) -> u32 {
        self.size.bits() - self.written
    }

    pub fn fill_rest_one(&mut self) -> Result<()> {
        self.fill_n_one(self.remaining())
    }

    pub fn export(&self) -> u64 {
        self.register
    }

    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        self.size.write(out, self.register)
    }
}

impl BitWriter for FlagWriter {
    fn write_bits(&mut self, value: u64, count: u32) -> Result<()> {
        check_count(count)?;
        if count == 0 {
            return Ok(());
        }
        if count > self.remaining() {
            return Err(Error::BitCount {
                expected: self.size.bits() as u64,
                actual: (self.written + count) as u64,
            });
        }
        self.register |= (value & ones(count)) << self.written;
        self.written += count;
        Ok(())
    }
}

/// `FlagWriter` bound to a sink; padding happens on `finish`
pub struct AutoPop<W: Write> {
    writer: FlagWriter,
    out: W,
}

impl<W: Write> AutoPop<W> {
    pub fn finish(mut self) -> Result<W> {
        self.writer.fill_rest_one()?;
        self.writer.write_to(&mut self.out)?;
        Ok(self.out)
    }
}

impl<W: Write> BitWriter for AutoPop<W> {
    fn write_bits(&mut self, value: u64, count: u32) -> Result<()> {
        self.writer.write_bits(value, count)
    }
}

#[derive(Debug, Clone)]
pub struct FlagReader {
    register: u64,
    size: NumberSize,
    read: u32,
}

impl FlagReader {
    pub fn new(register: u64, size: NumberSize) -> Self {
        Self {
            register,
            size,
            read: 0,
        }
    }

    /// Read a `size`-wide register from `input`
    pub fn read_from<R: Read + ?Sized>(size: NumberSize, input: &mut R) -> Result<Self> {
        Ok(Self::new(size.read(input)?, size))
    }

    pub fn remaining(&self) -> u32 {
        self.size.bits() - self.read
    }

    /// Every bit not yet read must be one
    pub fn check_rest_all_one_and_throw(&mut self) -> Result<()> {
        self.check_n_one(self.remaining())
    }
}

impl BitReader for FlagReader {
    fn read_bits(&mut self, count: u32) -> Result<u64> {
        check_count(count)?;
        if count == 0 {
            return Ok(0);
        }
        if count > self.remaining() {
            return Err(Error::BitCount {
                expected: self.size.bits() as u64,
                actual: (self.read + count) as u64,
            });
        }
        let value = (self.register >> self.read) & ones(count);
        self.read += count;
        Ok(value)
    }

    fn bits_read(&self) -> u64 {
        self.read as u64
    }
}

/// Write an ordinal of `bits` width as a standalone value.
///
/// When the ordinal and an equally wide integrity mask fit in one byte the
/// ordinal takes the low bits and every high bit is one; wider values go
/// through an `AutoPop` register.
pub(crate) fn write_single_ordinal<W: Write + ?Sized>(out: &mut W, ordinal: u64, bits: u32) -> Result<()> {
    if bits * 2 <= 8 {
        out.write_u8((ordinal & ones(bits)) as u8 | (0xFFu8 << bits))
    } else {
        let size = register_for(bits)?;
        let mut writer = FlagWriter::new(size);
        writer.write_bits(ordinal, bits)?;
        writer.fill_rest_one()?;
        writer.write_to(out)
    }
}

pub(crate) fn read_single_ordinal<R: Read + ?Sized>(input: &mut R, bits: u32) -> Result<u64> {
    if bits * 2 <= 8 {
        let byte = input.read_u8()? as u64;
        let high = byte >> bits;
        let mask = ones(8 - bits);
        if high != mask {
            let bit = bits + first_zero_bit(high, 8 - bits);
            return Err(Error::IllegalBitValue { bit: bit as u64 });
        }
        Ok(byte & ones(bits))
    } else {
        let mut reader = FlagReader::read_from(register_for(bits)?, input)?;
        let ordinal = reader.read_bits(bits)?;
        reader.check_rest_all_one_and_throw()?;
        Ok(ordinal)
    }
}

fn register_for(bits: u32) -> Result<NumberSize> {
    NumberSize::by_bits(bits).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} bits do not fit a register", bits),
        )
        .into()
    })
}

pub fn write_single_bool<W: Write + ?Sized>(out: &mut W, value: bool) -> Result<()> {
    write_single_ordinal(out, value as u64, 1)
}

pub fn read_single_bool<R: Read + ?Sized>(input: &mut R) -> Result<bool> {
    Ok(read_single_ordinal(input, 1)? == 1)
}
