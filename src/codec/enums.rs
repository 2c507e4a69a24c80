//! Bit-width-optimal codec for closed value sets

use super::bits::{ones, BitReader, BitWriter, MAX_BITS};
use super::flags::{read_single_ordinal, write_single_ordinal};
use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::marker::PhantomData;

/// A closed set of values with stable ordinals
pub trait Enumerated: Copy + 'static {
    /// Every variant, indexed by ordinal
    const VARIANTS: &'static [Self];

    fn ordinal(&self) -> usize;
}

/// Bits needed to tell `variants` values apart, plus one slot for null
pub fn bit_width(variants: usize, nullable: bool) -> u32 {
    let count = variants + nullable as usize;
    if count <= 1 {
        1
    } else {
        usize::BITS - (count - 1).leading_zeros()
    }
}

/// Reads and writes ordinals of `E` at the minimum bit width.
///
/// Nullable universes reserve raw value 0 for null and shift ordinals by one.
#[derive(Debug, Clone, Copy)]
pub struct EnumUniverse<E: Enumerated> {
    nullable: bool,
    bits: u32,
    _marker: PhantomData<E>,
}

impl<E: Enumerated> EnumUniverse<E> {
    pub fn new() -> Self {
        Self::with_nullable(false)
    }

    pub fn nullable() -> Self {
        Self::with_nullable(true)
    }

    fn with_nullable(nullable: bool) -> Self {
        Self {
            nullable,
            bits: bit_width(E::VARIANTS.len(), nullable),
            _marker: PhantomData,
        }
    }

    pub fn bit_size(&self) -> u32 {
        self.bits
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Values packed into one 63-bit window by the array codec
    pub fn per_window(&self) -> usize {
        (MAX_BITS / self.bits) as usize
    }

    fn encode(&self, value: Option<E>) -> Result<u64> {
        match (value, self.nullable) {
            (Some(v), false) => Ok(v.ordinal() as u64),
            (Some(v), true) => Ok(v.ordinal() as u64 + 1),
            (None, true) => Ok(0),
            (None, false) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "null written to a non-nullable universe",
            )
            .into()),
        }
    }

    fn decode(&self, raw: u64, bit: u64) -> Result<Option<E>> {
        let index = if self.nullable {
            match raw {
                0 => return Ok(None),
                n => n - 1,
            }
        } else {
            raw
        };
        E::VARIANTS
            .get(index as usize)
            .copied()
            .map(Some)
            .ok_or(Error::IllegalBitValue { bit })
    }

    fn require(&self, value: Option<E>, bit: u64) -> Result<E> {
        value.ok_or(Error::IllegalBitValue { bit })
    }

    pub fn write<W: BitWriter + ?Sized>(&self, out: &mut W, value: E) -> Result<()> {
        out.write_bits(self.encode(Some(value))?, self.bits)
    }

    pub fn read<R: BitReader + ?Sized>(&self, input: &mut R) -> Result<E> {
        let bit = input.bits_read();
        let raw = input.read_bits(self.bits)?;
        let value = self.decode(raw, bit)?;
        self.require(value, bit)
    }

    pub fn write_nullable<W: BitWriter + ?Sized>(&self, out: &mut W, value: Option<E>) -> Result<()> {
        out.write_bits(self.encode(value)?, self.bits)
    }

    pub fn read_nullable<R: BitReader + ?Sized>(&self, input: &mut R) -> Result<Option<E>> {
        let bit = input.bits_read();
        let raw = input.read_bits(self.bits)?;
        self.decode(raw, bit)
    }

    /// Write `values` packed `per_window()` at a time, LSB-first
    pub fn write_array<W: BitWriter + ?Sized>(&self, out: &mut W, values: &[E]) -> Result<()> {
        for window in values.chunks(self.per_window()) {
            let mut packed = 0u64;
            for (i, value) in window.iter().enumerate() {
                packed |= self.encode(Some(*value))? << (i as u32 * self.bits);
            }
            out.write_bits(packed, window.len() as u32 * self.bits)?;
        }
        Ok(())
    }

    pub fn read_array<R: BitReader + ?Sized>(&self, input: &mut R, len: usize) -> Result<Vec<E>> {
        let mut out = Vec::with_capacity(len);
        let mut left = len;
        while left > 0 {
            let count = left.min(self.per_window());
            let start = input.bits_read();
            let packed = input.read_bits(count as u32 * self.bits)?;
            for i in 0..count {
                let shift = i as u32 * self.bits;
                let raw = (packed >> shift) & ones(self.bits);
                let bit = start + shift as u64;
                let value = self.decode(raw, bit)?;
                out.push(self.require(value, bit)?);
            }
            left -= count;
        }
        Ok(out)
    }

    /// Standalone value with its own integrity padding (see `flags`)
    pub fn write_single<W: Write + ?Sized>(&self, out: &mut W, value: Option<E>) -> Result<()> {
        write_single_ordinal(out, self.encode(value)?, self.bits)
    }

    pub fn read_single<R: Read + ?Sized>(&self, input: &mut R) -> Result<Option<E>> {
        let raw = read_single_ordinal(input, self.bits)?;
        self.decode(raw, 0)
    }
}

impl<E: Enumerated> Default for EnumUniverse<E> {
    fn default() -> Self {
        Self::new()
    }
}
