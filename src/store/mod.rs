//! Flat byte stores
//!
//! A cluster lives in one contiguous, randomly addressable byte region.
//! `ByteStore` is that region: positional reads and writes, resizing and
//! durability. Growing a store zero-fills the new tail.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::{Error, Result};

/// Block size used by the provided bulk routines
const BLOCK_SIZE: usize = 4096;

pub trait ByteStore {
    /// Current length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from `offset`; reading past the end fails
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`, extending the store when it ends past `len()`
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Truncate or zero-extend to exactly `len` bytes
    fn set_len(&mut self, len: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Overwrite `[offset, offset + len)` with zeros
    fn zero(&mut self, offset: u64, len: u64) -> Result<()> {
        let block = [0u8; BLOCK_SIZE];
        let mut done = 0u64;
        while done < len {
            let step = (len - done).min(BLOCK_SIZE as u64) as usize;
            self.write_at(offset + done, &block[..step])?;
            done += step as u64;
        }
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst` inside the store; ranges may overlap
    fn transfer(&mut self, src: u64, dst: u64, len: u64) -> Result<()> {
        if src == dst || len == 0 {
            return Ok(());
        }
        let end = src.checked_add(len).ok_or_else(|| out_of_bounds(src, len, self.len()))?;
        if end > self.len() {
            return Err(out_of_bounds(src, len, self.len()));
        }
        let mut block = vec![0u8; BLOCK_SIZE.min(len as usize)];
        let backward = dst > src && dst < end;
        let mut done = 0u64;
        while done < len {
            let step = (len - done).min(block.len() as u64);
            let at = if backward { len - done - step } else { done };
            let buf = &mut block[..step as usize];
            self.read_at(src + at, buf)?;
            self.write_at(dst + at, buf)?;
            done += step;
        }
        Ok(())
    }
}

pub(crate) fn out_of_bounds(offset: u64, len: u64, store_len: u64) -> Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!(
            "range {}..{} is outside the store ({} bytes)",
            offset,
            offset.saturating_add(len),
            store_len
        ),
    )
    .into()
}
