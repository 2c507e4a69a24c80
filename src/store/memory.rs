//! In-memory store

use super::{out_of_bounds, ByteStore};
use crate::error::Result;
use bytes::BytesMut;

/// Byte store held in a growable buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: BytesMut,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: BytesMut::from(&data[..]),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Raw access for tests that need to corrupt bytes on purpose
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl ByteStore for MemoryStore {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset.saturating_add(buf.len() as u64);
        if end > self.len() {
            return Err(out_of_bounds(offset, buf.len() as u64, self.len()));
        }
        buf.copy_from_slice(&self.data[offset as usize..end as usize]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset as usize + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
