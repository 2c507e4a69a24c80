//! Root header
//!
//! The first bytes of every store: the magic marker, then a fixed-size
//! header naming the chunks that back the free list and the user list.

use crate::chunk::{width_for_extent, ChunkPointer};
use crate::codec::{EnumUniverse, NumberSize};
use crate::error::{Error, Result};
use crate::io::{ContentReader, ContentWriter};
use crate::schema::PointerFields;
use std::io::Cursor;

pub const MAGIC: &[u8; 7] = b"CHUNKDB";

pub const FORMAT_VERSION: u16 = 1;

pub const HEADER_OFFSET: u64 = 7;

/// Version, pointer width, two roots at up to 8 bytes each
pub const HEADER_SIZE: u64 = 2 + 1 + 8 + 8;

/// Offset of the first chunk in every store
pub const FIRST_CHUNK: u64 = HEADER_OFFSET + HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterHeader {
    pub version: u16,
    pub free_root: ChunkPointer,
    pub user_root: ChunkPointer,
}

impl ClusterHeader {
    pub fn new(free_root: ChunkPointer, user_root: ChunkPointer) -> Self {
        Self {
            version: FORMAT_VERSION,
            free_root,
            user_root,
        }
    }

    /// Width used for both roots
    pub fn pointer_width(&self) -> NumberSize {
        width_for_extent(self.free_root.get().max(self.user_root.get()))
    }

    /// Exactly `HEADER_SIZE` bytes, zero padded
    pub fn encode(&self) -> Result<Vec<u8>> {
        let width = self.pointer_width();
        let mut out = Vec::with_capacity(HEADER_SIZE as usize);
        out.write_word(self.version as u64, 2)?;
        EnumUniverse::<NumberSize>::new().write_single(&mut out, Some(width))?;
        width.write(&mut out, self.free_root.get())?;
        width.write(&mut out, self.user_root.get())?;
        out.resize(HEADER_SIZE as usize, 0);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut input = Cursor::new(bytes);
        let version = input.read_word(2)? as u16;
        if version != FORMAT_VERSION {
            return Err(Error::MalformedHeader(format!(
                "unsupported version {}",
                version
            )));
        }
        let width = EnumUniverse::<NumberSize>::new()
            .read_single(&mut input)
            .map_err(|e| Error::MalformedHeader(format!("pointer width: {}", e)))?
            .filter(|w| *w != NumberSize::Void)
            .ok_or_else(|| Error::MalformedHeader("void pointer width".into()))?;
        let free_root = ChunkPointer::new(width.read(&mut input)?);
        let user_root = ChunkPointer::new(width.read(&mut input)?);
        Ok(Self {
            version,
            free_root,
            user_root,
        })
    }
}

impl PointerFields for ClusterHeader {
    fn visit_pointer_fields(&mut self, visit: &mut dyn FnMut(&mut ChunkPointer) -> bool) -> bool {
        visit(&mut self.free_root) || visit(&mut self.user_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() -> Result<()> {
        let header = ClusterHeader::new(ChunkPointer::new(26), ChunkPointer::new(70_000));
        let bytes = header.encode()?;
        assert_eq!(bytes.len() as u64, HEADER_SIZE);
        assert_eq!(&bytes[..2], &[1, 0]);
        assert_eq!(header.pointer_width(), NumberSize::Smedium);
        assert_eq!(ClusterHeader::decode(&bytes)?, header);
        Ok(())
    }

    #[test]
    fn test_bad_version() -> Result<()> {
        let mut bytes = ClusterHeader::new(ChunkPointer::new(26), ChunkPointer::new(40)).encode()?;
        bytes[0] = 9;
        assert!(matches!(
            ClusterHeader::decode(&bytes),
            Err(Error::MalformedHeader(_))
        ));
        Ok(())
    }

    #[test]
    fn test_corrupt_width() -> Result<()> {
        let mut bytes = ClusterHeader::new(ChunkPointer::new(26), ChunkPointer::new(40)).encode()?;
        bytes[2] = 0x01;
        assert!(matches!(
            ClusterHeader::decode(&bytes),
            Err(Error::MalformedHeader(_))
        ));
        Ok(())
    }

    #[test]
    fn test_visit_roots() {
        let mut header = ClusterHeader::new(ChunkPointer::new(26), ChunkPointer::new(40));
        let target = ChunkPointer::new(40);
        assert!(header.visit_pointer_fields(&mut |p| {
            if *p == target {
                *p = ChunkPointer::new(500);
                true
            } else {
                false
            }
        }));
        assert_eq!(header.user_root, ChunkPointer::new(500));
        assert_eq!(header.free_root, ChunkPointer::new(26));
    }
}
