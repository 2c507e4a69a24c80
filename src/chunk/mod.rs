//! Chunk headers
//!
//! Every chunk starts with a header followed by `capacity` body bytes:
//!
//! ```text
//! +----------------+-----------+-----------+-----------+----------------+
//! | flags (2)      | capacity  | size      | next      | body ...       |
//! |                | body width| body width| next width| capacity bytes |
//! +----------------+-----------+-----------+-----------+----------------+
//! ```
//!
//! The flag register holds the body and next width classes (4 bits each),
//! `used` and `user_data`, padded with ones. Widths are picked when the
//! chunk is created and never change afterwards.

mod pointer;

pub use pointer::ChunkPointer;

use crate::codec::{BitReader, BitWriter, EnumUniverse, FlagReader, FlagWriter, NumberSize};
use crate::error::{Error, Result};
use crate::schema::PointerFields;
use std::io::Read;

/// Width of the flag register
pub const FLAG_SIZE: NumberSize = NumberSize::Short;

/// Largest header any chunk can have
pub const MAX_HEADER_SIZE: u64 = FLAG_SIZE.bytes() as u64 + 3 * 8;

/// Smallest body a chunk is created with; enough to give up room for a
/// `Long` next field and still keep one byte
pub const MIN_CAPACITY: u64 = NumberSize::Long.bytes() as u64 + 1;

/// Width class for a chunk whose header and body end before `extent`
pub fn width_for_extent(extent: u64) -> NumberSize {
    NumberSize::by_size(extent).max(NumberSize::Byte)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub(crate) pointer: ChunkPointer,
    pub(crate) body_num_size: NumberSize,
    pub(crate) next_size: NumberSize,
    pub(crate) capacity: u64,
    pub(crate) size: u64,
    pub(crate) next: Option<ChunkPointer>,
    pub(crate) used: bool,
    pub(crate) user_data: bool,
}

impl Chunk {
    /// A fresh, used, empty chunk
    pub fn new(
        pointer: ChunkPointer,
        body_num_size: NumberSize,
        next_size: NumberSize,
        capacity: u64,
    ) -> Result<Self> {
        if body_num_size == NumberSize::Void {
            return Err(Error::MalformedChunk {
                pointer,
                reason: "body width cannot be void".into(),
            });
        }
        body_num_size.ensure_can_fit(capacity)?;
        Ok(Self {
            pointer,
            body_num_size,
            next_size,
            capacity,
            size: 0,
            next: None,
            used: true,
            user_data: false,
        })
    }

    /// Header length for the given field widths
    pub fn header_size_for(body_num_size: NumberSize, next_size: NumberSize) -> u64 {
        (FLAG_SIZE.bytes() + 2 * body_num_size.bytes() + next_size.bytes()) as u64
    }

    /// Offset of the header
    pub fn pointer(&self) -> ChunkPointer {
        self.pointer
    }

    /// Body bytes reserved
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Body bytes holding content
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Following chunk of the chain, if any
    pub fn next(&self) -> Option<ChunkPointer> {
        self.next
    }

    /// False while the chunk sits on the free list
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Whether the user list owns the chunk
    pub fn is_user_data(&self) -> bool {
        self.user_data
    }

    /// Width of the capacity and size fields
    pub fn body_num_size(&self) -> NumberSize {
        self.body_num_size
    }

    /// Width of the next field
    pub fn next_size(&self) -> NumberSize {
        self.next_size
    }

    /// Encoded header length
    pub fn header_size(&self) -> u64 {
        Self::header_size_for(self.body_num_size, self.next_size)
    }

    /// First body byte
    pub fn body_start(&self) -> u64 {
        self.pointer.get() + self.header_size()
    }

    /// First byte after the body
    pub fn body_end(&self) -> u64 {
        self.body_start() + self.capacity
    }

    /// Capacity left after the content
    pub fn available(&self) -> u64 {
        self.capacity - self.size
    }

    /// Whether `target` fits this chunk's next field
    pub fn can_point_to(&self, target: ChunkPointer) -> bool {
        self.next_size != NumberSize::Void && self.next_size.can_fit(target.get())
    }

    /// The same chunk with a `Long` next field, its body shortened by the
    /// extra header bytes. Content past the new capacity is cut off.
    pub(crate) fn widened(&self) -> Result<Chunk> {
        let shrink = Self::header_size_for(self.body_num_size, NumberSize::Long) - self.header_size();
        if self.capacity <= shrink {
            return Err(Error::Invariant(format!(
                "chunk {} is too small to widen its next pointer",
                self.pointer
            )));
        }
        let mut wide = *self;
        wide.next_size = NumberSize::Long;
        wide.capacity -= shrink;
        wide.size = wide.size.min(wide.capacity);
        Ok(wide)
    }

    pub(crate) fn set_size(&mut self, size: u64) -> Result<()> {
        if size > self.capacity {
            return Err(Error::Invariant(format!(
                "size {} exceeds capacity {} of chunk {}",
                size, self.capacity, self.pointer
            )));
        }
        self.size = size;
        Ok(())
    }

    pub(crate) fn set_capacity(&mut self, capacity: u64) -> Result<()> {
        self.body_num_size.ensure_can_fit(capacity)?;
        if self.size > capacity {
            return Err(Error::Invariant(format!(
                "capacity {} is below size {} of chunk {}",
                capacity, self.size, self.pointer
            )));
        }
        self.capacity = capacity;
        Ok(())
    }

    pub(crate) fn set_next(&mut self, next: Option<ChunkPointer>) -> Result<()> {
        if let Some(target) = next {
            if !self.can_point_to(target) {
                return Err(Error::WidthOverflow {
                    value: target.get(),
                    size: self.next_size,
                });
            }
        }
        self.next = next;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let universe = EnumUniverse::<NumberSize>::new();
        let mut flags = FlagWriter::auto_pop(FLAG_SIZE, Vec::with_capacity(self.header_size() as usize));
        universe.write(&mut flags, self.body_num_size)?;
        universe.write(&mut flags, self.next_size)?;
        flags.write_bool(self.used)?;
        flags.write_bool(self.user_data)?;
        let mut out = flags.finish()?;

        self.body_num_size.write(&mut out, self.capacity)?;
        self.body_num_size.write(&mut out, self.size)?;
        self.next_size
            .write(&mut out, self.next.map_or(0, ChunkPointer::get))?;
        Ok(out)
    }

    pub fn decode<R: Read + ?Sized>(pointer: ChunkPointer, input: &mut R) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedChunk { pointer, reason };

        let universe = EnumUniverse::<NumberSize>::new();
        let mut flags = FlagReader::read_from(FLAG_SIZE, input)?;
        let body_num_size = universe
            .read(&mut flags)
            .map_err(|e| malformed(format!("body width: {}", e)))?;
        let next_size = universe
            .read(&mut flags)
            .map_err(|e| malformed(format!("next width: {}", e)))?;
        let used = flags.read_bool()?;
        let user_data = flags.read_bool()?;
        flags
            .check_rest_all_one_and_throw()
            .map_err(|e| malformed(format!("flag padding: {}", e)))?;
        if body_num_size == NumberSize::Void {
            return Err(malformed("body width cannot be void".into()));
        }

        let capacity = body_num_size.read(input)?;
        let size = body_num_size.read(input)?;
        let next = ChunkPointer::new(next_size.read(input)?).non_null();
        if size > capacity {
            return Err(malformed(format!("size {} exceeds capacity {}", size, capacity)));
        }

        Ok(Self {
            pointer,
            body_num_size,
            next_size,
            capacity,
            size,
            next,
            used,
            user_data,
        })
    }
}

impl PointerFields for Chunk {
    fn visit_pointer_fields(&mut self, visit: &mut dyn FnMut(&mut ChunkPointer) -> bool) -> bool {
        match self.next.as_mut() {
            Some(next) => visit(next),
            None => false,
        }
    }
}
