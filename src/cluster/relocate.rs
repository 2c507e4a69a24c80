//! Chunk relocation
//!
//! Moving a chunk copies its body to a fresh chunk and repoints the single
//! reference that owns it. Allocator structures are searched first: the
//! root header, the user list, and the `next` field of every chunk in the
//! root and user chains. References held inside user records are found by
//! a `ReferenceWalker`.

use super::{invariant, Cluster};
use crate::alloc::{AllocRequest, Strategy};
use crate::chunk::{Chunk, ChunkPointer};
use crate::error::{Error, Result};
use crate::schema::{PointerFields, Record, RecordSchema};
use crate::store::ByteStore;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

/// Finds and rewrites references to a chunk that live outside the
/// allocator's own structures
pub trait ReferenceWalker<S: ByteStore> {
    /// Repoint the reference to `from` at `to` and persist its owner.
    /// Returns false when no reference was found.
    fn rewrite(&mut self, cluster: &mut Cluster<S>, from: ChunkPointer, to: ChunkPointer) -> Result<bool>;
}

/// Walks records of type `T`, starting from the user list (or explicit
/// roots) and optionally following their pointer fields to further records.
pub struct RecordWalker<T: Record> {
    schema: RecordSchema<T>,
    roots: Option<Vec<ChunkPointer>>,
    follow_links: bool,
}

impl<T: Record> RecordWalker<T> {
    pub fn new() -> Self {
        Self {
            schema: RecordSchema::new(),
            roots: None,
            follow_links: false,
        }
    }

    /// Start from `roots` instead of every user chunk
    pub fn with_roots(mut self, roots: Vec<ChunkPointer>) -> Self {
        self.roots = Some(roots);
        self
    }

    /// Also visit records reached through pointer fields
    pub fn with_links(mut self) -> Self {
        self.follow_links = true;
        self
    }
}

impl<T: Record> Default for RecordWalker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ByteStore, T: Record> ReferenceWalker<S> for RecordWalker<T> {
    fn rewrite(&mut self, cluster: &mut Cluster<S>, from: ChunkPointer, to: ChunkPointer) -> Result<bool> {
        let roots = match &self.roots {
            Some(roots) => roots.clone(),
            None => cluster.user_chunks().to_vec(),
        };
        let mut queue: VecDeque<ChunkPointer> = roots.into();
        let mut visited = HashSet::new();

        while let Some(pointer) = queue.pop_front() {
            // the moved record itself now lives at `to`
            let pointer = if pointer == from { to } else { pointer };
            if pointer.is_null() || !visited.insert(pointer) {
                continue;
            }
            let mut record = match cluster.read_record(&self.schema, pointer) {
                Ok(record) => record,
                Err(e) if is_foreign(&e) => {
                    debug!(chunk = %pointer, error = %e, "Skipping chunk that is not a record");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut links = Vec::new();
            let found = record.visit_pointer_fields(&mut |field| {
                if *field == from {
                    *field = to;
                    return true;
                }
                links.push(*field);
                false
            });
            if found {
                cluster.write_record(&self.schema, pointer, &record)?;
                debug!(owner = %pointer, from = %from, to = %to, "Rewrote record reference");
                return Ok(true);
            }
            if self.follow_links {
                queue.extend(links);
            }
        }
        Ok(false)
    }
}

/// Decode failures that mean the chunk simply holds something other than a `T`
fn is_foreign(error: &Error) -> bool {
    match error {
        Error::Io(io) => io.kind() == std::io::ErrorKind::UnexpectedEof,
        Error::IllegalBitValue { .. }
        | Error::BitCount { .. }
        | Error::WidthOverflow { .. }
        | Error::SizeMismatch { .. } => true,
        _ => false,
    }
}

/// Allocator structure holding the only reference to a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Holder {
    Header,
    UserList(usize),
    Chunk(Chunk),
}

impl<S: ByteStore> Cluster<S> {
    pub(crate) fn find_holder(&mut self, target: ChunkPointer) -> Result<Option<Holder>> {
        let mut header = self.header;
        if header.visit_pointer_fields(&mut |p| *p == target) {
            return Ok(Some(Holder::Header));
        }
        if let Some(index) = self.user_list.iter().position(|p| *p == target) {
            return Ok(Some(Holder::UserList(index)));
        }

        let mut heads = vec![self.header.free_root, self.header.user_root];
        heads.extend(self.user_list.iter().copied());
        for head in heads {
            for mut chunk in self.collect_next(head)? {
                if chunk.visit_pointer_fields(&mut |p| *p == target) {
                    return Ok(Some(Holder::Chunk(chunk)));
                }
            }
        }
        Ok(None)
    }

    fn rewrite_holder(&mut self, holder: Holder, from: ChunkPointer, to: ChunkPointer) -> Result<()> {
        match holder {
            Holder::Header => {
                self.header.visit_pointer_fields(&mut |p| {
                    if *p == from {
                        *p = to;
                        return true;
                    }
                    false
                });
                self.write_header()
            }
            Holder::UserList(index) => {
                self.user_list[index] = to;
                self.lists_dirty = true;
                Ok(())
            }
            Holder::Chunk(parent) => {
                let mut parent = self.get_chunk(parent.pointer)?;
                if !parent.can_point_to(to) {
                    return self.widen_next(parent, to);
                }
                parent.set_next(Some(to))?;
                self.write_chunk(&parent)
            }
        }
    }

    /// Rewrite `parent` with a `Long` next field pointing at `to`. Content
    /// past the shortened body must already have been copied to `to`.
    fn widen_next(&mut self, parent: Chunk, to: ChunkPointer) -> Result<()> {
        let mut wide = parent.widened()?;
        let mut kept = vec![0u8; wide.size as usize];
        self.store.read_at(parent.body_start(), &mut kept)?;
        wide.set_next(Some(to))?;
        self.write_chunk(&wide)?;
        self.store.write_at(wide.body_start(), &kept)?;
        debug!(chunk = %parent.pointer, next = %to, "Widened next pointer");
        Ok(())
    }

    /// Allocate a stand-in for `chunk` anywhere in the store, together with
    /// the tail of `parent` that no longer fits once its next field is widened
    fn alloc_past_parent(&mut self, chunk: &Chunk, parent: Chunk) -> Result<(Chunk, Vec<u8>)> {
        let parent = self.get_chunk(parent.pointer)?;
        let wide = parent.widened()?;
        let mut carried = vec![0u8; (parent.size - wide.size) as usize];
        self.store.read_at(parent.body_start() + wide.size, &mut carried)?;
        let request = AllocRequest::new(chunk.capacity + carried.len() as u64).with_next_size(chunk.next_size);
        let target = self
            .alloc_stand_in(chunk, &request)?
            .ok_or_else(|| invariant(format!("no chunk can take the place of {}", chunk.pointer)))?;
        Ok((target, carried))
    }

    /// Offsets in a chain follow capacities, so a chunk with a successor is
    /// replaced by an appended chunk of exactly the requested capacity
    fn alloc_stand_in(&mut self, chunk: &Chunk, request: &AllocRequest<'_>) -> Result<Option<Chunk>> {
        if chunk.next.is_some() {
            self.append_chunk(request)
        } else {
            self.alloc_with(request, Strategy::Auto)
        }
    }

    /// Fill `target` with `carried` followed by the content of `chunk`, then
    /// repoint the reference to `chunk`. False when no reference was found.
    fn take_place(
        &mut self,
        chunk: &Chunk,
        mut target: Chunk,
        carried: &[u8],
        holder: Option<Holder>,
        walker: Option<&mut dyn ReferenceWalker<S>>,
    ) -> Result<bool> {
        let carried_len = carried.len() as u64;
        self.store.write_at(target.body_start(), carried)?;
        self.store
            .transfer(chunk.body_start(), target.body_start() + carried_len, chunk.size)?;
        target.set_size(carried_len + chunk.size)?;
        target.set_next(chunk.next)?;
        target.user_data = chunk.user_data;
        self.write_chunk(&target)?;

        match (holder, walker) {
            (Some(holder), _) => {
                self.rewrite_holder(holder, chunk.pointer, target.pointer)?;
                Ok(true)
            }
            (None, Some(walker)) => walker.rewrite(self, chunk.pointer, target.pointer),
            (None, None) => Ok(false),
        }
    }

    /// Move the chunk at `from` to a new location and return it.
    ///
    /// The chunk must be referenced from the root header, the user list, or
    /// the `next` field of a chunk in a root or user chain.
    pub fn move_chunk(&mut self, from: ChunkPointer) -> Result<ChunkPointer> {
        self.relocate(from, None)
    }

    /// Like `move_chunk`, falling back to `walker` for references held
    /// inside records
    pub fn move_chunk_with(&mut self, from: ChunkPointer, walker: &mut dyn ReferenceWalker<S>) -> Result<ChunkPointer> {
        self.relocate(from, Some(walker))
    }

    fn relocate(&mut self, from: ChunkPointer, walker: Option<&mut dyn ReferenceWalker<S>>) -> Result<ChunkPointer> {
        self.safe_session(|c| {
            let chunk = c.get_chunk(from)?;
            if !chunk.used {
                return Err(invariant(format!("cannot move free chunk {}", from)));
            }
            let holder = c.find_holder(from)?;
            if holder.is_none() && walker.is_none() {
                return Err(invariant(format!("no reference to chunk {} found", from)));
            }

            let parent = match holder {
                Some(Holder::Chunk(parent)) => Some(parent),
                _ => None,
            };
            let approve = move |p: ChunkPointer| parent.map_or(true, |parent| parent.can_point_to(p));
            let request = AllocRequest::new(chunk.capacity)
                .with_next_size(chunk.next_size)
                .with_approval(&approve);
            let (target, carried) = match (c.alloc_stand_in(&chunk, &request)?, parent) {
                (Some(target), _) => (target, Vec::new()),
                // nothing the parent's next field can reach
                (None, Some(parent)) => c.alloc_past_parent(&chunk, parent)?,
                (None, None) => return Err(invariant(format!("no chunk can take the place of {}", from))),
            };

            let outcome = c.take_place(&chunk, target, &carried, holder, walker);
            if !matches!(outcome, Ok(true)) {
                let target = c.get_chunk(target.pointer)?;
                c.free_chunk(target)?;
                outcome?;
                return Err(invariant(format!("no reference to chunk {} found", from)));
            }

            let old = c.read_header(from)?;
            c.free_chunk(old)?;
            info!(from = %from, to = %target.pointer, size = chunk.size, carried = carried.len(), "Moved chunk");
            Ok(target.pointer)
        })
    }
}
