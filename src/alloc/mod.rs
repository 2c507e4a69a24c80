//! Chunk allocation
//!
//! Two strategies back every allocation. Append growth places a new chunk
//! at the end of the store and, on free, pops the last chunk back off.
//! Free-list reuse hands out a free chunk that fits (or splits the tail off
//! a larger one) and, on free, merges with free neighbours. `Auto` tries
//! reuse first and falls back to append growth.

mod append;
mod reuse;

use crate::chunk::{Chunk, ChunkPointer, MIN_CAPACITY};
use crate::cluster::{invariant, Cluster, Holder};
use crate::codec::NumberSize;
use crate::error::Result;
use crate::store::ByteStore;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    AppendGrowth,
    FreeListReuse,
    #[default]
    Auto,
}

/// What to allocate
#[derive(Clone, Copy)]
pub struct AllocRequest<'a> {
    pub capacity: u64,
    /// Width of the next field; defaults to the body width
    pub next_size: Option<NumberSize>,
    pub user_data: bool,
    approve: Option<&'a dyn Fn(ChunkPointer) -> bool>,
}

impl<'a> AllocRequest<'a> {
    /// Request `capacity` body bytes with the default next width
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            next_size: None,
            user_data: false,
            approve: None,
        }
    }

    /// Require a next field of exactly this width
    pub fn with_next_size(mut self, next_size: NumberSize) -> Self {
        self.next_size = Some(next_size);
        self
    }

    /// Mark the chunk as user data and record it in the user list
    pub fn as_user_data(mut self) -> Self {
        self.user_data = true;
        self
    }

    /// Only accept chunks whose pointer passes `approve`
    pub fn with_approval(mut self, approve: &'a dyn Fn(ChunkPointer) -> bool) -> Self {
        self.approve = Some(approve);
        self
    }

    /// Whether `pointer` passes the approval predicate, if any
    pub fn approves(&self, pointer: ChunkPointer) -> bool {
        self.approve.map_or(true, |approve| approve(pointer))
    }
}

impl fmt::Debug for AllocRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocRequest")
            .field("capacity", &self.capacity)
            .field("next_size", &self.next_size)
            .field("user_data", &self.user_data)
            .field("approve", &self.approve.is_some())
            .finish()
    }
}

impl<S: ByteStore> Cluster<S> {
    /// Allocate an internal chunk of at least `capacity` body bytes
    pub fn alloc(&mut self, capacity: u64) -> Result<Chunk> {
        self.alloc_chunk(&AllocRequest::new(capacity))
    }

    /// Allocate a chunk and record it in the user list
    pub fn alloc_user(&mut self, capacity: u64) -> Result<Chunk> {
        self.alloc_chunk(&AllocRequest::new(capacity).as_user_data())
    }

    pub(crate) fn alloc_chunk(&mut self, request: &AllocRequest<'_>) -> Result<Chunk> {
        self.alloc_with(request, Strategy::Auto)?.ok_or_else(|| {
            invariant(format!(
                "no chunk of {} bytes could be allocated",
                request.capacity
            ))
        })
    }

    /// Allocate with an explicit strategy.
    ///
    /// Capacities below `MIN_CAPACITY` are rounded up, so any chunk can
    /// later widen its next field in place. `None` when the strategy cannot
    /// satisfy the request, for instance when the approval predicate
    /// rejects every candidate.
    pub fn alloc_with(&mut self, request: &AllocRequest<'_>, strategy: Strategy) -> Result<Option<Chunk>> {
        let mut request = *request;
        request.capacity = request.capacity.max(MIN_CAPACITY);
        self.safe_session(|c| {
            let chunk = match strategy {
                Strategy::AppendGrowth => c.append_chunk(&request)?,
                Strategy::FreeListReuse => c.reuse_chunk(&request)?,
                Strategy::Auto => match c.reuse_chunk(&request)? {
                    Some(chunk) => Some(chunk),
                    None => c.append_chunk(&request)?,
                },
            };
            if let Some(chunk) = &chunk {
                if chunk.user_data {
                    c.user_list.push(chunk.pointer);
                    c.lists_dirty = true;
                }
                debug!(
                    chunk = %chunk.pointer,
                    capacity = chunk.capacity,
                    requested = request.capacity,
                    ?strategy,
                    "Allocated chunk"
                );
            }
            Ok(chunk)
        })
    }

    /// Free the chain starting at `head`.
    ///
    /// `head` must be the start of a chain; freeing a continuation on its
    /// own would leave its predecessor pointing at free space.
    pub fn free(&mut self, head: ChunkPointer) -> Result<()> {
        if self.is_root(head) {
            return Err(invariant(format!("cannot free list root {}", head)));
        }
        self.safe_session(|c| {
            if let Some(Holder::Chunk(parent)) = c.find_holder(head)? {
                return Err(invariant(format!(
                    "chunk {} continues the chain of {} and cannot be freed on its own",
                    head, parent.pointer
                )));
            }
            let chain = c.collect_next(head)?;
            if chain[0].user_data {
                c.user_list.retain(|p| *p != head);
                c.lists_dirty = true;
            }
            for chunk in chain.iter().rev() {
                let chunk = c.get_chunk(chunk.pointer)?;
                c.free_chunk(chunk)?;
            }
            debug!(head = %head, chunks = chain.len(), "Freed chain");
            Ok(())
        })
    }

    /// Release one chunk: pop it when it ends the store, otherwise hand it
    /// to the free list
    pub(crate) fn free_chunk(&mut self, chunk: Chunk) -> Result<()> {
        if !chunk.used {
            return Err(invariant(format!("chunk {} is already free", chunk.pointer)));
        }
        self.cache.remove(chunk.pointer);
        if chunk.body_end() == self.store.len() {
            self.pop_chunk(chunk)
        } else {
            self.release_to_free_list(chunk)
        }
    }
}
