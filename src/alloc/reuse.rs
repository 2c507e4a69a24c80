//! Free-list reuse: hand out free chunks, split large ones, and merge freed
//! chunks with free neighbours

use super::AllocRequest;
use crate::chunk::{width_for_extent, Chunk, ChunkPointer};
use crate::cluster::{invariant, Cluster};
use crate::error::Result;
use crate::store::ByteStore;
use tracing::debug;

impl<S: ByteStore> Cluster<S> {
    /// Claim a free chunk that fits `request`, or split one.
    ///
    /// A candidate fits when its spare capacity is too small to split off
    /// as a chunk of its own; the one with the least spare wins. Otherwise
    /// the largest free chunk that can give up its tail is split.
    pub(crate) fn reuse_chunk(&mut self, request: &AllocRequest<'_>) -> Result<Option<Chunk>> {
        let tail_width = width_for_extent(self.store.len());
        let tail_next = request.next_size.unwrap_or(tail_width);
        let tail_header = Chunk::header_size_for(tail_width, tail_next);
        let split_threshold = tail_header + self.config.min_chunk_size;

        let mut best: Option<(usize, Chunk)> = None;
        let mut largest: Option<(usize, Chunk)> = None;
        for (slot, pointer) in self.free_list.entries() {
            let free = self.read_header(pointer)?;
            if free.used {
                return Err(invariant(format!("free list entry {} is in use", pointer)));
            }
            if free.capacity < request.capacity {
                continue;
            }

            let spare = free.capacity - request.capacity;
            let next_fits = request.next_size.map_or(true, |n| free.next_size >= n);
            if spare < split_threshold && next_fits && request.approves(pointer) {
                if best.map_or(true, |(_, b)| spare < b.capacity - request.capacity) {
                    best = Some((slot, free));
                }
                if spare == 0 {
                    break;
                }
            }
            if free.capacity >= request.capacity + split_threshold
                && largest.map_or(true, |(_, l)| free.capacity > l.capacity)
            {
                largest = Some((slot, free));
            }
        }

        if let Some((slot, mut free)) = best {
            self.free_list.take_slot(slot);
            self.lists_dirty = true;
            free.used = true;
            free.user_data = request.user_data;
            free.size = 0;
            free.next = None;
            self.write_chunk(&free)?;
            debug!(chunk = %free.pointer, capacity = free.capacity, "Reused free chunk");
            return Ok(Some(free));
        }

        let Some((_, mut free)) = largest else {
            return Ok(None);
        };
        let pointer = ChunkPointer::new(free.body_end() - tail_header - request.capacity);
        if !request.approves(pointer) {
            return Ok(None);
        }
        let mut chunk = Chunk::new(pointer, tail_width, tail_next, request.capacity)?;
        chunk.user_data = request.user_data;

        free.set_capacity(pointer.get() - free.body_start())?;
        self.write_chunk(&free)?;
        self.write_chunk(&chunk)?;
        debug!(
            free = %free.pointer,
            remaining = free.capacity,
            chunk = %chunk.pointer,
            "Split free chunk"
        );
        Ok(Some(chunk))
    }

    /// Put `chunk` on the free list, merging with free physical neighbours
    pub(crate) fn release_to_free_list(&mut self, mut chunk: Chunk) -> Result<()> {
        chunk.used = false;
        chunk.user_data = false;
        chunk.size = 0;
        chunk.next = None;

        let before = self.find_free_ending_at(chunk.pointer.get())?;
        let after = self.find_free_at(chunk.body_end())?;
        let fits = |owner: &Chunk, end: u64| owner.body_num_size.can_fit(end - owner.body_start());

        match (before, after) {
            (Some((_, mut prev)), Some((next_slot, next))) if fits(&prev, next.body_end()) => {
                prev.capacity = next.body_end() - prev.body_start();
                self.free_list.take_slot(next_slot);
                self.write_chunk(&prev)?;
                self.store
                    .zero(chunk.pointer.get(), next.body_end() - chunk.pointer.get())?;
                debug!(into = %prev.pointer, freed = %chunk.pointer, absorbed = %next.pointer, "Merged with both neighbours");
            }
            (Some((_, mut prev)), _) if fits(&prev, chunk.body_end()) => {
                prev.capacity = chunk.body_end() - prev.body_start();
                self.write_chunk(&prev)?;
                self.store
                    .zero(chunk.pointer.get(), chunk.body_end() - chunk.pointer.get())?;
                debug!(into = %prev.pointer, freed = %chunk.pointer, "Merged into preceding chunk");
            }
            (_, Some((next_slot, next))) if fits(&chunk, next.body_end()) => {
                chunk.capacity = next.body_end() - chunk.body_start();
                self.write_chunk(&chunk)?;
                self.store.zero(chunk.body_start(), chunk.capacity)?;
                self.free_list.replace_slot(next_slot, chunk.pointer);
                debug!(freed = %chunk.pointer, absorbed = %next.pointer, "Merged following chunk");
            }
            _ => {
                self.write_chunk(&chunk)?;
                self.store.zero(chunk.body_start(), chunk.capacity)?;
                self.free_list.add(chunk.pointer);
                debug!(freed = %chunk.pointer, capacity = chunk.capacity, "Added chunk to free list");
            }
        }
        self.lists_dirty = true;
        Ok(())
    }

    /// Free-list chunk whose body ends exactly at `end`
    pub(crate) fn find_free_ending_at(&mut self, end: u64) -> Result<Option<(usize, Chunk)>> {
        for (slot, pointer) in self.free_list.entries() {
            if pointer.get() >= end {
                continue;
            }
            let free = self.read_header(pointer)?;
            if free.body_end() == end {
                return Ok(Some((slot, free)));
            }
        }
        Ok(None)
    }

    /// Free-list chunk starting at `start`
    pub(crate) fn find_free_at(&mut self, start: u64) -> Result<Option<(usize, Chunk)>> {
        match self.free_list.slot_of(ChunkPointer::new(start)) {
            Some(slot) => Ok(Some((slot, self.read_header(ChunkPointer::new(start))?))),
            None => Ok(None),
        }
    }
}
