//! Append growth: push chunks onto the end of the store, pop them off again

use super::AllocRequest;
use crate::chunk::{width_for_extent, Chunk, ChunkPointer, MAX_HEADER_SIZE};
use crate::cluster::{invariant, Cluster};
use crate::error::Result;
use crate::store::ByteStore;
use tracing::debug;

impl<S: ByteStore> Cluster<S> {
    /// New chunk at the current end of the store, body zero-filled
    pub(crate) fn append_chunk(&mut self, request: &AllocRequest<'_>) -> Result<Option<Chunk>> {
        let pointer = ChunkPointer::new(self.store.len());
        if !request.approves(pointer) {
            return Ok(None);
        }

        let width = width_for_extent(pointer.get() + MAX_HEADER_SIZE + request.capacity);
        let mut chunk = Chunk::new(
            pointer,
            width,
            request.next_size.unwrap_or(width),
            request.capacity,
        )?;
        chunk.user_data = request.user_data;

        self.store.set_len(chunk.body_end())?;
        self.write_chunk(&chunk)?;
        debug!(chunk = %pointer, capacity = chunk.capacity, len = self.store.len(), "Appended chunk");
        Ok(Some(chunk))
    }

    /// Truncate the store to the start of `chunk`, which must end the store,
    /// then drop any free chunks left at the new end
    pub(crate) fn pop_chunk(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.body_end() != self.store.len() {
            return Err(invariant(format!(
                "cannot pop chunk {} ending at {}, store ends at {}",
                chunk.pointer,
                chunk.body_end(),
                self.store.len()
            )));
        }
        self.cache.remove(chunk.pointer);
        self.store.set_len(chunk.pointer.get())?;
        debug!(chunk = %chunk.pointer, len = self.store.len(), "Popped chunk");

        while let Some((slot, free)) = self.find_free_ending_at(self.store.len())? {
            self.free_list.take_slot(slot);
            self.lists_dirty = true;
            self.store.set_len(free.pointer.get())?;
            debug!(chunk = %free.pointer, len = self.store.len(), "Popped trailing free chunk");
        }
        Ok(())
    }
}
