//! Whole-store walks: consistency checking and statistics

use super::{CacheStats, Cluster, FIRST_CHUNK, MAX_TOMBSTONES};
use crate::chunk::{Chunk, ChunkPointer};
use crate::error::{Error, Result};
use crate::store::ByteStore;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Snapshot of allocator state
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    pub store_len: u64,
    pub used_chunks: usize,
    pub free_chunks: usize,
    pub free_bytes: u64,
    pub user_chunks: usize,
    pub tombstones: usize,
    pub cache: CacheStats,
}

impl<S: ByteStore> Cluster<S> {
    /// Every chunk in physical order, decoded straight from the store
    pub fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        let mut position = FIRST_CHUNK;
        while position < self.store.len() {
            let chunk = self.read_header(ChunkPointer::new(position))?;
            position = chunk.body_end();
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    /// Cross-check the free list, the user list, the cache and the roots
    /// against the chunks actually in the store
    pub fn check_consistency(&mut self) -> Result<()> {
        let chunks = self.chunks()?;
        let by_pointer: HashMap<ChunkPointer, Chunk> = chunks.iter().map(|c| (c.pointer, *c)).collect();

        let mut free = HashSet::new();
        for pointer in self.free_list.pointers() {
            if !free.insert(pointer) {
                return Err(inconsistent(format!("{} is on the free list twice", pointer)));
            }
            match by_pointer.get(&pointer) {
                None => return Err(inconsistent(format!("free list entry {} is not a chunk", pointer))),
                Some(chunk) if chunk.used => {
                    return Err(inconsistent(format!("free list entry {} is in use", pointer)))
                }
                Some(_) => {}
            }
        }
        let tombstones = self.free_list.tombstones();
        if !self.in_session() && !(1..=MAX_TOMBSTONES).contains(&tombstones) {
            return Err(inconsistent(format!("free list holds {} tombstones", tombstones)));
        }

        let mut users = HashSet::new();
        for pointer in &self.user_list {
            if !users.insert(*pointer) {
                return Err(inconsistent(format!("{} is on the user list twice", pointer)));
            }
            match by_pointer.get(pointer) {
                Some(chunk) if chunk.used && chunk.user_data => {}
                _ => {
                    return Err(inconsistent(format!(
                        "user list entry {} is not a used user chunk",
                        pointer
                    )))
                }
            }
        }

        for chunk in &chunks {
            if !chunk.used && !free.contains(&chunk.pointer) {
                return Err(inconsistent(format!("free chunk {} is not on the free list", chunk.pointer)));
            }
            if chunk.user_data && !users.contains(&chunk.pointer) {
                return Err(inconsistent(format!("user chunk {} is not on the user list", chunk.pointer)));
            }
        }

        for cached in self.cache.iter() {
            if by_pointer.get(&cached.pointer) != Some(cached) {
                return Err(inconsistent(format!("cached header {} differs from the store", cached.pointer)));
            }
        }

        for root in [self.header.free_root, self.header.user_root] {
            match by_pointer.get(&root) {
                Some(chunk) if chunk.used && !chunk.user_data => {}
                _ => return Err(inconsistent(format!("list root {} is not a used internal chunk", root))),
            }
        }
        Ok(())
    }

    pub fn stats(&mut self) -> Result<ClusterStats> {
        let chunks = self.chunks()?;
        let (used, free): (Vec<&Chunk>, Vec<&Chunk>) = chunks.iter().partition(|c| c.used);
        Ok(ClusterStats {
            store_len: self.store.len(),
            used_chunks: used.len(),
            free_chunks: free.len(),
            free_bytes: free.iter().map(|c| c.capacity).sum(),
            user_chunks: self.user_list.len(),
            tombstones: self.free_list.tombstones(),
            cache: self.cache.stats(),
        })
    }
}

fn inconsistent(message: String) -> Error {
    warn!(%message, "Consistency check failed");
    Error::Invariant(message)
}
