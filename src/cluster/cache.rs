//! LRU cache of chunk headers
//!
//! Only used chunks are cached. A cached header always matches the bytes on
//! disk; entries are dropped when a chunk is freed, merged away or moved.

use crate::chunk::{Chunk, ChunkPointer};
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;

pub struct ChunkCache {
    cache: LruCache<ChunkPointer, Chunk>,
    hit_count: u64,
    miss_count: u64,
}

impl ChunkCache {
    /// Create a new cache with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            hit_count: 0,
            miss_count: 0,
        }
    }

    /// Look up a header, counting the hit or miss
    pub fn get(&mut self, pointer: ChunkPointer) -> Option<Chunk> {
        match self.cache.get(&pointer) {
            Some(chunk) => {
                self.hit_count += 1;
                Some(*chunk)
            }
            None => {
                self.miss_count += 1;
                None
            }
        }
    }

    /// Look up without touching recency or statistics
    pub fn peek(&self, pointer: ChunkPointer) -> Option<Chunk> {
        self.cache.peek(&pointer).copied()
    }

    /// Insert or refresh a header
    pub fn put(&mut self, chunk: Chunk) {
        self.cache.put(chunk.pointer(), chunk);
    }

    /// Drop a header, returning it if it was cached
    pub fn remove(&mut self, pointer: ChunkPointer) -> Option<Chunk> {
        self.cache.pop(&pointer)
    }

    /// Drop every header; statistics are kept
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Cached headers in recency order
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.cache.iter().map(|(_, chunk)| chunk)
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hit_count + self.miss_count;
        let hit_rate = if total > 0 {
            self.hit_count as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            hits: self.hit_count,
            misses: self.miss_count,
            hit_rate,
            size: self.cache.len(),
            capacity: self.cache.cap().get(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NumberSize;

    fn chunk(offset: u64) -> Chunk {
        Chunk::new(ChunkPointer::new(offset), NumberSize::Short, NumberSize::Short, 16).unwrap()
    }

    #[test]
    fn test_cache_basic() {
        let mut cache = ChunkCache::new(100);

        assert!(cache.get(ChunkPointer::new(26)).is_none());

        cache.put(chunk(26));
        assert_eq!(cache.get(ChunkPointer::new(26)), Some(chunk(26)));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_eviction() {
        let mut cache = ChunkCache::new(2);

        cache.put(chunk(100));
        cache.put(chunk(200));
        cache.put(chunk(300));

        // 100 is least recently used
        assert!(cache.get(ChunkPointer::new(100)).is_none());
        assert!(cache.get(ChunkPointer::new(200)).is_some());
        assert!(cache.get(ChunkPointer::new(300)).is_some());
    }

    #[test]
    fn test_cache_remove() {
        let mut cache = ChunkCache::new(100);

        cache.put(chunk(26));
        assert!(cache.peek(ChunkPointer::new(26)).is_some());

        assert!(cache.remove(ChunkPointer::new(26)).is_some());
        assert!(cache.peek(ChunkPointer::new(26)).is_none());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_cache_clear() {
        let mut cache = ChunkCache::new(100);

        cache.put(chunk(26));
        cache.put(chunk(70));
        assert!(cache.get(ChunkPointer::new(26)).is_some());
        cache.clear();

        assert_eq!(cache.iter().count(), 0);
        assert!(cache.get(ChunkPointer::new(70)).is_none());
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_zero_capacity_falls_back() {
        let cache = ChunkCache::new(0);
        assert_eq!(cache.stats().capacity, 1);
    }
}
