//! The cluster: one byte store, its root header, free and user lists, and
//! a cache of chunk headers.
//!
//! Every chunk header is created, read and rewritten through here. Mutating
//! operations run inside a safe session; when the outermost session closes
//! the free list is reconciled, both lists are persisted, and with
//! `validate` on the whole store is cross-checked.
//!
//! Store layout:
//!
//! ```text
//! 0        7                  26
//! +--------+------------------+---------+---------+-----
//! | magic  | header           | chunk   | chunk   | ...
//! +--------+------------------+---------+---------+-----
//! ```

mod cache;
mod chain;
mod check;
mod header;
mod lists;
mod records;
mod relocate;

pub use cache::{CacheStats, ChunkCache};
pub use chain::ChainIo;
pub use check::ClusterStats;
pub use header::{ClusterHeader, FIRST_CHUNK, FORMAT_VERSION, HEADER_OFFSET, HEADER_SIZE, MAGIC};
pub use lists::{FreeList, MAX_TOMBSTONES};
pub use relocate::{RecordWalker, ReferenceWalker};
pub(crate) use relocate::Holder;

use crate::alloc::AllocRequest;
use crate::chunk::{Chunk, ChunkPointer, MAX_HEADER_SIZE};
use crate::codec::NumberSize;
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::store::{out_of_bounds, ByteStore};
use lists::{decode_pointers, encode_pointers};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Rounds of list persistence allowed before giving up
const MAX_PERSIST_ROUNDS: usize = 16;

/// Cluster behind a lock, for callers sharing one store across threads
pub type SharedCluster<S> = Arc<Mutex<Cluster<S>>>;

pub struct Cluster<S: ByteStore> {
    pub(crate) store: S,
    pub(crate) config: ClusterConfig,
    pub(crate) header: ClusterHeader,
    pub(crate) cache: ChunkCache,
    pub(crate) free_list: FreeList,
    pub(crate) user_list: Vec<ChunkPointer>,
    pub(crate) lists_dirty: bool,
    session_depth: u32,
}

/// Log and build an allocator invariant error
pub(crate) fn invariant(message: impl Into<String>) -> Error {
    let message = message.into();
    error!(%message, "Allocator invariant violated");
    Error::Invariant(message)
}

impl<S: ByteStore> Cluster<S> {
    fn with_parts(store: S, config: ClusterConfig, header: ClusterHeader) -> Self {
        let cache = ChunkCache::new(config.cache_capacity);
        Self {
            store,
            config,
            header,
            cache,
            free_list: FreeList::new(),
            user_list: Vec::new(),
            lists_dirty: false,
            session_depth: 0,
        }
    }

    /// Format `store` as an empty cluster, discarding its contents
    pub fn init(mut store: S, config: ClusterConfig) -> Result<Self> {
        config.check()?;
        store.set_len(0)?;
        store.write_at(0, MAGIC)?;
        store.set_len(FIRST_CHUNK)?;

        let header = ClusterHeader::new(ChunkPointer::NULL, ChunkPointer::NULL);
        let mut cluster = Self::with_parts(store, config, header);
        cluster.safe_session(|c| {
            let free_root = c.append_list_root()?;
            let user_root = c.append_list_root()?;
            c.header = ClusterHeader::new(free_root, user_root);
            c.write_header()?;
            c.lists_dirty = true;
            Ok(())
        })?;

        info!(
            free_root = %cluster.header.free_root,
            user_root = %cluster.header.user_root,
            len = cluster.store.len(),
            "Initialized cluster"
        );
        Ok(cluster)
    }

    fn append_list_root(&mut self) -> Result<ChunkPointer> {
        let request = AllocRequest::new(self.config.list_capacity).with_next_size(NumberSize::Long);
        let chunk = self
            .append_chunk(&request)?
            .ok_or_else(|| invariant("list root could not be appended"))?;
        Ok(chunk.pointer())
    }

    /// Open a store previously written by `init`
    pub fn open(mut store: S, config: ClusterConfig) -> Result<Self> {
        config.check()?;
        if store.len() < HEADER_OFFSET {
            return Err(Error::InvalidMagic);
        }
        let mut magic = [0u8; 7];
        store.read_at(0, &mut magic)?;
        if &magic != MAGIC {
            return Err(Error::InvalidMagic);
        }
        if store.len() < FIRST_CHUNK {
            return Err(Error::MalformedHeader("store ends inside the header".into()));
        }

        let mut raw = [0u8; HEADER_SIZE as usize];
        store.read_at(HEADER_OFFSET, &mut raw)?;
        let header = ClusterHeader::decode(&raw)?;
        for root in [header.free_root, header.user_root] {
            if root.get() < FIRST_CHUNK || root.get() >= store.len() {
                return Err(Error::MalformedHeader(format!(
                    "root {} is outside the store",
                    root
                )));
            }
        }

        let mut cluster = Self::with_parts(store, config, header);
        let free = cluster.read_content(header.free_root)?;
        cluster.free_list = FreeList::decode(&free)?;
        let users = cluster.read_content(header.user_root)?;
        cluster.user_list = decode_pointers(&users)?;
        if cluster.config.validate {
            cluster.check_consistency()?;
        }

        info!(
            len = cluster.store.len(),
            free_chunks = cluster.free_list.len(),
            user_chunks = cluster.user_list.len(),
            "Opened cluster"
        );
        Ok(cluster)
    }

    /// Persist pending list changes, flush, and hand the store back
    pub fn close(mut self) -> Result<S> {
        self.safe_session(|_| Ok(()))?;
        self.store.flush()?;
        info!(len = self.store.len(), "Closed cluster");
        Ok(self.store)
    }

    pub fn into_shared(self) -> SharedCluster<S> {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn header(&self) -> &ClusterHeader {
        &self.header
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_len(&self) -> u64 {
        self.store.len()
    }

    pub fn free_list(&self) -> &FreeList {
        &self.free_list
    }

    pub fn user_chunks(&self) -> &[ChunkPointer] {
        &self.user_list
    }

    pub fn is_root(&self, pointer: ChunkPointer) -> bool {
        pointer == self.header.free_root || pointer == self.header.user_root
    }

    pub fn in_session(&self) -> bool {
        self.session_depth > 0
    }

    /// Run `f` as one allocator-sensitive unit.
    ///
    /// Sessions nest. Free-list reconciliation, list persistence and the
    /// consistency check happen once, when the outermost session ends, even
    /// if `f` failed.
    pub fn safe_session<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.session_depth += 1;
        let result = f(self);
        self.session_depth -= 1;
        if self.session_depth > 0 {
            return result;
        }

        let closed = self.close_session();
        let value = result?;
        closed?;
        Ok(value)
    }

    fn close_session(&mut self) -> Result<()> {
        // list persistence allocates; keep it inside a session of its own
        self.session_depth += 1;
        let persisted = self.persist_lists();
        self.session_depth -= 1;
        persisted?;

        if self.config.validate {
            self.check_consistency()?;
        }
        Ok(())
    }

    fn persist_lists(&mut self) -> Result<()> {
        for _ in 0..MAX_PERSIST_ROUNDS {
            if self.free_list.reconcile() {
                debug!(
                    slots = self.free_list.slots().len(),
                    tombstones = self.free_list.tombstones(),
                    "Reconciled free list"
                );
                self.lists_dirty = true;
            }
            if !self.lists_dirty {
                return Ok(());
            }
            self.lists_dirty = false;

            let free = self.free_list.encode()?;
            self.write_content(self.header.free_root, &free)?;
            let users = encode_pointers(&self.user_list)?;
            self.write_content(self.header.user_root, &users)?;
        }
        Err(invariant("list persistence did not settle"))
    }

    pub(crate) fn write_header(&mut self) -> Result<()> {
        let bytes = self.header.encode()?;
        self.store.write_at(HEADER_OFFSET, &bytes)
    }

    /// Header of the chunk at `pointer`, from the cache when possible
    pub fn get_chunk(&mut self, pointer: ChunkPointer) -> Result<Chunk> {
        if let Some(chunk) = self.cache.get(pointer) {
            return Ok(chunk);
        }
        let chunk = self.read_header(pointer)?;
        if chunk.used {
            self.cache.put(chunk);
        }
        Ok(chunk)
    }

    /// Cached header, without touching the store or cache statistics
    pub fn cached(&self, pointer: ChunkPointer) -> Option<Chunk> {
        self.cache.peek(pointer)
    }

    /// Decode the header at `pointer` straight from the store
    pub(crate) fn read_header(&mut self, pointer: ChunkPointer) -> Result<Chunk> {
        let len = self.store.len();
        if pointer.get() < FIRST_CHUNK || pointer.get() >= len {
            return Err(Error::MalformedChunk {
                pointer,
                reason: "pointer is outside the store".into(),
            });
        }
        let available = (len - pointer.get()).min(MAX_HEADER_SIZE) as usize;
        let mut raw = [0u8; MAX_HEADER_SIZE as usize];
        self.store.read_at(pointer.get(), &mut raw[..available])?;

        let chunk = Chunk::decode(pointer, &mut Cursor::new(&raw[..available])).map_err(|e| match e {
            Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => Error::MalformedChunk {
                pointer,
                reason: "header is truncated".into(),
            },
            other => other,
        })?;
        if chunk.body_end() > len {
            return Err(Error::MalformedChunk {
                pointer,
                reason: format!("body ends at {}, past the store end {}", chunk.body_end(), len),
            });
        }
        Ok(chunk)
    }

    /// Persist a header and keep the cache in step with it
    pub(crate) fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        let bytes = chunk.encode()?;
        self.store.write_at(chunk.pointer.get(), &bytes)?;
        if self.config.validate {
            let back = self.read_header(chunk.pointer)?;
            if back != *chunk {
                return Err(invariant(format!(
                    "header at {} reads back as {:?}, wrote {:?}",
                    chunk.pointer, back, chunk
                )));
            }
        }
        if chunk.used {
            self.cache.put(*chunk);
        } else {
            self.cache.remove(chunk.pointer);
        }
        Ok(())
    }

    /// Read `buf.len()` body bytes of `chunk` starting at `offset`
    pub fn read_body(&mut self, chunk: &Chunk, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > chunk.capacity {
            return Err(out_of_bounds(offset, buf.len() as u64, chunk.capacity));
        }
        self.store.read_at(chunk.body_start() + offset, buf)
    }

    /// Overwrite body bytes of `chunk`; does not change its logical size
    pub fn write_body(&mut self, chunk: &Chunk, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > chunk.capacity {
            return Err(out_of_bounds(offset, data.len() as u64, chunk.capacity));
        }
        self.store.write_at(chunk.body_start() + offset, data)
    }

    /// Logical content of the chain starting at `head`
    pub fn read_content(&mut self, head: ChunkPointer) -> Result<Vec<u8>> {
        let mut io = ChainIo::open(self, head)?;
        let mut out = vec![0u8; io.len() as usize];
        let read = io.read_bytes(&mut out)?;
        out.truncate(read);
        Ok(out)
    }

    /// Replace the logical content of the chain starting at `head`, growing
    /// it as needed
    pub fn write_content(&mut self, head: ChunkPointer, data: &[u8]) -> Result<()> {
        self.safe_session(|c| {
            let mut io = ChainIo::open(c, head)?;
            io.write_bytes(data)?;
            io.truncate(data.len() as u64)
        })
    }
}
