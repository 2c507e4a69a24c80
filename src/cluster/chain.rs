//! Chunk chains
//!
//! A value larger than one chunk continues through `next` pointers. Content
//! is contiguous: every chunk before the last one holding data is full, so
//! logical offsets map onto chunk capacities in order.

use super::Cluster;
use crate::alloc::{AllocRequest, Strategy};
use crate::chunk::{Chunk, ChunkPointer};
use crate::error::{Error, Result};
use crate::store::ByteStore;
use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, info};

impl<S: ByteStore> Cluster<S> {
    /// Every chunk of the chain starting at `head`, in order
    pub fn collect_next(&mut self, head: ChunkPointer) -> Result<Vec<Chunk>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(head);
        while let Some(pointer) = next {
            if !seen.insert(pointer) {
                return Err(Error::MalformedChunk {
                    pointer,
                    reason: "chain loops back on itself".into(),
                });
            }
            let chunk = self.get_chunk(pointer)?;
            if !chunk.used {
                return Err(Error::MalformedChunk {
                    pointer,
                    reason: "chain runs into a free chunk".into(),
                });
            }
            next = chunk.next;
            chain.push(chunk);
        }
        Ok(chain)
    }

    /// Make the chain at `head` hold at least `total` bytes of capacity.
    ///
    /// Tries, in order: growing the tail in place, linking one more chunk to
    /// the tail, replacing a suffix of the chain with one larger chunk, and
    /// finally re-chaining from the head with a full-width next pointer.
    pub fn alloc_to(&mut self, head: ChunkPointer, total: u64) -> Result<()> {
        self.safe_session(|c| c.grow_chain(head, total))
    }

    fn grow_chain(&mut self, head: ChunkPointer, total: u64) -> Result<()> {
        let chain = self.collect_next(head)?;
        let have: u64 = chain.iter().map(|c| c.capacity).sum();
        if have >= total {
            return Ok(());
        }
        let missing = total - have;

        let mut tail = chain[chain.len() - 1];
        if tail.body_end() == self.store.len() && tail.body_num_size.can_fit(tail.capacity + missing) {
            self.store.set_len(tail.body_end() + missing)?;
            tail.set_capacity(tail.capacity + missing)?;
            self.write_chunk(&tail)?;
            debug!(chunk = %tail.pointer, capacity = tail.capacity, "Grew chain tail in place");
            return Ok(());
        }

        let missing = missing.max(self.config.min_chunk_size);
        let parent = tail;
        let approve = move |p: ChunkPointer| parent.can_point_to(p);
        let request = AllocRequest::new(missing).with_approval(&approve);
        if let Some(next) = self.alloc_with(&request, Strategy::Auto)? {
            tail.set_next(Some(next.pointer))?;
            self.write_chunk(&tail)?;
            debug!(tail = %tail.pointer, next = %next.pointer, "Linked continuation chunk");
            return Ok(());
        }

        for split in (1..chain.len()).rev() {
            if self.replace_suffix(&chain, split, missing)? {
                return Ok(());
            }
        }

        self.rechain_head(&chain, total)
    }

    /// Move `chain[split..]` into one new chunk addressable by `chain[split - 1]`
    fn replace_suffix(&mut self, chain: &[Chunk], split: usize, missing: u64) -> Result<bool> {
        let parent = chain[split - 1];
        let suffix = &chain[split..];
        let capacity = suffix.iter().map(|c| c.capacity).sum::<u64>() + missing;

        let approve = move |p: ChunkPointer| parent.can_point_to(p);
        let request = AllocRequest::new(capacity).with_approval(&approve);
        let Some(mut replacement) = self.alloc_with(&request, Strategy::Auto)? else {
            return Ok(false);
        };

        let mut offset = 0;
        for chunk in suffix {
            self.store
                .transfer(chunk.body_start(), replacement.body_start() + offset, chunk.size)?;
            offset += chunk.size;
        }
        replacement.set_size(offset)?;
        self.write_chunk(&replacement)?;

        let mut parent = self.get_chunk(parent.pointer)?;
        parent.set_next(Some(replacement.pointer))?;
        self.write_chunk(&parent)?;

        for chunk in suffix.iter().rev() {
            let chunk = self.get_chunk(chunk.pointer)?;
            self.free_chunk(chunk)?;
        }
        debug!(
            parent = %parent.pointer,
            replacement = %replacement.pointer,
            replaced = suffix.len(),
            "Replaced chain suffix"
        );
        Ok(true)
    }

    /// Widen the head's next field to `Long` and move everything past the
    /// head into one continuation
    fn rechain_head(&mut self, chain: &[Chunk], total: u64) -> Result<()> {
        let head = chain[0];
        let content = self.chain_bytes(chain)?;
        let mut new_head = head.widened()?;
        new_head.next = None;
        let head_part = content.len().min(new_head.capacity as usize);
        new_head.size = head_part as u64;
        self.write_chunk(&new_head)?;
        self.store.write_at(new_head.body_start(), &content[..head_part])?;

        for chunk in chain[1..].iter().rev() {
            let chunk = self.get_chunk(chunk.pointer)?;
            self.free_chunk(chunk)?;
        }

        let rest = &content[head_part..];
        let wanted = total
            .saturating_sub(new_head.capacity)
            .max(rest.len() as u64)
            .max(self.config.min_chunk_size);
        let mut tail = self.alloc_chunk(&AllocRequest::new(wanted))?;
        self.store.write_at(tail.body_start(), rest)?;
        tail.set_size(rest.len() as u64)?;
        self.write_chunk(&tail)?;

        new_head.set_next(Some(tail.pointer))?;
        self.write_chunk(&new_head)?;
        info!(head = %head.pointer, tail = %tail.pointer, "Re-chained from head with a wide next pointer");
        Ok(())
    }

    /// Concatenated logical content of `chain`
    pub(crate) fn chain_bytes(&mut self, chain: &[Chunk]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(chain.iter().map(|c| c.size as usize).sum());
        for chunk in chain {
            let start = out.len();
            out.resize(start + chunk.size as usize, 0);
            self.store.read_at(chunk.body_start(), &mut out[start..])?;
        }
        Ok(out)
    }
}

/// Byte cursor over the logical content of a chain
pub struct ChainIo<'a, S: ByteStore> {
    cluster: &'a mut Cluster<S>,
    head: ChunkPointer,
    chain: Vec<Chunk>,
    position: u64,
}

impl<'a, S: ByteStore> ChainIo<'a, S> {
    /// Cursor at the start of the chain at `head`
    pub fn open(cluster: &'a mut Cluster<S>, head: ChunkPointer) -> Result<Self> {
        let chain = cluster.collect_next(head)?;
        Ok(Self {
            cluster,
            head,
            chain,
            position: 0,
        })
    }

    pub fn head(&self) -> ChunkPointer {
        self.head
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chain
    }

    /// Logical length
    pub fn len(&self) -> u64 {
        self.chain.iter().map(|c| c.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.chain.iter().map(|c| c.capacity).sum()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read from the current position; returns 0 at the end of the content
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = self.len();
        if self.position >= len {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(len - self.position);
        let mut done = 0u64;
        let mut start = 0u64;
        for chunk in &self.chain {
            if done == want {
                break;
            }
            let end = start + chunk.capacity;
            let pos = self.position + done;
            if pos >= start && pos < end {
                let offset = pos - start;
                let n = (chunk.capacity - offset).min(want - done);
                self.cluster
                    .store
                    .read_at(chunk.body_start() + offset, &mut buf[done as usize..(done + n) as usize])?;
                done += n;
            }
            start = end;
        }
        self.position += done;
        Ok(done as usize)
    }

    /// Write all of `data` at the current position, growing the chain first
    /// if it would run past the capacity
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = self.position + data.len() as u64;
        if end > self.capacity() {
            self.cluster.alloc_to(self.head, end)?;
            self.chain = self.cluster.collect_next(self.head)?;
        }

        let mut done = 0usize;
        let mut start = 0u64;
        for i in 0..self.chain.len() {
            let mut chunk = self.chain[i];
            let chunk_end = start + chunk.capacity;
            let pos = self.position + done as u64;
            if done < data.len() && pos >= start && pos < chunk_end {
                let offset = pos - start;
                let n = ((chunk.capacity - offset) as usize).min(data.len() - done);
                self.cluster
                    .store
                    .write_at(chunk.body_start() + offset, &data[done..done + n])?;
                done += n;
            }
            // everything before `end` is now content, including gaps
            if end > start {
                let size = (end - start).min(chunk.capacity).max(chunk.size);
                if size != chunk.size {
                    chunk.set_size(size)?;
                    self.cluster.write_chunk(&chunk)?;
                    self.chain[i] = chunk;
                }
            }
            start = chunk_end;
        }
        self.position = end;
        Ok(())
    }

    /// Shrink the logical length to `len`; longer lengths are ignored
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        let mut start = 0u64;
        for i in 0..self.chain.len() {
            let mut chunk = self.chain[i];
            let size = len.saturating_sub(start).min(chunk.capacity);
            if size < chunk.size {
                chunk.set_size(size)?;
                self.cluster.write_chunk(&chunk)?;
                self.chain[i] = chunk;
            }
            start += chunk.capacity;
        }
        self.position = self.position.min(len);
        Ok(())
    }
}

fn into_io(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        other => io::Error::other(other),
    }
}

impl<S: ByteStore> Read for ChainIo<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(buf).map_err(into_io)
    }
}

impl<S: ByteStore> Write for ChainIo<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: ByteStore> Seek for ChainIo<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before the start of the chain")
        })?;
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MIN_CAPACITY;
    use crate::codec::NumberSize;
    use crate::config::ClusterConfig;
    use crate::store::MemoryStore;

    fn cluster() -> Result<Cluster<MemoryStore>> {
        Cluster::init(
            MemoryStore::new(),
            ClusterConfig {
                validate: true,
                ..ClusterConfig::default()
            },
        )
    }

    #[test]
    fn test_grow_tail_in_place() -> Result<()> {
        let mut cluster = cluster()?;
        let chunk = cluster.alloc(16)?;
        let len = cluster.store_len();
        cluster.alloc_to(chunk.pointer(), 40)?;

        let chain = cluster.collect_next(chunk.pointer())?;
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].capacity(), 40);
        assert_eq!(cluster.store_len(), len + 24);
        Ok(())
    }

    #[test]
    fn test_link_continuation() -> Result<()> {
        let mut cluster = cluster()?;
        let head = cluster.alloc(16)?;
        let blocker = cluster.alloc(16)?;
        cluster.alloc_to(head.pointer(), 50)?;

        let chain = cluster.collect_next(head.pointer())?;
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].capacity(), 34);
        assert!(chain[1].pointer() > blocker.pointer());
        Ok(())
    }

    #[test]
    fn test_already_large_enough() -> Result<()> {
        let mut cluster = cluster()?;
        let head = cluster.alloc(64)?;
        let len = cluster.store_len();
        cluster.alloc_to(head.pointer(), 10)?;
        assert_eq!(cluster.store_len(), len);
        Ok(())
    }

    #[test]
    fn test_replace_suffix_when_tail_cannot_point_far() -> Result<()> {
        let mut cluster = cluster()?;
        let head = cluster.alloc_chunk(&AllocRequest::new(8).with_next_size(NumberSize::Short))?;
        // A tail whose next field is one byte wide cannot reach past 255
        let tail = cluster.alloc_chunk(&AllocRequest::new(8).with_next_size(NumberSize::Byte))?;
        let mut linked = cluster.get_chunk(head.pointer())?;
        linked.set_next(Some(tail.pointer()))?;
        cluster.write_chunk(&linked)?;
        cluster.write_content(head.pointer(), b"0123456789abcdef")?;
        cluster.alloc(300)?;

        cluster.alloc_to(head.pointer(), 64)?;
        let chain = cluster.collect_next(head.pointer())?;
        assert_eq!(chain.len(), 2);
        assert_ne!(chain[1].pointer(), tail.pointer());
        assert!(chain.iter().map(|c| c.capacity()).sum::<u64>() >= 64);
        assert_eq!(cluster.read_content(head.pointer())?, b"0123456789abcdef");
        assert!(cluster.free_list().contains(tail.pointer()));
        Ok(())
    }

    #[test]
    fn test_rechain_head_widens_next() -> Result<()> {
        let mut cluster = cluster()?;
        let head = cluster.alloc_chunk(&AllocRequest::new(40).with_next_size(NumberSize::Void))?;
        cluster.alloc(300)?;
        cluster.write_content(head.pointer(), &[7u8; 40])?;
        let chain = cluster.collect_next(head.pointer())?;
        assert_eq!(chain.len(), 1);

        cluster.write_content(head.pointer(), &[9u8; 100])?;
        let chain = cluster.collect_next(head.pointer())?;
        assert_eq!(chain[0].next_size(), NumberSize::Long);
        assert_eq!(chain[0].body_end(), head.body_end());
        assert!(chain.iter().map(|c| c.capacity()).sum::<u64>() >= 100);
        assert_eq!(cluster.read_content(head.pointer())?, vec![9u8; 100]);
        Ok(())
    }

    #[test]
    fn test_small_head_grows_after_store_outgrows_next() -> Result<()> {
        let mut cluster = cluster()?;
        let head = cluster.alloc_user(4)?;
        assert_eq!(head.capacity(), MIN_CAPACITY);
        assert_eq!(head.next_size(), NumberSize::Byte);
        cluster.alloc(300)?;
        assert!(cluster.store_len() > 255);

        let data: Vec<u8> = (0..50).collect();
        cluster.write_content(head.pointer(), &data)?;
        let chain = cluster.collect_next(head.pointer())?;
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].next_size(), NumberSize::Long);
        assert_eq!(cluster.read_content(head.pointer())?, data);
        cluster.check_consistency()?;
        Ok(())
    }

    #[test]
    fn test_chain_io_stream() -> Result<()> {
        let mut cluster = cluster()?;
        let head = cluster.alloc(8)?;
        cluster.alloc(8)?;

        let mut io = ChainIo::open(&mut cluster, head.pointer())?;
        io.write_all(b"hello, chained world")?;
        assert_eq!(io.len(), 20);
        assert!(io.chunks().len() > 1);

        io.seek(SeekFrom::Start(7))?;
        let mut word = [0u8; 7];
        io.read_exact(&mut word)?;
        assert_eq!(&word, b"chained");

        io.seek(SeekFrom::End(-5))?;
        let mut rest = String::new();
        io.read_to_string(&mut rest)?;
        assert_eq!(rest, "world");
        assert!(io.seek(SeekFrom::Current(-100)).is_err());

        io.truncate(5)?;
        io.seek(SeekFrom::Start(0))?;
        let mut all = Vec::new();
        io.read_to_end(&mut all)?;
        assert_eq!(all, b"hello");
        Ok(())
    }

    #[test]
    fn test_write_past_end_fills_gap() -> Result<()> {
        let mut cluster = cluster()?;
        let head = cluster.alloc(4)?;
        let mut io = ChainIo::open(&mut cluster, head.pointer())?;
        io.seek(SeekFrom::Start(6))?;
        io.write_all(b"xy")?;
        assert_eq!(io.len(), 8);
        drop(io);
        assert_eq!(cluster.read_content(head.pointer())?, b"\0\0\0\0\0\0xy");
        Ok(())
    }

    #[test]
    fn test_chain_loop_detected() -> Result<()> {
        let mut cluster = cluster()?;
        let a = cluster.alloc(8)?;
        let mut looped = cluster.get_chunk(a.pointer())?;
        looped.set_next(Some(a.pointer()))?;
        cluster.write_chunk(&looped)?;
        assert!(matches!(
            cluster.collect_next(a.pointer()),
            Err(Error::MalformedChunk { .. })
        ));
        Ok(())
    }
}
