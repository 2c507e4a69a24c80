//! Structured records stored in chunk chains

use super::Cluster;
use crate::alloc::AllocRequest;
use crate::chunk::{Chunk, ChunkPointer};
use crate::error::Result;
use crate::schema::{Record, RecordSchema};
use crate::store::ByteStore;
use std::io::Cursor;
use tracing::debug;

impl<S: ByteStore> Cluster<S> {
    /// Serialize `value` into a new user chunk
    pub fn alloc_record<T: Record>(&mut self, schema: &RecordSchema<T>, value: &T) -> Result<Chunk> {
        self.store_record(schema, value, true)
    }

    /// Serialize `value` into a new internal chunk, reachable only through
    /// pointer fields of other records
    pub fn alloc_child_record<T: Record>(&mut self, schema: &RecordSchema<T>, value: &T) -> Result<Chunk> {
        self.store_record(schema, value, false)
    }

    fn store_record<T: Record>(&mut self, schema: &RecordSchema<T>, value: &T, user_data: bool) -> Result<Chunk> {
        let mut bytes = Vec::with_capacity(schema.alloc_size() as usize);
        schema.write(&mut bytes, value)?;

        self.safe_session(|c| {
            let mut request = AllocRequest::new(schema.alloc_size().max(bytes.len() as u64));
            if user_data {
                request = request.as_user_data();
            }
            let chunk = c.alloc_chunk(&request)?;
            c.write_content(chunk.pointer, &bytes)?;
            debug!(chunk = %chunk.pointer, bytes = bytes.len(), user_data, "Stored record");
            c.get_chunk(chunk.pointer)
        })
    }

    pub fn read_record<T: Record>(&mut self, schema: &RecordSchema<T>, pointer: ChunkPointer) -> Result<T> {
        let bytes = self.read_content(pointer)?;
        schema.read(&mut Cursor::new(bytes))
    }

    /// Replace the record stored at `pointer`
    pub fn write_record<T: Record>(&mut self, schema: &RecordSchema<T>, pointer: ChunkPointer, value: &T) -> Result<()> {
        let mut bytes = Vec::with_capacity(schema.alloc_size() as usize);
        schema.write(&mut bytes, value)?;
        self.write_content(pointer, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::error::Error;
    use crate::io::{ContentReader, ContentWriter};
    use crate::schema::{FieldDescriptor, PointerFields};
    use crate::size::{SizeDescriptor, WordSpace};
    use crate::store::MemoryStore;
    use std::io::Write;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Note {
        id: u16,
        text: Vec<u8>,
    }

    impl PointerFields for Note {}

    impl Record for Note {
        fn fields() -> Vec<FieldDescriptor<Self>> {
            vec![
                FieldDescriptor::new(
                    "id",
                    SizeDescriptor::fixed(WordSpace::Byte, 2),
                    |r, n| {
                        n.id = r.read_word(2)? as u16;
                        Ok(())
                    },
                    |w, n| w.write_word(n.id as u64, 2),
                    |r| r.read_word(2).map(|_| ()),
                ),
                FieldDescriptor::new(
                    "text",
                    SizeDescriptor::unknown(WordSpace::Byte, 2, None, |n: &Note| 2 + n.text.len() as u64),
                    |r, n| {
                        let len = r.read_word(2)? as usize;
                        n.text = r.read_n(len)?;
                        Ok(())
                    },
                    |w, n| {
                        w.write_word(n.text.len() as u64, 2)?;
                        w.write_all(&n.text)?;
                        Ok(())
                    },
                    |r| {
                        let len = r.read_word(2)? as usize;
                        r.read_n(len).map(|_| ())
                    },
                ),
            ]
        }
    }

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
    fn test_record_round_trip() -> Result<()> {
        let mut cluster = cluster()?;
        let schema = RecordSchema::<Note>::new();
        let note = Note {
            id: 9,
            text: b"hello".to_vec(),
        };
        let chunk = cluster.alloc_record(&schema, &note)?;
        assert!(chunk.is_user_data());
        assert_eq!(chunk.capacity(), 32);
        assert_eq!(chunk.size(), 9);
        assert_eq!(cluster.read_record(&schema, chunk.pointer())?, note);
        Ok(())
    }

    #[test]
    fn test_rewrite_grows_chain() -> Result<()> {
        let mut cluster = cluster()?;
        let schema = RecordSchema::<Note>::new();
        let chunk = cluster.alloc_record(&schema, &Note::default())?;
        let long = Note {
            id: 1,
            text: vec![b'x'; 200],
        };
        cluster.write_record(&schema, chunk.pointer(), &long)?;
        assert_eq!(cluster.read_record(&schema, chunk.pointer())?, long);
        assert_eq!(cluster.user_chunks(), &[chunk.pointer()]);
        Ok(())
    }

    #[test]
    fn test_child_records_stay_internal() -> Result<()> {
        let mut cluster = cluster()?;
        let schema = RecordSchema::<Note>::new();
        let child = cluster.alloc_child_record(&schema, &Note::default())?;
        assert!(!child.is_user_data());
        assert!(cluster.user_chunks().is_empty());
        Ok(())
    }

    #[test]
    fn test_truncated_record() -> Result<()> {
        let mut cluster = cluster()?;
        let schema = RecordSchema::<Note>::new();
        let chunk = cluster.alloc_user(8)?;
        cluster.write_content(chunk.pointer(), &[1, 0, 5, 0, b'a'])?;
        assert!(matches!(
            cluster.read_record(&schema, chunk.pointer()),
            Err(Error::Io(_))
        ));
        Ok(())
    }
}
