//! Explicit record schemas
//!
//! A structured type describes itself as an ordered list of fields. Each
//! field knows its size, how to read itself into a value, write itself out
//! of one, and skip over its encoding without materializing it. The store
//! never inspects types at runtime; everything goes through these lists.

use crate::chunk::ChunkPointer;
use crate::error::{Error, Result};
use crate::io::CountingWriter;
use crate::size::{SizeDescriptor, WordSpace};
use std::fmt;
use std::io::{Read, Write};

pub type ReadFn<T> = fn(&mut dyn Read, &mut T) -> Result<()>;
pub type WriteFn<T> = fn(&mut dyn Write, &T) -> Result<()>;
pub type SkipFn = fn(&mut dyn Read) -> Result<()>;

pub struct FieldDescriptor<T> {
    pub name: &'static str,
    pub size: SizeDescriptor<T>,
    pub read: ReadFn<T>,
    pub write: WriteFn<T>,
    pub skip: SkipFn,
}

impl<T> FieldDescriptor<T> {
    pub fn new(
        name: &'static str,
        size: SizeDescriptor<T>,
        read: ReadFn<T>,
        write: WriteFn<T>,
        skip: SkipFn,
    ) -> Self {
        Self {
            name,
            size,
            read,
            write,
            skip,
        }
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

/// Types holding chunk pointers.
///
/// `visit` is called with each pointer field in turn; it may rewrite the
/// pointer in place. The walk stops as soon as `visit` returns true, and the
/// method reports whether that happened.
pub trait PointerFields {
    fn visit_pointer_fields(&mut self, visit: &mut dyn FnMut(&mut ChunkPointer) -> bool) -> bool {
        let _ = visit;
        false
    }
}

/// A structured value with a compile-time field list
pub trait Record: Default + PointerFields + 'static {
    fn fields() -> Vec<FieldDescriptor<Self>>;
}

/// The field list of `T` plus its combined size
pub struct RecordSchema<T> {
    fields: Vec<FieldDescriptor<T>>,
    size: SizeDescriptor<T>,
}

impl<T: Record> RecordSchema<T> {
    pub fn new() -> Self {
        let fields = T::fields();
        let size = SizeDescriptor::sum(fields.iter().map(|f| f.size.clone()).collect());
        Self { fields, size }
    }

    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    pub fn size(&self) -> &SizeDescriptor<T> {
        &self.size
    }

    /// Bytes to reserve for a value before it is serialized
    pub fn alloc_size(&self) -> u64 {
        self.size.calc_alloc_size(WordSpace::Byte)
    }

    /// Exact encoded size of `value`
    pub fn encoded_size(&self, value: &T) -> u64 {
        self.size.calc_unknown(value, WordSpace::Byte)
    }

    /// Write every field, checking each against its declared size
    pub fn write<W: Write>(&self, out: &mut W, value: &T) -> Result<u64> {
        let mut counter = CountingWriter::new(out);
        for field in &self.fields {
            let before = counter.written();
            (field.write)(&mut counter, value)?;
            let actual = counter.written() - before;
            let expected = field.size.calc_unknown(value, WordSpace::Byte);
            if actual != expected {
                return Err(Error::SizeMismatch {
                    field: field.name,
                    expected,
                    actual,
                });
            }
        }
        Ok(counter.written())
    }

    pub fn read<R: Read>(&self, input: &mut R) -> Result<T> {
        let mut value = T::default();
        for field in &self.fields {
            (field.read)(input, &mut value)?;
        }
        Ok(value)
    }

    /// Advance past one encoded value
    pub fn skip<R: Read>(&self, input: &mut R) -> Result<()> {
        for field in &self.fields {
            (field.skip)(input)?;
        }
        Ok(())
    }

    /// Read only the field called `name`, skipping those before it.
    /// Every other field keeps its default.
    pub fn read_field<R: Read>(&self, input: &mut R, name: &str) -> Result<T> {
        let mut value = T::default();
        for field in &self.fields {
            if field.name == name {
                (field.read)(input, &mut value)?;
                return Ok(value);
            }
            (field.skip)(input)?;
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no field named {}", name),
        )
        .into())
    }
}

impl<T: Record> Default for RecordSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RecordSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSchema")
            .field("fields", &self.fields)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ContentReader, ContentWriter};
    use std::io::Cursor;

    #[derive(Debug, Default, PartialEq)]
    struct Entry {
        id: u32,
        link: ChunkPointer,
        label: String,
    }

    impl PointerFields for Entry {
        fn visit_pointer_fields(&mut self, visit: &mut dyn FnMut(&mut ChunkPointer) -> bool) -> bool {
            visit(&mut self.link)
        }
    }

    impl Record for Entry {
        fn fields() -> Vec<FieldDescriptor<Self>> {
            vec![
                FieldDescriptor::new(
                    "id",
                    SizeDescriptor::fixed(WordSpace::Byte, 4),
                    |r, e| {
                        e.id = r.read_word(4)? as u32;
                        Ok(())
                    },
                    |w, e| w.write_word(e.id as u64, 4),
                    |r| r.read_word(4).map(|_| ()),
                ),
                FieldDescriptor::new(
                    "link",
                    SizeDescriptor::fixed(WordSpace::Byte, 8),
                    |r, e| {
                        e.link = ChunkPointer::new(r.read_word(8)?);
                        Ok(())
                    },
                    |w, e| w.write_word(e.link.get(), 8),
                    |r| r.read_word(8).map(|_| ()),
                ),
                FieldDescriptor::new(
                    "label",
                    SizeDescriptor::unknown(WordSpace::Byte, 1, Some(256), |e: &Entry| {
                        1 + e.label.len() as u64
                    }),
                    |r, e| {
                        let len = r.read_u8()? as usize;
                        e.label = String::from_utf8_lossy(&r.read_n(len)?).into_owned();
                        Ok(())
                    },
                    |w, e| {
                        w.write_u8(e.label.len() as u8)?;
                        w.write_all(e.label.as_bytes())?;
                        Ok(())
                    },
                    |r| {
                        let len = r.read_u8()? as usize;
                        r.read_n(len).map(|_| ())
                    },
                ),
            ]
        }
    }

    fn sample() -> Entry {
        Entry {
            id: 7,
            link: ChunkPointer::new(300),
            label: "seven".into(),
        }
    }

    #[test]
    fn test_schema_sizes() {
        let schema = RecordSchema::<Entry>::new();
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.size().min(WordSpace::Byte), 13);
        assert_eq!(schema.alloc_size(), 268);
        assert_eq!(schema.encoded_size(&sample()), 18);
    }

    #[test]
    fn test_write_read_skip() -> Result<()> {
        let schema = RecordSchema::<Entry>::new();
        let mut out = Vec::new();
        assert_eq!(schema.write(&mut out, &sample())?, 18);
        schema.write(&mut out, &Entry::default())?;

        let mut input = Cursor::new(out);
        schema.skip(&mut input)?;
        assert_eq!(schema.read(&mut input)?, Entry::default());

        input.set_position(0);
        assert_eq!(schema.read(&mut input)?, sample());
        Ok(())
    }

    #[test]
    fn test_read_single_field() -> Result<()> {
        let schema = RecordSchema::<Entry>::new();
        let mut out = Vec::new();
        schema.write(&mut out, &sample())?;

        let partial = schema.read_field(&mut Cursor::new(&out), "label")?;
        assert_eq!(partial.label, "seven");
        assert_eq!(partial.id, 0);
        assert!(schema.read_field(&mut Cursor::new(&out), "missing").is_err());
        Ok(())
    }

    #[test]
    fn test_size_mismatch_detected() {
        #[derive(Default)]
        struct Liar;
        impl PointerFields for Liar {}
        impl Record for Liar {
            fn fields() -> Vec<FieldDescriptor<Self>> {
                vec![FieldDescriptor::new(
                    "short",
                    SizeDescriptor::fixed(WordSpace::Byte, 2),
                    |_, _| Ok(()),
                    |w, _| w.write_u8(1),
                    |_| Ok(()),
                )]
            }
        }

        let schema = RecordSchema::<Liar>::new();
        let err = schema.write(&mut Vec::new(), &Liar).unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                field: "short",
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_visit_stops_on_match() {
        let mut entry = sample();
        let target = ChunkPointer::new(300);
        let hit = entry.visit_pointer_fields(&mut |p| {
            if *p == target {
                *p = ChunkPointer::new(900);
                true
            } else {
                false
            }
        });
        assert!(hit);
        assert_eq!(entry.link, ChunkPointer::new(900));
        assert!(!entry.visit_pointer_fields(&mut |p| *p == target));
    }
}
