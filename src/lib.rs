// chunkstore - chunk-based persistent storage engine
// Allocator, pointer model and bit-precise codecs over a flat byte store

#![warn(rust_2018_idioms)]

pub mod alloc;
pub mod chunk;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod io;
pub mod logging;
pub mod schema;
pub mod size;
pub mod store;

// Re-exports for convenience
pub use alloc::{AllocRequest, Strategy};
pub use chunk::{Chunk, ChunkPointer, MIN_CAPACITY};
pub use cluster::{ChainIo, Cluster, ClusterStats, RecordWalker, ReferenceWalker, SharedCluster};
pub use codec::{
    BitInputStream, BitOutputStream, BitReader, BitWriter, EnumUniverse, Enumerated, FlagReader,
    FlagWriter, NumberSize,
};
pub use config::ClusterConfig;
pub use schema::{FieldDescriptor, PointerFields, Record, RecordSchema};
pub use size::{SizeDescriptor, WordSpace};
pub use store::{ByteStore, FileStore, MemoryStore};

/// Storage engine error types
pub mod error {
    use crate::chunk::ChunkPointer;
    use crate::codec::NumberSize;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Width overflow: {value} does not fit in {size:?} (max {max})", max = .size.max_size())]
        WidthOverflow { value: u64, size: NumberSize },

        #[error("Illegal bit value at bit {bit}")]
        IllegalBitValue { bit: u64 },

        #[error("Bit count mismatch: expected {expected} bits, got {actual}")]
        BitCount { expected: u64, actual: u64 },

        #[error("Invalid magic id")]
        InvalidMagic,

        #[error("Malformed header: {0}")]
        MalformedHeader(String),

        #[error("Malformed chunk at {pointer}: {reason}")]
        MalformedChunk {
            pointer: ChunkPointer,
            reason: String,
        },

        #[error("Allocator invariant violated: {0}")]
        Invariant(String),

        #[error("Field {field} wrote {actual} bytes, expected {expected}")]
        SizeMismatch {
            field: &'static str,
            expected: u64,
            actual: u64,
        },

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        /// True when the error means the persisted structure itself is inconsistent.
        pub fn is_fatal(&self) -> bool {
            matches!(
                self,
                Error::Invariant(_)
                    | Error::MalformedChunk { .. }
                    | Error::MalformedHeader(_)
                    | Error::InvalidMagic
            )
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;
    use super::*;

    #[test]
    fn test_version_format() {
        let _version: &str = VERSION;
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::InvalidMagic.is_fatal());
        assert!(Error::Invariant("dangling".into()).is_fatal());
        assert!(!Error::IllegalBitValue { bit: 3 }.is_fatal());
        assert!(!Error::WidthOverflow {
            value: 300,
            size: NumberSize::Byte
        }
        .is_fatal());
    }

    #[test]
    fn test_width_overflow_message() {
        let err = Error::WidthOverflow {
            value: 300,
            size: NumberSize::Byte,
        };
        assert_eq!(
            err.to_string(),
            "Width overflow: 300 does not fit in Byte (max 255)"
        );
    }
}
