//! Width, bit and enumerated-value codecs
//!
//! ```text
//! NumberSize        Void | 1..8 byte integer classes
//! BitOutputStream   streaming bits over a byte sink (63-bit buffer)
//! BitInputStream    streaming bits over a byte source
//! FlagWriter        bits packed into one NumberSize register
//! FlagReader        the reading side, with all-ones padding checks
//! EnumUniverse      closed value sets at minimal bit width
//! ```

pub mod bits;
pub mod enums;
pub mod flags;
pub mod number_size;

pub use bits::{BitInputStream, BitOutputStream, BitReader, BitWriter};
pub use enums::{EnumUniverse, Enumerated};
pub use flags::{read_single_bool, write_single_bool, AutoPop, FlagReader, FlagWriter};
pub use number_size::NumberSize;
