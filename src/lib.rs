//! Block-parallel lossless compression library and container format.
//!
//! A container stream is a framed header, a sequence of independently
//! compressed blocks in write order, and an end-of-stream marker.  Each
//! block runs through a reversible transform pipeline and an entropy coding
//! stage; blocks are processed concurrently while a single atomic counter
//! keeps the shared bitstream in strict block order.
//!
//! ```no_run
//! use kanzi::{CompressedWriter, CompressorConfig};
//!
//! let cfg = CompressorConfig {
//!     transform: "BWT+RANK+ZRLT".to_string(),
//!     entropy: "HUFFMAN".to_string(),
//!     block_size: 1 << 20,
//!     jobs: 4,
//!     checksum: 32,
//!     ..CompressorConfig::default()
//! };
//! let mut writer = CompressedWriter::new(Vec::new(), &cfg)?;
//! writer.write(b"some bytes worth keeping")?;
//! writer.close()?;
//! # Ok::<(), kanzi::KanziError>(())
//! ```

pub mod bitstream;
pub mod entropy;
pub mod error;
pub mod event;
pub mod hash;
pub mod magic;
pub mod stream;
pub mod transform;

pub use error::{ErrorKind, KanziError, KanziResult};
pub use event::{Event, EventKind, Listener};
pub use hash::HashKind;
pub use stream::{
    CompressedReader, CompressedWriter, CompressorConfig, DecompressorConfig, HeaderlessConfig,
};

/// First four bytes of every headered container: ASCII `"KANZ"`.
pub const BITSTREAM_MAGIC: u32 = 0x4B41_4E5A;

pub const VERSION_MAJOR: u32 = 2;
pub const VERSION_MINOR: u32 = 3;
pub const VERSION_RELEASE: u32 = 0;

/// Library version string, e.g. `"2.3.0"`.
pub fn version_string() -> String {
    format!("{}.{}.{}", VERSION_MAJOR, VERSION_MINOR, VERSION_RELEASE)
}
