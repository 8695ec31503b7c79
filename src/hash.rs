//! Block integrity hashing.
//!
//! Thin adapter over the `xxhash-rust` crate.  One hash kind is chosen per
//! stream and applied to every block: raw bytes before the transform stage on
//! the way in, fully inverse-transformed bytes on the way out.  Both sides
//! seed with the container magic so unrelated XXH users cannot collide with
//! block checksums by accident.

use xxhash_rust::xxh32::xxh32;
use xxhash_rust::xxh64::xxh64;

use crate::error::{ErrorKind, KanziError, KanziResult};
use crate::BITSTREAM_MAGIC;

/// Per-stream checksum width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HashKind {
    #[default]
    None,
    Xxh32,
    Xxh64,
}

impl HashKind {
    /// Width of the on-wire checksum field in bits.
    pub fn size_bits(&self) -> usize {
        match self {
            HashKind::None => 0,
            HashKind::Xxh32 => 32,
            HashKind::Xxh64 => 64,
        }
    }

    /// 2-bit selector stored in the stream header.
    pub fn selector(&self) -> u8 {
        match self {
            HashKind::None => 0,
            HashKind::Xxh32 => 1,
            HashKind::Xxh64 => 2,
        }
    }

    /// Inverse of [`selector`](Self::selector); selector 3 is reserved.
    pub fn from_selector(sel: u8) -> KanziResult<Self> {
        match sel {
            0 => Ok(HashKind::None),
            1 => Ok(HashKind::Xxh32),
            2 => Ok(HashKind::Xxh64),
            _ => Err(KanziError::new(
                ErrorKind::InvalidFile,
                format!("reserved checksum selector: {}", sel),
            )),
        }
    }

    /// Maps the user-facing size (0, 32 or 64 bits) to a kind.
    pub fn from_size(bits: usize) -> KanziResult<Self> {
        match bits {
            0 => Ok(HashKind::None),
            32 => Ok(HashKind::Xxh32),
            64 => Ok(HashKind::Xxh64),
            _ => Err(KanziError::invalid_param(format!(
                "checksum size must be 0, 32 or 64, got {}",
                bits
            ))),
        }
    }

    /// One-shot hash of `data`, zero-extended to 64 bits.
    /// Returns 0 for [`HashKind::None`].
    pub fn hash(&self, data: &[u8]) -> u64 {
        match self {
            HashKind::None => 0,
            HashKind::Xxh32 => u64::from(xxh32(data, BITSTREAM_MAGIC)),
            HashKind::Xxh64 => xxh64(data, u64::from(BITSTREAM_MAGIC)),
        }
    }
}
