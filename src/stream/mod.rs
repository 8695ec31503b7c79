//! Container framing and the block-parallel compressed stream wrappers.
//!
//! A container is a stream header (unless running headerless), a sequence of
//! framed block payloads in block-ID order, and an end-of-stream marker.
//! [`CompressedWriter`] and [`CompressedReader`] orchestrate per-block
//! transform + entropy work across a batch of tasks while a single atomic
//! counter serializes access to the shared bitstream.

pub mod header;
mod reader;
mod writer;

pub use reader::CompressedReader;
pub use writer::CompressedWriter;

use crate::error::{KanziError, KanziResult};

/// Current container format version.
pub const BITSTREAM_FORMAT_VERSION: u8 = 6;

/// Oldest format version this reader understands.
pub const MIN_BITSTREAM_FORMAT_VERSION: u8 = 3;

/// Blocks at or below this size are always emitted verbatim.
pub const SMALL_BLOCK_SIZE: usize = 15;

pub const MIN_BLOCK_SIZE: usize = 1024;
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

/// Upper bound on concurrent jobs.
pub const MAX_CONCURRENCY: usize = 64;

/// Sentinel stored in the processed-block counter on failure.
pub const CANCELED_BLOCK_ID: i64 = -1;

/// Copy policy: first-order entropy (1024-scaled) above this value marks a
/// block incompressible.
pub const INCOMPRESSIBLE_THRESHOLD: u32 = 973;

// Block header mode bits.
pub(crate) const COPY_BLOCK_MASK: u8 = 0x80;
pub(crate) const TRANSFORMS_MASK: u8 = 0x10;
pub(crate) const DATA_SIZE_SHIFT: u32 = 5;

// Largest single splice against the shared bitstream, in bytes (2^30 bits).
pub(crate) const MAX_BIT_CHUNK_BYTES: usize = 1 << 27;

/// Largest accepted post-transform length for a stream's block size.
pub(crate) fn max_post_transform_len(block_size: usize) -> usize {
    (3 * block_size / 2).max(2048).min(MAX_BLOCK_SIZE)
}

/// Largest accepted framed payload, post-transform bound plus block header
/// and entropy table overhead.
pub(crate) fn max_payload_len(block_size: usize) -> usize {
    (max_post_transform_len(block_size) + (block_size >> 6) + 1024).min(MAX_BLOCK_SIZE)
}

/// Width of the payload size field: 3 bits below 8 bytes, otherwise
/// ceil(log2) + 4.  Always at most 34.
pub(crate) fn payload_size_field_width(payload_bytes: u64) -> usize {
    if payload_bytes < 8 {
        3
    } else {
        let ceil_log2 = 64 - (payload_bytes - 1).leading_zeros() as usize;
        ceil_log2 + 4
    }
}

/// Fair split of `total_jobs` across `tasks` workers; every worker gets at
/// least one.
pub(crate) fn jobs_per_task(total_jobs: usize, tasks: usize) -> Vec<usize> {
    debug_assert!(tasks > 0);
    if total_jobs <= tasks {
        return vec![1; tasks];
    }
    let base = total_jobs / tasks;
    let extra = total_jobs % tasks;
    (0..tasks)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

pub(crate) fn validate_block_size(block_size: usize) -> KanziResult<()> {
    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
        return Err(KanziError::invalid_param(format!(
            "block size must be in [{}, {}], got {}",
            MIN_BLOCK_SIZE, MAX_BLOCK_SIZE, block_size
        )));
    }
    if block_size % 16 != 0 {
        return Err(KanziError::invalid_param(format!(
            "block size must be a multiple of 16, got {}",
            block_size
        )));
    }
    Ok(())
}

pub(crate) fn validate_jobs(jobs: usize) -> KanziResult<()> {
    if !(1..=MAX_CONCURRENCY).contains(&jobs) {
        return Err(KanziError::invalid_param(format!(
            "jobs must be in [1, {}], got {}",
            MAX_CONCURRENCY, jobs
        )));
    }
    Ok(())
}

/// Compression-side configuration.
#[derive(Clone, Debug)]
pub struct CompressorConfig {
    /// `+`-separated transform pipeline, e.g. `"BWT+RANK+ZRLT"`.
    pub transform: String,
    /// Entropy codec name, e.g. `"HUFFMAN"`.
    pub entropy: String,
    /// Block size in bytes; `[1024, 2^30]`, multiple of 16.
    pub block_size: usize,
    /// Maximum concurrent block tasks, `[1, 64]`.
    pub jobs: usize,
    /// Per-block checksum width: 0, 32 or 64 bits.
    pub checksum: usize,
    /// Uncompressed size hint; bounds the job count and is recorded in the
    /// header when known.
    pub original_size: Option<u64>,
    /// Enables the incompressibility sniffer (copy incompressible blocks).
    pub skip_blocks: bool,
    /// Omits the stream header entirely.
    pub headerless: bool,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        CompressorConfig {
            transform: "NONE".to_string(),
            entropy: "NONE".to_string(),
            block_size: 4 * 1024 * 1024,
            jobs: 1,
            checksum: 0,
            original_size: None,
            skip_blocks: false,
            headerless: false,
        }
    }
}

/// Stream parameters a headerless reader must be told explicitly.
#[derive(Clone, Debug)]
pub struct HeaderlessConfig {
    pub transform: String,
    pub entropy: String,
    pub block_size: usize,
    /// Checksum width in bits: 0, 32 or 64.
    pub checksum: usize,
    /// Decoded size, when known.
    pub original_size: Option<u64>,
    /// Format version the stream was written with.
    pub bs_version: u8,
}

impl Default for HeaderlessConfig {
    fn default() -> Self {
        HeaderlessConfig {
            transform: "NONE".to_string(),
            entropy: "NONE".to_string(),
            block_size: 4 * 1024 * 1024,
            checksum: 0,
            original_size: None,
            bs_version: BITSTREAM_FORMAT_VERSION,
        }
    }
}

/// Decompression-side configuration.
#[derive(Clone, Debug)]
pub struct DecompressorConfig {
    /// Maximum concurrent block tasks, `[1, 64]`.
    pub jobs: usize,
    /// First block ID to emit (inclusive); earlier blocks are read and
    /// discarded.
    pub from: Option<i64>,
    /// First block ID not to emit; later blocks are read and discarded.
    pub to: Option<i64>,
    /// When set, no header is read and all parameters come from here.
    pub headerless: Option<HeaderlessConfig>,
}

impl Default for DecompressorConfig {
    fn default() -> Self {
        DecompressorConfig {
            jobs: 1,
            from: None,
            to: None,
            headerless: None,
        }
    }
}
