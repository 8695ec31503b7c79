//! Stream header encode/decode.
//!
//! Current layout (version 6): magic(32) `"KANZ"`, version(4),
//! checksum selector(2), entropy(5), transforms(48), blockSize/16(28),
//! size mask(2), original size(0/16/32/48), padding(15), checksum(24).
//! Versions 3–5 carried a 1-bit checksum toggle (32-bit XXH32 only), no
//! padding, and a 4-bit header checksum; the reader still accepts them.

use std::io::{Read, Write};

use crate::bitstream::{BitStreamError, InputBitStream, OutputBitStream};
use crate::entropy::EntropyType;
use crate::error::{ErrorKind, KanziError, KanziResult};
use crate::hash::HashKind;
use crate::transform;
use crate::BITSTREAM_MAGIC;

use super::{
    validate_block_size, BITSTREAM_FORMAT_VERSION, MIN_BITSTREAM_FORMAT_VERSION,
};

const HEADER_HASH: u32 = 0x1E35_A7BD;

/// Decoded stream parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u8,
    pub checksum: HashKind,
    pub entropy: EntropyType,
    pub transform_type: u64,
    pub block_size: usize,
    pub original_size: Option<u64>,
}

impl StreamHeader {
    /// Textual summary used by the header-decoding event.
    pub fn summary(&self) -> String {
        let size = match self.original_size {
            Some(s) => s.to_string(),
            None => "unknown".to_string(),
        };
        format!(
            "version={}, checksum={} bits, block={} bytes, transform={}, entropy={}, original size={}",
            self.version,
            self.checksum.size_bits(),
            self.block_size,
            transform::transform_names(self.transform_type),
            self.entropy.name(),
            size
        )
    }
}

/// Width selector for the original size field: 0 = absent, k = 16·k bits.
fn size_mask(original_size: Option<u64>) -> (u64, usize) {
    match original_size {
        None => (0, 0),
        Some(s) if s < (1 << 16) => (1, 16),
        Some(s) if s < (1 << 32) => (2, 32),
        Some(s) if s < (1 << 48) => (3, 48),
        // Too large to record: declared unknown.
        Some(_) => (0, 0),
    }
}

/// Multiplicative mix of the header fields, folded to 24 bits (4 bits for
/// legacy versions).
fn header_checksum(
    version: u8,
    checksum_sel: u8,
    entropy: EntropyType,
    transform_type: u64,
    block_size: usize,
    sz_mask: u64,
    original_size: u64,
) -> u32 {
    let h = HEADER_HASH;
    let mut c = h.wrapping_mul(u32::from(version));
    c ^= h.wrapping_mul(u32::from(checksum_sel));
    c ^= h.wrapping_mul(entropy.code() as u32);
    c ^= h.wrapping_mul((transform_type >> 32) as u32);
    c ^= h.wrapping_mul(transform_type as u32);
    c ^= h.wrapping_mul(block_size as u32);
    c ^= h.wrapping_mul(sz_mask as u32);
    if sz_mask != 0 {
        c ^= h.wrapping_mul((original_size >> 32) as u32);
        c ^= h.wrapping_mul(original_size as u32);
    }
    c = (c >> 23) ^ (c >> 3);
    if version >= 6 {
        c & 0x00FF_FFFF
    } else {
        c & 0x0F
    }
}

fn write_err(e: BitStreamError) -> KanziError {
    KanziError::new(ErrorKind::WriteFile, e.to_string())
}

fn read_err(e: BitStreamError) -> KanziError {
    match e {
        BitStreamError::EndOfStream => {
            KanziError::invalid_file("truncated stream header")
        }
        other => KanziError::new(ErrorKind::ReadFile, other.to_string()),
    }
}

/// Writes the version-6 header for `params`.
pub fn write_header<W: Write>(
    obs: &mut OutputBitStream<W>,
    params: &StreamHeader,
) -> KanziResult<()> {
    let (mask, size_bits) = size_mask(params.original_size);
    let original = params.original_size.unwrap_or(0);
    obs.write_bits(u64::from(BITSTREAM_MAGIC), 32).map_err(write_err)?;
    obs.write_bits(u64::from(BITSTREAM_FORMAT_VERSION), 4)
        .map_err(write_err)?;
    obs.write_bits(u64::from(params.checksum.selector()), 2)
        .map_err(write_err)?;
    obs.write_bits(params.entropy.code(), 5).map_err(write_err)?;
    obs.write_bits(params.transform_type, 48).map_err(write_err)?;
    obs.write_bits((params.block_size / 16) as u64, 28)
        .map_err(write_err)?;
    obs.write_bits(mask, 2).map_err(write_err)?;
    if size_bits > 0 {
        obs.write_bits(original, size_bits).map_err(write_err)?;
    }
    obs.write_bits(0, 15).map_err(write_err)?; // padding
    let cksum = header_checksum(
        BITSTREAM_FORMAT_VERSION,
        params.checksum.selector(),
        params.entropy,
        params.transform_type,
        params.block_size / 16,
        mask,
        original,
    );
    obs.write_bits(u64::from(cksum), 24).map_err(write_err)?;
    Ok(())
}

/// Reads and validates a stream header.
pub fn read_header<R: Read>(ibs: &mut InputBitStream<R>) -> KanziResult<StreamHeader> {
    let magic = ibs.read_bits(32).map_err(read_err)? as u32;
    if magic != BITSTREAM_MAGIC {
        return Err(KanziError::invalid_file("invalid stream magic"));
    }
    let version = ibs.read_bits(4).map_err(read_err)? as u8;
    if version > BITSTREAM_FORMAT_VERSION || version < MIN_BITSTREAM_FORMAT_VERSION {
        return Err(KanziError::new(
            ErrorKind::StreamVersion,
            format!("unsupported bitstream version: {}", version),
        ));
    }

    let checksum = if version >= 6 {
        let sel = ibs.read_bits(2).map_err(read_err)? as u8;
        HashKind::from_selector(sel)?
    } else if ibs.read_bits(1).map_err(read_err)? == 1 {
        HashKind::Xxh32
    } else {
        HashKind::None
    };

    let entropy_code = ibs.read_bits(5).map_err(read_err)?;
    let entropy = EntropyType::from_code(entropy_code)?;
    let transform_type = ibs.read_bits(48).map_err(read_err)?;
    // Reject unknown identifiers early.
    transform::unpack_transform_codes(transform_type)?;

    let scaled_block_size = ibs.read_bits(28).map_err(read_err)?;
    let block_size = (scaled_block_size as usize) * 16;
    validate_block_size(block_size)
        .map_err(|e| KanziError::new(ErrorKind::BlockSize, e.message))?;

    let mask = ibs.read_bits(2).map_err(read_err)?;
    let original_size = if mask > 0 {
        Some(ibs.read_bits(16 * mask as usize).map_err(read_err)?)
    } else {
        None
    };

    if version >= 6 {
        let padding = ibs.read_bits(15).map_err(read_err)?;
        if padding != 0 {
            return Err(KanziError::invalid_file("non-zero header padding"));
        }
    }

    let (cksum_width, sel) = if version >= 6 {
        (24, checksum.selector())
    } else {
        (4, u8::from(checksum != HashKind::None))
    };
    let stored = ibs.read_bits(cksum_width).map_err(read_err)? as u32;
    let expected = header_checksum(
        version,
        sel,
        entropy,
        transform_type,
        scaled_block_size as usize,
        mask,
        original_size.unwrap_or(0),
    );
    if stored != expected {
        return Err(KanziError::crc_check("corrupted stream header"));
    }

    Ok(StreamHeader {
        version,
        checksum,
        entropy,
        transform_type,
        block_size,
        original_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::parse_transform_names;

    fn sample() -> StreamHeader {
        StreamHeader {
            version: BITSTREAM_FORMAT_VERSION,
            checksum: HashKind::Xxh32,
            entropy: EntropyType::Huffman,
            transform_type: parse_transform_names("BWT+RANK+ZRLT").unwrap(),
            block_size: 1 << 20,
            original_size: Some(123_456),
        }
    }

    fn encode(params: &StreamHeader) -> Vec<u8> {
        let mut obs = OutputBitStream::new(Vec::new());
        write_header(&mut obs, params).unwrap();
        obs.close().unwrap();
        obs.into_inner()
    }

    #[test]
    fn round_trip() {
        let params = sample();
        let bytes = encode(&params);
        let mut ibs = InputBitStream::new(&bytes[..]);
        let decoded = read_header(&mut ibs).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn round_trip_without_original_size() {
        let mut params = sample();
        params.original_size = None;
        params.checksum = HashKind::Xxh64;
        let bytes = encode(&params);
        // 32+4+2+5+48+28+2+15+24 bits = 160 bits exactly.
        assert_eq!(bytes.len(), 20);
        let mut ibs = InputBitStream::new(&bytes[..]);
        assert_eq!(read_header(&mut ibs).unwrap(), params);
    }

    #[test]
    fn magic_is_first() {
        let bytes = encode(&sample());
        assert_eq!(&bytes[..4], b"KANZ");
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = encode(&sample());
        bytes[0] ^= 0x01;
        let mut ibs = InputBitStream::new(&bytes[..]);
        let err = read_header(&mut ibs).err().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidFile);
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = encode(&sample());
        // Version is the high nibble of byte 4.
        bytes[4] = (bytes[4] & 0x0F) | 0x70;
        let mut ibs = InputBitStream::new(&bytes[..]);
        let err = read_header(&mut ibs).err().unwrap();
        assert_eq!(err.kind, ErrorKind::StreamVersion);
    }

    #[test]
    fn corrupted_field_fails_checksum() {
        let mut bytes = encode(&sample());
        // Flip the low bit of transform slot 2 (ZRLT -> RLT, still a valid
        // identifier) so only the checksum can catch it.
        bytes[7] ^= 0x08;
        let mut ibs = InputBitStream::new(&bytes[..]);
        let err = read_header(&mut ibs).err().unwrap();
        assert_eq!(err.kind, ErrorKind::CrcCheck);
    }

    #[test]
    fn truncated_header_is_invalid_file() {
        let bytes = encode(&sample());
        let mut ibs = InputBitStream::new(&bytes[..6]);
        let err = read_header(&mut ibs).err().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidFile);
    }

    #[test]
    fn legacy_version_header_parses() {
        // Version 5: 1-bit checksum toggle, no padding, 4-bit checksum.
        let mut obs = OutputBitStream::new(Vec::new());
        obs.write_bits(u64::from(crate::BITSTREAM_MAGIC), 32).unwrap();
        obs.write_bits(5, 4).unwrap();
        obs.write_bits(1, 1).unwrap();
        obs.write_bits(EntropyType::Huffman.code(), 5).unwrap();
        obs.write_bits(0, 48).unwrap();
        obs.write_bits(64, 28).unwrap();
        obs.write_bits(0, 2).unwrap();
        let cksum = header_checksum(5, 1, EntropyType::Huffman, 0, 64, 0, 0);
        obs.write_bits(u64::from(cksum), 4).unwrap();
        obs.close().unwrap();
        let bytes = obs.into_inner();

        let mut ibs = InputBitStream::new(&bytes[..]);
        let decoded = read_header(&mut ibs).unwrap();
        assert_eq!(decoded.version, 5);
        assert_eq!(decoded.checksum, HashKind::Xxh32);
        assert_eq!(decoded.entropy, EntropyType::Huffman);
        assert_eq!(decoded.block_size, 1024);
        assert_eq!(decoded.original_size, None);
    }

    #[test]
    fn oversized_original_size_declared_unknown() {
        let mut params = sample();
        params.original_size = Some(1 << 50);
        let bytes = encode(&params);
        let mut ibs = InputBitStream::new(&bytes[..]);
        let decoded = read_header(&mut ibs).unwrap();
        assert_eq!(decoded.original_size, None);
    }
}
