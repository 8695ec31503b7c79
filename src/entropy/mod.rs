//! Entropy coding stage: byte → bit encoders and bit → byte decoders.
//!
//! A fresh encoder or decoder is constructed for every block so statistics
//! never leak across blocks.  Both borrow the block's local bitstream for
//! their whole lifetime; [`EntropyEncoder::dispose`] must run before the
//! local sink is considered complete (adaptive coders emit trailing bits
//! there).

mod fpaq;
mod huffman;
mod none;

pub use fpaq::{FpaqDecoder, FpaqEncoder};
pub use huffman::{HuffmanDecoder, HuffmanEncoder};
pub use none::{NoneDecoder, NoneEncoder};

use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::error::{ErrorKind, KanziError, KanziResult};

/// Byte → bit encoder, one per block.
pub trait EntropyEncoder {
    /// Encodes the whole slice; returns the number of bytes consumed.
    fn encode(&mut self, block: &[u8]) -> KanziResult<usize>;

    /// Emits any trailing bits.  Mandatory before the sink is closed.
    fn dispose(&mut self) -> KanziResult<()>;
}

/// Bit → byte decoder, one per block.
pub trait EntropyDecoder {
    /// Fills the whole slice; returns the number of bytes produced.
    fn decode(&mut self, block: &mut [u8]) -> KanziResult<usize>;

    /// Releases the source.  Mandatory before the block is considered done.
    fn dispose(&mut self) -> KanziResult<()>;
}

/// Closed set of entropy codec identifiers (5 bits on the wire).
///
/// Every historical name is recognized so any valid stream header can be
/// parsed and printed; only a subset can be instantiated by this build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EntropyType {
    #[default]
    None = 0,
    Huffman = 1,
    Fpaq = 2,
    Range = 3,
    Ans0 = 4,
    Ans1 = 5,
    Cm = 6,
    Paq = 7,
    Tpaq = 8,
    TpaqX = 9,
}

impl EntropyType {
    pub fn name(&self) -> &'static str {
        match self {
            EntropyType::None => "NONE",
            EntropyType::Huffman => "HUFFMAN",
            EntropyType::Fpaq => "FPAQ",
            EntropyType::Range => "RANGE",
            EntropyType::Ans0 => "ANS0",
            EntropyType::Ans1 => "ANS1",
            EntropyType::Cm => "CM",
            EntropyType::Paq => "PAQ",
            EntropyType::Tpaq => "TPAQ",
            EntropyType::TpaqX => "TPAQX",
        }
    }

    pub fn code(&self) -> u64 {
        *self as u64
    }

    pub fn from_code(code: u64) -> KanziResult<Self> {
        match code {
            0 => Ok(EntropyType::None),
            1 => Ok(EntropyType::Huffman),
            2 => Ok(EntropyType::Fpaq),
            3 => Ok(EntropyType::Range),
            4 => Ok(EntropyType::Ans0),
            5 => Ok(EntropyType::Ans1),
            6 => Ok(EntropyType::Cm),
            7 => Ok(EntropyType::Paq),
            8 => Ok(EntropyType::Tpaq),
            9 => Ok(EntropyType::TpaqX),
            _ => Err(KanziError::new(
                ErrorKind::InvalidCodec,
                format!("unknown entropy codec identifier: {}", code),
            )),
        }
    }

    pub fn from_name(name: &str) -> KanziResult<Self> {
        match name.to_uppercase().as_str() {
            "NONE" => Ok(EntropyType::None),
            "HUFFMAN" => Ok(EntropyType::Huffman),
            "FPAQ" => Ok(EntropyType::Fpaq),
            "RANGE" => Ok(EntropyType::Range),
            "ANS0" => Ok(EntropyType::Ans0),
            "ANS1" => Ok(EntropyType::Ans1),
            "CM" => Ok(EntropyType::Cm),
            "PAQ" => Ok(EntropyType::Paq),
            "TPAQ" => Ok(EntropyType::Tpaq),
            "TPAQX" => Ok(EntropyType::TpaqX),
            _ => Err(KanziError::new(
                ErrorKind::InvalidCodec,
                format!("unknown entropy codec name: {}", name),
            )),
        }
    }

    /// Whether this build can instantiate the codec.
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            EntropyType::None | EntropyType::Huffman | EntropyType::Fpaq
        )
    }
}

/// Builds the per-block encoder for `kind` over `bitstream`.
pub fn new_encoder<'a, W: Write>(
    kind: EntropyType,
    bitstream: &'a mut OutputBitStream<W>,
) -> KanziResult<Box<dyn EntropyEncoder + 'a>> {
    match kind {
        EntropyType::None => Ok(Box::new(NoneEncoder::new(bitstream))),
        EntropyType::Huffman => Ok(Box::new(HuffmanEncoder::new(bitstream))),
        EntropyType::Fpaq => Ok(Box::new(FpaqEncoder::new(bitstream))),
        other => Err(KanziError::new(
            ErrorKind::CreateCodec,
            format!("entropy codec {} is not available in this build", other.name()),
        )),
    }
}

/// Builds the per-block decoder for `kind` over `bitstream`.
pub fn new_decoder<'a, R: Read>(
    kind: EntropyType,
    bitstream: &'a mut InputBitStream<R>,
) -> KanziResult<Box<dyn EntropyDecoder + 'a>> {
    match kind {
        EntropyType::None => Ok(Box::new(NoneDecoder::new(bitstream))),
        EntropyType::Huffman => Ok(Box::new(HuffmanDecoder::new(bitstream))),
        EntropyType::Fpaq => Ok(Box::new(FpaqDecoder::new(bitstream))),
        other => Err(KanziError::new(
            ErrorKind::CreateCodec,
            format!("entropy codec {} is not available in this build", other.name()),
        )),
    }
}

/// First-order entropy estimate of `data`, scaled so that 1024 means a full
/// 8 bits per byte (uniformly random data).
///
/// The copy policy treats anything above the incompressibility threshold as
/// not worth transforming.
pub fn first_order_entropy_1024(data: &[u8]) -> u32 {
    if data.is_empty() {
        return 0;
    }
    let mut histo = [0u64; 256];
    for &b in data {
        histo[b as usize] += 1;
    }
    let total = data.len() as f64;
    let mut sum = 0.0f64;
    for &count in histo.iter() {
        if count > 0 {
            let p = count as f64 / total;
            sum -= p * p.log2();
        }
    }
    // 8 bits/byte -> 1024
    (sum * 128.0).min(1024.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for t in [
            EntropyType::None,
            EntropyType::Huffman,
            EntropyType::Fpaq,
            EntropyType::Range,
            EntropyType::Ans0,
            EntropyType::Tpaq,
        ] {
            assert_eq!(EntropyType::from_name(t.name()).unwrap(), t);
            assert_eq!(EntropyType::from_code(t.code()).unwrap(), t);
        }
        assert!(EntropyType::from_name("SNAPPY").is_err());
        assert!(EntropyType::from_code(31).is_err());
    }

    #[test]
    fn unavailable_codecs_fail_construction() {
        let mut obs = OutputBitStream::new(Vec::new());
        let err = new_encoder(EntropyType::Tpaq, &mut obs).err().unwrap();
        assert_eq!(err.kind, ErrorKind::CreateCodec);
    }

    #[test]
    fn entropy_estimate_separates_flat_from_random() {
        let flat = vec![7u8; 4096];
        assert_eq!(first_order_entropy_1024(&flat), 0);

        // Pseudo-random bytes: should estimate close to 8 bits/byte.
        let mut x = 0x12345678u32;
        let noisy: Vec<u8> = (0..65536)
            .map(|_| {
                x = x.wrapping_mul(1664525).wrapping_add(1013904223);
                (x >> 24) as u8
            })
            .collect();
        assert!(first_order_entropy_1024(&noisy) > 1000);

        // Text-like data sits clearly below the incompressibility range.
        let text = b"the quick brown fox jumps over the lazy dog ".repeat(200);
        assert!(first_order_entropy_1024(&text) < 700);
    }
}
