//! Adaptive binary arithmetic codec.
//!
//! Each byte is coded as eight binary decisions through an order-0 context
//! tree of 12-bit probabilities.  The carrier is a carry-aware range coder:
//! 32-bit range, 33-bit low with a cache of pending 0xFF bytes, renormalized
//! one byte at a time.  The decoder consumes exactly the bytes the encoder
//! emits, so the surrounding block framing needs no extra padding.

use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::error::{ErrorKind, KanziError, KanziResult};

use super::{EntropyDecoder, EntropyEncoder};

const TOP: u32 = 1 << 24;
const PSCALE: u32 = 1 << 12;
const RATE: u32 = 5;

/// Probability of a zero bit for each tree context, 12-bit fixed point.
/// Context 0 is unused; contexts 1..=255 form the byte tree.
struct BitModel {
    probs: [u16; 256],
}

impl BitModel {
    fn new() -> Self {
        BitModel {
            probs: [(PSCALE / 2) as u16; 256],
        }
    }

    #[inline]
    fn p0(&self, ctx: usize) -> u32 {
        u32::from(self.probs[ctx])
    }

    #[inline]
    fn update(&mut self, ctx: usize, bit: u8) {
        let p = u32::from(self.probs[ctx]);
        // Keeps p in (0, PSCALE): the shift stalls before either bound.
        if bit == 0 {
            self.probs[ctx] = (p + ((PSCALE - p) >> RATE)) as u16;
        } else {
            self.probs[ctx] = (p - (p >> RATE)) as u16;
        }
    }
}

pub struct FpaqEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
    model: BitModel,
    low: u64,
    range: u32,
    cache: u8,
    cache_size: u64,
    disposed: bool,
}

impl<'a, W: Write> FpaqEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        FpaqEncoder {
            bitstream,
            model: BitModel::new(),
            low: 0,
            range: u32::MAX,
            cache: 0,
            cache_size: 1,
            disposed: false,
        }
    }

    fn encode_bit(&mut self, ctx: usize, bit: u8) -> KanziResult<()> {
        let bound = (self.range >> 12) * self.model.p0(ctx);
        if bit == 0 {
            self.range = bound;
        } else {
            self.low += u64::from(bound);
            self.range -= bound;
        }
        self.model.update(ctx, bit);
        while self.range < TOP {
            self.shift_low()?;
            self.range <<= 8;
        }
        Ok(())
    }

    fn shift_low(&mut self) -> KanziResult<()> {
        if (self.low as u32) < 0xFF00_0000 || (self.low >> 32) != 0 {
            let carry = (self.low >> 32) as u8;
            let mut byte = self.cache;
            loop {
                self.emit(byte.wrapping_add(carry))?;
                byte = 0xFF;
                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }
            self.cache = (self.low >> 24) as u8;
        }
        self.cache_size += 1;
        self.low = u64::from((self.low as u32) << 8);
        Ok(())
    }

    fn emit(&mut self, byte: u8) -> KanziResult<()> {
        self.bitstream
            .write_bits(u64::from(byte), 8)
            .map_err(|e| KanziError::new(ErrorKind::WriteFile, e.to_string()))
    }
}

impl<W: Write> EntropyEncoder for FpaqEncoder<'_, W> {
    fn encode(&mut self, block: &[u8]) -> KanziResult<usize> {
        for &b in block {
            let mut ctx = 1usize;
            for i in (0..8).rev() {
                let bit = (b >> i) & 1;
                self.encode_bit(ctx, bit)?;
                ctx = (ctx << 1) | bit as usize;
            }
        }
        Ok(block.len())
    }

    /// Flushes the range coder: exactly five final bytes.
    fn dispose(&mut self) -> KanziResult<()> {
        if self.disposed {
            return Ok(());
        }
        for _ in 0..5 {
            self.shift_low()?;
        }
        self.disposed = true;
        Ok(())
    }
}

pub struct FpaqDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
    model: BitModel,
    code: u32,
    range: u32,
    primed: bool,
}

impl<'a, R: Read> FpaqDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        FpaqDecoder {
            bitstream,
            model: BitModel::new(),
            code: 0,
            range: u32::MAX,
            primed: false,
        }
    }

    fn prime(&mut self) -> KanziResult<()> {
        // First byte is the encoder's initial zero cache; the shift drops it.
        for _ in 0..5 {
            self.code = (self.code << 8) | self.next_byte()?;
        }
        self.primed = true;
        Ok(())
    }

    fn decode_bit(&mut self, ctx: usize) -> KanziResult<u8> {
        let bound = (self.range >> 12) * self.model.p0(ctx);
        let bit = if self.code < bound {
            self.range = bound;
            0
        } else {
            self.code -= bound;
            self.range -= bound;
            1
        };
        self.model.update(ctx, bit);
        while self.range < TOP {
            self.code = (self.code << 8) | self.next_byte()?;
            self.range <<= 8;
        }
        Ok(bit)
    }

    fn next_byte(&mut self) -> KanziResult<u32> {
        self.bitstream
            .read_bits(8)
            .map(|v| v as u32)
            .map_err(|e| KanziError::process_block(e.to_string()))
    }
}

impl<R: Read> EntropyDecoder for FpaqDecoder<'_, R> {
    fn decode(&mut self, block: &mut [u8]) -> KanziResult<usize> {
        if !self.primed && !block.is_empty() {
            self.prime()?;
        }
        for slot in block.iter_mut() {
            let mut ctx = 1usize;
            for _ in 0..8 {
                let bit = self.decode_bit(ctx)?;
                ctx = (ctx << 1) | bit as usize;
            }
            *slot = (ctx & 0xFF) as u8;
        }
        Ok(block.len())
    }

    fn dispose(&mut self) -> KanziResult<()> {
        Ok(())
    }
}
