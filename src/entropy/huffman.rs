//! Canonical Huffman codec.
//!
//! Statistics are rebuilt for every 64 KiB chunk: the chunk's symbol
//! frequencies produce length-limited code lengths, the 256 lengths are
//! written flat (5 bits each) and the chunk's symbols follow.  The decoder
//! rebuilds the canonical code table from the lengths alone, so encoder and
//! decoder never need to agree on tie-breaking inside the Huffman tree.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::error::{ErrorKind, KanziError, KanziResult};

use super::{EntropyDecoder, EntropyEncoder};

/// Statistics window; each chunk carries its own code length table.
const CHUNK_SIZE: usize = 1 << 16;

/// Longest accepted code.  A 64 KiB window cannot produce codes past 23
/// bits, the rebuild loop below enforces the cap anyway.
const MAX_CODE_LEN: u8 = 24;

/// Bits used to store one code length in the table (0 = absent symbol).
const LEN_FIELD_BITS: usize = 5;

pub struct HuffmanEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
}

impl<'a, W: Write> HuffmanEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        HuffmanEncoder { bitstream }
    }

    fn encode_chunk(&mut self, chunk: &[u8]) -> KanziResult<()> {
        let mut freqs = [0u64; 256];
        for &b in chunk {
            freqs[b as usize] += 1;
        }
        let lens = length_limited_lengths(&freqs);
        let codes = canonical_codes(&lens);

        for &len in lens.iter() {
            self.bitstream
                .write_bits(u64::from(len), LEN_FIELD_BITS)
                .map_err(write_err)?;
        }
        for &b in chunk {
            let s = b as usize;
            self.bitstream
                .write_bits(u64::from(codes[s]), lens[s] as usize)
                .map_err(write_err)?;
        }
        Ok(())
    }
}

impl<W: Write> EntropyEncoder for HuffmanEncoder<'_, W> {
    fn encode(&mut self, block: &[u8]) -> KanziResult<usize> {
        for chunk in block.chunks(CHUNK_SIZE) {
            self.encode_chunk(chunk)?;
        }
        Ok(block.len())
    }

    fn dispose(&mut self) -> KanziResult<()> {
        Ok(())
    }
}

pub struct HuffmanDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
}

impl<'a, R: Read> HuffmanDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        HuffmanDecoder { bitstream }
    }

    fn decode_chunk(&mut self, chunk: &mut [u8]) -> KanziResult<()> {
        let mut lens = [0u8; 256];
        for len in lens.iter_mut() {
            let v = self.bitstream.read_bits(LEN_FIELD_BITS).map_err(read_err)? as u8;
            if v > MAX_CODE_LEN {
                return Err(KanziError::process_block(format!(
                    "invalid Huffman code length: {}",
                    v
                )));
            }
            *len = v;
        }
        let table = DecodingTable::build(&lens)?;
        for slot in chunk.iter_mut() {
            *slot = table.decode_symbol(self.bitstream)?;
        }
        Ok(())
    }
}

impl<R: Read> EntropyDecoder for HuffmanDecoder<'_, R> {
    fn decode(&mut self, block: &mut [u8]) -> KanziResult<usize> {
        let total = block.len();
        for chunk in block.chunks_mut(CHUNK_SIZE) {
            self.decode_chunk(chunk)?;
        }
        Ok(total)
    }

    fn dispose(&mut self) -> KanziResult<()> {
        Ok(())
    }
}

fn write_err(e: crate::bitstream::BitStreamError) -> KanziError {
    KanziError::new(ErrorKind::WriteFile, e.to_string())
}

fn read_err(e: crate::bitstream::BitStreamError) -> KanziError {
    KanziError::process_block(e.to_string())
}

/// Huffman code lengths for `freqs`, capped at [`MAX_CODE_LEN`] by halving
/// frequencies and rebuilding when the cap is exceeded.
fn length_limited_lengths(freqs: &[u64; 256]) -> [u8; 256] {
    let mut freqs = *freqs;
    loop {
        let lens = tree_lengths(&freqs);
        if lens.iter().all(|&l| l <= MAX_CODE_LEN) {
            return lens;
        }
        for f in freqs.iter_mut() {
            if *f > 0 {
                *f = (*f + 1) >> 1;
            }
        }
    }
}

/// Plain Huffman tree depths.  A single distinct symbol gets length 1.
fn tree_lengths(freqs: &[u64; 256]) -> [u8; 256] {
    let mut lens = [0u8; 256];
    let present: Vec<usize> = (0..256).filter(|&s| freqs[s] > 0).collect();
    match present.len() {
        0 => return lens,
        1 => {
            lens[present[0]] = 1;
            return lens;
        }
        _ => {}
    }

    // Nodes 0..256 are leaves, internal nodes are appended above.
    let mut parent = vec![u16::MAX; 2 * 256];
    let mut heap: BinaryHeap<Reverse<(u64, u16)>> = present
        .iter()
        .map(|&s| Reverse((freqs[s], s as u16)))
        .collect();
    let mut next_id = 256u16;
    while heap.len() > 1 {
        let Reverse((f1, n1)) = heap.pop().unwrap();
        let Reverse((f2, n2)) = heap.pop().unwrap();
        parent[n1 as usize] = next_id;
        parent[n2 as usize] = next_id;
        heap.push(Reverse((f1 + f2, next_id)));
        next_id += 1;
    }

    for &s in &present {
        let mut depth = 0u8;
        let mut node = s as u16;
        while parent[node as usize] != u16::MAX {
            node = parent[node as usize];
            depth += 1;
        }
        lens[s] = depth;
    }
    lens
}

/// Canonical code values: symbols sorted by (length, symbol), codes assigned
/// in increasing order.
fn canonical_codes(lens: &[u8; 256]) -> [u32; 256] {
    let mut order: Vec<usize> = (0..256).filter(|&s| lens[s] > 0).collect();
    order.sort_unstable_by_key(|&s| (lens[s], s));

    let mut codes = [0u32; 256];
    let mut code = 0u32;
    let mut prev_len = 0u8;
    for &s in &order {
        code <<= lens[s] - prev_len;
        codes[s] = code;
        code += 1;
        prev_len = lens[s];
    }
    codes
}

/// Canonical decoding state: per length, the first code value and the slice
/// of symbols it covers.
struct DecodingTable {
    first_code: [u32; MAX_CODE_LEN as usize + 1],
    counts: [u32; MAX_CODE_LEN as usize + 1],
    offsets: [u32; MAX_CODE_LEN as usize + 1],
    symbols: Vec<u8>,
}

impl DecodingTable {
    fn build(lens: &[u8; 256]) -> KanziResult<Self> {
        let mut counts = [0u32; MAX_CODE_LEN as usize + 1];
        for &l in lens.iter() {
            if l > 0 {
                counts[l as usize] += 1;
            }
        }
        let mut order: Vec<usize> = (0..256).filter(|&s| lens[s] > 0).collect();
        if order.is_empty() {
            return Err(KanziError::process_block("empty Huffman code table"));
        }
        order.sort_unstable_by_key(|&s| (lens[s], s));
        let symbols: Vec<u8> = order.iter().map(|&s| s as u8).collect();

        let mut first_code = [0u32; MAX_CODE_LEN as usize + 1];
        let mut offsets = [0u32; MAX_CODE_LEN as usize + 1];
        let mut code = 0u32;
        let mut offset = 0u32;
        for len in 1..=MAX_CODE_LEN as usize {
            first_code[len] = code;
            offsets[len] = offset;
            code = (code + counts[len]) << 1;
            offset += counts[len];
        }
        Ok(DecodingTable {
            first_code,
            counts,
            offsets,
            symbols,
        })
    }

    fn decode_symbol<R: Read>(&self, bitstream: &mut InputBitStream<R>) -> KanziResult<u8> {
        let mut code = 0u32;
        for len in 1..=MAX_CODE_LEN as usize {
            code = (code << 1) | u32::from(bitstream.read_bit().map_err(read_err)?);
            if code >= self.first_code[len] {
                let idx = code - self.first_code[len];
                if idx < self.counts[len] {
                    return Ok(self.symbols[(self.offsets[len] + idx) as usize]);
                }
            }
        }
        Err(KanziError::process_block("invalid Huffman code"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{EntropyDecoder, EntropyEncoder};

    fn round_trip(payload: &[u8]) -> Vec<u8> {
        let mut obs = OutputBitStream::new(Vec::new());
        {
            let mut enc = HuffmanEncoder::new(&mut obs);
            assert_eq!(enc.encode(payload).unwrap(), payload.len());
            enc.dispose().unwrap();
        }
        obs.close().unwrap();
        let bytes = obs.into_inner();

        let mut ibs = InputBitStream::new(&bytes[..]);
        let mut out = vec![0u8; payload.len()];
        {
            let mut dec = HuffmanDecoder::new(&mut ibs);
            assert_eq!(dec.decode(&mut out).unwrap(), payload.len());
            dec.dispose().unwrap();
        }
        out
    }

    #[test]
    fn skewed_text_round_trips_and_shrinks() {
        let payload = b"abracadabra abracadabra abracadabra".repeat(100);
        let mut obs = OutputBitStream::new(Vec::new());
        {
            let mut enc = HuffmanEncoder::new(&mut obs);
            enc.encode(&payload).unwrap();
            enc.dispose().unwrap();
        }
        obs.close().unwrap();
        let bytes = obs.into_inner();
        assert!(bytes.len() < payload.len());

        let mut ibs = InputBitStream::new(&bytes[..]);
        let mut out = vec![0u8; payload.len()];
        HuffmanDecoder::new(&mut ibs).decode(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn single_symbol_block() {
        let payload = vec![0x55u8; 3000];
        assert_eq!(round_trip(&payload), payload);
    }

    #[test]
    fn all_symbols_present() {
        let payload: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        assert_eq!(round_trip(&payload), payload);
    }

    #[test]
    fn multi_chunk_blocks_reset_statistics() {
        // First chunk all 'a', second chunk all 'b': per-chunk tables keep
        // both at one bit per symbol.
        let mut payload = vec![b'a'; CHUNK_SIZE];
        payload.extend(vec![b'b'; CHUNK_SIZE]);
        assert_eq!(round_trip(&payload), payload);
    }

    #[test]
    fn tiny_blocks() {
        assert_eq!(round_trip(b"x"), b"x");
        assert_eq!(round_trip(b"ab"), b"ab");
    }

    #[test]
    fn canonical_assignment_is_prefix_free() {
        let mut freqs = [0u64; 256];
        freqs[b'a' as usize] = 40;
        freqs[b'b' as usize] = 20;
        freqs[b'c' as usize] = 20;
        freqs[b'd' as usize] = 10;
        freqs[b'e' as usize] = 10;
        let lens = length_limited_lengths(&freqs);
        let codes = canonical_codes(&lens);
        let present: Vec<usize> = (0..256).filter(|&s| lens[s] > 0).collect();
        for &x in &present {
            for &y in &present {
                if x == y || lens[x] > lens[y] {
                    continue;
                }
                // No code may be a prefix of a longer one.
                let shifted = codes[y] >> (lens[y] - lens[x]);
                assert!(
                    !(shifted == codes[x] && x != y),
                    "code {:b} prefixes {:b}",
                    codes[x],
                    codes[y]
                );
            }
        }
    }
}
