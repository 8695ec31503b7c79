//! Pass-through entropy codec: bytes are copied verbatim to and from the
//! bitstream.  Used for copy blocks and for callers that only want the
//! transform stage.

use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::error::{ErrorKind, KanziError, KanziResult};

use super::{EntropyDecoder, EntropyEncoder};

// Largest single write/read against the bitstream, in bytes (2^30 bits).
const CHUNK_BYTES: usize = 1 << 27;

pub struct NoneEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
}

impl<'a, W: Write> NoneEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        NoneEncoder { bitstream }
    }
}

impl<W: Write> EntropyEncoder for NoneEncoder<'_, W> {
    fn encode(&mut self, block: &[u8]) -> KanziResult<usize> {
        for chunk in block.chunks(CHUNK_BYTES) {
            self.bitstream
                .write_bytes(chunk, chunk.len() * 8)
                .map_err(|e| KanziError::new(ErrorKind::WriteFile, e.to_string()))?;
        }
        Ok(block.len())
    }

    fn dispose(&mut self) -> KanziResult<()> {
        Ok(())
    }
}

pub struct NoneDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
}

impl<'a, R: Read> NoneDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        NoneDecoder { bitstream }
    }
}

impl<R: Read> EntropyDecoder for NoneDecoder<'_, R> {
    fn decode(&mut self, block: &mut [u8]) -> KanziResult<usize> {
        let total = block.len();
        for chunk in block.chunks_mut(CHUNK_BYTES) {
            let bits = chunk.len() * 8;
            self.bitstream
                .read_bytes(chunk, bits)
                .map_err(|e| KanziError::new(ErrorKind::ReadFile, e.to_string()))?;
        }
        Ok(total)
    }

    fn dispose(&mut self) -> KanziResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{EntropyDecoder, EntropyEncoder};

    #[test]
    fn copies_bytes_verbatim() {
        let payload: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut obs = OutputBitStream::new(Vec::new());
        {
            let mut enc = NoneEncoder::new(&mut obs);
            assert_eq!(enc.encode(&payload).unwrap(), payload.len());
            enc.dispose().unwrap();
        }
        obs.close().unwrap();
        let bytes = obs.into_inner();
        assert_eq!(bytes, payload);

        let mut ibs = InputBitStream::new(&bytes[..]);
        let mut out = vec![0u8; payload.len()];
        {
            let mut dec = NoneDecoder::new(&mut ibs);
            assert_eq!(dec.decode(&mut out).unwrap(), payload.len());
            dec.dispose().unwrap();
        }
        assert_eq!(out, payload);
    }
}
