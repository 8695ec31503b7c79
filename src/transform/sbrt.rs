//! Sort-by-rank transforms: move-to-front and rank halving.
//!
//! Both keep a recency table of the 256 symbols and replace each byte with
//! its current position.  Move-to-front promotes the symbol to position 0;
//! the rank variant halves its position, which is gentler on data where
//! locality is weaker.  Output size always equals input size and the
//! forward never declines.

use crate::error::{KanziError, KanziResult};

use super::Transform;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SbrtMode {
    MoveToFront,
    Rank,
}

impl SbrtMode {
    #[inline]
    fn target(&self, rank: usize) -> usize {
        match self {
            SbrtMode::MoveToFront => 0,
            SbrtMode::Rank => rank >> 1,
        }
    }
}

pub struct SbrtTransform {
    mode: SbrtMode,
}

impl SbrtTransform {
    pub fn new(mode: SbrtMode) -> Self {
        SbrtTransform { mode }
    }

    fn initial_table() -> [u8; 256] {
        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = i as u8;
        }
        table
    }

    #[inline]
    fn promote(table: &mut [u8; 256], from: usize, to: usize) {
        // to <= from always holds.
        let sym = table[from];
        table.copy_within(to..from, to + 1);
        table[to] = sym;
    }
}

impl Transform for SbrtTransform {
    fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> KanziResult<(usize, usize)> {
        if dst.len() < src.len() {
            return Err(KanziError::process_block("SBRT: output too small"));
        }
        let mut table = Self::initial_table();
        for (i, &b) in src.iter().enumerate() {
            // Linear scan; the searched symbol is near the front on the
            // data this stage is used for.
            let rank = table.iter().position(|&s| s == b).unwrap();
            dst[i] = rank as u8;
            let to = self.mode.target(rank);
            Self::promote(&mut table, rank, to);
        }
        Ok((src.len(), src.len()))
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> KanziResult<(usize, usize)> {
        if dst.len() < src.len() {
            return Err(KanziError::process_block("SBRT: output too small"));
        }
        let mut table = Self::initial_table();
        for (i, &r) in src.iter().enumerate() {
            let rank = r as usize;
            let sym = table[rank];
            dst[i] = sym;
            let to = self.mode.target(rank);
            Self::promote(&mut table, rank, to);
        }
        Ok((src.len(), src.len()))
    }

    fn max_encoded_len(&self, n: usize) -> usize {
        n
    }
}
