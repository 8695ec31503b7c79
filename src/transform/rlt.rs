//! Run-length transform.
//!
//! Runs of four or more identical bytes are encoded as the four bytes
//! followed by the remaining run length as a 255-escaped counter.  Shorter
//! runs pass through untouched, so data without runs keeps its size and the
//! stage declines (the pipeline then bypasses it).

use crate::error::{KanziError, KanziResult};

use super::Transform;

const RUN_THRESHOLD: usize = 4;

pub struct RltTransform;

impl RltTransform {
    pub fn new() -> Self {
        RltTransform
    }
}

impl Default for RltTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for RltTransform {
    fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> KanziResult<(usize, usize)> {
        let count = src.len();
        let cap = count.min(dst.len());
        let mut i = 0;
        let mut j = 0;
        while i < count {
            let b = src[i];
            let mut run = 1;
            while i + run < count && src[i + run] == b {
                run += 1;
            }
            if run >= RUN_THRESHOLD {
                if j + RUN_THRESHOLD > cap {
                    return Err(KanziError::process_block("RLT: no gain"));
                }
                dst[j..j + RUN_THRESHOLD].fill(b);
                j += RUN_THRESHOLD;
                let mut extra = run - RUN_THRESHOLD;
                while extra >= 255 {
                    if j >= cap {
                        return Err(KanziError::process_block("RLT: no gain"));
                    }
                    dst[j] = 255;
                    j += 1;
                    extra -= 255;
                }
                if j >= cap {
                    return Err(KanziError::process_block("RLT: no gain"));
                }
                dst[j] = extra as u8;
                j += 1;
            } else {
                if j + run > cap {
                    return Err(KanziError::process_block("RLT: no gain"));
                }
                dst[j..j + run].fill(b);
                j += run;
            }
            i += run;
        }
        if j >= count {
            return Err(KanziError::process_block("RLT: no gain"));
        }
        Ok((count, j))
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> KanziResult<(usize, usize)> {
        let count = src.len();
        let mut i = 0;
        let mut j = 0;
        while i < count {
            let b = src[i];
            // Copy up to a full threshold group of identical source bytes.
            let mut run = 1;
            while run < RUN_THRESHOLD && i + run < count && src[i + run] == b {
                run += 1;
            }
            if j + run > dst.len() {
                return Err(KanziError::process_block("RLT: invalid run data"));
            }
            dst[j..j + run].fill(b);
            j += run;
            i += run;
            if run == RUN_THRESHOLD {
                // The escaped counter extends the run.
                let mut extra = 0usize;
                loop {
                    if i >= count {
                        return Err(KanziError::process_block("RLT: truncated run length"));
                    }
                    let v = src[i];
                    i += 1;
                    extra += v as usize;
                    if v != 255 {
                        break;
                    }
                }
                if j + extra > dst.len() {
                    return Err(KanziError::process_block("RLT: run overflows block"));
                }
                dst[j..j + extra].fill(b);
                j += extra;
            }
        }
        Ok((count, j))
    }

    fn max_encoded_len(&self, n: usize) -> usize {
        // Success implies strict shrinkage.
        n
    }
}
