//! Reversible byte → byte transforms and their pipeline.
//!
//! A stream declares up to 8 transform stages in a 48-bit field of 6-bit
//! slots (slot 0 in the most significant bits).  [`TransformSequence`]
//! composes the stages left-to-right on encode and right-to-left on decode,
//! and owns the skip-flag byte: any forward stage that fails or would expand
//! the block past its bound is bypassed, its bit recorded, and the inverse
//! side elides it.

mod bwt;
mod rlt;
mod sbrt;
mod zrlt;

pub use bwt::BwtTransform;
pub use rlt::RltTransform;
pub use sbrt::{SbrtMode, SbrtTransform};
pub use zrlt::ZrltTransform;

use crate::error::{ErrorKind, KanziError, KanziResult};

/// Maximum number of stages in a pipeline.
pub const MAX_STAGES: usize = 8;

/// A reversible byte transform.
///
/// `forward` and `inverse` return `(consumed, produced)`.  A forward that
/// cannot fit its output in `dst`, or would not shrink where shrinking is
/// the point, returns an error; the pipeline treats that as a bypass.  An
/// inverse error is fatal for the block.
pub trait Transform: Send {
    fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> KanziResult<(usize, usize)>;

    fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> KanziResult<(usize, usize)>;

    /// Conservative upper bound on the forward output size for `n` input
    /// bytes.
    fn max_encoded_len(&self, n: usize) -> usize;
}

/// Context handed to the factory when a pipeline is built for one block.
#[derive(Clone, Copy, Debug)]
pub struct TransformContext {
    /// Declared block size of the stream.
    pub block_size: usize,
    /// Intra-block concurrency hint for transforms that can split work.
    pub jobs: usize,
}

/// Closed set of transform identifiers (6 bits each on the wire).
///
/// The whole historical name set is recognized for parsing and printing;
/// construction succeeds only for the algorithms shipped in this build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TransformKind {
    #[default]
    None = 0,
    Bwt = 1,
    Bwts = 2,
    Lz = 3,
    Lzx = 4,
    Lzp = 5,
    Rolz = 6,
    RolzX = 7,
    Rlt = 8,
    Zrlt = 9,
    Mtft = 10,
    Rank = 11,
    Srt = 12,
    Text = 13,
    Exe = 14,
    Utf = 15,
    Pack = 16,
    Mm = 17,
    Dna = 18,
}

impl TransformKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::None => "NONE",
            TransformKind::Bwt => "BWT",
            TransformKind::Bwts => "BWTS",
            TransformKind::Lz => "LZ",
            TransformKind::Lzx => "LZX",
            TransformKind::Lzp => "LZP",
            TransformKind::Rolz => "ROLZ",
            TransformKind::RolzX => "ROLZX",
            TransformKind::Rlt => "RLT",
            TransformKind::Zrlt => "ZRLT",
            TransformKind::Mtft => "MTFT",
            TransformKind::Rank => "RANK",
            TransformKind::Srt => "SRT",
            TransformKind::Text => "TEXT",
            TransformKind::Exe => "EXE",
            TransformKind::Utf => "UTF",
            TransformKind::Pack => "PACK",
            TransformKind::Mm => "MM",
            TransformKind::Dna => "DNA",
        }
    }

    pub fn code(&self) -> u64 {
        *self as u64
    }

    pub fn from_code(code: u64) -> KanziResult<Self> {
        Ok(match code {
            0 => TransformKind::None,
            1 => TransformKind::Bwt,
            2 => TransformKind::Bwts,
            3 => TransformKind::Lz,
            4 => TransformKind::Lzx,
            5 => TransformKind::Lzp,
            6 => TransformKind::Rolz,
            7 => TransformKind::RolzX,
            8 => TransformKind::Rlt,
            9 => TransformKind::Zrlt,
            10 => TransformKind::Mtft,
            11 => TransformKind::Rank,
            12 => TransformKind::Srt,
            13 => TransformKind::Text,
            14 => TransformKind::Exe,
            15 => TransformKind::Utf,
            16 => TransformKind::Pack,
            17 => TransformKind::Mm,
            18 => TransformKind::Dna,
            _ => {
                return Err(KanziError::new(
                    ErrorKind::InvalidCodec,
                    format!("unknown transform identifier: {}", code),
                ))
            }
        })
    }

    pub fn from_name(name: &str) -> KanziResult<Self> {
        match name.to_uppercase().as_str() {
            "NONE" => Ok(TransformKind::None),
            "BWT" => Ok(TransformKind::Bwt),
            "BWTS" => Ok(TransformKind::Bwts),
            "LZ" => Ok(TransformKind::Lz),
            "LZX" => Ok(TransformKind::Lzx),
            "LZP" => Ok(TransformKind::Lzp),
            "ROLZ" => Ok(TransformKind::Rolz),
            "ROLZX" => Ok(TransformKind::RolzX),
            "RLT" => Ok(TransformKind::Rlt),
            "ZRLT" => Ok(TransformKind::Zrlt),
            "MTFT" => Ok(TransformKind::Mtft),
            "RANK" => Ok(TransformKind::Rank),
            "SRT" => Ok(TransformKind::Srt),
            "TEXT" => Ok(TransformKind::Text),
            "EXE" => Ok(TransformKind::Exe),
            "UTF" => Ok(TransformKind::Utf),
            "PACK" => Ok(TransformKind::Pack),
            "MM" => Ok(TransformKind::Mm),
            "DNA" => Ok(TransformKind::Dna),
            _ => Err(KanziError::new(
                ErrorKind::InvalidCodec,
                format!("unknown transform name: {}", name),
            )),
        }
    }

    /// Whether this build can instantiate the transform.
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            TransformKind::None
                | TransformKind::Bwt
                | TransformKind::Rlt
                | TransformKind::Zrlt
                | TransformKind::Mtft
                | TransformKind::Rank
        )
    }
}

/// Packs up to 8 stage identifiers into the 48-bit wire field, slot 0 most
/// significant.  Unused trailing slots stay `NONE`.
pub fn pack_transform_codes(stages: &[TransformKind]) -> KanziResult<u64> {
    if stages.len() > MAX_STAGES {
        return Err(KanziError::invalid_param(format!(
            "transform pipeline has {} stages, maximum is {}",
            stages.len(),
            MAX_STAGES
        )));
    }
    let mut packed = 0u64;
    for slot in 0..MAX_STAGES {
        let code = stages.get(slot).map_or(0, |k| k.code());
        packed = (packed << 6) | code;
    }
    Ok(packed)
}

/// Non-`NONE` stage identifiers in slot order.
pub fn unpack_transform_codes(transform_type: u64) -> KanziResult<Vec<TransformKind>> {
    let mut stages = Vec::new();
    for slot in 0..MAX_STAGES {
        let code = (transform_type >> (42 - 6 * slot)) & 0x3F;
        let kind = TransformKind::from_code(code)?;
        if kind != TransformKind::None {
            stages.push(kind);
        }
    }
    Ok(stages)
}

/// Resolves a `+`-separated pipeline description, e.g. `"BWT+RANK+ZRLT"`.
/// `"NONE"` denotes the empty pipeline.
pub fn parse_transform_names(names: &str) -> KanziResult<u64> {
    let mut stages = Vec::new();
    for part in names.split('+') {
        let kind = TransformKind::from_name(part.trim())?;
        if kind != TransformKind::None {
            stages.push(kind);
        }
    }
    pack_transform_codes(&stages)
}

/// Human-readable pipeline description for a wire field.
pub fn transform_names(transform_type: u64) -> String {
    match unpack_transform_codes(transform_type) {
        Ok(stages) if !stages.is_empty() => stages
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join("+"),
        _ => "NONE".to_string(),
    }
}

fn new_transform(kind: TransformKind, ctx: &TransformContext) -> KanziResult<Box<dyn Transform>> {
    match kind {
        TransformKind::Bwt => Ok(Box::new(BwtTransform::new(ctx))),
        TransformKind::Rlt => Ok(Box::new(RltTransform::new())),
        TransformKind::Zrlt => Ok(Box::new(ZrltTransform::new())),
        TransformKind::Mtft => Ok(Box::new(SbrtTransform::new(SbrtMode::MoveToFront))),
        TransformKind::Rank => Ok(Box::new(SbrtTransform::new(SbrtMode::Rank))),
        TransformKind::None => Err(KanziError::new(
            ErrorKind::InvalidCodec,
            "NONE is not an instantiable stage",
        )),
        other => Err(KanziError::new(
            ErrorKind::CreateCodec,
            format!("transform {} is not available in this build", other.name()),
        )),
    }
}

/// Ordered pipeline of transforms plus the per-stage bypass flags.
///
/// Stage `i` owns skip bit `7 - i`.  `forward` leaves its result in the
/// second buffer; `inverse` does the same for the decoded bytes.
pub struct TransformSequence {
    stages: Vec<(TransformKind, Box<dyn Transform>)>,
    skip_flags: u8,
}

impl TransformSequence {
    pub fn new(transform_type: u64, ctx: &TransformContext) -> KanziResult<Self> {
        let kinds = unpack_transform_codes(transform_type)?;
        let mut stages = Vec::with_capacity(kinds.len());
        for kind in kinds {
            stages.push((kind, new_transform(kind, ctx)?));
        }
        Ok(TransformSequence {
            stages,
            skip_flags: 0,
        })
    }

    /// Number of active stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn skip_flags(&self) -> u8 {
        self.skip_flags
    }

    pub fn set_skip_flags(&mut self, flags: u8) {
        self.skip_flags = flags;
    }

    /// Worst-case output size across the whole pipeline.
    pub fn max_encoded_len(&self, n: usize) -> usize {
        self.stages
            .iter()
            .fold(n, |len, (_, t)| t.max_encoded_len(len))
    }

    /// Runs the pipeline over `a[..count]`, ping-ponging between `a` and
    /// `b`; records a skip bit for every bypassed stage.  The result always
    /// ends in `b`, whose length is grown as needed.
    pub fn forward(
        &mut self,
        a: &mut Vec<u8>,
        b: &mut Vec<u8>,
        count: usize,
    ) -> KanziResult<usize> {
        self.skip_flags = 0;
        let mut len = count;
        let mut in_a = true;
        for i in 0..self.stages.len() {
            let required = self.stages[i].1.max_encoded_len(len);
            let (src, dst) = if in_a { (&*a, &mut *b) } else { (&*b, &mut *a) };
            if dst.len() < required {
                dst.resize(required, 0);
            }
            match self.stages[i].1.forward(&src[..len], &mut dst[..required]) {
                Ok((consumed, produced)) if consumed == len => {
                    len = produced;
                    in_a = !in_a;
                }
                _ => {
                    self.skip_flags |= 1 << (7 - i);
                }
            }
        }
        if in_a {
            if b.len() < len {
                b.resize(len, 0);
            }
            b[..len].copy_from_slice(&a[..len]);
        }
        Ok(len)
    }

    /// Applies the inverse stages right-to-left over `a[..count]`, honoring
    /// the installed skip flags.  `max_out` bounds every intermediate
    /// output; the caller checks the final length separately.  The result
    /// always ends in `b`.
    pub fn inverse(
        &mut self,
        a: &mut Vec<u8>,
        b: &mut Vec<u8>,
        count: usize,
        max_out: usize,
    ) -> KanziResult<usize> {
        let mut len = count;
        let mut in_a = true;
        for i in (0..self.stages.len()).rev() {
            if self.skip_flags & (1 << (7 - i)) != 0 {
                continue;
            }
            let required = max_out.max(len);
            let (src, dst) = if in_a { (&*a, &mut *b) } else { (&*b, &mut *a) };
            if dst.len() < required {
                dst.resize(required, 0);
            }
            let (consumed, produced) =
                self.stages[i].1.inverse(&src[..len], &mut dst[..required])?;
            if consumed != len {
                return Err(KanziError::process_block(format!(
                    "inverse {} consumed {} of {} bytes",
                    self.stages[i].0.name(),
                    consumed,
                    len
                )));
            }
            len = produced;
            in_a = !in_a;
        }
        if in_a {
            if b.len() < len {
                b.resize(len, 0);
            }
            b[..len].copy_from_slice(&a[..len]);
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TransformContext {
        TransformContext {
            block_size: 1 << 16,
            jobs: 1,
        }
    }

    #[test]
    fn pack_unpack_round_trip() {
        let stages = [TransformKind::Bwt, TransformKind::Rank, TransformKind::Zrlt];
        let packed = pack_transform_codes(&stages).unwrap();
        assert_eq!(unpack_transform_codes(packed).unwrap(), stages);
        // Slot 0 sits in the most significant 6 bits of the 48.
        assert_eq!((packed >> 42) & 0x3F, TransformKind::Bwt.code());
    }

    #[test]
    fn name_parsing() {
        let tt = parse_transform_names("bwt+rank+zrlt").unwrap();
        assert_eq!(transform_names(tt), "BWT+RANK+ZRLT");
        assert_eq!(parse_transform_names("NONE").unwrap(), 0);
        assert_eq!(transform_names(0), "NONE");
        assert!(parse_transform_names("BWT+NOPE").is_err());
    }

    #[test]
    fn too_many_stages_rejected() {
        let stages = [TransformKind::Rlt; 9];
        assert!(pack_transform_codes(&stages).is_err());
    }

    #[test]
    fn unavailable_transform_fails_construction() {
        let tt = parse_transform_names("TEXT").unwrap();
        let err = TransformSequence::new(tt, &ctx()).err().unwrap();
        assert_eq!(err.kind, ErrorKind::CreateCodec);
    }

    #[test]
    fn empty_pipeline_copies_input() {
        let mut seq = TransformSequence::new(0, &ctx()).unwrap();
        let mut a = b"hello world".to_vec();
        let mut b = Vec::new();
        let n = seq.forward(&mut a, &mut b, 11).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&b[..n], b"hello world");
        assert_eq!(seq.skip_flags(), 0);
    }

    #[test]
    fn pipeline_round_trip_with_skips() {
        // RLT declines on data without runs, ZRLT compresses the zeros.
        let tt = parse_transform_names("RLT+ZRLT").unwrap();
        let mut original = vec![0u8; 2048];
        for i in (0..2048).step_by(97) {
            original[i] = (i % 251) as u8;
        }

        let mut seq = TransformSequence::new(tt, &ctx()).unwrap();
        let mut a = original.clone();
        let mut b = Vec::new();
        let post = seq.forward(&mut a, &mut b, original.len()).unwrap();
        let flags = seq.skip_flags();

        let mut dec = TransformSequence::new(tt, &ctx()).unwrap();
        dec.set_skip_flags(flags);
        let mut x = b[..post].to_vec();
        let mut y = Vec::new();
        let n = dec.inverse(&mut x, &mut y, post, original.len()).unwrap();
        assert_eq!(n, original.len());
        assert_eq!(&y[..n], &original[..]);
    }

    #[test]
    fn all_stages_skipped_is_identity() {
        // Incompressible-ish input: both run transforms decline.
        let tt = parse_transform_names("RLT+ZRLT").unwrap();
        let original: Vec<u8> = (1u8..=255).cycle().take(1024).collect();

        let mut seq = TransformSequence::new(tt, &ctx()).unwrap();
        let mut a = original.clone();
        let mut b = Vec::new();
        let post = seq.forward(&mut a, &mut b, original.len()).unwrap();
        assert_eq!(post, original.len());
        assert_eq!(seq.skip_flags(), 0b1100_0000);
        assert_eq!(&b[..post], &original[..]);
    }
}
