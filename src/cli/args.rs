//! Command-line argument definitions and small parsing helpers.

use clap::Parser;

use kanzi::{KanziError, KanziResult};

/// Block-parallel lossless compressor.
#[derive(Parser, Debug)]
#[command(
    name = "kanzi",
    version,
    about = "Lossless data compressor using pluggable transforms and entropy codecs"
)]
pub struct Args {
    /// Compress the input (default when neither mode is given)
    #[arg(short = 'c', long, conflicts_with = "decompress")]
    pub compress: bool,

    /// Decompress the input
    #[arg(short = 'd', long)]
    pub decompress: bool,

    /// Input file; '-' or absent means stdin
    #[arg(short = 'i', long)]
    pub input: Option<String>,

    /// Output file; '-' means stdout, absent derives from the input name
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Block size in bytes, with optional K/M/G suffix (e.g. 4M)
    #[arg(short = 'b', long)]
    pub block: Option<String>,

    /// Transform pipeline, e.g. BWT+RANK+ZRLT (overrides --level)
    #[arg(short = 't', long)]
    pub transform: Option<String>,

    /// Entropy codec, e.g. HUFFMAN (overrides --level)
    #[arg(short = 'e', long)]
    pub entropy: Option<String>,

    /// Compression level, 0..=9; each level is a fixed transform/entropy pair
    #[arg(short = 'l', long, default_value_t = 3)]
    pub level: u8,

    /// Worker count; 0 means one per core (capped at 64)
    #[arg(short = 'j', long, default_value_t = 0)]
    pub jobs: usize,

    /// Verbosity, 0..=5
    #[arg(short = 'v', long, default_value_t = 1)]
    pub verbose: u8,

    /// Per-block checksum width: 0, 32 or 64 bits
    #[arg(short = 'x', long, default_value_t = 0)]
    pub checksum: usize,

    /// Overwrite the output file if it already exists
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Detect incompressible blocks and store them verbatim
    #[arg(long)]
    pub skip_blocks: bool,

    /// Decompression only: first block to emit (1-based, inclusive)
    #[arg(long)]
    pub from: Option<i64>,

    /// Decompression only: first block not to emit
    #[arg(long)]
    pub to: Option<i64>,
}

/// Fixed transform/entropy pair for each compression level.
pub fn level_codecs(level: u8) -> KanziResult<(&'static str, &'static str)> {
    Ok(match level {
        0 => ("NONE", "NONE"),
        1 => ("RLT", "NONE"),
        2 => ("RLT", "HUFFMAN"),
        3 => ("MTFT+ZRLT", "HUFFMAN"),
        4 => ("RLT+MTFT+ZRLT", "HUFFMAN"),
        5 => ("BWT+RANK+ZRLT", "HUFFMAN"),
        6 => ("BWT+RANK+ZRLT", "FPAQ"),
        7 => ("BWT+MTFT+ZRLT", "FPAQ"),
        8 => ("RLT+BWT+RANK+ZRLT", "FPAQ"),
        9 => ("RLT+BWT+MTFT+ZRLT", "FPAQ"),
        _ => {
            return Err(KanziError::new(
                kanzi::ErrorKind::InvalidParam,
                format!("compression level must be in [0, 9], got {}", level),
            ))
        }
    })
}

/// Parses a byte count with an optional K/M/G suffix.
pub fn parse_block_size(text: &str) -> KanziResult<usize> {
    let trimmed = text.trim();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1usize << 10),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1usize << 20),
        Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1usize << 30),
        _ => (trimmed, 1),
    };
    let value: usize = digits.parse().map_err(|_| {
        KanziError::new(
            kanzi::ErrorKind::InvalidParam,
            format!("invalid block size: {}", text),
        )
    })?;
    value.checked_mul(multiplier).ok_or_else(|| {
        KanziError::new(
            kanzi::ErrorKind::InvalidParam,
            format!("block size overflows: {}", text),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_suffixes() {
        assert_eq!(parse_block_size("1024").unwrap(), 1024);
        assert_eq!(parse_block_size("64K").unwrap(), 64 << 10);
        assert_eq!(parse_block_size("4m").unwrap(), 4 << 20);
        assert_eq!(parse_block_size("1G").unwrap(), 1 << 30);
        assert!(parse_block_size("4x").is_err());
        assert!(parse_block_size("").is_err());
    }

    #[test]
    fn all_levels_resolve() {
        for level in 0..=9 {
            let (t, e) = level_codecs(level).unwrap();
            assert!(kanzi::transform::parse_transform_names(t).is_ok());
            assert!(kanzi::entropy::EntropyType::from_name(e).is_ok());
        }
        assert!(level_codecs(10).is_err());
    }

    #[test]
    fn args_parse_typical_invocation() {
        let args = Args::parse_from([
            "kanzi", "-c", "-i", "in.bin", "-o", "out.knz", "-b", "1M", "-l", "5", "-j", "4",
            "-x", "32", "-f",
        ]);
        assert!(args.compress);
        assert_eq!(args.input.as_deref(), Some("in.bin"));
        assert_eq!(args.level, 5);
        assert_eq!(args.jobs, 4);
        assert_eq!(args.checksum, 32);
        assert!(args.force);
    }
}
