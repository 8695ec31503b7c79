//! Command-line driver: argument dispatch, file plumbing, progress output.
//!
//! The `-`/absent sentinels for stdin and stdout live here, not in the
//! library.  Exit codes mirror the error taxonomy via
//! [`ErrorKind::code`](kanzi::ErrorKind::code).

pub mod args;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use kanzi::{
    CompressedReader, CompressedWriter, CompressorConfig, DecompressorConfig, ErrorKind, Event,
    KanziError, KanziResult, Listener,
};

use args::{level_codecs, parse_block_size, Args};

const STDIO_MARK: &str = "-";
const COMPRESSED_SUFFIX: &str = ".knz";
const IO_CHUNK: usize = 1 << 16;

/// Stderr logging gated on the `-v` level.
struct Display {
    verbose: u8,
}

impl Display {
    fn say(&self, level: u8, msg: &str) {
        if self.verbose >= level {
            eprintln!("{}", msg);
        }
    }
}

/// Listener printing pipeline events at high verbosity.
struct EventPrinter;

impl Listener for EventPrinter {
    fn process_event(&self, event: &Event) {
        eprintln!("{}", event);
    }
}

pub fn run(args: Args) -> KanziResult<()> {
    let display = Display {
        verbose: args.verbose,
    };
    if args.decompress {
        decompress(&args, &display)
    } else {
        compress(&args, &display)
    }
}

fn effective_jobs(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().clamp(1, 64)
    } else {
        requested
    }
}

fn input_is_stdin(input: &Option<String>) -> bool {
    matches!(input.as_deref(), None | Some(STDIO_MARK))
}

fn open_input(input: &Option<String>) -> KanziResult<Box<dyn Read + Send>> {
    if input_is_stdin(input) {
        return Ok(Box::new(std::io::stdin()));
    }
    let path = input.as_deref().unwrap();
    let file = File::open(path).map_err(|e| {
        KanziError::new(ErrorKind::OpenFile, format!("cannot open {}: {}", path, e))
    })?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: Option<&str>, force: bool) -> KanziResult<Box<dyn Write + Send>> {
    let path = match path {
        None | Some(STDIO_MARK) => return Ok(Box::new(std::io::stdout())),
        Some(p) => p,
    };
    let target = Path::new(path);
    if target.is_dir() {
        return Err(KanziError::new(
            ErrorKind::OutputIsDir,
            format!("output {} is a directory", path),
        ));
    }
    if target.exists() && !force {
        return Err(KanziError::new(
            ErrorKind::OverwriteFile,
            format!("output {} exists, use --force to overwrite", path),
        ));
    }
    let file = File::create(path).map_err(|e| {
        KanziError::new(
            ErrorKind::CreateFile,
            format!("cannot create {}: {}", path, e),
        )
    })?;
    Ok(Box::new(BufWriter::new(file)))
}

/// Output name for compression: explicit, or input + suffix, or stdout.
fn compress_target(args: &Args) -> KanziResult<Option<String>> {
    if let Some(o) = &args.output {
        return Ok(Some(o.clone()));
    }
    if input_is_stdin(&args.input) {
        return Ok(None);
    }
    Ok(Some(format!(
        "{}{}",
        args.input.as_deref().unwrap(),
        COMPRESSED_SUFFIX
    )))
}

/// Output name for decompression: explicit, or input minus suffix, or stdout.
fn decompress_target(args: &Args) -> KanziResult<Option<String>> {
    if let Some(o) = &args.output {
        return Ok(Some(o.clone()));
    }
    if input_is_stdin(&args.input) {
        return Ok(None);
    }
    let input = args.input.as_deref().unwrap();
    match input.strip_suffix(COMPRESSED_SUFFIX) {
        Some(stem) if !stem.is_empty() => Ok(Some(stem.to_string())),
        _ => Err(KanziError::new(
            ErrorKind::MissingParam,
            format!(
                "cannot derive output name from {}, use --output",
                input
            ),
        )),
    }
}

fn compress(args: &Args, display: &Display) -> KanziResult<()> {
    let (level_transform, level_entropy) = level_codecs(args.level)?;
    let transform = args
        .transform
        .clone()
        .unwrap_or_else(|| level_transform.to_string());
    let entropy = args
        .entropy
        .clone()
        .unwrap_or_else(|| level_entropy.to_string());
    let block_size = match &args.block {
        Some(b) => parse_block_size(b)?,
        None => 4 << 20,
    };
    let original_size = match &args.input {
        Some(p) if p != STDIO_MARK => fs::metadata(p).ok().map(|m| m.len()),
        _ => None,
    };

    let cfg = CompressorConfig {
        transform,
        entropy,
        block_size,
        jobs: effective_jobs(args.jobs),
        checksum: args.checksum,
        original_size,
        skip_blocks: args.skip_blocks,
        headerless: false,
    };
    display.say(
        2,
        &format!(
            "compressing with transform={} entropy={} block={} jobs={}",
            cfg.transform, cfg.entropy, cfg.block_size, cfg.jobs
        ),
    );

    let mut source = open_input(&args.input)?;
    let target = compress_target(args)?;
    let sink = open_output(target.as_deref(), args.force)?;

    let start = Instant::now();
    let mut writer = CompressedWriter::new(sink, &cfg)?;
    if args.verbose >= 4 {
        writer.add_listener(Arc::new(EventPrinter));
    }
    copy_into_writer(&mut *source, &mut writer)?;
    writer.close()?;

    let read = writer.uncompressed_bytes();
    let written = writer.compressed_bits().div_ceil(8);
    let ratio = written as f64 / read.max(1) as f64 * 100.0;
    display.say(
        1,
        &format!(
            "compressed {} bytes into {} bytes ({:.2}%) in {:.2?}",
            read,
            written,
            ratio,
            start.elapsed()
        ),
    );
    Ok(())
}

fn decompress(args: &Args, display: &Display) -> KanziResult<()> {
    let cfg = DecompressorConfig {
        jobs: effective_jobs(args.jobs),
        from: args.from,
        to: args.to,
        headerless: None,
    };

    let source = open_input(&args.input)?;
    let target = decompress_target(args)?;
    let mut sink = open_output(target.as_deref(), args.force)?;

    let start = Instant::now();
    let mut reader = CompressedReader::new(source, &cfg)?;
    if args.verbose >= 4 {
        reader.add_listener(Arc::new(EventPrinter));
    }
    let mut chunk = vec![0u8; IO_CHUNK];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        sink.write_all(&chunk[..n]).map_err(|e| {
            KanziError::new(ErrorKind::WriteFile, format!("write failed: {}", e))
        })?;
    }
    sink.flush()
        .map_err(|e| KanziError::new(ErrorKind::WriteFile, format!("flush failed: {}", e)))?;

    display.say(
        1,
        &format!(
            "decompressed {} bytes in {:.2?}",
            reader.decoded_bytes(),
            start.elapsed()
        ),
    );
    Ok(())
}

fn copy_into_writer<W: Write + Send>(
    source: &mut dyn Read,
    writer: &mut CompressedWriter<W>,
) -> KanziResult<()> {
    let mut chunk = vec![0u8; IO_CHUNK];
    loop {
        match source.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                writer.write(&chunk[..n])?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(KanziError::new(
                    ErrorKind::ReadFile,
                    format!("read failed: {}", e),
                ))
            }
        }
    }
}
