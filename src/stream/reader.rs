//! Compressed stream reader.
//!
//! [`CompressedReader`] pulls framed block payloads from the shared
//! bitstream in block-ID order — the frame read itself is the only
//! serialized step — and decodes payloads concurrently: entropy decode,
//! inverse transform, checksum verification.  Decoded bytes are emitted to
//! the caller in block-ID order.  Blocks outside the configured `from`/`to`
//! window are read (keeping the bit cursor aligned) but never decoded.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use rayon::prelude::*;

use crate::bitstream::{BitStreamError, InputBitStream};
use crate::entropy::{self, EntropyType};
use crate::error::{ErrorKind, KanziError, KanziResult};
use crate::event::{notify, Event, EventKind, Listener};
use crate::hash::HashKind;
use crate::transform::{self, TransformContext, TransformSequence};

use super::header::{read_header, StreamHeader};
use super::{
    jobs_per_task, max_payload_len, max_post_transform_len, validate_block_size, validate_jobs,
    DecompressorConfig, BITSTREAM_FORMAT_VERSION, CANCELED_BLOCK_ID, COPY_BLOCK_MASK,
    MAX_BIT_CHUNK_BYTES, MIN_BITSTREAM_FORMAT_VERSION, TRANSFORMS_MASK,
};

const CANCEL_MSG: &str = "block task canceled";

fn canceled() -> KanziError {
    KanziError::process_block(CANCEL_MSG)
}

fn frame_err(e: BitStreamError) -> KanziError {
    match e {
        BitStreamError::EndOfStream => {
            KanziError::new(ErrorKind::ReadFile, "truncated stream")
        }
        other => KanziError::new(ErrorKind::ReadFile, other.to_string()),
    }
}

fn local_err(e: BitStreamError) -> KanziError {
    KanziError::process_block(e.to_string())
}

/// Stream parameters, from the header or from a headerless configuration.
#[derive(Clone, Debug)]
struct StreamParams {
    hash: HashKind,
    entropy: EntropyType,
    transform_type: u64,
    block_size: usize,
}

/// Block-parallel decompressing wrapper around a byte source.
pub struct CompressedReader<R: Read + Send> {
    ibs: Arc<Mutex<InputBitStream<R>>>,
    processed: Arc<AtomicI64>,
    eos: Arc<AtomicBool>,
    pool: rayon::ThreadPool,
    jobs: usize,
    from: Option<i64>,
    to: Option<i64>,
    config: DecompressorConfig,
    params: Option<StreamParams>,
    buffers: Vec<Vec<u8>>,
    block_id: i64,
    initialized: bool,
    closed: bool,
    done: bool,
    error: Option<KanziError>,
    listeners: Vec<Arc<dyn Listener>>,
    queue: VecDeque<Vec<u8>>,
    queue_off: usize,
    total_out: u64,
}

impl<R: Read + Send> CompressedReader<R> {
    pub fn new(source: R, cfg: &DecompressorConfig) -> KanziResult<Self> {
        validate_jobs(cfg.jobs)?;
        let mut jobs = cfg.jobs;
        if let Some(h) = &cfg.headerless {
            validate_block_size(h.block_size)?;
            HashKind::from_size(h.checksum)?;
            if !(MIN_BITSTREAM_FORMAT_VERSION..=BITSTREAM_FORMAT_VERSION).contains(&h.bs_version)
            {
                return Err(KanziError::new(
                    ErrorKind::StreamVersion,
                    format!("unsupported bitstream version: {}", h.bs_version),
                ));
            }
            // A known output size bounds the useful concurrency.
            if let Some(size) = h.original_size {
                let blocks = size.div_ceil(h.block_size as u64).max(1);
                jobs = jobs.min(blocks.min(super::MAX_CONCURRENCY as u64) as usize);
            }
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| KanziError::new(ErrorKind::CreateStream, e.to_string()))?;
        Ok(CompressedReader {
            ibs: Arc::new(Mutex::new(InputBitStream::new(source))),
            processed: Arc::new(AtomicI64::new(0)),
            eos: Arc::new(AtomicBool::new(false)),
            pool,
            jobs,
            from: cfg.from,
            to: cfg.to,
            config: cfg.clone(),
            params: None,
            buffers: (0..2 * jobs).map(|_| Vec::new()).collect(),
            block_id: 0,
            initialized: false,
            closed: false,
            done: false,
            error: None,
            listeners: Vec::new(),
            queue: VecDeque::new(),
            queue_off: 0,
            total_out: 0,
        })
    }

    pub fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    /// Unsubscribes a previously added listener; returns whether it was
    /// found.
    pub fn remove_listener(&mut self, listener: &Arc<dyn Listener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        self.listeners.len() != before
    }

    /// Total decoded bytes handed to the caller so far.
    pub fn decoded_bytes(&self) -> u64 {
        self.total_out
    }

    /// Fills `buf` with decoded bytes; returns 0 at end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> KanziResult<usize> {
        if self.closed {
            return Err(KanziError::new(ErrorKind::ReadFile, "stream is closed"));
        }
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        if !self.initialized {
            self.init()?;
        }
        let mut served = 0;
        while served < buf.len() {
            if let Some(front) = self.queue.front() {
                let avail = front.len() - self.queue_off;
                let take = avail.min(buf.len() - served);
                buf[served..served + take]
                    .copy_from_slice(&front[self.queue_off..self.queue_off + take]);
                served += take;
                self.queue_off += take;
                if self.queue_off == front.len() {
                    self.queue.pop_front();
                    self.queue_off = 0;
                }
                continue;
            }
            if self.done {
                break;
            }
            if let Err(e) = self.fetch_batch() {
                // Deliver what was already decoded; the sticky error
                // surfaces on the next call.
                if served > 0 {
                    break;
                }
                return Err(e);
            }
        }
        self.total_out += served as u64;
        Ok(served)
    }

    /// Marks the reader closed; further reads fail.  Idempotent.
    pub fn close(&mut self) -> KanziResult<()> {
        self.closed = true;
        Ok(())
    }

    fn init(&mut self) -> KanziResult<()> {
        let params = match &self.config.headerless {
            Some(h) => {
                let hash = HashKind::from_size(h.checksum)?;
                let entropy = EntropyType::from_name(&h.entropy)?;
                let transform_type = transform::parse_transform_names(&h.transform)?;
                StreamParams {
                    hash,
                    entropy,
                    transform_type,
                    block_size: h.block_size,
                }
            }
            None => {
                let mut ibs = self.ibs.lock().unwrap();
                let header: StreamHeader = read_header(&mut ibs)?;
                drop(ibs);
                debug!("stream header decoded: {}", header.summary());
                notify(
                    &self.listeners,
                    &Event::text(EventKind::AfterHeaderDecoding, 0, header.summary()),
                );
                StreamParams {
                    hash: header.checksum,
                    entropy: header.entropy,
                    transform_type: header.transform_type,
                    block_size: header.block_size,
                }
            }
        };
        if !params.entropy.is_available() {
            return Err(KanziError::new(
                ErrorKind::CreateCodec,
                format!(
                    "entropy codec {} is not available in this build",
                    params.entropy.name()
                ),
            ));
        }
        // Surface unavailable transforms before the first block task.
        TransformSequence::new(
            params.transform_type,
            &TransformContext {
                block_size: params.block_size,
                jobs: 1,
            },
        )?;
        self.params = Some(params);
        self.initialized = true;
        Ok(())
    }

    fn fetch_batch(&mut self) -> KanziResult<()> {
        let params = self.params.as_ref().expect("initialized").clone();
        let nb = self.jobs;
        let hints = jobs_per_task(self.jobs, nb);
        let first_id = self.block_id + 1;
        let mut tasks = Vec::with_capacity(nb);
        for i in 0..nb {
            self.block_id += 1;
            tasks.push(DecodeTask {
                block_id: self.block_id,
                data: std::mem::take(&mut self.buffers[i]),
                buf: std::mem::take(&mut self.buffers[self.jobs + i]),
                jobs: hints[i],
                ibs: Arc::clone(&self.ibs),
                processed: Arc::clone(&self.processed),
                eos: Arc::clone(&self.eos),
                params: params.clone(),
                from: self.from,
                to: self.to,
                listeners: self.listeners.clone(),
            });
        }
        debug!("fetching batch: blocks {}..={}", first_id, self.block_id);

        let outputs: Vec<DecodeOutput> = self
            .pool
            .install(|| tasks.into_par_iter().map(DecodeTask::run).collect());

        let mut first_error: Option<KanziError> = None;
        let mut fallback: Option<KanziError> = None;
        for (i, out) in outputs.into_iter().enumerate() {
            self.buffers[i] = out.data;
            self.buffers[self.jobs + i] = out.buf;
            match out.result {
                Ok(DecodeOutcome::Data(block)) => {
                    if first_error.is_none() && !block.is_empty() {
                        self.queue.push_back(block);
                    }
                }
                Ok(DecodeOutcome::Skipped) => {}
                Ok(DecodeOutcome::EndOfStream) => self.done = true,
                Err(e) => {
                    if e.message == CANCEL_MSG {
                        fallback.get_or_insert(e);
                    } else if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error.or(fallback) {
            self.error = Some(e.clone());
            return Err(e);
        }
        Ok(())
    }
}

impl<R: Read + Send> std::io::Read for CompressedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        CompressedReader::read(self, buf).map_err(std::io::Error::from)
    }
}

enum DecodeOutcome {
    Data(Vec<u8>),
    Skipped,
    EndOfStream,
}

struct DecodeOutput {
    data: Vec<u8>,
    buf: Vec<u8>,
    result: KanziResult<DecodeOutcome>,
}

struct DecodeTask<R: Read + Send> {
    block_id: i64,
    data: Vec<u8>,
    buf: Vec<u8>,
    jobs: usize,
    ibs: Arc<Mutex<InputBitStream<R>>>,
    processed: Arc<AtomicI64>,
    eos: Arc<AtomicBool>,
    params: StreamParams,
    from: Option<i64>,
    to: Option<i64>,
    listeners: Vec<Arc<dyn Listener>>,
}

impl<R: Read + Send> DecodeTask<R> {
    fn run(mut self) -> DecodeOutput {
        let mut data = std::mem::take(&mut self.data);
        let mut buf = std::mem::take(&mut self.buf);
        let result = self.decode_block(&mut data, &mut buf);
        if result.is_err() {
            self.processed.store(CANCELED_BLOCK_ID, Ordering::Release);
        }
        DecodeOutput { data, buf, result }
    }

    fn decode_block(
        &self,
        data: &mut Vec<u8>,
        buf: &mut Vec<u8>,
    ) -> KanziResult<DecodeOutcome> {
        self.wait_turn()?;
        if self.eos.load(Ordering::Acquire) {
            self.advance()?;
            return Ok(DecodeOutcome::EndOfStream);
        }

        // Demux this block's frame from the shared bitstream.
        let sz = {
            let mut ibs = self.ibs.lock().unwrap();
            let lw = ibs.read_bits(5).map_err(frame_err)? as usize + 3;
            let sz = ibs.read_bits(lw).map_err(frame_err)? as usize;
            if sz == 0 {
                drop(ibs);
                self.eos.store(true, Ordering::Release);
                self.advance()?;
                return Ok(DecodeOutcome::EndOfStream);
            }
            if sz > max_payload_len(self.params.block_size) {
                return Err(KanziError::block_size(format!(
                    "block {}: invalid payload size {}",
                    self.block_id, sz
                )));
            }
            if data.len() < sz {
                data.resize(sz, 0);
            }
            let mut off = 0usize;
            while off < sz {
                let chunk = (sz - off).min(MAX_BIT_CHUNK_BYTES);
                ibs.read_bytes(&mut data[off..off + chunk], chunk * 8)
                    .map_err(frame_err)?;
                off += chunk;
            }
            sz
        };
        // Let the successor start reading its frame.
        self.advance()?;

        let in_range = self.from.map_or(true, |f| self.block_id >= f)
            && self.to.map_or(true, |t| self.block_id < t);
        if !in_range {
            return Ok(DecodeOutcome::Skipped);
        }

        // Everything below runs concurrently with other tasks.
        let hash = self.params.hash;
        let (copy, skip_flags, post_len, checksum) = {
            let mut local = InputBitStream::new(&data[..sz]);
            let mode = local.read_bits(8).map_err(local_err)? as u8;
            let copy = mode & COPY_BLOCK_MASK != 0;
            let ds = ((mode >> super::DATA_SIZE_SHIFT) & 0x03) as usize + 1;
            let mut skip_flags = 0u8;
            if !copy {
                if mode & TRANSFORMS_MASK != 0 {
                    skip_flags = local.read_bits(8).map_err(local_err)? as u8;
                } else {
                    skip_flags = (mode << 4) & 0xF0;
                }
            }
            let post_len = local.read_bits(8 * ds).map_err(local_err)? as usize;
            if post_len == 0 || post_len > max_post_transform_len(self.params.block_size) {
                return Err(KanziError::block_size(format!(
                    "block {}: invalid post-transform length {}",
                    self.block_id, post_len
                )));
            }
            let checksum = if hash != HashKind::None {
                Some(local.read_bits(hash.size_bits()).map_err(local_err)?)
            } else {
                None
            };
            notify(
                &self.listeners,
                &Event::new(
                    EventKind::BeforeEntropy,
                    self.block_id,
                    sz as u64,
                    checksum,
                    hash,
                ),
            );
            {
                let etype = if copy {
                    EntropyType::None
                } else {
                    self.params.entropy
                };
                let mut decoder = entropy::new_decoder(etype, &mut local)
                    .map_err(|e| KanziError::new(ErrorKind::CreateDecompressor, e.message))?;
                if buf.len() < post_len {
                    buf.resize(post_len, 0);
                }
                decoder.decode(&mut buf[..post_len])?;
                decoder.dispose()?;
            }
            notify(
                &self.listeners,
                &Event::new(
                    EventKind::AfterEntropy,
                    self.block_id,
                    post_len as u64,
                    checksum,
                    hash,
                ),
            );
            (copy, skip_flags, post_len, checksum)
        };

        notify(
            &self.listeners,
            &Event::new(
                EventKind::BeforeTransform,
                self.block_id,
                post_len as u64,
                checksum,
                hash,
            ),
        );
        let decoded_len;
        let decoded_in_buf;
        if copy {
            if post_len > self.params.block_size {
                return Err(KanziError::block_size(format!(
                    "block {}: copy block larger than block size",
                    self.block_id
                )));
            }
            decoded_len = post_len;
            decoded_in_buf = true;
        } else {
            let ctx = TransformContext {
                block_size: self.params.block_size,
                jobs: self.jobs,
            };
            let mut seq = TransformSequence::new(self.params.transform_type, &ctx)?;
            seq.set_skip_flags(skip_flags);
            // Intermediate stages may carry a few bytes of framing beyond the
            // block size; only the final output is held to it.
            let n = seq.inverse(
                buf,
                data,
                post_len,
                max_post_transform_len(self.params.block_size),
            )?;
            if n > self.params.block_size {
                return Err(KanziError::process_block(format!(
                    "block {}: decoded length {} exceeds block size",
                    self.block_id, n
                )));
            }
            decoded_len = n;
            decoded_in_buf = false;
        }
        let decoded = if decoded_in_buf {
            &buf[..decoded_len]
        } else {
            &data[..decoded_len]
        };

        if let Some(expected) = checksum {
            let actual = hash.hash(decoded);
            if actual != expected {
                return Err(KanziError::crc_check(format!(
                    "block {}: checksum mismatch",
                    self.block_id
                )));
            }
        }
        notify(
            &self.listeners,
            &Event::new(
                EventKind::AfterTransform,
                self.block_id,
                decoded_len as u64,
                checksum,
                hash,
            ),
        );
        notify(
            &self.listeners,
            &Event::text(
                EventKind::BlockInfo,
                self.block_id,
                format!(
                    "block {}: {} -> {} bytes",
                    self.block_id, sz, decoded_len
                ),
            ),
        );
        Ok(DecodeOutcome::Data(decoded.to_vec()))
    }

    fn advance(&self) -> KanziResult<()> {
        self.processed
            .compare_exchange(
                self.block_id - 1,
                self.block_id,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| canceled())
    }

    /// Spins until the predecessor block has been demuxed, yielding every 32
    /// iterations.
    fn wait_turn(&self) -> KanziResult<()> {
        let mut spins = 0u32;
        loop {
            let p = self.processed.load(Ordering::Acquire);
            if p == self.block_id - 1 {
                return Ok(());
            }
            if p == CANCELED_BLOCK_ID {
                return Err(canceled());
            }
            spins = spins.wrapping_add(1);
            if spins & 31 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_configurations_are_rejected() {
        let cfg = DecompressorConfig {
            jobs: 0,
            ..DecompressorConfig::default()
        };
        assert_eq!(
            CompressedReader::new(&b""[..], &cfg).err().unwrap().kind,
            ErrorKind::InvalidParam
        );

        let mut cfg = DecompressorConfig::default();
        let mut h = super::super::HeaderlessConfig::default();
        h.block_size = 777;
        cfg.headerless = Some(h);
        assert!(CompressedReader::new(&b""[..], &cfg).is_err());
    }

    #[test]
    fn empty_source_is_invalid_file() {
        let cfg = DecompressorConfig::default();
        let mut reader = CompressedReader::new(&b""[..], &cfg).unwrap();
        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).err().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidFile);
    }

    #[test]
    fn garbage_magic_is_invalid_file() {
        let cfg = DecompressorConfig::default();
        let bytes = b"NOTAKANZISTREAM_____".to_vec();
        let mut reader = CompressedReader::new(&bytes[..], &cfg).unwrap();
        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).err().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidFile);
    }
}
