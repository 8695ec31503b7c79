//! Compressed stream writer.
//!
//! [`CompressedWriter`] tiles caller bytes into fixed-size input slabs; once
//! all `jobs` slabs are full (or on close) it flushes the batch through a
//! dedicated rayon pool.  Every task transforms and entropy-codes its block
//! into a task-local bitstream, then splices the finished payload into the
//! shared sink when the atomic processed-block counter grants it the turn.
//! A failing task stores the cancel sentinel; peers observe it and return
//! without touching the shared sink.

use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use rayon::prelude::*;

use crate::bitstream::{BitStreamError, OutputBitStream};
use crate::entropy::{self, EntropyType};
use crate::error::{ErrorKind, KanziError, KanziResult};
use crate::event::{notify, Event, EventKind, Listener};
use crate::hash::HashKind;
use crate::magic;
use crate::transform::{self, TransformContext, TransformSequence};

use super::header::{write_header, StreamHeader};
use super::{
    jobs_per_task, max_post_transform_len, payload_size_field_width, validate_block_size,
    validate_jobs, CompressorConfig, BITSTREAM_FORMAT_VERSION, CANCELED_BLOCK_ID,
    COPY_BLOCK_MASK, DATA_SIZE_SHIFT, INCOMPRESSIBLE_THRESHOLD, MAX_BIT_CHUNK_BYTES,
    SMALL_BLOCK_SIZE, TRANSFORMS_MASK,
};

const CANCEL_MSG: &str = "block task canceled";

fn canceled() -> KanziError {
    KanziError::process_block(CANCEL_MSG)
}

fn local_err(e: BitStreamError) -> KanziError {
    KanziError::process_block(e.to_string())
}

fn sink_err(e: BitStreamError) -> KanziError {
    KanziError::new(ErrorKind::WriteFile, e.to_string())
}

/// Block-parallel compressing wrapper around a byte sink.
pub struct CompressedWriter<W: Write + Send> {
    obs: Arc<Mutex<OutputBitStream<W>>>,
    processed: Arc<AtomicI64>,
    pool: rayon::ThreadPool,
    entropy: EntropyType,
    transform_type: u64,
    nb_stages: usize,
    block_size: usize,
    hash: HashKind,
    jobs: usize,
    skip_blocks: bool,
    headerless: bool,
    original_size: Option<u64>,
    // 2 * jobs slabs: [0, jobs) input, [jobs, 2*jobs) per-task scratch.
    buffers: Vec<Vec<u8>>,
    cur: usize,
    cur_len: usize,
    block_id: i64,
    initialized: bool,
    closed: bool,
    error: Option<KanziError>,
    listeners: Vec<Arc<dyn Listener>>,
    total_in: u64,
}

impl<W: Write + Send> CompressedWriter<W> {
    pub fn new(sink: W, cfg: &CompressorConfig) -> KanziResult<Self> {
        validate_jobs(cfg.jobs)?;
        validate_block_size(cfg.block_size)?;
        let hash = HashKind::from_size(cfg.checksum)?;
        let entropy = EntropyType::from_name(&cfg.entropy)?;
        if !entropy.is_available() {
            return Err(KanziError::new(
                ErrorKind::CreateCodec,
                format!("entropy codec {} is not available in this build", entropy.name()),
            ));
        }
        let transform_type = transform::parse_transform_names(&cfg.transform)?;
        let nb_stages = transform::unpack_transform_codes(transform_type)?.len();
        // Fail on unavailable transforms now rather than in the first block.
        TransformSequence::new(
            transform_type,
            &TransformContext {
                block_size: cfg.block_size,
                jobs: 1,
            },
        )?;

        // A known input size bounds the useful concurrency.
        let mut jobs = cfg.jobs;
        if let Some(size) = cfg.original_size {
            let blocks = size.div_ceil(cfg.block_size as u64).max(1);
            jobs = jobs.min(blocks.min(super::MAX_CONCURRENCY as u64) as usize);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| KanziError::new(ErrorKind::CreateStream, e.to_string()))?;

        Ok(CompressedWriter {
            obs: Arc::new(Mutex::new(OutputBitStream::new(sink))),
            processed: Arc::new(AtomicI64::new(0)),
            pool,
            entropy,
            transform_type,
            nb_stages,
            block_size: cfg.block_size,
            hash,
            jobs,
            skip_blocks: cfg.skip_blocks,
            headerless: cfg.headerless,
            original_size: cfg.original_size,
            buffers: (0..2 * jobs).map(|_| Vec::new()).collect(),
            cur: 0,
            cur_len: 0,
            block_id: 0,
            initialized: false,
            closed: false,
            error: None,
            listeners: Vec::new(),
            total_in: 0,
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

    /// Total uncompressed bytes accepted so far.
    pub fn uncompressed_bytes(&self) -> u64 {
        self.total_in
    }

    /// Bits emitted to the shared bitstream so far.
    pub fn compressed_bits(&self) -> u64 {
        self.obs.lock().unwrap().written()
    }

    /// Buffers `data`, flushing full batches of blocks as slabs fill up.
    pub fn write(&mut self, data: &[u8]) -> KanziResult<usize> {
        if self.closed {
            return Err(KanziError::new(ErrorKind::WriteFile, "stream is closed"));
        }
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        self.ensure_header()?;
        let mut off = 0;
        while off < data.len() {
            let slab = &mut self.buffers[self.cur];
            if slab.len() < self.block_size {
                slab.resize(self.block_size, 0);
            }
            let take = (self.block_size - self.cur_len).min(data.len() - off);
            slab[self.cur_len..self.cur_len + take].copy_from_slice(&data[off..off + take]);
            self.cur_len += take;
            off += take;
            if self.cur_len == self.block_size {
                self.cur += 1;
                self.cur_len = 0;
                if self.cur == self.jobs {
                    self.cur = 0;
                    self.process_batch(self.jobs, self.block_size)?;
                }
            }
        }
        self.total_in += data.len() as u64;
        Ok(data.len())
    }

    /// Flushes any partial block, writes the end-of-stream marker and closes
    /// the shared sink.  Idempotent.
    pub fn close(&mut self) -> KanziResult<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(e) = &self.error {
            self.closed = true;
            return Err(e.clone());
        }
        let result = self.finish();
        self.closed = true;
        result
    }

    fn finish(&mut self) -> KanziResult<()> {
        self.ensure_header()?;
        let nb = self.cur + usize::from(self.cur_len > 0);
        if nb > 0 {
            let last_len = if self.cur_len > 0 {
                self.cur_len
            } else {
                self.block_size
            };
            self.cur = 0;
            self.cur_len = 0;
            self.process_batch(nb, last_len)?;
        }
        debug!(
            "closing stream after {} block(s), {} input bytes",
            self.block_id, self.total_in
        );
        let mut obs = self.obs.lock().unwrap();
        obs.write_bits(0, 5).map_err(sink_err)?;
        obs.write_bits(0, 3).map_err(sink_err)?;
        obs.close().map_err(sink_err)?;
        Ok(())
    }

    fn ensure_header(&mut self) -> KanziResult<()> {
        if self.initialized {
            return Ok(());
        }
        if !self.headerless {
            let params = StreamHeader {
                version: BITSTREAM_FORMAT_VERSION,
                checksum: self.hash,
                entropy: self.entropy,
                transform_type: self.transform_type,
                block_size: self.block_size,
                original_size: self.original_size,
            };
            let mut obs = self.obs.lock().unwrap();
            write_header(&mut obs, &params)?;
            debug!("stream header written: {}", params.summary());
        }
        self.initialized = true;
        Ok(())
    }

    fn process_batch(&mut self, nb: usize, last_len: usize) -> KanziResult<()> {
        let hints = jobs_per_task(self.jobs, nb);
        let first_id = self.block_id + 1;
        let mut tasks = Vec::with_capacity(nb);
        for i in 0..nb {
            self.block_id += 1;
            tasks.push(EncodeTask {
                block_id: self.block_id,
                data: std::mem::take(&mut self.buffers[i]),
                len: if i + 1 == nb { last_len } else { self.block_size },
                buf: std::mem::take(&mut self.buffers[self.jobs + i]),
                jobs: hints[i],
                obs: Arc::clone(&self.obs),
                processed: Arc::clone(&self.processed),
                entropy: self.entropy,
                transform_type: self.transform_type,
                nb_stages: self.nb_stages,
                block_size: self.block_size,
                hash: self.hash,
                skip_blocks: self.skip_blocks,
                listeners: self.listeners.clone(),
            });
        }
        debug!(
            "flushing batch: blocks {}..={}, {} job(s)",
            first_id, self.block_id, self.jobs
        );

        let outputs: Vec<TaskOutput> = self
            .pool
            .install(|| tasks.into_par_iter().map(EncodeTask::run).collect());

        let mut first_error: Option<KanziError> = None;
        let mut fallback: Option<KanziError> = None;
        for (i, out) in outputs.into_iter().enumerate() {
            self.buffers[i] = out.data;
            self.buffers[self.jobs + i] = out.buf;
            if let Err(e) = out.result {
                if e.message == CANCEL_MSG {
                    fallback.get_or_insert(e);
                } else if first_error.is_none() {
                    first_error = Some(e);
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

impl<W: Write + Send> CompressedWriter<W> {
    /// Closes the stream and returns the underlying sink.
    ///
    /// Dropping a writer without calling [`close`](Self::close) or this
    /// method loses any buffered, unflushed blocks.
    pub fn into_inner(mut self) -> KanziResult<W> {
        self.close()?;
        let obs = Arc::try_unwrap(self.obs)
            .map_err(|_| KanziError::new(ErrorKind::Unknown, "shared bitstream still in use"))?;
        let obs = match obs.into_inner() {
            Ok(v) => v,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(obs.into_inner())
    }
}

impl<W: Write + Send> std::io::Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        CompressedWriter::write(self, buf).map_err(std::io::Error::from)
    }

    /// Bits are only guaranteed on the sink after [`CompressedWriter::close`].
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct EncodeTask<W: Write + Send> {
    block_id: i64,
    data: Vec<u8>,
    len: usize,
    buf: Vec<u8>,
    jobs: usize,
    obs: Arc<Mutex<OutputBitStream<W>>>,
    processed: Arc<AtomicI64>,
    entropy: EntropyType,
    transform_type: u64,
    nb_stages: usize,
    block_size: usize,
    hash: HashKind,
    skip_blocks: bool,
    listeners: Vec<Arc<dyn Listener>>,
}

struct TaskOutput {
    data: Vec<u8>,
    buf: Vec<u8>,
    result: KanziResult<u64>,
}

impl<W: Write + Send> EncodeTask<W> {
    fn run(mut self) -> TaskOutput {
        let mut data = std::mem::take(&mut self.data);
        let mut buf = std::mem::take(&mut self.buf);
        let result = self.encode_block(&mut data, &mut buf);
        if result.is_err() {
            // Peers must not wait for this block.
            self.processed.store(CANCELED_BLOCK_ID, Ordering::Release);
        }
        TaskOutput { data, buf, result }
    }

    /// Checksum, copy decision, forward pipeline, local bitstream, ordered
    /// splice.  Returns the payload size in bytes.
    fn encode_block(&self, data: &mut Vec<u8>, buf: &mut Vec<u8>) -> KanziResult<u64> {
        let len = self.len;
        let checksum =
            (self.hash != HashKind::None).then(|| self.hash.hash(&data[..len]));
        notify(
            &self.listeners,
            &Event::new(
                EventKind::BeforeTransform,
                self.block_id,
                len as u64,
                checksum,
                self.hash,
            ),
        );

        let mut copy = len <= SMALL_BLOCK_SIZE;
        if !copy && self.skip_blocks {
            let head = &data[..len.min(magic::HEADER_BYTES)];
            copy = magic::is_compressed(head)
                || entropy::first_order_entropy_1024(&data[..len]) > INCOMPRESSIBLE_THRESHOLD;
        }

        let mut mode: u8 = 0;
        let mut skip_flags = 0u8;
        let post_len;
        if copy {
            mode |= COPY_BLOCK_MASK;
            post_len = len;
        } else {
            let ctx = TransformContext {
                block_size: self.block_size,
                jobs: self.jobs,
            };
            let mut seq = TransformSequence::new(self.transform_type, &ctx)?;
            post_len = seq.forward(data, buf, len)?;
            skip_flags = seq.skip_flags();
            if self.nb_stages > 4 {
                mode |= TRANSFORMS_MASK;
            } else {
                mode |= (skip_flags >> 4) & 0x0F;
            }
        }
        notify(
            &self.listeners,
            &Event::new(
                EventKind::AfterTransform,
                self.block_id,
                post_len as u64,
                checksum,
                self.hash,
            ),
        );
        if post_len == 0 || post_len > max_post_transform_len(self.block_size) {
            return Err(KanziError::new(
                ErrorKind::WriteFile,
                format!("post-transform length {} out of range", post_len),
            ));
        }
        let ds: usize = match post_len {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            0x1_0000..=0xFF_FFFF => 3,
            _ => 4,
        };
        mode |= (((ds - 1) as u8) << DATA_SIZE_SHIFT) & 0x60;

        // The slab not holding the payload source becomes the local sink.
        let mut sink = if copy {
            std::mem::take(buf)
        } else {
            std::mem::take(data)
        };
        sink.clear();
        sink.reserve(post_len.max(len + (len >> 3)).max(256 * 1024));
        let mut local = OutputBitStream::new(sink);
        local.write_bits(u64::from(mode), 8).map_err(local_err)?;
        if !copy && self.nb_stages > 4 {
            local.write_bits(u64::from(skip_flags), 8).map_err(local_err)?;
        }
        local
            .write_bits(post_len as u64, 8 * ds)
            .map_err(local_err)?;
        if let Some(c) = checksum {
            local.write_bits(c, self.hash.size_bits()).map_err(local_err)?;
        }
        notify(
            &self.listeners,
            &Event::new(
                EventKind::BeforeEntropy,
                self.block_id,
                post_len as u64,
                checksum,
                self.hash,
            ),
        );
        {
            let etype = if copy { EntropyType::None } else { self.entropy };
            let mut encoder = entropy::new_encoder(etype, &mut local)
                .map_err(|e| KanziError::new(ErrorKind::CreateCompressor, e.message))?;
            let source = if copy {
                &data[..post_len]
            } else {
                &buf[..post_len]
            };
            encoder.encode(source)?;
            encoder.dispose()?;
        }
        local.close().map_err(local_err)?;
        let payload = local.into_inner();
        let sz = payload.len() as u64;
        notify(
            &self.listeners,
            &Event::new(EventKind::AfterEntropy, self.block_id, sz, checksum, self.hash),
        );

        self.wait_turn()?;
        {
            let mut shared = self.obs.lock().unwrap();
            let lw = payload_size_field_width(sz);
            shared.write_bits((lw - 3) as u64, 5).map_err(sink_err)?;
            shared.write_bits(sz, lw).map_err(sink_err)?;
            let mut off = 0usize;
            while off < payload.len() {
                let chunk = (payload.len() - off).min(MAX_BIT_CHUNK_BYTES);
                shared
                    .write_bytes(&payload[off..off + chunk], chunk * 8)
                    .map_err(sink_err)?;
                off += chunk;
            }
        }
        // Return the sink slab to its pool slot.
        if copy {
            *buf = payload;
        } else {
            *data = payload;
        }
        if self
            .processed
            .compare_exchange(
                self.block_id - 1,
                self.block_id,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(canceled());
        }
        notify(
            &self.listeners,
            &Event::text(
                EventKind::BlockInfo,
                self.block_id,
                format!("block {}: {} -> {} bytes", self.block_id, len, sz),
            ),
        );
        Ok(sz)
    }

    /// Spins until the predecessor block has been spliced, yielding every 32
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
        let base = CompressorConfig::default();

        let cfg = CompressorConfig { jobs: 0, ..base.clone() };
        assert_eq!(
            CompressedWriter::new(Vec::new(), &cfg).err().unwrap().kind,
            ErrorKind::InvalidParam
        );

        let cfg = CompressorConfig { jobs: 65, ..base.clone() };
        assert!(CompressedWriter::new(Vec::new(), &cfg).is_err());

        let cfg = CompressorConfig { block_size: 100, ..base.clone() };
        assert!(CompressedWriter::new(Vec::new(), &cfg).is_err());

        let cfg = CompressorConfig { checksum: 24, ..base.clone() };
        assert!(CompressedWriter::new(Vec::new(), &cfg).is_err());

        let cfg = CompressorConfig {
            transform: "WAT".to_string(),
            ..base.clone()
        };
        assert_eq!(
            CompressedWriter::new(Vec::new(), &cfg).err().unwrap().kind,
            ErrorKind::InvalidCodec
        );

        let cfg = CompressorConfig {
            entropy: "TPAQ".to_string(),
            ..base
        };
        assert_eq!(
            CompressedWriter::new(Vec::new(), &cfg).err().unwrap().kind,
            ErrorKind::CreateCodec
        );
    }

    #[test]
    fn write_after_close_fails() {
        let cfg = CompressorConfig {
            block_size: 1024,
            ..CompressorConfig::default()
        };
        let mut writer = CompressedWriter::new(Vec::new(), &cfg).unwrap();
        writer.write(b"abc").unwrap();
        writer.close().unwrap();
        assert!(writer.write(b"more").is_err());
        // Close is idempotent.
        assert!(writer.close().is_ok());
    }

    #[test]
    fn size_hint_caps_parallelism() {
        let cfg = CompressorConfig {
            block_size: 1024,
            jobs: 16,
            original_size: Some(2048),
            ..CompressorConfig::default()
        };
        let writer = CompressedWriter::new(Vec::new(), &cfg).unwrap();
        assert_eq!(writer.jobs, 2);
    }
}
