//! The archiver facade: configuration, dispatch orchestration, and the
//! public compression entry points.

use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::debug;

use crate::archive::ArchiveEntry;
use crate::codec::aes::AesOptions;
use crate::codec::encoder::build_chain;
use crate::codec::{Method, MethodConfig};
use crate::digest::CrcWriter;
use crate::error::{Error, ErrorKind, Result};
use crate::job::{InputItem, Job, JobStatus};
use crate::pool::{lock, Batch, ProgressState, WorkerPool};
use crate::progress::{NoopCallback, ParallelCallback};
use crate::stats::{Counters, Statistics};
use crate::writer::{ArchiveAssembler, VolumeConfig, VolumeMetadata, VolumeWriter};
use crate::DEFAULT_BUFFER_SIZE;

/// In-memory buffering cap for solid-mode input concatenation.
const SOLID_INPUT_CAP: u64 = 4 * 1024 * 1024 * 1024;

/// Upper bound on look-ahead items accepted from the callback per call.
const MAX_LOOK_AHEAD: usize = 16;

/// Call-level outcome distinct from plain success: a partially successful
/// archive is valid but lists only the items that compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressStatus {
    /// Every item was archived.
    Ok,
    /// At least one item failed; the archive lists the rest.
    PartialSuccess,
}

/// Result of a successful (possibly partial) compress call.
#[derive(Debug, Clone)]
pub struct CompressReport {
    pub status: CompressStatus,
    /// Final statistics snapshot for the call.
    pub statistics: Statistics,
}

/// Parallel multi-stream compressor producing 7z archives.
///
/// The archiver owns a pool of long-lived worker threads, created on the
/// first parallel compress call and torn down on drop. Configuration applies
/// to subsequent calls; reconfiguring during a running call is not supported
/// (calls take `&mut self`).
pub struct ParallelArchiver {
    num_threads: u32,
    level: u32,
    method: Method,
    password: Option<String>,
    raw_key: Option<(Vec<u8>, Vec<u8>)>,
    solid: bool,
    /// Files per solid block; 0 packs everything into one block.
    solid_block_size: u32,
    segment_size: u64,
    volume_size: u64,
    volume_prefix: Option<PathBuf>,
    progress_interval: u64,
    callback: Arc<dyn ParallelCallback>,
    pool: Option<WorkerPool>,
    progress: Arc<Mutex<ProgressState>>,
}

impl Default for ParallelArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelArchiver {
    pub fn new() -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
            .min(256);
        ParallelArchiver {
            num_threads,
            level: 5,
            method: Method::LZMA,
            password: None,
            raw_key: None,
            solid: false,
            solid_block_size: 0,
            segment_size: 0,
            volume_size: 0,
            volume_prefix: None,
            progress_interval: DEFAULT_BUFFER_SIZE as u64,
            callback: Arc::new(NoopCallback),
            pool: None,
            progress: Arc::new(Mutex::new(ProgressState::new())),
        }
    }

    /// Sets the worker count; 0 becomes 1, values above 256 clamp to 256.
    pub fn set_num_threads(&mut self, num_threads: u32) -> &mut Self {
        self.num_threads = num_threads.clamp(1, 256);
        self
    }

    /// Sets the compression level, clamped to `[0, 9]`.
    pub fn set_level(&mut self, level: u32) -> &mut Self {
        self.level = level.min(9);
        self
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// Resolves and sets a raw 7z method id.
    pub fn set_method_id(&mut self, method_id: u64) -> Result<&mut Self> {
        self.method = Method::from_id(method_id)?;
        Ok(self)
    }

    /// Enables password-based AES-256 encryption; an empty string disables
    /// it. The password also gates the archive header, so listing an
    /// encrypted archive requires it.
    pub fn set_password(&mut self, password: &str) -> &mut Self {
        self.password = if password.is_empty() {
            None
        } else {
            Some(password.to_string())
        };
        self
    }

    /// Accepts raw key material. The standard 7z header only encodes
    /// password-based derivation, so raw keys are not representable there;
    /// compressing with only a raw key reports through the error hook and
    /// proceeds unencrypted.
    pub fn set_raw_key(&mut self, key: &[u8], iv: &[u8]) -> &mut Self {
        if key.is_empty() {
            self.raw_key = None;
        } else {
            self.raw_key = Some((key.to_vec(), iv.to_vec()));
        }
        self
    }

    pub fn set_solid(&mut self, solid: bool) -> &mut Self {
        self.solid = solid;
        self
    }

    /// Files per solid block; 0 means one block for the whole item set.
    pub fn set_solid_block_size(&mut self, files_per_block: u32) -> &mut Self {
        self.solid_block_size = files_per_block;
        self
    }

    /// Segment size hint forwarded to encoders for unknown-size streams.
    pub fn set_segment_size(&mut self, segment_size: u64) -> &mut Self {
        self.segment_size = segment_size;
        self
    }

    /// Volume size and prefix must both be configured to enable splitting;
    /// see [`Self::compress_to_volumes`].
    pub fn set_volume_size(&mut self, volume_size: u64) -> &mut Self {
        self.volume_size = volume_size;
        self
    }

    pub fn set_volume_prefix(&mut self, prefix: impl AsRef<Path>) -> &mut Self {
        self.volume_prefix = Some(prefix.as_ref().to_path_buf());
        self
    }

    pub fn set_callback(&mut self, callback: Arc<dyn ParallelCallback>) -> &mut Self {
        self.callback = callback;
        self
    }

    /// Byte interval between mid-item progress callbacks.
    pub fn set_progress_interval(&mut self, interval: u64) -> &mut Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// Basic counters: `(items_completed, items_failed, total_in, total_out)`.
    pub fn statistics(&self) -> (u64, u64, u64, u64) {
        let state = lock(&self.progress);
        (
            state.counters.items_completed,
            state.counters.items_failed,
            state.counters.total_in,
            state.counters.total_out,
        )
    }

    /// Full derived statistics, consistent within one snapshot.
    pub fn detailed_statistics(&self) -> Statistics {
        let state = lock(&self.progress);
        state.counters.snapshot(state.started)
    }

    /// Single-stream passthrough.
    ///
    /// With one thread the configured codec runs directly, producing a raw
    /// coder stream; otherwise the input becomes a one-item archive via
    /// [`Self::compress_multiple`]. Returns the compressed byte count.
    pub fn code<R: Read + Send + 'static, W: Write + Seek>(
        &mut self,
        input: R,
        output: W,
        size_hint: u64,
    ) -> Result<u64> {
        if self.num_threads <= 1 {
            let mut config = MethodConfig::new(self.method).with_level(self.level);
            if size_hint > 0 {
                config = config.with_size_hint(size_hint);
            } else if self.segment_size > 0 {
                config = config.with_size_hint(self.segment_size);
            }

            let mut sink = CrcWriter::new(output);
            let (_, mut chain) = build_chain(&[config], &mut sink)?;
            let mut reader = input;
            let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => return Err(Error::codec(0, e)),
                };
                chain.write_all(&buf[..n]).map_err(|e| Error::codec(0, e))?;
            }
            chain.finish().map_err(|e| Error::codec(0, e))?;
            return Ok(sink.written());
        }

        let item = InputItem::from_reader("", input, size_hint);
        let report = self.compress_multiple(vec![item], output)?;
        Ok(report.statistics.total_out)
    }

    /// Compresses `items` into a 7z archive written to `output`.
    ///
    /// Items appear in the archive in input order; failed items are skipped
    /// and reported through the callback and the returned status.
    pub fn compress_multiple<W: Write + Seek>(
        &mut self,
        items: Vec<InputItem>,
        output: W,
    ) -> Result<CompressReport> {
        let (report, _output) = self.compress_inner(items, output)?;
        Ok(report)
    }

    /// Compresses `items` into `<prefix>.001`, `<prefix>.002`, … volume
    /// files. Requires both a volume size and a volume prefix.
    pub fn compress_to_volumes(
        &mut self,
        items: Vec<InputItem>,
    ) -> Result<(CompressReport, VolumeMetadata)> {
        let (Some(prefix), true) = (self.volume_prefix.clone(), self.volume_size > 0) else {
            return Err(Error::invalid_argument(
                "volume output requires both a volume size and a volume prefix",
            ));
        };
        let writer = VolumeWriter::new(VolumeConfig::new(prefix, self.volume_size))
            .map_err(|e| Error::resource_exhausted(format!("failed to create volume file: {e}")))?;

        let (report, writer) = self.compress_inner(items, writer)?;
        let metadata = writer
            .finish()
            .map_err(|e| Error::sink(e, "finalize volumes"))?;
        Ok((report, metadata))
    }

    fn compress_inner<W: Write + Seek>(
        &mut self,
        items: Vec<InputItem>,
        output: W,
    ) -> Result<(CompressReport, W)> {
        if items.is_empty() {
            return Err(Error::invalid_argument("no input items"));
        }
        if self.raw_key.is_some() && self.password.is_none() {
            self.callback.on_error(
                0,
                ErrorKind::InvalidArgument,
                "raw key material is not representable in the 7z header; proceeding unencrypted",
            );
        }

        if self.solid {
            self.compress_solid(items, output)
        } else {
            self.compress_parallel(items, output)
        }
    }

    /// Coder chain template for item content, in decode order. The segment
    /// size hint applies to streams with no declared size; the pipeline
    /// overrides it per job when the item declares one.
    fn content_methods(&self) -> Vec<MethodConfig> {
        let mut data = MethodConfig::new(self.method).with_level(self.level);
        if self.segment_size > 0 {
            data = data.with_size_hint(self.segment_size);
        }
        match &self.password {
            Some(password) => vec![
                MethodConfig::new(Method::AES256_SHA256)
                    .with_aes(AesOptions::from_password(password)),
                data,
            ],
            None => vec![data],
        }
    }

    /// Coder chain for the trailing header; LZMA, behind AES when a password
    /// is set so the file list is password-gated.
    fn header_methods(&self) -> Vec<MethodConfig> {
        let lzma = MethodConfig::new(Method::LZMA).with_level(self.level.max(1));
        match &self.password {
            Some(password) => vec![
                MethodConfig::new(Method::AES256_SHA256)
                    .with_aes(AesOptions::from_password(password)),
                lzma,
            ],
            None => vec![lzma],
        }
    }

    /// Reuses the existing pool when its size matches the configuration;
    /// otherwise the old pool is dropped (joining its workers) and replaced.
    fn take_pool(&mut self) -> Result<WorkerPool> {
        match self.pool.take() {
            Some(pool) if pool.size() == self.num_threads as usize => Ok(pool),
            _ => WorkerPool::new(self.num_threads),
        }
    }

    fn compress_parallel<W: Write + Seek>(
        &mut self,
        items: Vec<InputItem>,
        output: W,
    ) -> Result<(CompressReport, W)> {
        let mut jobs: Vec<Job> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| Job::from_item(index, item))
            .collect();

        // Look-ahead items are drained exactly once, before any assignment,
        // so the dispatcher cursor never races with queue growth.
        let look_ahead = (self.num_threads as usize * 2).min(MAX_LOOK_AHEAD);
        let mut extra = self.callback.next_items(jobs.len(), look_ahead);
        extra.truncate(look_ahead);
        for item in extra {
            let index = jobs.len();
            jobs.push(Job::from_item(index, item));
        }

        debug!(
            "dispatching {} jobs across {} workers",
            jobs.len(),
            self.num_threads
        );

        let batch = Batch::new(
            jobs,
            Arc::clone(&self.progress),
            Arc::clone(&self.callback),
            self.content_methods(),
            self.progress_interval,
        );
        let pool = self.take_pool()?;
        pool.start_batch(&batch);
        batch.wait_complete();
        self.pool = Some(pool);

        if batch.was_cancelled() {
            return Err(Error::Cancelled);
        }
        if batch.success_count() == 0 {
            self.callback.on_error(
                0,
                ErrorKind::CompressionFailed,
                "all compression jobs failed",
            );
            return Err(Error::CompressionFailed);
        }

        let mut assembler = ArchiveAssembler::new(output, self.header_methods())?;
        let mut failed = 0u64;
        for job in &batch.jobs {
            let job = lock(job);
            match job.status {
                JobStatus::Ok => assembler.append_job(&job)?,
                _ => {
                    if let Some(reason) = &job.failure {
                        debug!("skipping item {} ({}): {reason}", job.index, job.name);
                    }
                    failed += 1;
                }
            }
        }
        let output = assembler
            .finish()
            .map_err(|e| Error::sink(e, "finish archive"))?;

        let status = if failed > 0 {
            CompressStatus::PartialSuccess
        } else {
            CompressStatus::Ok
        };
        Ok((
            CompressReport {
                status,
                statistics: self.detailed_statistics(),
            },
            output,
        ))
    }

    /// Solid layout: single-threaded by construction. Inputs are buffered
    /// whole (capped), digested per segment, and compressed block-wise
    /// straight into the output.
    fn compress_solid<W: Write + Seek>(
        &mut self,
        items: Vec<InputItem>,
        output: W,
    ) -> Result<(CompressReport, W)> {
        {
            let mut state = lock(&self.progress);
            state.counters = Counters {
                items_total: items.len() as u64,
                ..Counters::default()
            };
            state.started = Instant::now();
        }

        let methods = self.content_methods();
        let block_size = if self.solid_block_size == 0 {
            usize::MAX
        } else {
            self.solid_block_size as usize
        };

        let mut assembler = ArchiveAssembler::new(output, self.header_methods())?;
        let mut pending: Vec<(ArchiveEntry, Vec<u8>)> = Vec::new();
        let mut total_buffered = 0u64;
        let mut packed_total = 0u64;
        let mut failed = 0u64;
        let mut succeeded = 0u64;

        let flush_block = |assembler: &mut ArchiveAssembler<W>,
                           pending: &mut Vec<(ArchiveEntry, Vec<u8>)>|
         -> Result<u64> {
            if pending.is_empty() {
                return Ok(0);
            }
            let (entries, segments): (Vec<ArchiveEntry>, Vec<Vec<u8>>) = pending.drain(..).unzip();
            assembler.push_solid_block(entries, segments, &methods)
        };

        for (index, mut item) in items.into_iter().enumerate() {
            if self.callback.should_cancel() {
                return Err(Error::Cancelled);
            }
            self.callback.on_item_start(index, &item.name);

            let mut data = Vec::new();
            match item.source.read_to_end(&mut data) {
                Ok(_) => {}
                Err(e) => {
                    let error = Error::codec(index, e);
                    self.callback
                        .on_error(index, error.kind(), &error.to_string());
                    self.callback
                        .on_item_complete(index, JobStatus::Failed(error.kind()), 0, 0);
                    let mut state = lock(&self.progress);
                    state.counters.items_terminated += 1;
                    state.counters.items_failed += 1;
                    failed += 1;
                    continue;
                }
            }

            total_buffered += data.len() as u64;
            if total_buffered > SOLID_INPUT_CAP {
                return Err(Error::InputTooLarge {
                    size: total_buffered,
                    limit: SOLID_INPUT_CAP,
                });
            }

            let size = data.len() as u64;
            let entry = ArchiveEntry {
                name: item.name.clone(),
                mtime: item.modified,
                has_mtime: true,
                attributes: item.attributes,
                has_attributes: item.attributes != 0,
                ..ArchiveEntry::new("")
            };

            if data.is_empty() {
                // A zero-byte item terminates the running block so entry
                // order in the header matches input order.
                packed_total += flush_block(&mut assembler, &mut pending)?;
                assembler.append_empty_entry(entry);
            } else {
                pending.push((entry, data));
                if pending.len() >= block_size {
                    packed_total += flush_block(&mut assembler, &mut pending)?;
                }
            }

            self.callback
                .on_item_complete(index, JobStatus::Ok, size, 0);
            let mut state = lock(&self.progress);
            state.counters.items_terminated += 1;
            state.counters.items_completed += 1;
            state.counters.total_in += size;
            succeeded += 1;
        }
        packed_total += flush_block(&mut assembler, &mut pending)?;

        if succeeded == 0 {
            self.callback.on_error(
                0,
                ErrorKind::CompressionFailed,
                "all compression jobs failed",
            );
            return Err(Error::CompressionFailed);
        }

        let output = assembler
            .finish()
            .map_err(|e| Error::sink(e, "finish archive"))?;

        {
            let mut state = lock(&self.progress);
            state.counters.total_out = packed_total;
        }
        let status = if failed > 0 {
            CompressStatus::PartialSuccess
        } else {
            CompressStatus::Ok
        };
        Ok((
            CompressReport {
                status,
                statistics: self.detailed_statistics(),
            },
            output,
        ))
    }
}
