//! Per-job compression pipeline.
//!
//! One run compresses a single job's input completely: the source is wrapped
//! in a CRC-updating reader, driven through a fresh encoder chain into a
//! growable in-memory sink, and the chain's coder descriptors (method ids,
//! properties blobs, per-stage unpack sizes) are captured on the job for the
//! assembler.

use std::io::Read;

use crate::codec::encoder::build_chain;
use crate::digest::{CrcReader, CrcWriter};
use crate::error::{Error, Result};
use crate::job::{CompletedCoder, Job};
use crate::pool::Batch;
use crate::DEFAULT_BUFFER_SIZE;

/// Upper bound for the payload buffer preallocation; inputs may be larger,
/// the buffer just grows past this point.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

pub(crate) fn run(job: &mut Job, batch: &Batch) -> Result<()> {
    let index = job.index;
    batch.callback.on_item_start(index, &job.name);

    let source = job
        .source
        .take()
        .ok_or_else(|| Error::invalid_argument("job input stream already consumed"))?;
    let mut reader = CrcReader::new(source);

    // Worst-case estimate mirrors incompressible input plus codec overhead.
    let estimate = if job.declared_size > 0 {
        (job.declared_size + job.declared_size / 2) as usize
    } else {
        DEFAULT_BUFFER_SIZE
    };
    let mut packed = Vec::with_capacity(estimate.min(MAX_PREALLOC));

    let (packed_crc, specs) = {
        let mut sink = CrcWriter::new(&mut packed);

        let mut methods = batch.methods.clone();
        if let Some(data) = methods.last_mut() {
            if job.declared_size > 0 {
                data.size_hint = Some(job.declared_size);
            }
        }
        let (specs, mut chain) = build_chain(&methods, &mut sink)?;

        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        let mut last_progress = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(Error::codec(index, e)),
            };
            std::io::Write::write_all(&mut chain, &buf[..n])
                .map_err(|e| Error::codec(index, e))?;

            // Packed size is unknown until the encoder finishes, so
            // mid-item progress reports 0 output bytes.
            if reader.read_count() - last_progress >= batch.progress_interval {
                batch
                    .callback
                    .on_item_progress(index, reader.read_count(), 0);
                last_progress = reader.read_count();
            }
        }
        chain.finish().map_err(|e| Error::codec(index, e))?;

        (sink.crc_value(), specs)
    };

    job.read_size = reader.read_count();
    job.digest = reader.crc_value();
    job.digest_defined = true;
    job.packed = packed;
    job.packed_crc = packed_crc;
    job.coders = specs
        .into_iter()
        .map(|spec| {
            let unpack_size = spec
                .counter
                .as_ref()
                .map(|counter| counter.get() as u64)
                .unwrap_or(job.read_size);
            CompletedCoder {
                method: spec.method,
                properties: spec.properties,
                unpack_size,
            }
        })
        .collect();

    batch
        .callback
        .on_item_progress(index, job.read_size, job.packed_size());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Method, MethodConfig};
    use crate::job::{InputItem, JobStatus};
    use crate::pool::{Batch, ProgressState};
    use crate::progress::{NoopCallback, ParallelCallback};
    use std::io::{self, Read};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    fn single_job_batch(
        methods: Vec<MethodConfig>,
        callback: Arc<dyn ParallelCallback>,
    ) -> Arc<Batch> {
        Batch::new(
            Vec::new(),
            Arc::new(Mutex::new(ProgressState::new())),
            callback,
            methods,
            1024,
        )
    }

    #[test]
    fn pipeline_fills_all_output_slots() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 7) as u8).collect();
        let batch = single_job_batch(
            vec![MethodConfig::new(Method::LZMA2).with_level(5)],
            Arc::new(NoopCallback),
        );
        let mut job = Job::from_item(0, InputItem::from_bytes("d.bin", data.clone()));

        run(&mut job, &batch).unwrap();

        assert_eq!(job.read_size, data.len() as u64);
        assert!(job.digest_defined);
        assert_eq!(job.digest, crc32fast::hash(&data));
        assert_eq!(job.packed_crc, crc32fast::hash(&job.packed));
        assert!(job.packed_size() > 0);
        assert!(job.packed_size() < data.len() as u64);
        assert_eq!(job.coders.len(), 1);
        assert_eq!(job.coders[0].method, Method::LZMA2);
        assert_eq!(job.coders[0].unpack_size, data.len() as u64);
    }

    #[test]
    fn read_errors_become_codec_failures() {
        struct FailingReader {
            emitted: usize,
        }
        impl Read for FailingReader {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.emitted == 0 {
                    self.emitted = 10;
                    buf[..10].fill(b'x');
                    Ok(10)
                } else {
                    Err(io::Error::other("stream broke"))
                }
            }
        }

        let batch = single_job_batch(
            vec![MethodConfig::new(Method::LZMA2)],
            Arc::new(NoopCallback),
        );
        let mut job = Job::from_item(
            1,
            InputItem::from_reader("bad", FailingReader { emitted: 0 }, 0),
        );

        let err = run(&mut job, &batch).unwrap_err();
        assert!(matches!(err, Error::CodecFailure { index: 1, .. }));
    }

    #[test]
    fn progress_fires_at_the_configured_interval() {
        struct LastProgress {
            calls: AtomicU64,
        }
        impl ParallelCallback for LastProgress {
            fn on_item_progress(&self, _: usize, _: u64, _: u64) {
                self.calls.fetch_add(1, Ordering::SeqCst);
            }
        }

        let callback = Arc::new(LastProgress {
            calls: AtomicU64::new(0),
        });
        let batch = single_job_batch(
            vec![MethodConfig::new(Method::COPY)],
            callback.clone(),
        );
        let mut job = Job::from_item(0, InputItem::from_bytes("p", vec![0u8; 300_000]));

        run(&mut job, &batch).unwrap();

        // At least the interval-driven updates plus the final report.
        assert!(callback.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(job.status, JobStatus::Pending); // status is the pool's call
    }

    #[test]
    fn copy_method_stores_verbatim() {
        let data = b"store me untouched".to_vec();
        let batch = single_job_batch(
            vec![MethodConfig::new(Method::COPY)],
            Arc::new(NoopCallback),
        );
        let mut job = Job::from_item(0, InputItem::from_bytes("c", data.clone()));
        run(&mut job, &batch).unwrap();

        assert_eq!(job.packed, data);
        assert!(job.coders[0].properties.is_empty());
    }

    #[test]
    fn empty_input_yields_defined_zero_digest() {
        let batch = single_job_batch(
            vec![MethodConfig::new(Method::LZMA2)],
            Arc::new(NoopCallback),
        );
        let mut job = Job::from_item(0, InputItem::from_bytes("empty", Vec::new()));
        run(&mut job, &batch).unwrap();

        assert_eq!(job.read_size, 0);
        assert!(job.digest_defined);
        assert_eq!(job.digest, 0);
    }
}
