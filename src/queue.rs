//! A small queueing facade over the archiver.
//!
//! Streams are enqueued up front and compressed in one batch; the queue
//! refuses additions while a batch is being processed and reports simple
//! progress counts afterwards.

use std::io::{Seek, Write};
use std::sync::Mutex;

use crate::archiver::{CompressReport, ParallelArchiver};
use crate::error::{Error, Result};
use crate::job::InputItem;
use crate::pool::lock;

const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

#[derive(Default)]
struct QueueState {
    items: Vec<InputItem>,
    processing: bool,
    processed: u64,
    failed: u64,
}

/// Accumulates input streams and compresses them in one call.
pub struct StreamQueue {
    archiver: Mutex<ParallelArchiver>,
    state: Mutex<QueueState>,
    max_queue_size: usize,
}

impl StreamQueue {
    pub fn new(archiver: ParallelArchiver) -> Self {
        StreamQueue {
            archiver: Mutex::new(archiver),
            state: Mutex::new(QueueState::default()),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }

    pub fn set_max_queue_size(&mut self, max: usize) -> &mut Self {
        self.max_queue_size = max;
        self
    }

    /// Enqueues one item. Refused while a batch is processing or when the
    /// queue is full.
    pub fn add_stream(&self, item: InputItem) -> Result<()> {
        let mut state = lock(&self.state);
        if state.processing {
            return Err(Error::invalid_argument(
                "cannot add streams while the queue is processing",
            ));
        }
        if state.items.len() >= self.max_queue_size {
            return Err(Error::resource_exhausted("stream queue is full"));
        }
        state.items.push(item);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).items.len()
    }

    /// Compresses everything queued so far into `output`.
    ///
    /// The call is synchronous; when it returns, the batch is finished and
    /// [`Self::status`] reflects it.
    pub fn start_processing<W: Write + Seek>(&self, output: W) -> Result<CompressReport> {
        let items = {
            let mut state = lock(&self.state);
            if state.processing {
                return Err(Error::invalid_argument("queue is already processing"));
            }
            if state.items.is_empty() {
                return Err(Error::invalid_argument("no streams queued"));
            }
            state.processing = true;
            state.processed = 0;
            state.failed = 0;
            std::mem::take(&mut state.items)
        };

        let result = lock(&self.archiver).compress_multiple(items, output);

        let mut state = lock(&self.state);
        state.processing = false;
        match &result {
            Ok(report) => {
                state.processed = report.statistics.items_completed;
                state.failed = report.statistics.items_failed;
            }
            Err(_) => {
                let (completed, failed, _, _) = lock(&self.archiver).statistics();
                state.processed = completed;
                state.failed = failed;
            }
        }
        result
    }

    /// Returns `(processed, failed, pending)`.
    pub fn status(&self) -> (u64, u64, u64) {
        let state = lock(&self.state);
        (state.processed, state.failed, state.items.len() as u64)
    }
}
