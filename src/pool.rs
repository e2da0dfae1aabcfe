//! Worker pool and job dispatcher.
//!
//! A fixed set of long-lived worker threads is created on the first parallel
//! compress call and torn down when the facade is dropped. Each worker owns a
//! private start gate; a compress call assigns up to one initial job per
//! worker and releases the gates. Released workers drain the shared job
//! vector through a mutex-guarded index cursor, so assignment order is strict
//! FIFO while completion order is whatever the codecs make of it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

use log::{debug, trace};

use crate::codec::MethodConfig;
use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};
use crate::pipeline;
use crate::progress::ParallelCallback;
use crate::stats::Counters;

/// Locks a mutex, recovering the guard if a worker panicked mid-update.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counters plus the wall-clock origin for derived statistics.
pub(crate) struct ProgressState {
    pub counters: Counters,
    pub started: Instant,
}

impl ProgressState {
    pub(crate) fn new() -> Self {
        ProgressState {
            counters: Counters::default(),
            started: Instant::now(),
        }
    }
}

/// One compress call's worth of shared state.
///
/// The three locked regions of the concurrency contract live here: the job
/// vector (each job behind its own mutex, locked by exactly one worker), the
/// dispatcher cursor, and the progress counters paired with the completion
/// condition variable.
pub(crate) struct Batch {
    pub jobs: Vec<Mutex<Job>>,
    cursor: Mutex<usize>,
    progress: Arc<Mutex<ProgressState>>,
    all_done: Condvar,
    pub callback: Arc<dyn ParallelCallback>,
    /// Coder chain template in decode order; the pipeline specializes it
    /// per job with the declared-size hint.
    pub methods: Vec<MethodConfig>,
    /// Byte interval between mid-item progress callbacks.
    pub progress_interval: u64,
}

impl Batch {
    pub(crate) fn new(
        jobs: Vec<Job>,
        progress: Arc<Mutex<ProgressState>>,
        callback: Arc<dyn ParallelCallback>,
        methods: Vec<MethodConfig>,
        progress_interval: u64,
    ) -> Arc<Self> {
        {
            let mut state = lock(&progress);
            state.counters = Counters {
                items_total: jobs.len() as u64,
                ..Counters::default()
            };
            state.started = Instant::now();
        }
        Arc::new(Batch {
            jobs: jobs.into_iter().map(Mutex::new).collect(),
            cursor: Mutex::new(0),
            progress,
            all_done: Condvar::new(),
            callback,
            methods,
            progress_interval,
        })
    }

    /// FIFO assignment: returns the next unassigned job index, if any.
    pub(crate) fn take_next(&self) -> Option<usize> {
        let mut cursor = lock(&self.cursor);
        if *cursor < self.jobs.len() {
            let index = *cursor;
            *cursor += 1;
            Some(index)
        } else {
            None
        }
    }

    fn mark_started(&self) {
        let mut state = lock(&self.progress);
        state.counters.items_in_progress += 1;
    }

    /// Publishes a job's terminal state and signals completion when it is the
    /// last one. The item-complete hook fires after the counters mutex is
    /// released, so callbacks may query statistics without deadlocking.
    fn notify_complete(&self, index: usize, status: JobStatus, bytes_in: u64, bytes_out: u64) {
        let finished = {
            let mut state = lock(&self.progress);
            let counters = &mut state.counters;
            counters.items_in_progress = counters.items_in_progress.saturating_sub(1);
            counters.items_terminated += 1;
            match status {
                JobStatus::Ok => {
                    counters.items_completed += 1;
                    counters.total_in += bytes_in;
                    counters.total_out += bytes_out;
                }
                JobStatus::Failed(_) => counters.items_failed += 1,
                // Cancelled jobs terminate without counting either way.
                JobStatus::Pending | JobStatus::Cancelled => {}
            }
            counters.items_terminated >= self.jobs.len() as u64
        };
        self.callback
            .on_item_complete(index, status, bytes_in, bytes_out);
        if finished {
            self.all_done.notify_all();
        }
    }

    /// Blocks until every job has reported a terminal status.
    pub(crate) fn wait_complete(&self) {
        let mut state = lock(&self.progress);
        while state.counters.items_terminated < self.jobs.len() as u64 {
            state = self
                .all_done
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// True if any job was short-circuited by cancellation.
    pub(crate) fn was_cancelled(&self) -> bool {
        self.jobs
            .iter()
            .any(|job| lock(job).status == JobStatus::Cancelled)
    }

    pub(crate) fn success_count(&self) -> usize {
        self.jobs.iter().filter(|job| lock(job).status.is_ok()).count()
    }
}

enum Command {
    Idle,
    Run { batch: Arc<Batch>, first_job: usize },
    Stop,
}

/// A worker's private start signal.
struct StartGate {
    slot: Mutex<Command>,
    signal: Condvar,
}

impl StartGate {
    fn new() -> Self {
        StartGate {
            slot: Mutex::new(Command::Idle),
            signal: Condvar::new(),
        }
    }

    fn post(&self, command: Command) {
        *lock(&self.slot) = command;
        self.signal.notify_one();
    }

    fn wait(&self) -> Command {
        let mut slot = lock(&self.slot);
        loop {
            match std::mem::replace(&mut *slot, Command::Idle) {
                Command::Idle => {
                    slot = self
                        .signal
                        .wait(slot)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                command => return command,
            }
        }
    }
}

struct WorkerHandle {
    gate: Arc<StartGate>,
    thread: Option<JoinHandle<()>>,
}

/// Fixed-size pool of long-lived compression workers.
pub(crate) struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Spawns `num_threads` workers, each parked on its start gate.
    pub(crate) fn new(num_threads: u32) -> Result<Self> {
        let mut workers = Vec::with_capacity(num_threads as usize);
        for worker_index in 0..num_threads {
            let gate = Arc::new(StartGate::new());
            let thread_gate = Arc::clone(&gate);
            let thread = std::thread::Builder::new()
                .name(format!("par7z-worker-{worker_index}"))
                .spawn(move || worker_loop(worker_index, thread_gate))
                .map_err(|e| {
                    Error::resource_exhausted(format!("failed to spawn worker thread: {e}"))
                })?;
            workers.push(WorkerHandle {
                gate,
                thread: Some(thread),
            });
        }
        debug!("worker pool started with {num_threads} threads");
        Ok(WorkerPool { workers })
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Assigns initial jobs `0..min(workers, jobs)` and releases those gates.
    pub(crate) fn start_batch(&self, batch: &Arc<Batch>) {
        for worker in &self.workers {
            match batch.take_next() {
                Some(first_job) => worker.gate.post(Command::Run {
                    batch: Arc::clone(batch),
                    first_job,
                }),
                None => break,
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.gate.post(Command::Stop);
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
        debug!("worker pool stopped");
    }
}

fn worker_loop(worker_index: u32, gate: Arc<StartGate>) {
    loop {
        match gate.wait() {
            Command::Stop => break,
            Command::Run { batch, first_job } => {
                let mut next = Some(first_job);
                while let Some(index) = next {
                    trace!("worker {worker_index} picked job {index}");
                    process_job(&batch, index);
                    next = batch.take_next();
                }
            }
            Command::Idle => {}
        }
    }
    trace!("worker {worker_index} exiting");
}

fn process_job(batch: &Batch, index: usize) {
    let mut job = lock(&batch.jobs[index]);
    batch.mark_started();

    if batch.callback.should_cancel() {
        job.status = JobStatus::Cancelled;
        job.completed = true;
        let (status, read) = (job.status, job.read_size);
        drop(job);
        batch.notify_complete(index, status, read, 0);
        return;
    }

    match pipeline::run(&mut job, batch) {
        Ok(()) => {
            job.status = JobStatus::Ok;
        }
        Err(error) => {
            job.status = JobStatus::Failed(error.kind());
            job.failure = Some(error.to_string());
            batch
                .callback
                .on_error(index, error.kind(), &error.to_string());
        }
    }
    job.completed = true;

    let (status, read, packed) = (job.status, job.read_size, job.packed_size());
    drop(job);
    batch.notify_complete(index, status, read, packed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Method;
    use crate::job::InputItem;
    use crate::progress::NoopCallback;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn test_batch(items: Vec<InputItem>, callback: Arc<dyn ParallelCallback>) -> Arc<Batch> {
        let jobs = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| Job::from_item(i, item))
            .collect();
        Batch::new(
            jobs,
            Arc::new(Mutex::new(ProgressState::new())),
            callback,
            vec![MethodConfig::new(Method::LZMA2).with_level(3)],
            64 * 1024,
        )
    }

    #[test]
    fn cursor_hands_out_indices_in_order() {
        let batch = test_batch(
            (0..4)
                .map(|i| InputItem::from_bytes(format!("f{i}"), vec![0u8; 16]))
                .collect(),
            Arc::new(NoopCallback),
        );
        // start_batch would consume the head; emulate two workers racing.
        assert_eq!(batch.take_next(), Some(0));
        assert_eq!(batch.take_next(), Some(1));
        assert_eq!(batch.take_next(), Some(2));
        assert_eq!(batch.take_next(), Some(3));
        assert_eq!(batch.take_next(), None);
    }

    #[test]
    fn pool_runs_every_job_exactly_once() {
        struct CountingCallback {
            completions: AtomicUsize,
        }
        impl ParallelCallback for CountingCallback {
            fn on_item_complete(&self, _: usize, _: JobStatus, _: u64, _: u64) {
                self.completions.fetch_add(1, Ordering::SeqCst);
            }
        }

        let callback = Arc::new(CountingCallback {
            completions: AtomicUsize::new(0),
        });
        let items = (0..9)
            .map(|i| InputItem::from_bytes(format!("f{i}"), vec![i as u8; 2048]))
            .collect();
        let batch = test_batch(items, callback.clone());

        let pool = WorkerPool::new(3).unwrap();
        pool.start_batch(&batch);
        batch.wait_complete();

        assert_eq!(callback.completions.load(Ordering::SeqCst), 9);
        assert_eq!(batch.success_count(), 9);
        for job in &batch.jobs {
            let job = lock(job);
            assert!(job.completed);
            assert_eq!(job.status, JobStatus::Ok);
        }
    }

    #[test]
    fn cancellation_short_circuits_remaining_jobs() {
        struct CancelAfterFirst {
            cancelled: AtomicBool,
        }
        impl ParallelCallback for CancelAfterFirst {
            fn should_cancel(&self) -> bool {
                self.cancelled.swap(true, Ordering::SeqCst)
            }
        }

        let items = (0..6)
            .map(|i| InputItem::from_bytes(format!("f{i}"), vec![1u8; 64]))
            .collect();
        let batch = test_batch(
            items,
            Arc::new(CancelAfterFirst {
                cancelled: AtomicBool::new(false),
            }),
        );

        let pool = WorkerPool::new(1).unwrap();
        pool.start_batch(&batch);
        batch.wait_complete();

        assert!(batch.was_cancelled());
        // Exactly one job ran before the flag flipped.
        assert_eq!(batch.success_count(), 1);
    }

    #[test]
    fn pool_survives_multiple_batches() {
        let pool = WorkerPool::new(2).unwrap();
        for round in 0..3 {
            let items = (0..4)
                .map(|i| InputItem::from_bytes(format!("r{round}-f{i}"), vec![i as u8; 512]))
                .collect();
            let batch = test_batch(items, Arc::new(NoopCallback));
            pool.start_batch(&batch);
            batch.wait_complete();
            assert_eq!(batch.success_count(), 4);
        }
    }
}
