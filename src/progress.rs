//! Progress, cancellation, and look-ahead callbacks.

use crate::error::ErrorKind;
use crate::job::{InputItem, JobStatus};

/// Observer for a running compression call.
///
/// Methods are invoked from worker threads, possibly concurrently, so
/// implementations must be internally synchronized (`Send + Sync`). Every
/// method has a no-op default; implement only what you need.
pub trait ParallelCallback: Send + Sync {
    /// An item's compression is about to start.
    fn on_item_start(&self, _index: usize, _name: &str) {}

    /// Best-effort mid-item progress. May be invoked zero times for small
    /// items; `bytes_out` is 0 until the item's encoder has finished.
    fn on_item_progress(&self, _index: usize, _bytes_in: u64, _bytes_out: u64) {}

    /// An item reached a terminal status.
    fn on_item_complete(&self, _index: usize, _status: JobStatus, _bytes_in: u64, _bytes_out: u64) {
    }

    /// A failure was recorded, either for one item or for the whole call.
    fn on_error(&self, _index: usize, _kind: ErrorKind, _message: &str) {}

    /// Polled before each job starts; return `true` to cancel the call.
    fn should_cancel(&self) -> bool {
        false
    }

    /// Look-ahead extension: extra items appended to the batch.
    ///
    /// Drained exactly once per call, after the job vector is built from the
    /// explicit items and before the first worker assignment. `cursor` is the
    /// index the first returned item will receive; at most `max` items are
    /// accepted.
    fn next_items(&self, _cursor: usize, _max: usize) -> Vec<InputItem> {
        Vec::new()
    }
}

/// Callback that observes nothing and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

impl ParallelCallback for NoopCallback {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        completions: AtomicUsize,
    }

    impl ParallelCallback for Counting {
        fn on_item_complete(&self, _: usize, _: JobStatus, _: u64, _: u64) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn defaults_are_noops() {
        let cb = NoopCallback;
        cb.on_item_start(0, "x");
        cb.on_error(0, ErrorKind::CodecFailure, "m");
        assert!(!cb.should_cancel());
        assert!(cb.next_items(0, 8).is_empty());
    }

    #[test]
    fn custom_hooks_are_invoked() {
        let cb = Counting {
            completions: AtomicUsize::new(0),
        };
        cb.on_item_complete(1, JobStatus::Ok, 10, 5);
        assert_eq!(cb.completions.load(Ordering::SeqCst), 1);
    }
}
