//! Shared progress counters and derived statistics snapshots.

use std::time::Instant;

/// Monotonic counters mutated under the batch mutex.
#[derive(Debug, Default, Clone)]
pub(crate) struct Counters {
    pub items_total: u64,
    /// Successfully compressed items only; failures count separately.
    pub items_completed: u64,
    pub items_failed: u64,
    /// Every item that reached a terminal status, including failures and
    /// cancellations. Drives the completion signal.
    pub items_terminated: u64,
    pub items_in_progress: u64,
    pub total_in: u64,
    pub total_out: u64,
}

/// One consistent statistics snapshot.
///
/// All fields are read under the same lock, so ratios and rates computed from
/// a single snapshot agree with each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub items_total: u64,
    /// Items that reached a terminal status, including failed ones.
    pub items_completed: u64,
    pub items_failed: u64,
    pub items_in_progress: u64,
    /// Uncompressed bytes consumed by successful items.
    pub total_in: u64,
    /// Compressed bytes produced by successful items.
    pub total_out: u64,
    pub elapsed_ms: u64,
    pub bytes_per_sec: u64,
    /// Completed items per second, scaled by 100.
    pub files_per_sec_x100: u64,
    pub est_remaining_ms: u64,
    /// `total_out * 100 / total_in`; 0 while nothing has been read.
    pub ratio_x100: u64,
    pub active_threads: u64,
}

impl Counters {
    pub(crate) fn snapshot(&self, started: Instant) -> Statistics {
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let bytes_per_sec = if elapsed_ms > 0 {
            self.total_in * 1000 / elapsed_ms
        } else {
            0
        };
        let files_per_sec_x100 = if elapsed_ms > 0 {
            self.items_completed * 100_000 / elapsed_ms
        } else {
            0
        };
        let est_remaining_ms = if self.items_terminated > 0 {
            let remaining = self.items_total.saturating_sub(self.items_terminated);
            remaining * elapsed_ms / self.items_terminated
        } else {
            0
        };
        let ratio_x100 = if self.total_in > 0 {
            self.total_out * 100 / self.total_in
        } else {
            0
        };

        Statistics {
            items_total: self.items_total,
            items_completed: self.items_completed,
            items_failed: self.items_failed,
            items_in_progress: self.items_in_progress,
            total_in: self.total_in,
            total_out: self.total_out,
            elapsed_ms,
            bytes_per_sec,
            files_per_sec_x100,
            est_remaining_ms,
            ratio_x100,
            active_threads: self.items_in_progress,
        }
    }
}
