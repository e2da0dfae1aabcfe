//! Input items and their promotion to units of parallel work.

use std::io::{Cursor, Read};
use std::time::SystemTime;

use nt_time::FileTime;

use crate::codec::Method;
use crate::error::ErrorKind;

/// A caller-supplied stream to be archived.
pub struct InputItem {
    pub(crate) source: Box<dyn Read + Send>,
    /// Path-like entry name; may be empty.
    pub name: String,
    /// Declared input size in bytes; 0 means unknown (streaming).
    pub declared_size: u64,
    /// Windows attribute bits.
    pub attributes: u32,
    /// Modification time in Windows FILETIME ticks (100 ns since 1601-01-01).
    pub modified: u64,
    /// Opaque pass-through value for the caller's own bookkeeping.
    pub cookie: u64,
}

impl InputItem {
    /// Wraps an arbitrary reader. Pass `declared_size = 0` when unknown.
    pub fn from_reader<R: Read + Send + 'static>(
        name: impl Into<String>,
        source: R,
        declared_size: u64,
    ) -> Self {
        InputItem {
            source: Box::new(source),
            name: name.into(),
            declared_size,
            attributes: 0,
            modified: 0,
            cookie: 0,
        }
    }

    /// Wraps an in-memory buffer; the declared size is the buffer length.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let declared_size = data.len() as u64;
        Self::from_reader(name, Cursor::new(data), declared_size)
    }

    /// Sets the modification time from a wall-clock timestamp.
    ///
    /// Times before the FILETIME epoch are recorded as 0 (undefined).
    pub fn modified_at(mut self, time: SystemTime) -> Self {
        self.modified = FileTime::try_from(time).map(|t| t.to_raw()).unwrap_or(0);
        self
    }

    pub fn with_attributes(mut self, attributes: u32) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }
}

impl std::fmt::Debug for InputItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputItem")
            .field("name", &self.name)
            .field("declared_size", &self.declared_size)
            .field("attributes", &self.attributes)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// Terminal state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Not yet processed.
    Pending,
    /// Compressed successfully; the output slots are valid.
    Ok,
    /// The pipeline failed; the job is excluded from the archive.
    Failed(ErrorKind),
    /// Skipped because cancellation was requested before it started.
    Cancelled,
}

impl JobStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, JobStatus::Ok)
    }
}

/// An [`InputItem`] promoted to an execution unit.
///
/// Exactly one worker mutates a job between pickup and its completion
/// notification; afterwards the assembler reads it in index order.
pub(crate) struct Job {
    pub index: usize,
    pub source: Option<Box<dyn Read + Send>>,
    pub name: String,
    pub declared_size: u64,
    pub attributes: u32,
    pub modified: u64,
    #[allow(dead_code)]
    pub cookie: u64,

    /// Compressed payload, complete once the job status is `Ok`.
    pub packed: Vec<u8>,
    /// CRC-32 of the packed payload, the value a 7z reader validates.
    pub packed_crc: u32,
    /// Bytes actually read from the source.
    pub read_size: u64,
    /// CRC-32 of the uncompressed bytes.
    pub digest: u32,
    pub digest_defined: bool,
    /// Captured coder chain in decode order, with per-stage unpack sizes.
    pub coders: Vec<CompletedCoder>,
    pub status: JobStatus,
    /// Once set, never cleared.
    pub completed: bool,
    /// Human-readable failure context for the error hook.
    pub failure: Option<String>,
}

/// A chain stage with its captured properties and final unpack size.
pub(crate) struct CompletedCoder {
    pub method: Method,
    /// Captured coder-properties blob; empty when the decoder needs none.
    pub properties: Vec<u8>,
    /// Decode-direction output size of this stage.
    pub unpack_size: u64,
}

impl Job {
    pub(crate) fn from_item(index: usize, item: InputItem) -> Self {
        Job {
            index,
            source: Some(item.source),
            name: item.name,
            declared_size: item.declared_size,
            attributes: item.attributes,
            modified: item.modified,
            cookie: item.cookie,
            packed: Vec::new(),
            packed_crc: 0,
            read_size: 0,
            digest: 0,
            digest_defined: false,
            coders: Vec::new(),
            status: JobStatus::Pending,
            completed: false,
            failure: None,
        }
    }

    pub(crate) fn packed_size(&self) -> u64 {
        self.packed.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_declares_length() {
        let item = InputItem::from_bytes("a.txt", vec![1, 2, 3]);
        assert_eq!(item.declared_size, 3);
        assert_eq!(item.name, "a.txt");
    }

    #[test]
    fn modified_at_converts_to_filetime_ticks() {
        let item = InputItem::from_bytes("t", Vec::new()).modified_at(SystemTime::UNIX_EPOCH);
        // The FILETIME value of 1970-01-01T00:00:00Z.
        assert_eq!(item.modified, 116_444_736_000_000_000);
    }

    #[test]
    fn job_starts_pending_and_incomplete() {
        let job = Job::from_item(2, InputItem::from_bytes("x", vec![0; 8]));
        assert_eq!(job.index, 2);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.completed);
        assert!(!job.digest_defined);
    }
}
