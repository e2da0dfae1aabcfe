//! Parallel multi-stream 7z compressor.
//!
//! `par7z` compresses a set of independent input streams concurrently across a
//! worker pool and assembles the results into a single standard 7z container.
//! Each stream is compressed on its own worker with its own codec chain, so
//! archives with many members scale across cores; the produced archive is
//! readable by any conforming 7z implementation.
//!
//! # Example
//!
//! ```no_run
//! use std::io::Cursor;
//! use par7z::{InputItem, ParallelArchiver};
//!
//! let mut archiver = ParallelArchiver::new();
//! archiver.set_num_threads(4).set_level(5);
//!
//! let items = vec![
//!     InputItem::from_bytes("a.bin", b"first stream".to_vec()),
//!     InputItem::from_bytes("b.bin", b"second stream".to_vec()),
//! ];
//!
//! let mut archive = Cursor::new(Vec::new());
//! let report = archiver.compress_multiple(items, &mut archive)?;
//! println!("{} items archived", report.statistics.items_completed);
//! # Ok::<(), par7z::Error>(())
//! ```
//!
//! # Layouts
//!
//! The default layout is *parallel*: one 7z folder per input stream, which is
//! what makes concurrent compression possible. Solid mode
//! ([`ParallelArchiver::set_solid`]) trades parallelism for ratio by
//! concatenating the inputs into one folder before compressing.
//!
//! Multi-volume output ([`ParallelArchiver::compress_to_volumes`]) splits the
//! archive byte stream across `<prefix>.001`, `<prefix>.002`, … files.

mod archive;
mod archiver;
mod bitset;
pub mod codec;
mod digest;
mod error;
mod job;
mod pipeline;
mod pool;
mod progress;
mod queue;
mod stats;
mod writer;

use std::io::Write;

pub use archive::ArchiveEntry;
pub use archiver::{CompressReport, CompressStatus, ParallelArchiver};
pub use codec::{Method, MethodConfig};
pub use error::{Error, ErrorKind, Result};
pub use job::{InputItem, JobStatus};
pub use progress::{NoopCallback, ParallelCallback};
pub use queue::StreamQueue;
pub use stats::Statistics;
pub use writer::{VolumeConfig, VolumeMetadata, VolumeWriter};

/// I/O copy buffer size used by the compression pipelines.
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Little-endian fixed-width write helpers for header emission.
pub(crate) trait ByteWriter: Write {
    #[inline]
    fn write_u8(&mut self, value: u8) -> std::io::Result<()> {
        self.write_all(&[value])
    }

    #[inline]
    fn write_u32(&mut self, value: u32) -> std::io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    #[inline]
    fn write_u64(&mut self, value: u64) -> std::io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }
}

impl<W: Write + ?Sized> ByteWriter for W {}
