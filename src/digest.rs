//! Incremental CRC-32 over a pull-based byte source.

use std::io::Read;

use crc32fast::Hasher;

/// A reader wrapper that digests everything read through it.
///
/// The pipeline wraps each job's input with this so the uncompressed CRC and
/// the byte count fall out of the normal copy loop.
pub(crate) struct CrcReader<R> {
    inner: R,
    hasher: Hasher,
    read_count: u64,
}

impl<R: Read> CrcReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        CrcReader {
            inner,
            hasher: Hasher::new(),
            read_count: 0,
        }
    }

    /// Total bytes read so far.
    pub(crate) fn read_count(&self) -> u64 {
        self.read_count
    }

    /// Finalizes and returns the CRC-32 of all bytes read.
    pub(crate) fn crc_value(&mut self) -> u32 {
        let hasher = std::mem::replace(&mut self.hasher, Hasher::new());
        hasher.finalize()
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.read_count += n as u64;
        }
        Ok(n)
    }
}

/// A writer wrapper digesting and counting everything written through it.
///
/// The pipeline puts this in front of the packed sink; the resulting CRC is
/// the pack-stream digest a 7z reader validates.
pub(crate) struct CrcWriter<W> {
    inner: W,
    hasher: Hasher,
    written: u64,
}

impl<W: std::io::Write> CrcWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        CrcWriter {
            inner,
            hasher: Hasher::new(),
            written: 0,
        }
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    pub(crate) fn crc_value(&mut self) -> u32 {
        let hasher = std::mem::replace(&mut self.hasher, Hasher::new());
        hasher.finalize()
    }
}

impl<W: std::io::Write> std::io::Write for CrcWriter<W> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
