use std::{cell::Cell, io::Write, rc::Rc};

/// A writer wrapper tracking the number of bytes written, observable through
/// a shared counter handle.
///
/// The chain builder threads one of these between coder stages so the header
/// can record each stage's decode-direction output size after encoding.
pub(crate) struct CountingWriter<W> {
    inner: W,
    counting: Rc<Cell<usize>>,
    written_bytes: usize,
}

impl<W> CountingWriter<W> {
    #[inline]
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner,
            counting: Rc::new(Cell::new(0)),
            written_bytes: 0,
        }
    }

    /// Handle that observes the byte count after the writer is consumed.
    #[inline]
    pub(crate) fn counting(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.counting)
    }
}

impl<W: Write> Write for CountingWriter<W> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let len = self.inner.write(buf)?;
        self.written_bytes += len;
        self.counting.set(self.written_bytes);
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_tracks_written_bytes() {
        let mut sink = Vec::new();
        let mut writer = CountingWriter::new(&mut sink);
        let counter = writer.counting();
        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"abc").unwrap();
        assert_eq!(counter.get(), 13);
        assert_eq!(sink.len(), 13);
    }

    #[test]
    fn empty_writes_pass_through() {
        let mut sink = Vec::new();
        let mut writer = CountingWriter::new(&mut sink);
        let counter = writer.counting();
        assert_eq!(writer.write(&[]).unwrap(), 0);
        assert_eq!(counter.get(), 0);
    }
}
