//! Multi-volume output support.
//!
//! [`VolumeWriter`] presents one write sink to the assembler while producing
//! `<prefix>.001`, `<prefix>.002`, … files, each up to the configured byte
//! budget. Splits happen at exact byte boundaries; 7z volumes are plain
//! partitions of the archive byte stream, so concatenating the volume files
//! reproduces the single-file archive.

use std::{
    fs::File,
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::debug;

/// Volume size budget and output naming.
#[derive(Debug, Clone)]
pub struct VolumeConfig {
    /// Maximum size of each volume in bytes.
    pub volume_size: u64,
    /// Base output path; volume numbers are appended as `.NNN`.
    pub prefix: PathBuf,
}

impl VolumeConfig {
    pub fn new(prefix: impl AsRef<Path>, volume_size: u64) -> Self {
        Self {
            volume_size,
            prefix: prefix.as_ref().to_path_buf(),
        }
    }

    /// Path of a volume number, zero-padded to three digits; numbers past
    /// 999 simply widen.
    pub fn volume_path(&self, volume_number: u32) -> PathBuf {
        PathBuf::from(format!("{}.{:03}", self.prefix.display(), volume_number))
    }
}

/// A write sink that rolls to the next numbered volume file as the byte
/// budget of the current one is consumed.
///
/// Seeking works across volume boundaries, which the assembler relies on to
/// patch the start header in volume 1 after the trailing header is written.
pub struct VolumeWriter {
    config: VolumeConfig,
    current_volume: u32,
    current_file: File,
    current_volume_bytes: u64,
    total_bytes: u64,
    /// Cumulative byte position at the start of each volume; first entry 0.
    volume_boundaries: Vec<u64>,
}

impl VolumeWriter {
    pub fn new(config: VolumeConfig) -> io::Result<Self> {
        let first_volume_path = config.volume_path(1);
        if let Some(parent) = first_volume_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&first_volume_path)?;

        Ok(Self {
            config,
            current_volume: 1,
            current_file: file,
            current_volume_bytes: 0,
            total_bytes: 0,
            volume_boundaries: vec![0],
        })
    }

    pub fn current_volume(&self) -> u32 {
        self.current_volume
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn roll_to_next_volume(&mut self) -> io::Result<()> {
        self.current_file.flush()?;
        self.current_volume += 1;
        self.volume_boundaries.push(self.total_bytes);

        let next_volume_path = self.config.volume_path(self.current_volume);
        debug!("rolling to volume {}", next_volume_path.display());
        self.current_file = File::create(&next_volume_path)?;
        self.current_volume_bytes = 0;
        Ok(())
    }

    /// Flushes and finalizes the volume count.
    pub fn finish(mut self) -> io::Result<VolumeMetadata> {
        self.current_file.flush()?;
        Ok(VolumeMetadata {
            volume_count: self.current_volume,
            total_bytes: self.total_bytes,
            volume_paths: (1..=self.current_volume)
                .map(|n| self.config.volume_path(n))
                .collect(),
        })
    }
}

impl Write for VolumeWriter {
    /// May return a short write at a volume boundary; no write straddles two
    /// volumes. `write_all` drives the remainder into the next volume.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self
            .config
            .volume_size
            .saturating_sub(self.current_volume_bytes);
        if remaining == 0 {
            self.roll_to_next_volume()?;
            return self.write(buf);
        }

        let to_write = buf.len().min(remaining as usize);
        let written = self.current_file.write(&buf[..to_write])?;
        self.current_volume_bytes += written as u64;
        // Writes past previously-written bytes extend the stream; overwrites
        // after a seek do not.
        let position =
            self.volume_boundaries[(self.current_volume - 1) as usize] + self.current_volume_bytes;
        self.total_bytes = self.total_bytes.max(position);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current_file.flush()
    }
}

impl Seek for VolumeWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(abs_pos) => {
                let target_volume = self
                    .volume_boundaries
                    .iter()
                    .rposition(|boundary| abs_pos >= *boundary)
                    .map(|idx| idx as u32 + 1)
                    .unwrap_or(1);

                if target_volume != self.current_volume {
                    self.current_file.flush()?;
                    let target_path = self.config.volume_path(target_volume);
                    self.current_file = File::options().read(true).write(true).open(target_path)?;
                    self.current_volume = target_volume;
                }

                let volume_start = self.volume_boundaries[(target_volume - 1) as usize];
                let offset_in_volume = abs_pos - volume_start;
                self.current_file.seek(SeekFrom::Start(offset_in_volume))?;
                self.current_volume_bytes = offset_in_volume;
                Ok(abs_pos)
            }
            SeekFrom::Current(offset) => {
                let current_abs = self.volume_boundaries[(self.current_volume - 1) as usize]
                    + self.current_volume_bytes;
                let new_abs = if offset >= 0 {
                    current_abs.saturating_add(offset as u64)
                } else {
                    current_abs.saturating_sub(offset.unsigned_abs())
                };
                self.seek(SeekFrom::Start(new_abs))
            }
            SeekFrom::End(offset) => {
                let end = self.total_bytes;
                let new_abs = if offset >= 0 {
                    end.saturating_add(offset as u64)
                } else {
                    end.saturating_sub(offset.unsigned_abs())
                };
                self.seek(SeekFrom::Start(new_abs))
            }
        }
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.volume_boundaries[(self.current_volume - 1) as usize] + self.current_volume_bytes)
    }
}

/// Summary of the volume files produced by a finished [`VolumeWriter`].
#[derive(Debug, Clone)]
pub struct VolumeMetadata {
    pub volume_count: u32,
    pub total_bytes: u64,
    pub volume_paths: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn volume_naming_is_three_digit_padded() {
        let config = VolumeConfig::new("/data/out", 1024);
        assert_eq!(config.volume_path(1), PathBuf::from("/data/out.001"));
        assert_eq!(config.volume_path(42), PathBuf::from("/data/out.042"));
        assert_eq!(config.volume_path(999), PathBuf::from("/data/out.999"));
        assert_eq!(config.volume_path(1000), PathBuf::from("/data/out.1000"));
    }

    #[test]
    fn writes_split_exactly_at_the_budget() {
        let dir = tempdir().unwrap();
        let config = VolumeConfig::new(dir.path().join("arch"), 10);
        let mut writer = VolumeWriter::new(config).unwrap();

        writer.write_all(b"0123456789ABCDEFGHIJXY").unwrap();
        let metadata = writer.finish().unwrap();

        assert_eq!(metadata.volume_count, 3);
        assert_eq!(metadata.total_bytes, 22);

        let mut contents = Vec::new();
        for path in &metadata.volume_paths {
            File::open(path)
                .unwrap()
                .read_to_end(&mut contents)
                .unwrap();
        }
        assert_eq!(contents, b"0123456789ABCDEFGHIJXY");

        let first_len = std::fs::metadata(&metadata.volume_paths[0]).unwrap().len();
        let last_len = std::fs::metadata(&metadata.volume_paths[2]).unwrap().len();
        assert_eq!(first_len, 10);
        assert_eq!(last_len, 2);
    }

    #[test]
    fn seek_back_into_the_first_volume_patches_in_place() {
        let dir = tempdir().unwrap();
        let config = VolumeConfig::new(dir.path().join("arch"), 8);
        let mut writer = VolumeWriter::new(config).unwrap();

        writer.write_all(b"AAAAAAAABBBBBBBBCCCC").unwrap();
        assert_eq!(writer.current_volume(), 3);

        writer.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(writer.current_volume(), 1);
        writer.write_all(b"ZZ").unwrap();

        let metadata = writer.finish().unwrap();
        assert_eq!(metadata.total_bytes, 20);

        let mut first = Vec::new();
        File::open(&metadata.volume_paths[0])
            .unwrap()
            .read_to_end(&mut first)
            .unwrap();
        assert_eq!(first, b"ZZAAAAAA");
    }

    #[test]
    fn stream_position_spans_volumes() {
        let dir = tempdir().unwrap();
        let config = VolumeConfig::new(dir.path().join("arch"), 4);
        let mut writer = VolumeWriter::new(config).unwrap();

        writer.write_all(b"123456789").unwrap();
        assert_eq!(writer.stream_position().unwrap(), 9);

        writer.seek(SeekFrom::Start(5)).unwrap();
        assert_eq!(writer.current_volume(), 2);
        assert_eq!(writer.stream_position().unwrap(), 5);
    }
}
