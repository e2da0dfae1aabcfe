//! Archive assembly: packed payload emission and 7z header encoding.
//!
//! The assembler consumes completed jobs in index order, streams their packed
//! payloads to the output, stages the header database (pack info, folders,
//! substreams, files info), and finishes by writing the always-compressed
//! trailing header and back-patching the start header.

pub(crate) mod counting_writer;
mod pack_info;
mod unpack_info;
mod volume;

use std::io::{Seek, Write};

use crc32fast::Hasher;
use log::debug;

use crate::archive::{
    ArchiveEntry, K_EMPTY_FILE, K_EMPTY_STREAM, K_ENCODED_HEADER, K_END, K_FILES_INFO, K_HEADER,
    K_MAIN_STREAMS_INFO, K_M_TIME, K_NAME, K_WIN_ATTRIBUTES, SEVEN_Z_SIGNATURE,
    SIGNATURE_HEADER_SIZE,
};
use crate::bitset::{write_bit_set, BitSet};
use crate::codec::encoder::build_chain;
use crate::codec::{Method, MethodConfig};
use crate::digest::CrcWriter;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::ByteWriter;
use pack_info::PackInfo;
use unpack_info::{Coder, UnpackInfo};

pub use volume::{VolumeConfig, VolumeMetadata, VolumeWriter};

/// Writes a 7z archive from completed compression jobs.
pub(crate) struct ArchiveAssembler<W: Write + Seek> {
    output: W,
    files: Vec<ArchiveEntry>,
    pack_info: PackInfo,
    unpack_info: UnpackInfo,
    /// Coder chain for the encoded trailing header, in decode order.
    header_methods: Vec<MethodConfig>,
}

impl<W: Write + Seek> ArchiveAssembler<W> {
    /// Positions the output past the start header, which is written last.
    pub(crate) fn new(mut output: W, header_methods: Vec<MethodConfig>) -> Result<Self> {
        output
            .seek(std::io::SeekFrom::Start(SIGNATURE_HEADER_SIZE))
            .map_err(|e| Error::sink(e, "seek past start header"))?;
        Ok(Self {
            output,
            files: Vec::new(),
            pack_info: PackInfo::default(),
            unpack_info: UnpackInfo::default(),
            header_methods,
        })
    }

    /// Appends one successful job as its own folder.
    ///
    /// Jobs that read zero bytes become stream-less entries instead; their
    /// packed payload (an encoder's rendition of nothing) is discarded.
    pub(crate) fn append_job(&mut self, job: &Job) -> Result<()> {
        debug_assert!(job.completed && job.status.is_ok());
        if job.read_size == 0 {
            self.files.push(entry_from_job(job, false));
            return Ok(());
        }

        self.output
            .write_all(&job.packed)
            .map_err(|e| Error::sink(e, format!("write packed payload of {}", job.name)))?;

        self.pack_info.add_stream(job.packed_size(), job.packed_crc);
        self.unpack_info.add(
            job.coders
                .iter()
                .map(|c| Coder {
                    method: c.method,
                    properties: c.properties.clone(),
                })
                .collect(),
            job.coders.iter().map(|c| c.unpack_size).collect(),
            job.digest,
        );
        self.files.push(entry_from_job(job, true));
        Ok(())
    }

    /// Appends a zero-byte item as a stream-less entry.
    pub(crate) fn append_empty_entry(&mut self, mut entry: ArchiveEntry) {
        entry.has_stream = false;
        entry.size = 0;
        entry.has_crc = false;
        self.files.push(entry);
    }

    /// Compresses `segments` as one solid folder holding all `entries` and
    /// returns the packed substream size.
    ///
    /// Sizes and digests on the entries are filled in here; callers provide
    /// names, timestamps, and attributes. Segments must be non-empty —
    /// zero-byte items go through [`Self::append_empty_entry`] instead.
    pub(crate) fn push_solid_block(
        &mut self,
        mut entries: Vec<ArchiveEntry>,
        segments: Vec<Vec<u8>>,
        methods: &[MethodConfig],
    ) -> Result<u64> {
        debug_assert_eq!(entries.len(), segments.len());
        let total_size: u64 = segments.iter().map(|s| s.len() as u64).sum();

        let mut methods = methods.to_vec();
        if let Some(data) = methods.last_mut() {
            data.size_hint = Some(total_size);
        }

        let mut substream_sizes = Vec::with_capacity(segments.len());
        let mut substream_crcs = Vec::with_capacity(segments.len());
        let mut total_hasher = Hasher::new();

        let (packed_size, packed_crc, specs) = {
            let mut sink = CrcWriter::new(&mut self.output);
            let (specs, mut chain) = build_chain(&methods, &mut sink)?;

            for (index, (entry, segment)) in entries.iter_mut().zip(&segments).enumerate() {
                chain
                    .write_all(segment)
                    .map_err(|e| Error::codec(index, e))?;
                total_hasher.update(segment);

                entry.has_stream = true;
                entry.size = segment.len() as u64;
                entry.crc = crc32fast::hash(segment);
                entry.has_crc = true;
                substream_sizes.push(entry.size);
                substream_crcs.push(entry.crc);
            }
            chain.finish().map_err(|e| Error::codec(0, e))?;
            (sink.written(), sink.crc_value(), specs)
        };

        self.pack_info.add_stream(packed_size, packed_crc);
        self.unpack_info.add_multiple(
            specs
                .iter()
                .map(|spec| Coder {
                    method: spec.method,
                    properties: spec.properties.clone(),
                })
                .collect(),
            specs
                .iter()
                .map(|spec| {
                    spec.counter
                        .as_ref()
                        .map(|counter| counter.get() as u64)
                        .unwrap_or(total_size)
                })
                .collect(),
            total_hasher.finalize(),
            substream_sizes,
            substream_crcs,
        );
        self.files.extend(entries);
        Ok(packed_size)
    }

    /// Writes the trailing header and back-patches the start header.
    pub(crate) fn finish(mut self) -> std::io::Result<W> {
        let mut header: Vec<u8> = Vec::with_capacity(64 * 1024);
        self.write_encoded_header(&mut header)?;
        let header_pos = self.output.stream_position()?;
        self.output.write_all(&header)?;
        let header_crc = crc32fast::hash(&header);

        let mut start_header = [0u8; SIGNATURE_HEADER_SIZE as usize];
        {
            let mut cursor = start_header.as_mut_slice();
            cursor.write_all(SEVEN_Z_SIGNATURE)?;
            // format version 0.04
            cursor.write_u8(0)?;
            cursor.write_u8(4)?;
            // start-header CRC is patched below, once the rest is in place
            cursor.write_u32(0)?;
            cursor.write_u64(header_pos - SIGNATURE_HEADER_SIZE)?;
            cursor.write_u64(0xFFFF_FFFF & header.len() as u64)?;
            cursor.write_u32(header_crc)?;
        }
        let start_crc = crc32fast::hash(&start_header[12..]);
        start_header[8..12].copy_from_slice(&start_crc.to_le_bytes());

        self.output.seek(std::io::SeekFrom::Start(0))?;
        self.output.write_all(&start_header)?;
        self.output.flush()?;
        debug!(
            "archive finished: {} files, header at {header_pos}",
            self.files.len()
        );
        Ok(self.output)
    }

    fn write_header<H: Write>(&mut self, header: &mut H) -> std::io::Result<()> {
        header.write_u8(K_HEADER)?;
        header.write_u8(K_MAIN_STREAMS_INFO)?;
        self.write_streams_info(header)?;
        self.write_files_info(header)?;
        header.write_u8(K_END)?;
        Ok(())
    }

    fn write_streams_info<H: Write>(&mut self, header: &mut H) -> std::io::Result<()> {
        if self.pack_info.len() > 0 {
            self.pack_info.write_to(header)?;
            self.unpack_info.write_to(header)?;
        }
        self.unpack_info.write_substreams(header)?;
        header.write_u8(K_END)?;
        Ok(())
    }

    /// Compresses the raw header through the header chain and emits a
    /// `kEncodedHeader` record pointing at it.
    ///
    /// Falls back to the raw header when compression does not pay, unless the
    /// chain encrypts — an encrypted header may never be written in the
    /// clear.
    fn write_encoded_header<H: Write>(&mut self, header: &mut H) -> std::io::Result<()> {
        let mut raw_header = Vec::with_capacity(64 * 1024);
        self.write_header(&mut raw_header)?;
        let raw_crc = crc32fast::hash(&raw_header);

        let position = self.output.stream_position()?;
        let mut pack_info = PackInfo::default();
        pack_info.pos = position - SIGNATURE_HEADER_SIZE;

        let encrypted = self
            .header_methods
            .iter()
            .any(|m| m.method == Method::AES256_SHA256);

        let mut encoded = Vec::with_capacity(raw_header.len() / 2);
        let (packed_size, packed_crc, specs) = {
            let mut sink = CrcWriter::new(&mut encoded);
            let (specs, mut chain) =
                build_chain(&self.header_methods, &mut sink).map_err(std::io::Error::other)?;
            chain.write_all(&raw_header)?;
            chain.finish()?;
            (sink.written(), sink.crc_value(), specs)
        };

        if !encrypted && packed_size + 20 >= raw_header.len() as u64 {
            // Compression made it worse; store the header as-is.
            header.write_all(&raw_header)?;
            return Ok(());
        }
        self.output.write_all(&encoded)?;

        pack_info.add_stream(packed_size, packed_crc);

        let mut unpack_info = UnpackInfo::default();
        unpack_info.add(
            specs
                .iter()
                .map(|spec| Coder {
                    method: spec.method,
                    properties: spec.properties.clone(),
                })
                .collect(),
            specs
                .iter()
                .map(|spec| {
                    spec.counter
                        .as_ref()
                        .map(|counter| counter.get() as u64)
                        .unwrap_or(raw_header.len() as u64)
                })
                .collect(),
            raw_crc,
        );

        header.write_u8(K_ENCODED_HEADER)?;
        pack_info.write_to(header)?;
        unpack_info.write_to(header)?;
        unpack_info.write_substreams(header)?;
        header.write_u8(K_END)?;
        Ok(())
    }

    fn write_files_info<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        header.write_u8(K_FILES_INFO)?;
        write_number(header, self.files.len() as u64)?;
        self.write_file_empty_streams(header)?;
        self.write_file_empty_files(header)?;
        self.write_file_names(header)?;
        self.write_file_mtimes(header)?;
        self.write_file_attributes(header)?;
        header.write_u8(K_END)?;
        Ok(())
    }

    fn write_file_empty_streams<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        if self.files.iter().all(|entry| entry.has_stream) {
            return Ok(());
        }
        header.write_u8(K_EMPTY_STREAM)?;
        let mut bits = BitSet::with_capacity(self.files.len());
        for (i, entry) in self.files.iter().enumerate() {
            if !entry.has_stream {
                bits.insert(i);
            }
        }
        let mut temp: Vec<u8> = Vec::with_capacity(bits.len() / 8 + 1);
        write_bit_set(&mut temp, &bits)?;
        write_number(header, temp.len() as u64)?;
        header.write_all(&temp)?;
        Ok(())
    }

    /// Every stream-less entry here is a zero-byte file (there are no
    /// directory entries), so the empty-file bits are all set.
    fn write_file_empty_files<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        let empty_count = self.files.iter().filter(|entry| !entry.has_stream).count();
        if empty_count == 0 {
            return Ok(());
        }
        header.write_u8(K_EMPTY_FILE)?;
        let mut bits = BitSet::with_capacity(empty_count);
        for i in 0..empty_count {
            bits.insert(i);
        }
        let mut temp: Vec<u8> = Vec::with_capacity(bits.len() / 8 + 1);
        write_bit_set(&mut temp, &bits)?;
        write_number(header, temp.len() as u64)?;
        header.write_all(&temp)?;
        Ok(())
    }

    fn write_file_names<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        header.write_u8(K_NAME)?;
        let mut temp: Vec<u8> = Vec::with_capacity(128);
        temp.write_u8(0)?; // names are inline, not external
        for file in &self.files {
            for unit in file.name.encode_utf16() {
                temp.write_all(&unit.to_le_bytes())?;
            }
            temp.write_all(&[0u8; 2])?;
        }
        write_number(header, temp.len() as u64)?;
        header.write_all(&temp)?;
        Ok(())
    }

    fn write_file_mtimes<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        let num = self.files.iter().filter(|entry| entry.has_mtime).count();
        if num == 0 {
            return Ok(());
        }
        header.write_u8(K_M_TIME)?;
        let mut temp: Vec<u8> = Vec::with_capacity(2 + num * 8);
        if num != self.files.len() {
            temp.write_u8(0)?;
            let mut defined = BitSet::with_capacity(self.files.len());
            for (i, entry) in self.files.iter().enumerate() {
                if entry.has_mtime {
                    defined.insert(i);
                }
            }
            write_bit_set(&mut temp, &defined)?;
        } else {
            temp.write_u8(1)?;
        }
        temp.write_u8(0)?; // inline
        for entry in self.files.iter().filter(|entry| entry.has_mtime) {
            temp.write_u64(entry.mtime)?;
        }
        write_number(header, temp.len() as u64)?;
        header.write_all(&temp)?;
        Ok(())
    }

    fn write_file_attributes<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        let num = self
            .files
            .iter()
            .filter(|entry| entry.has_attributes)
            .count();
        if num == 0 {
            return Ok(());
        }
        header.write_u8(K_WIN_ATTRIBUTES)?;
        let mut temp: Vec<u8> = Vec::with_capacity(2 + num * 4);
        if num != self.files.len() {
            temp.write_u8(0)?;
            let mut defined = BitSet::with_capacity(self.files.len());
            for (i, entry) in self.files.iter().enumerate() {
                if entry.has_attributes {
                    defined.insert(i);
                }
            }
            write_bit_set(&mut temp, &defined)?;
        } else {
            temp.write_u8(1)?;
        }
        temp.write_u8(0)?; // inline
        for entry in self.files.iter().filter(|entry| entry.has_attributes) {
            temp.write_u32(entry.attributes)?;
        }
        write_number(header, temp.len() as u64)?;
        header.write_all(&temp)?;
        Ok(())
    }
}

fn entry_from_job(job: &Job, has_stream: bool) -> ArchiveEntry {
    ArchiveEntry {
        name: job.name.clone(),
        has_stream,
        size: job.read_size,
        crc: job.digest,
        has_crc: has_stream && job.digest_defined,
        mtime: job.modified,
        has_mtime: true,
        attributes: job.attributes,
        has_attributes: job.attributes != 0,
    }
}

/// 7z variable-length number encoding.
pub(crate) fn write_number<W: Write>(header: &mut W, mut value: u64) -> std::io::Result<()> {
    let mut first = 0u64;
    let mut mask = 0x80u64;
    let mut i = 0;
    while i < 8 {
        if value < (1u64 << (7 * (i + 1))) {
            first |= value >> (8 * i);
            break;
        }
        first |= mask;
        mask >>= 1;
        i += 1;
    }
    header.write_u8((first & 0xFF) as u8)?;
    while i > 0 {
        header.write_u8((value & 0xFF) as u8)?;
        value >>= 8;
        i -= 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encoded(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_number(&mut out, value).unwrap();
        out
    }

    #[test]
    fn number_encoding_boundaries() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(0x7F), vec![0x7F]);
        assert_eq!(encoded(0x80), vec![0x80, 0x80]);
        assert_eq!(encoded(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(encoded(0x4000), vec![0xC0, 0x00, 0x40]);
        assert_eq!(
            encoded(u64::MAX),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn finished_archive_carries_signature_and_version() {
        let assembler = ArchiveAssembler::new(
            Cursor::new(Vec::new()),
            vec![MethodConfig::new(Method::LZMA).with_level(5)],
        )
        .unwrap();
        let out = assembler.finish().unwrap().into_inner();

        assert!(out.len() as u64 > SIGNATURE_HEADER_SIZE);
        assert_eq!(&out[..6], SEVEN_Z_SIGNATURE);
        assert_eq!(&out[6..8], &[0, 4]);

        // The start-header CRC covers bytes 12..32.
        let stored = u32::from_le_bytes(out[8..12].try_into().unwrap());
        assert_eq!(stored, crc32fast::hash(&out[12..32]));
    }

    #[test]
    fn next_header_offset_points_at_the_trailing_header() {
        let assembler = ArchiveAssembler::new(
            Cursor::new(Vec::new()),
            vec![MethodConfig::new(Method::LZMA).with_level(5)],
        )
        .unwrap();
        let out = assembler.finish().unwrap().into_inner();

        let offset = u64::from_le_bytes(out[12..20].try_into().unwrap());
        let size = u64::from_le_bytes(out[20..28].try_into().unwrap());
        let crc = u32::from_le_bytes(out[28..32].try_into().unwrap());

        let start = (SIGNATURE_HEADER_SIZE + offset) as usize;
        let header = &out[start..start + size as usize];
        assert_eq!(crc, crc32fast::hash(header));
    }
}
