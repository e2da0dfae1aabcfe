//! Unpack-info and substreams-info sections of the header database:
//! folder coder chains, per-coder unpack sizes, and per-file digests.

use std::io::Write;

use crate::archive::{
    K_CODERS_UNPACK_SIZE, K_CRC, K_END, K_FOLDER, K_NUM_UNPACK_STREAM, K_SIZE, K_SUBSTREAMS_INFO,
    K_UNPACK_INFO,
};
use crate::bitset::{write_bit_set, BitSet};
use crate::codec::Method;
use crate::writer::write_number;
use crate::ByteWriter;

/// One coder of a folder's chain, in decode order.
pub(crate) struct Coder {
    pub method: Method,
    pub properties: Vec<u8>,
}

/// One folder: a coder chain plus the streams it unpacks to.
pub(crate) struct FolderRecord {
    pub coders: Vec<Coder>,
    /// Decode-direction output size of each coder, aligned with `coders`.
    pub unpack_sizes: Vec<u64>,
    /// CRC of the folder's fully unpacked output, when known.
    pub crc: Option<u32>,
    pub num_substreams: u64,
    /// Per-file sizes; only consulted when `num_substreams > 1`.
    pub substream_sizes: Vec<u64>,
    pub substream_crcs: Vec<u32>,
}

impl FolderRecord {
    /// Whether the single substream's digest is already derivable from the
    /// folder CRC, making an explicit substream digest redundant.
    fn substream_crcs_derivable(&self) -> bool {
        self.num_substreams == 1 && self.crc.is_some()
    }
}

#[derive(Default)]
pub(crate) struct UnpackInfo {
    folders: Vec<FolderRecord>,
}

impl UnpackInfo {
    /// Adds a folder holding exactly one unpack stream.
    pub(crate) fn add(&mut self, coders: Vec<Coder>, unpack_sizes: Vec<u64>, crc: u32) {
        self.folders.push(FolderRecord {
            coders,
            unpack_sizes,
            crc: Some(crc),
            num_substreams: 1,
            substream_sizes: Vec::new(),
            substream_crcs: Vec::new(),
        });
    }

    /// Adds a solid folder subsuming `substream_sizes.len()` files.
    pub(crate) fn add_multiple(
        &mut self,
        coders: Vec<Coder>,
        unpack_sizes: Vec<u64>,
        crc: u32,
        substream_sizes: Vec<u64>,
        substream_crcs: Vec<u32>,
    ) {
        debug_assert_eq!(substream_sizes.len(), substream_crcs.len());
        self.folders.push(FolderRecord {
            coders,
            unpack_sizes,
            crc: Some(crc),
            num_substreams: substream_sizes.len() as u64,
            substream_sizes,
            substream_crcs,
        });
    }

    pub(crate) fn write_to<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        header.write_u8(K_UNPACK_INFO)?;

        header.write_u8(K_FOLDER)?;
        write_number(header, self.folders.len() as u64)?;
        header.write_u8(0)?; // folders are inline, not external
        for folder in &self.folders {
            write_folder(header, folder)?;
        }

        header.write_u8(K_CODERS_UNPACK_SIZE)?;
        for folder in &self.folders {
            for size in &folder.unpack_sizes {
                write_number(header, *size)?;
            }
        }

        if self.folders.iter().any(|f| f.crc.is_some()) {
            header.write_u8(K_CRC)?;
            write_digests(
                header,
                &self
                    .folders
                    .iter()
                    .map(|f| f.crc)
                    .collect::<Vec<Option<u32>>>(),
            )?;
        }

        header.write_u8(K_END)?;
        Ok(())
    }

    /// Writes the substreams-info section, or nothing when every folder holds
    /// one stream whose digest the folder CRC already covers.
    pub(crate) fn write_substreams<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        let counts_trivial = self.folders.iter().all(|f| f.num_substreams == 1);
        let crcs_trivial = self.folders.iter().all(|f| f.substream_crcs_derivable());
        if counts_trivial && crcs_trivial {
            return Ok(());
        }

        header.write_u8(K_SUBSTREAMS_INFO)?;

        if !counts_trivial {
            header.write_u8(K_NUM_UNPACK_STREAM)?;
            for folder in &self.folders {
                write_number(header, folder.num_substreams)?;
            }

            // All substream sizes except each folder's last, which readers
            // derive from the folder total.
            header.write_u8(K_SIZE)?;
            for folder in &self.folders {
                if folder.num_substreams > 1 {
                    for size in &folder.substream_sizes[..folder.substream_sizes.len() - 1] {
                        write_number(header, *size)?;
                    }
                }
            }
        }

        // Digests for every stream the folder CRCs do not cover.
        let mut digests = Vec::new();
        for folder in &self.folders {
            if folder.substream_crcs_derivable() {
                continue;
            }
            if folder.num_substreams == 1 {
                digests.push(folder.crc);
            } else {
                digests.extend(folder.substream_crcs.iter().map(|crc| Some(*crc)));
            }
        }
        if !digests.is_empty() {
            header.write_u8(K_CRC)?;
            write_digests(header, &digests)?;
        }

        header.write_u8(K_END)?;
        Ok(())
    }
}

fn write_folder<H: Write>(header: &mut H, folder: &FolderRecord) -> std::io::Result<()> {
    write_number(header, folder.coders.len() as u64)?;
    for coder in &folder.coders {
        let id = coder.method.id_bytes();
        let mut flags = id.len() as u8;
        if !coder.properties.is_empty() {
            flags |= 0x20;
        }
        header.write_u8(flags)?;
        header.write_all(&id)?;
        if !coder.properties.is_empty() {
            write_number(header, coder.properties.len() as u64)?;
            header.write_all(&coder.properties)?;
        }
    }
    // Bind pairs chain each coder's input to the previous coder's output;
    // the remaining unbound input receives the packed stream.
    for i in 1..folder.coders.len() {
        write_number(header, i as u64)?;
        write_number(header, (i - 1) as u64)?;
    }
    Ok(())
}

/// Digest list: the all-defined flag (or definedness bit vector) followed by
/// the defined CRC values.
fn write_digests<H: Write>(header: &mut H, digests: &[Option<u32>]) -> std::io::Result<()> {
    if digests.iter().all(|d| d.is_some()) {
        header.write_u8(1)?;
    } else {
        header.write_u8(0)?;
        let mut defined = BitSet::with_capacity(digests.len());
        for (i, digest) in digests.iter().enumerate() {
            if digest.is_some() {
                defined.insert(i);
            }
        }
        write_bit_set(header, &defined)?;
    }
    for digest in digests.iter().flatten() {
        header.write_u32(*digest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lzma2_folder(unpack_size: u64, crc: u32) -> (Vec<Coder>, Vec<u64>, u32) {
        (
            vec![Coder {
                method: Method::LZMA2,
                properties: vec![0x18],
            }],
            vec![unpack_size],
            crc,
        )
    }

    #[test]
    fn single_coder_folder_layout() {
        let mut info = UnpackInfo::default();
        let (coders, sizes, crc) = lzma2_folder(100, 0xCAFEBABE);
        info.add(coders, sizes, crc);

        let mut out = Vec::new();
        info.write_to(&mut out).unwrap();

        assert_eq!(
            out,
            vec![
                K_UNPACK_INFO,
                K_FOLDER,
                0x01, // one folder
                0x00, // inline
                0x01, // one coder
                0x21, // id size 1, has properties
                0x21, // LZMA2 id
                0x01, // properties size
                0x18,
                K_CODERS_UNPACK_SIZE,
                0x64,
                K_CRC,
                0x01,
                0xBE,
                0xBA,
                0xFE,
                0xCA,
                K_END,
            ]
        );

        // One stream, folder CRC defined: no substreams section at all.
        let mut sub = Vec::new();
        info.write_substreams(&mut sub).unwrap();
        assert!(sub.is_empty());
    }

    #[test]
    fn two_coder_folder_writes_bind_pair() {
        let mut info = UnpackInfo::default();
        info.add(
            vec![
                Coder {
                    method: Method::AES256_SHA256,
                    properties: vec![0u8; 18],
                },
                Coder {
                    method: Method::LZMA2,
                    properties: vec![0x18],
                },
            ],
            vec![48, 100],
            0xDEADBEEF,
        );

        let mut out = Vec::new();
        info.write_to(&mut out).unwrap();

        // Two coders, then the bind pair in=1 out=0.
        let coders_start = 4;
        assert_eq!(out[coders_start], 0x02);
        let bind = out
            .windows(3)
            .position(|w| w == [0x01, 0x00, K_CODERS_UNPACK_SIZE])
            .expect("bind pair before unpack sizes");
        assert!(bind > coders_start);
    }

    #[test]
    fn solid_folder_substreams_layout() {
        let mut info = UnpackInfo::default();
        let coders = vec![Coder {
            method: Method::LZMA2,
            properties: vec![0x18],
        }];
        info.add_multiple(
            coders,
            vec![60],
            0x01020304,
            vec![10, 20, 30],
            vec![0xAA, 0xBB, 0xCC],
        );

        let mut out = Vec::new();
        info.write_substreams(&mut out).unwrap();

        assert_eq!(
            out,
            vec![
                K_SUBSTREAMS_INFO,
                K_NUM_UNPACK_STREAM,
                0x03,
                K_SIZE,
                0x0A, // first two sizes only; the last is derived
                0x14,
                K_CRC,
                0x01, // all defined
                0xAA,
                0x00,
                0x00,
                0x00,
                0xBB,
                0x00,
                0x00,
                0x00,
                0xCC,
                0x00,
                0x00,
                0x00,
                K_END,
            ]
        );
    }
}
