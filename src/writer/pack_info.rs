//! Pack-info section of the header database: where the packed data starts
//! and the size and CRC of every packed substream.

use std::io::Write;

use crate::archive::{K_CRC, K_END, K_PACK_INFO, K_SIZE};
use crate::writer::write_number;
use crate::ByteWriter;

#[derive(Default)]
pub(crate) struct PackInfo {
    /// Offset of the packed data, relative to the end of the start header.
    pub pos: u64,
    sizes: Vec<u64>,
    crcs: Vec<u32>,
}

impl PackInfo {
    /// Records one packed substream in emission order.
    pub(crate) fn add_stream(&mut self, size: u64, crc: u32) {
        self.sizes.push(size);
        self.crcs.push(crc);
    }

    pub(crate) fn len(&self) -> usize {
        self.sizes.len()
    }

    pub(crate) fn write_to<H: Write>(&self, header: &mut H) -> std::io::Result<()> {
        header.write_u8(K_PACK_INFO)?;
        write_number(header, self.pos)?;
        write_number(header, self.sizes.len() as u64)?;

        header.write_u8(K_SIZE)?;
        for size in &self.sizes {
            write_number(header, *size)?;
        }

        header.write_u8(K_CRC)?;
        header.write_u8(1)?; // all defined
        for crc in &self.crcs {
            header.write_u32(*crc)?;
        }

        header.write_u8(K_END)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_sizes_then_crcs() {
        let mut info = PackInfo::default();
        info.pos = 0;
        info.add_stream(5, 0xAABBCCDD);
        info.add_stream(300, 0x11223344);

        let mut out = Vec::new();
        info.write_to(&mut out).unwrap();

        assert_eq!(
            out,
            vec![
                K_PACK_INFO,
                0x00, // pos
                0x02, // stream count
                K_SIZE,
                0x05,
                0x81, // 300 needs the two-byte number form
                0x2C,
                K_CRC,
                0x01,
                0xDD,
                0xCC,
                0xBB,
                0xAA,
                0x44,
                0x33,
                0x22,
                0x11,
                K_END,
            ]
        );
    }
}
