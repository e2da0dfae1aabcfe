//! Fixed-width bit vector used by the files-info header sections.

use std::io::Write;

/// A bit vector with a fixed logical length.
///
/// The 7z files-info sections encode per-file flags as MSB-first bit strings
/// whose length is the file count, so the width has to be carried explicitly
/// rather than inferred from the highest set bit.
pub(crate) struct BitSet {
    bits: Vec<bool>,
}

impl BitSet {
    pub(crate) fn with_capacity(len: usize) -> Self {
        BitSet {
            bits: vec![false; len],
        }
    }

    pub(crate) fn insert(&mut self, index: usize) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits[index] = true;
    }

    pub(crate) fn len(&self) -> usize {
        self.bits.len()
    }
}

/// Writes the bit vector MSB-first, padded with zero bits to a byte boundary.
pub(crate) fn write_bit_set<W: Write>(out: &mut W, set: &BitSet) -> std::io::Result<()> {
    for chunk in set.bits.chunks(8) {
        let mut byte = 0u8;
        for (i, bit) in chunk.iter().enumerate() {
            if *bit {
                byte |= 0x80 >> i;
            }
        }
        out.write_all(&[byte])?;
    }
    Ok(())
}
