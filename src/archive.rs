//! 7z container constants and the per-file header record.

/// The six signature bytes at offset 0 of every 7z archive.
pub(crate) const SEVEN_Z_SIGNATURE: &[u8; 6] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Size of the signature header block (signature, version, CRC, start header).
pub(crate) const SIGNATURE_HEADER_SIZE: u64 = 32;

// Header property ids of the 7z tag stream.
pub(crate) const K_END: u8 = 0x00;
pub(crate) const K_HEADER: u8 = 0x01;
pub(crate) const K_MAIN_STREAMS_INFO: u8 = 0x04;
pub(crate) const K_FILES_INFO: u8 = 0x05;
pub(crate) const K_PACK_INFO: u8 = 0x06;
pub(crate) const K_UNPACK_INFO: u8 = 0x07;
pub(crate) const K_SUBSTREAMS_INFO: u8 = 0x08;
pub(crate) const K_SIZE: u8 = 0x09;
pub(crate) const K_CRC: u8 = 0x0A;
pub(crate) const K_FOLDER: u8 = 0x0B;
pub(crate) const K_CODERS_UNPACK_SIZE: u8 = 0x0C;
pub(crate) const K_NUM_UNPACK_STREAM: u8 = 0x0D;
pub(crate) const K_EMPTY_STREAM: u8 = 0x0E;
pub(crate) const K_EMPTY_FILE: u8 = 0x0F;
pub(crate) const K_NAME: u8 = 0x11;
pub(crate) const K_M_TIME: u8 = 0x14;
pub(crate) const K_WIN_ATTRIBUTES: u8 = 0x15;
pub(crate) const K_ENCODED_HEADER: u8 = 0x17;

/// One file record staged for the archive header.
///
/// Entries are produced by the assembler from completed jobs; sizes, digests,
/// and definedness flags mirror what the header database will encode.
#[derive(Debug, Clone, Default)]
pub struct ArchiveEntry {
    pub name: String,
    /// Whether the entry owns a packed substream. Zero-byte items do not.
    pub has_stream: bool,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// CRC-32 of the uncompressed content.
    pub crc: u32,
    pub has_crc: bool,
    /// Modification time in Windows FILETIME ticks (100 ns since 1601-01-01).
    pub mtime: u64,
    pub has_mtime: bool,
    /// Windows attribute bits.
    pub attributes: u32,
    pub has_attributes: bool,
}

impl ArchiveEntry {
    /// Creates an entry carrying only a name; the assembler fills the rest.
    pub fn new(name: impl Into<String>) -> Self {
        ArchiveEntry {
            name: name.into(),
            ..Default::default()
        }
    }
}
