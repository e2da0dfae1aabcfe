//! Codec factory: method identifiers, per-method configuration, and the
//! encoder chain builder.
//!
//! The archiver never talks to a concrete encoder directly. It describes what
//! it wants as a list of [`MethodConfig`] values in decode order (the first
//! entry is the coder a reader applies first to the packed bytes), and
//! [`encoder::build_chain`] turns that into a stack of writers plus the coder
//! descriptors the archive header needs.

pub mod aes;
pub(crate) mod encoder;

use crate::error::{Error, Result};

/// A 7z compression or filter method identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method {
    id: u64,
    name: &'static str,
}

impl Method {
    /// Stored-without-compression passthrough.
    pub const COPY: Method = Method {
        id: 0x00,
        name: "Copy",
    };
    /// Classic LZMA.
    pub const LZMA: Method = Method {
        id: 0x030101,
        name: "LZMA",
    };
    /// LZMA2 (chunked LZMA).
    pub const LZMA2: Method = Method {
        id: 0x21,
        name: "LZMA2",
    };
    /// AES-256 in CBC mode with the 7z SHA-256 key-derivation scheme.
    pub const AES256_SHA256: Method = Method {
        id: 0x06F10701,
        name: "AES256SHA256",
    };

    /// Numeric method id as stored in folder coder records.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolves a raw method id to a known method.
    ///
    /// Unrecognized ids are surfaced here rather than at configuration time,
    /// so callers can set an id first and learn about support on use.
    pub fn from_id(id: u64) -> Result<Method> {
        match id {
            id if id == Method::COPY.id => Ok(Method::COPY),
            id if id == Method::LZMA.id => Ok(Method::LZMA),
            id if id == Method::LZMA2.id => Ok(Method::LZMA2),
            id if id == Method::AES256_SHA256.id => Ok(Method::AES256_SHA256),
            other => Err(Error::invalid_argument(format!(
                "unsupported method id {other:#x}"
            ))),
        }
    }

    /// Big-endian method id bytes with leading zero bytes stripped.
    pub(crate) fn id_bytes(&self) -> Vec<u8> {
        let bytes = self.id.to_be_bytes();
        let skip = bytes
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(bytes.len() - 1);
        bytes[skip..].to_vec()
    }
}

/// Configuration for one coder in a chain.
#[derive(Debug, Clone)]
pub struct MethodConfig {
    pub method: Method,
    /// Compression level for LZMA-family methods, ignored by others.
    pub level: u32,
    /// Declared input size hint; lets the encoder shrink its dictionary.
    pub size_hint: Option<u64>,
    /// Key material for the AES method.
    pub aes: Option<aes::AesOptions>,
}

impl MethodConfig {
    pub fn new(method: Method) -> Self {
        MethodConfig {
            method,
            level: 5,
            size_hint: None,
            aes: None,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn with_size_hint(mut self, hint: u64) -> Self {
        if hint > 0 {
            self.size_hint = Some(hint);
        }
        self
    }

    pub fn with_aes(mut self, options: aes::AesOptions) -> Self {
        self.aes = Some(options);
        self
    }
}

/// LZMA lc/lp/pb and dictionary size packed as the 5-byte properties blob.
pub(crate) fn lzma_properties(lc: u32, lp: u32, pb: u32, dict_size: u32) -> Vec<u8> {
    let mut props = Vec::with_capacity(5);
    props.push(((pb * 5 + lp) * 9 + lc) as u8);
    props.extend_from_slice(&dict_size.to_le_bytes());
    props
}

/// LZMA2 single-byte dictionary size encoding.
pub(crate) fn lzma2_dict_size_property(dict_size: u32) -> u8 {
    if dict_size == u32::MAX {
        return 40;
    }
    let mut code = 0u8;
    while code < 40 {
        let bits = 11 + (code as u32 >> 1);
        let size = (2u64 | (code as u64 & 1)) << bits;
        if dict_size as u64 <= size {
            break;
        }
        code += 1;
    }
    code
}
