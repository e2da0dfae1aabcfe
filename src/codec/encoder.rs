//! Encoder chain construction.
//!
//! A chain is described in decode order: the first [`MethodConfig`] is the
//! coder a reader applies first to the packed bytes. For encoding the chain is
//! materialized inside out, so written plaintext flows through the data codec
//! first and the cipher last, ending at the caller's sink.
//!
//! Finishing uses the empty-write convention shared with the `lzma-rust2`
//! writers: writing an empty slice tells a stage to emit its trailing state
//! and pass the signal on.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;

use lzma_rust2::{LZMA2Options, LZMA2Writer, LZMAWriter};

use super::aes::{AesCoder, AesWriter};
use super::{lzma2_dict_size_property, lzma_properties, Method, MethodConfig};
use crate::error::{Error, Result};
use crate::writer::counting_writer::CountingWriter;
use crate::writer::counting_writer::CountingWriter as LzmaCountingWriter;

/// One coder of a built chain, as the archive header will describe it.
pub(crate) struct CoderSpec {
    pub method: Method,
    /// Captured coder-properties blob; empty when the decoder needs none.
    pub properties: Vec<u8>,
    /// Bytes that entered this stage during encoding (its decode output
    /// size). `None` for the data coder, whose size is the plaintext total.
    pub counter: Option<Rc<Cell<usize>>>,
}

enum DataEncoder<'a> {
    Copy(Box<dyn Write + 'a>),
    Lzma(LZMAWriter<LzmaCountingWriter<Box<dyn Write + 'a>>>),
    Lzma2(LZMA2Writer<LzmaCountingWriter<Box<dyn Write + 'a>>>),
}

/// A materialized encoder stack writing into the caller's sink.
pub(crate) struct EncoderChain<'a> {
    top: DataEncoder<'a>,
    cipher: Option<Rc<RefCell<AesWriter<Box<dyn Write + 'a>>>>>,
}

impl<'a> EncoderChain<'a> {
    /// Flushes all trailing coder state through the chain into the sink.
    pub(crate) fn finish(mut self) -> std::io::Result<()> {
        self.top.flush()?;
        self.top.write(&[])?;
        if let Some(cipher) = self.cipher {
            cipher.borrow_mut().finish_stage()?;
        }
        Ok(())
    }
}

impl Write for EncoderChain<'_> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.top.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.top.flush()
    }
}

impl Write for DataEncoder<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            DataEncoder::Copy(w) => w.write(buf),
            DataEncoder::Lzma(w) => w.write(buf),
            DataEncoder::Lzma2(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            DataEncoder::Copy(w) => w.flush(),
            DataEncoder::Lzma(w) => w.flush(),
            DataEncoder::Lzma2(w) => w.flush(),
        }
    }
}

/// Shared handle to the cipher stage so the chain can finish it explicitly
/// after the data coder above it has drained.
struct SharedWriter<'a>(Rc<RefCell<AesWriter<Box<dyn Write + 'a>>>>);

impl Write for SharedWriter<'_> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

fn lzma_options(config: &MethodConfig) -> LZMA2Options {
    let mut options = LZMA2Options::with_preset(config.level);
    if let Some(hint) = config.size_hint {
        let hint = hint
            .max(1 << 12)
            .next_power_of_two()
            .min(options.dict_size as u64) as u32;
        options.dict_size = hint;
    }
    options
}

/// Builds the encoder stack for `configs` over `sink`.
///
/// Returns the coder descriptors in decode order alongside the writer. The
/// supported shapes are a single data coder, optionally preceded by one
/// AES-256 coder.
pub(crate) fn build_chain<'a, W: Write + 'a>(
    configs: &[MethodConfig],
    sink: W,
) -> Result<(Vec<CoderSpec>, EncoderChain<'a>)> {
    let (cipher_config, data_config) = match configs {
        [data] => (None, data),
        [cipher, data] if cipher.method == Method::AES256_SHA256 => (Some(cipher), data),
        [] => return Err(Error::invalid_argument("empty coder chain")),
        _ => {
            return Err(Error::invalid_argument(
                "unsupported coder chain shape; expected [data] or [aes, data]",
            ))
        }
    };

    let mut specs = Vec::with_capacity(configs.len());
    let mut cipher = None;

    // Innermost stage first: the cipher sits directly on the sink.
    let inner: Box<dyn Write + 'a> = match cipher_config {
        Some(config) => {
            let options = config.aes.as_ref().ok_or_else(|| {
                Error::invalid_argument("AES coder configured without key material")
            })?;
            let coder = AesCoder::new(options);
            let properties = coder.properties().to_vec();
            let shared = Rc::new(RefCell::new(
                coder.into_writer(Box::new(sink) as Box<dyn Write + 'a>),
            ));
            cipher = Some(Rc::clone(&shared));

            let counting =
                CountingWriter::new(Box::new(SharedWriter(shared)) as Box<dyn Write + 'a>);
            specs.push(CoderSpec {
                method: Method::AES256_SHA256,
                properties,
                counter: Some(counting.counting()),
            });
            Box::new(counting)
        }
        None => Box::new(sink),
    };

    let top = match data_config.method {
        m if m == Method::COPY => {
            specs.push(CoderSpec {
                method: Method::COPY,
                properties: Vec::new(),
                counter: None,
            });
            DataEncoder::Copy(inner)
        }
        m if m == Method::LZMA => {
            let options = lzma_options(data_config);
            specs.push(CoderSpec {
                method: Method::LZMA,
                properties: lzma_properties(options.lc, options.lp, options.pb, options.dict_size),
                counter: None,
            });
            let writer = LZMAWriter::new_no_header(LzmaCountingWriter::new(inner), &options, false)
                .map_err(|e| Error::codec(0, e))?;
            DataEncoder::Lzma(writer)
        }
        m if m == Method::LZMA2 => {
            let options = lzma_options(data_config);
            specs.push(CoderSpec {
                method: Method::LZMA2,
                properties: vec![lzma2_dict_size_property(options.dict_size)],
                counter: None,
            });
            DataEncoder::Lzma2(LZMA2Writer::new(LzmaCountingWriter::new(inner), &options))
        }
        other => {
            return Err(Error::invalid_argument(format!(
                "method {} cannot be used as the data coder",
                other.name()
            )))
        }
    };

    // Keep header order equal to decode order: cipher first, data coder last.
    specs.reverse();
    Ok((specs, EncoderChain { top, cipher }))
}
