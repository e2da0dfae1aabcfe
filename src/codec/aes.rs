//! AES-256-CBC coder with the 7z SHA-256 iterated key-derivation scheme.

use std::io::Write;

use aes::cipher::{generic_array::GenericArray, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use rand::RngCore;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

const AES_BLOCK_SIZE: usize = 16;

/// Iteration exponent used for password key derivation (2^19 rounds).
const NUM_CYCLES_POWER: u8 = 19;

/// Key material and derivation parameters for the AES coder.
#[derive(Clone)]
pub struct AesOptions {
    /// Password encoded as UTF-16LE, the form the derivation hashes.
    password: Vec<u8>,
    num_cycles_power: u8,
    salt: Vec<u8>,
    /// Fixed IV for deterministic runs; a random IV is drawn when `None`.
    iv: Option<[u8; AES_BLOCK_SIZE]>,
}

impl AesOptions {
    pub fn from_password(password: &str) -> Self {
        AesOptions {
            password: password
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
            num_cycles_power: NUM_CYCLES_POWER,
            salt: Vec::new(),
            iv: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_fixed_iv(mut self, iv: [u8; AES_BLOCK_SIZE]) -> Self {
        self.iv = Some(iv);
        self
    }

    /// Derives the 256-bit AES key from the password and salt.
    ///
    /// One SHA-256 digest is folded over `2^num_cycles_power` rounds of
    /// `salt || password || round_counter`, matching the 7z derivation.
    fn derive_key(&self) -> [u8; 32] {
        if self.num_cycles_power == 0x3F {
            let mut key = [0u8; 32];
            let mut pos = 0;
            for byte in self.salt.iter().chain(self.password.iter()).take(32) {
                key[pos] = *byte;
                pos += 1;
            }
            return key;
        }
        let mut hasher = Sha256::new();
        let rounds = 1u64 << self.num_cycles_power;
        for round in 0..rounds {
            hasher.update(&self.salt);
            hasher.update(&self.password);
            hasher.update(round.to_le_bytes());
        }
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for AesOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesOptions")
            .field("num_cycles_power", &self.num_cycles_power)
            .field("salt_len", &self.salt.len())
            .finish_non_exhaustive()
    }
}

/// A fresh AES coder instance with its materialized IV and properties blob.
pub(crate) struct AesCoder {
    key: [u8; 32],
    iv: [u8; AES_BLOCK_SIZE],
    properties: Vec<u8>,
}

impl AesCoder {
    /// Derives the key and draws the IV; one instance per folder chain.
    pub(crate) fn new(options: &AesOptions) -> Self {
        let iv = options.iv.unwrap_or_else(|| {
            let mut iv = [0u8; AES_BLOCK_SIZE];
            rand::thread_rng().fill_bytes(&mut iv);
            iv
        });

        let mut properties = Vec::with_capacity(2 + options.salt.len() + AES_BLOCK_SIZE);
        properties.push(
            options.num_cycles_power
                | if options.salt.is_empty() { 0 } else { 0x80 }
                | 0x40,
        );
        properties.push(
            ((options.salt.len().saturating_sub(1) as u8) << 4) | (AES_BLOCK_SIZE as u8 - 1),
        );
        properties.extend_from_slice(&options.salt);
        properties.extend_from_slice(&iv);

        AesCoder {
            key: options.derive_key(),
            iv,
            properties,
        }
    }

    /// The coder-properties blob a decoder needs (parameters, salt, IV).
    pub(crate) fn properties(&self) -> &[u8] {
        &self.properties
    }

    pub(crate) fn into_writer<W: Write>(self, inner: W) -> AesWriter<W> {
        AesWriter {
            cipher: Aes256CbcEnc::new((&self.key).into(), (&self.iv).into()),
            inner,
            partial: Vec::with_capacity(AES_BLOCK_SIZE),
            finished: false,
        }
    }
}

/// Encrypting writer; the final partial block is zero-padded on finish.
///
/// Finishing follows the chain convention: an empty `write` pads and flushes
/// this stage, then propagates the empty write to the stage below.
pub(crate) struct AesWriter<W> {
    cipher: Aes256CbcEnc,
    inner: W,
    partial: Vec<u8>,
    finished: bool,
}

impl<W: Write> AesWriter<W> {
    fn encrypt_out(&mut self, data: &[u8]) -> std::io::Result<()> {
        debug_assert_eq!(data.len() % AES_BLOCK_SIZE, 0);
        let mut out = vec![0u8; data.len()];
        for (src, dst) in data
            .chunks_exact(AES_BLOCK_SIZE)
            .zip(out.chunks_exact_mut(AES_BLOCK_SIZE))
        {
            let mut block = GenericArray::clone_from_slice(src);
            self.cipher.encrypt_block_mut(&mut block);
            dst.copy_from_slice(&block);
        }
        self.inner.write_all(&out)
    }

    pub(crate) fn finish_stage(&mut self) -> std::io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if !self.partial.is_empty() {
            self.partial.resize(AES_BLOCK_SIZE, 0);
            let partial = std::mem::take(&mut self.partial);
            self.encrypt_out(&partial)?;
        }
        self.inner.flush()
    }
}

impl<W: Write> Write for AesWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            self.finish_stage()?;
            self.inner.write(&[])?;
            return Ok(0);
        }
        let consumed = buf.len();
        let mut buf = buf;

        if !self.partial.is_empty() {
            let need = AES_BLOCK_SIZE - self.partial.len();
            let take = need.min(buf.len());
            self.partial.extend_from_slice(&buf[..take]);
            buf = &buf[take..];
            if self.partial.len() == AES_BLOCK_SIZE {
                let block = std::mem::take(&mut self.partial);
                self.encrypt_out(&block)?;
            }
        }

        let full = buf.len() - buf.len() % AES_BLOCK_SIZE;
        if full > 0 {
            let (head, tail) = buf.split_at(full);
            // head is borrowed from the caller; copy so encrypt can run in place.
            let head = head.to_vec();
            self.encrypt_out(&head)?;
            buf = tail;
        }
        self.partial.extend_from_slice(buf);
        Ok(consumed)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_blob_layout() {
        let options = AesOptions::from_password("p@ss").with_fixed_iv([7u8; 16]);
        let coder = AesCoder::new(&options);
        let props = coder.properties();
        assert_eq!(props.len(), 18);
        // cycles=19, no salt, IV present.
        assert_eq!(props[0], 0x53);
        assert_eq!(props[1], 0x0F);
        assert_eq!(&props[2..], &[7u8; 16]);
    }

    #[test]
    fn key_derivation_is_stable_per_password() {
        let a = AesOptions::from_password("secret").derive_key();
        let b = AesOptions::from_password("secret").derive_key();
        let c = AesOptions::from_password("Secret").derive_key();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn output_is_block_aligned_and_padded() {
        let options = AesOptions::from_password("k").with_fixed_iv([0u8; 16]);
        let mut out = Vec::new();
        let mut writer = AesCoder::new(&options).into_writer(&mut out);
        writer.write_all(b"seventeen bytes!!").unwrap();
        writer.write(&[]).unwrap();
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn split_writes_match_single_write() {
        let options = AesOptions::from_password("k").with_fixed_iv([3u8; 16]);
        let data = b"a moderately long plaintext that spans several aes blocks";

        let mut whole = Vec::new();
        let mut writer = AesCoder::new(&options).into_writer(&mut whole);
        writer.write_all(data).unwrap();
        writer.write(&[]).unwrap();

        let mut pieces = Vec::new();
        let mut writer = AesCoder::new(&options).into_writer(&mut pieces);
        for chunk in data.chunks(7) {
            writer.write_all(chunk).unwrap();
        }
        writer.write(&[]).unwrap();

        assert_eq!(whole, pieces);
    }

    #[test]
    fn empty_input_produces_no_ciphertext() {
        let options = AesOptions::from_password("k").with_fixed_iv([0u8; 16]);
        let mut out = Vec::new();
        let mut writer = AesCoder::new(&options).into_writer(&mut out);
        writer.write(&[]).unwrap();
        assert!(out.is_empty());
    }
}
