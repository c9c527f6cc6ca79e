//! Section cipher abstraction
//!
//! Offsets and lengths given to the random-access operations are plaintext
//! positions relative to the start of the section. Key data is whatever
//! [`CipherAlgorithm::generate_key_data`] produced for the algorithm.

use std::io::{self, Cursor, Read, Write};

use fidd_core::{FiddError, FiddResult};
use rand::RngCore;

use crate::checksum::ChecksumCallback;
use crate::registry::Named;
use crate::STREAM_CHUNK_SIZE;

pub const UNENCRYPTED: &str = "none";

pub trait CipherAlgorithm: Named + Send + Sync {
    /// Fresh key material for one section.
    fn generate_key_data(&self, rng: &mut dyn RngCore) -> Vec<u8>;

    /// Concatenate `inputs` in order and encrypt them into `output`.
    ///
    /// Every callback observes each ciphertext chunk as it is written.
    /// Returns the number of ciphertext bytes written.
    fn encrypt_streams(
        &self,
        key_data: &[u8],
        inputs: &mut [&mut dyn Read],
        output: &mut dyn Write,
        callbacks: &mut [&mut dyn ChecksumCallback],
    ) -> FiddResult<u64>;

    /// Plaintext reader for ciphertext that starts at `seek_origin(offset)`.
    ///
    /// The first byte produced is the plaintext byte at `offset`; the reader
    /// ends where the ciphertext ends.
    fn positioned_reader<'a>(
        &self,
        key_data: &[u8],
        offset: u64,
        input: Box<dyn Read + 'a>,
    ) -> FiddResult<Box<dyn Read + 'a>>;

    /// Streaming decrypt of a whole ciphertext.
    ///
    /// With `allow_partial`, a truncated ciphertext yields the plaintext of its
    /// complete blocks instead of a [`FiddError::Decrypt`].
    fn decrypt_stream(
        &self,
        key_data: &[u8],
        input: &mut dyn Read,
        output: &mut dyn Write,
        allow_partial: bool,
    ) -> FiddResult<u64>;

    /// Ciphertext position a positioned read of plaintext `offset` must start at.
    fn seek_origin(&self, offset: u64) -> u64 {
        offset
    }

    fn encrypt(&self, key_data: &[u8], plaintext: &[u8]) -> FiddResult<Vec<u8>> {
        let mut out = Vec::with_capacity(plaintext.len() + crate::BLOCK_SIZE);
        self.encrypt_streams(key_data, &mut [&mut Cursor::new(plaintext)], &mut out, &mut [])?;
        Ok(out)
    }

    fn decrypt(&self, key_data: &[u8], ciphertext: &[u8]) -> FiddResult<Vec<u8>> {
        let mut out = Vec::with_capacity(ciphertext.len());
        self.decrypt_stream(key_data, &mut Cursor::new(ciphertext), &mut out, false)?;
        Ok(out)
    }

    /// Plaintext `[offset, offset + length)` of `ciphertext`, decrypting only
    /// the blocks that cover the range.
    fn random_access_decrypt(
        &self,
        key_data: &[u8],
        ciphertext: &[u8],
        offset: u64,
        length: u64,
    ) -> FiddResult<Vec<u8>> {
        let origin = self.seek_origin(offset);
        if origin > ciphertext.len() as u64 {
            return Err(FiddError::range(offset, length, ciphertext.len() as u64));
        }
        let input = Box::new(Cursor::new(&ciphertext[origin as usize..]));
        let reader = self
            .positioned_reader(key_data, offset, input)
            .map_err(|e| with_length(e, length))?;

        let mut out = Vec::with_capacity(length.min(ciphertext.len() as u64) as usize);
        reader.take(length).read_to_end(&mut out)?;
        if (out.len() as u64) < length {
            return Err(FiddError::range(offset, length, offset + out.len() as u64));
        }
        Ok(out)
    }

    /// Stream variant of [`CipherAlgorithm::random_access_decrypt`]: `input` is
    /// already positioned at `seek_origin(offset)`. Copies at most `length`
    /// plaintext bytes to `output` and returns the count.
    fn random_access_decrypt_stream(
        &self,
        key_data: &[u8],
        offset: u64,
        length: u64,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> FiddResult<u64> {
        let reader = self
            .positioned_reader(key_data, offset, Box::new(input))
            .map_err(|e| with_length(e, length))?;
        Ok(io::copy(&mut reader.take(length), output)?)
    }

    /// Lazily decrypting view of a whole ciphertext stream.
    fn decrypted_reader<'a>(
        &self,
        key_data: &[u8],
        input: Box<dyn Read + 'a>,
    ) -> FiddResult<Box<dyn Read + 'a>> {
        self.positioned_reader(key_data, 0, input)
    }
}

/// Stamp the requested length onto a range error from a positioned reader.
fn with_length(e: FiddError, length: u64) -> FiddError {
    match e {
        FiddError::Range { offset, limit, .. } => FiddError::range(offset, length, limit),
        other => other,
    }
}

/// Read every input in order, transform each chunk in place, write it, and
/// feed it to the callbacks. Shared by ciphers whose ciphertext length equals
/// the plaintext length.
pub(crate) fn pump_streams(
    inputs: &mut [&mut dyn Read],
    output: &mut dyn Write,
    callbacks: &mut [&mut dyn ChecksumCallback],
    mut transform: impl FnMut(&mut [u8]),
) -> FiddResult<u64> {
    let mut buf = [0u8; STREAM_CHUNK_SIZE];
    let mut written = 0u64;
    for input in inputs.iter_mut() {
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            transform(&mut buf[..n]);
            emit(&buf[..n], output, callbacks)?;
            written += n as u64;
        }
    }
    Ok(written)
}

/// Write one ciphertext chunk and show it to every callback.
pub(crate) fn emit(
    chunk: &[u8],
    output: &mut dyn Write,
    callbacks: &mut [&mut dyn ChecksumCallback],
) -> FiddResult<()> {
    output.write_all(chunk)?;
    for cb in callbacks.iter_mut() {
        cb.write(chunk);
    }
    Ok(())
}

/// Identity cipher: the section is stored in the clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unencrypted;

impl Named for Unencrypted {
    fn name(&self) -> &str {
        UNENCRYPTED
    }
}

impl CipherAlgorithm for Unencrypted {
    fn generate_key_data(&self, _rng: &mut dyn RngCore) -> Vec<u8> {
        Vec::new()
    }

    fn encrypt_streams(
        &self,
        _key_data: &[u8],
        inputs: &mut [&mut dyn Read],
        output: &mut dyn Write,
        callbacks: &mut [&mut dyn ChecksumCallback],
    ) -> FiddResult<u64> {
        pump_streams(inputs, output, callbacks, |_| {})
    }

    fn positioned_reader<'a>(
        &self,
        _key_data: &[u8],
        _offset: u64,
        input: Box<dyn Read + 'a>,
    ) -> FiddResult<Box<dyn Read + 'a>> {
        Ok(input)
    }

    fn decrypt_stream(
        &self,
        _key_data: &[u8],
        input: &mut dyn Read,
        output: &mut dyn Write,
        _allow_partial: bool,
    ) -> FiddResult<u64> {
        Ok(io::copy(input, output)?)
    }

    fn random_access_decrypt(
        &self,
        _key_data: &[u8],
        ciphertext: &[u8],
        offset: u64,
        length: u64,
    ) -> FiddResult<Vec<u8>> {
        let limit = ciphertext.len() as u64;
        match offset.checked_add(length) {
            Some(end) if end <= limit => Ok(ciphertext[offset as usize..end as usize].to_vec()),
            _ => Err(FiddError::range(offset, length, limit)),
        }
    }
}
