//! AES-256 in counter mode
//!
//! Key data is the 32-byte AES key followed by the 16-byte initial counter
//! block. Ciphertext length equals plaintext length and any byte offset can be
//! decrypted directly by seeking the keystream.

use std::io::{self, Read, Write};

use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use fidd_core::{FiddError, FiddResult};
use rand::RngCore;

use crate::checksum::ChecksumCallback;
use crate::cipher::{pump_streams, CipherAlgorithm};
use crate::registry::Named;
use crate::{BLOCK_SIZE, KEY_SIZE};

type Aes256Ctr128 = ctr::Ctr128BE<aes::Aes256>;

/// Length of AES-256-CTR key data: key ‖ initial counter
pub const CTR_KEY_DATA_LEN: usize = KEY_SIZE + BLOCK_SIZE;

#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256Ctr;

fn keystream(key_data: &[u8], offset: u64) -> Result<Aes256Ctr128, String> {
    if key_data.len() != CTR_KEY_DATA_LEN {
        return Err(format!(
            "AES-256-CTR key data must be {CTR_KEY_DATA_LEN} bytes, got {}",
            key_data.len()
        ));
    }
    let (key, iv) = key_data.split_at(KEY_SIZE);
    let mut cipher = Aes256Ctr128::new_from_slices(key, iv).map_err(|e| e.to_string())?;
    cipher
        .try_seek(offset)
        .map_err(|_| format!("offset {offset} is beyond the keystream"))?;
    Ok(cipher)
}

/// Applies the keystream to whatever the inner reader yields.
struct CtrReader<'a> {
    cipher: Aes256Ctr128,
    inner: Box<dyn Read + 'a>,
}

impl Read for CtrReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

impl Named for Aes256Ctr {
    fn name(&self) -> &str {
        "AES-256-CTR"
    }
}

impl CipherAlgorithm for Aes256Ctr {
    fn generate_key_data(&self, rng: &mut dyn RngCore) -> Vec<u8> {
        let mut key_data = vec![0u8; CTR_KEY_DATA_LEN];
        rng.fill_bytes(&mut key_data);
        key_data
    }

    fn encrypt_streams(
        &self,
        key_data: &[u8],
        inputs: &mut [&mut dyn Read],
        output: &mut dyn Write,
        callbacks: &mut [&mut dyn ChecksumCallback],
    ) -> FiddResult<u64> {
        let mut cipher = keystream(key_data, 0).map_err(FiddError::InvalidRecord)?;
        pump_streams(inputs, output, callbacks, |chunk| {
            cipher.apply_keystream(chunk)
        })
    }

    fn positioned_reader<'a>(
        &self,
        key_data: &[u8],
        offset: u64,
        input: Box<dyn Read + 'a>,
    ) -> FiddResult<Box<dyn Read + 'a>> {
        let cipher = keystream(key_data, offset).map_err(FiddError::Decrypt)?;
        Ok(Box::new(CtrReader {
            cipher,
            inner: input,
        }))
    }

    /// A stream cipher has no incomplete blocks, so `allow_partial` has no effect.
    fn decrypt_stream(
        &self,
        key_data: &[u8],
        input: &mut dyn Read,
        output: &mut dyn Write,
        _allow_partial: bool,
    ) -> FiddResult<u64> {
        let mut reader = self.positioned_reader(key_data, 0, Box::new(input))?;
        Ok(io::copy(&mut reader, output)?)
    }
}
