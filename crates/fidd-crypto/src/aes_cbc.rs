//! AES-256 in CBC mode with PKCS#7 padding
//!
//! Key data is the 32-byte AES key followed by the 16-byte IV. Ciphertext is
//! always 1..=16 bytes longer than the plaintext.
//!
//! Random access to plaintext offset `o` starts at block `b = o / 16`: block
//! `b` decrypts with ciphertext block `b - 1` as its chaining value, or the IV
//! when `b == 0`. A positioned stream therefore begins one block early
//! (see [`CipherAlgorithm::seek_origin`]).

use std::io::{self, Read, Write};

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};
use fidd_core::{FiddError, FiddResult};
use rand::RngCore;

use crate::checksum::ChecksumCallback;
use crate::cipher::{emit, CipherAlgorithm};
use crate::registry::Named;
use crate::{BLOCK_SIZE, KEY_SIZE, STREAM_CHUNK_SIZE};

/// Length of AES-256-CBC key data: key ‖ IV
pub const CBC_KEY_DATA_LEN: usize = KEY_SIZE + BLOCK_SIZE;

#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256Cbc;

type Chain = [u8; BLOCK_SIZE];

fn init(key_data: &[u8]) -> Result<(Aes256, Chain), String> {
    if key_data.len() != CBC_KEY_DATA_LEN {
        return Err(format!(
            "AES-256-CBC key data must be {CBC_KEY_DATA_LEN} bytes, got {}",
            key_data.len()
        ));
    }
    let (key, iv) = key_data.split_at(KEY_SIZE);
    let cipher = Aes256::new_from_slice(key).map_err(|e| e.to_string())?;
    let mut chain = [0u8; BLOCK_SIZE];
    chain.copy_from_slice(iv);
    Ok((cipher, chain))
}

/// Encrypt whole blocks in place, advancing the chaining value.
fn encrypt_blocks(cipher: &Aes256, chain: &mut Chain, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        for (b, c) in block.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        cipher.encrypt_block(Block::from_mut_slice(block));
        chain.copy_from_slice(block);
    }
}

/// Strip PKCS#7 padding from the final plaintext block.
fn unpad(block: &Chain) -> Option<&[u8]> {
    let pad = block[BLOCK_SIZE - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE {
        return None;
    }
    let (data, padding) = block.split_at(BLOCK_SIZE - pad);
    padding.iter().all(|&b| b as usize == pad).then_some(data)
}

/// Lazily decrypting reader.
///
/// The most recent plaintext block is held back until the next block (or EOF)
/// shows whether it carries the padding.
struct CbcDecryptReader<'a> {
    cipher: Aes256,
    inner: Box<dyn Read + 'a>,
    chain: Chain,
    pending: Vec<u8>,
    held: Option<Chain>,
    out: Vec<u8>,
    out_pos: usize,
    skip: usize,
    /// Plaintext offset a positioned reader starts at.
    offset: u64,
    /// Plaintext bytes decrypted so far, skipped ones included.
    released: u64,
    decrypted: bool,
    allow_partial: bool,
    require_block: bool,
    done: bool,
}

impl<'a> CbcDecryptReader<'a> {
    fn new(
        cipher: Aes256,
        chain: Chain,
        inner: Box<dyn Read + 'a>,
        offset: u64,
        allow_partial: bool,
        require_block: bool,
    ) -> Self {
        Self {
            cipher,
            inner,
            chain,
            pending: Vec::with_capacity(STREAM_CHUNK_SIZE + BLOCK_SIZE),
            held: None,
            out: Vec::with_capacity(STREAM_CHUNK_SIZE + BLOCK_SIZE),
            out_pos: 0,
            skip: (offset % BLOCK_SIZE as u64) as usize,
            offset,
            released: 0,
            decrypted: false,
            allow_partial,
            require_block,
            done: false,
        }
    }

    fn decrypt_block(&mut self, ciphertext: Chain) -> Chain {
        let mut block = ciphertext;
        self.cipher.decrypt_block(Block::from_mut_slice(&mut block));
        for (b, c) in block.iter_mut().zip(self.chain.iter()) {
            *b ^= c;
        }
        self.chain = ciphertext;
        self.decrypted = true;
        block
    }

    fn refill(&mut self) -> FiddResult<()> {
        self.out.clear();
        self.out_pos = 0;

        let mut buf = [0u8; STREAM_CHUNK_SIZE];
        let n = self.inner.read(&mut buf)?;
        if n == 0 {
            return self.finish();
        }
        self.pending.extend_from_slice(&buf[..n]);

        let full = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        for start in (0..full).step_by(BLOCK_SIZE) {
            let mut ciphertext = [0u8; BLOCK_SIZE];
            ciphertext.copy_from_slice(&self.pending[start..start + BLOCK_SIZE]);
            let plaintext = self.decrypt_block(ciphertext);
            if let Some(prev) = self.held.replace(plaintext) {
                self.out.extend_from_slice(&prev);
            }
        }
        self.pending.drain(..full);
        self.apply_skip();
        Ok(())
    }

    fn finish(&mut self) -> FiddResult<()> {
        self.done = true;
        let partial = !self.pending.is_empty();
        if partial && !self.allow_partial {
            return Err(FiddError::Decrypt(format!(
                "incomplete final block ({} trailing bytes)",
                self.pending.len()
            )));
        }
        match self.held.take() {
            Some(last) if partial => self.out.extend_from_slice(&last),
            Some(last) => match unpad(&last) {
                Some(data) => self.out.extend_from_slice(data),
                None if self.allow_partial => self.out.extend_from_slice(&last),
                None => return Err(FiddError::Decrypt("invalid padding".into())),
            },
            None if self.require_block && !self.allow_partial => {
                return Err(FiddError::Decrypt("empty ciphertext".into()));
            }
            None => {}
        }
        self.apply_skip();
        self.check_reached()
    }

    /// Fails with [`FiddError::Range`] when the plaintext ended before `offset`.
    fn check_reached(&self) -> FiddResult<()> {
        let base = self.offset - self.offset % BLOCK_SIZE as u64;
        if !self.decrypted && base > 0 {
            // plaintext ends inside the chaining block
            return Err(FiddError::range(self.offset, 0, base - 1));
        }
        if self.skip > 0 {
            return Err(FiddError::range(self.offset, 0, base + self.released));
        }
        Ok(())
    }

    /// Decrypt up to the first plaintext byte at `offset`, or to EOF.
    fn prime(&mut self) -> FiddResult<()> {
        while self.out_pos == self.out.len() && !self.done {
            self.refill()?;
        }
        Ok(())
    }

    fn apply_skip(&mut self) {
        self.released += self.out.len() as u64;
        let n = self.skip.min(self.out.len());
        self.out.drain(..n);
        self.skip -= n;
    }
}

impl Read for CbcDecryptReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.out_pos == self.out.len() {
            if self.done {
                return Ok(0);
            }
            self.refill().map_err(FiddError::into_io)?;
        }
        let n = (self.out.len() - self.out_pos).min(buf.len());
        buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        Ok(n)
    }
}

impl Named for Aes256Cbc {
    fn name(&self) -> &str {
        "AES-256-CBC"
    }
}

impl CipherAlgorithm for Aes256Cbc {
    fn generate_key_data(&self, rng: &mut dyn RngCore) -> Vec<u8> {
        let mut key_data = vec![0u8; CBC_KEY_DATA_LEN];
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
        let (cipher, mut chain) = init(key_data).map_err(FiddError::InvalidRecord)?;
        let mut pending: Vec<u8> = Vec::with_capacity(STREAM_CHUNK_SIZE + BLOCK_SIZE);
        let mut buf = [0u8; STREAM_CHUNK_SIZE];
        let mut written = 0u64;

        for input in inputs.iter_mut() {
            loop {
                let n = input.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&buf[..n]);
                let full = pending.len() / BLOCK_SIZE * BLOCK_SIZE;
                if full > 0 {
                    encrypt_blocks(&cipher, &mut chain, &mut pending[..full]);
                    emit(&pending[..full], output, callbacks)?;
                    written += full as u64;
                    pending.drain(..full);
                }
            }
        }

        let pad = BLOCK_SIZE - pending.len();
        pending.resize(BLOCK_SIZE, pad as u8);
        encrypt_blocks(&cipher, &mut chain, &mut pending);
        emit(&pending, output, callbacks)?;
        Ok(written + BLOCK_SIZE as u64)
    }

    fn seek_origin(&self, offset: u64) -> u64 {
        let block = offset / BLOCK_SIZE as u64;
        block.saturating_sub(1) * BLOCK_SIZE as u64
    }

    fn positioned_reader<'a>(
        &self,
        key_data: &[u8],
        offset: u64,
        mut input: Box<dyn Read + 'a>,
    ) -> FiddResult<Box<dyn Read + 'a>> {
        let (cipher, mut chain) = init(key_data).map_err(FiddError::Decrypt)?;
        let block = offset / BLOCK_SIZE as u64;
        if block > 0 {
            match input.read_exact(&mut chain) {
                Ok(()) => {}
                // no chaining block: the offset lies past the ciphertext
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    let base = block * BLOCK_SIZE as u64;
                    return Err(FiddError::range(offset, 0, base - 1));
                }
                Err(e) => return Err(e.into()),
            }
        }
        let mut reader = CbcDecryptReader::new(cipher, chain, input, offset, false, block == 0);
        if offset > 0 {
            reader.prime()?;
        }
        Ok(Box::new(reader))
    }

    fn decrypt_stream(
        &self,
        key_data: &[u8],
        input: &mut dyn Read,
        output: &mut dyn Write,
        allow_partial: bool,
    ) -> FiddResult<u64> {
        let (cipher, chain) = init(key_data).map_err(FiddError::Decrypt)?;
        let mut reader =
            CbcDecryptReader::new(cipher, chain, Box::new(input), 0, allow_partial, true);
        Ok(io::copy(&mut reader, output)?)
    }
}
