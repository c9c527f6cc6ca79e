//! Section resolution: bounds check, decrypt, checksum verification.

use std::io::{self, Read};

use fidd_core::{FiddError, FiddResult, Section};
use fidd_crypto::{ChecksumCallback, Engines};

use crate::source::PackageSource;

/// Reads sections of one message body.
pub(crate) struct SectionReader<'a> {
    pub source: &'a dyn PackageSource,
    pub engines: &'a Engines,
    pub message_number: u64,
    pub verify_checksums: bool,
}

/// Passes ciphertext through while feeding a checksum and counting bytes.
struct Tee<'t, R> {
    inner: R,
    callback: Option<&'t mut Box<dyn ChecksumCallback>>,
    read: &'t mut u64,
}

impl<R: Read> Read for Tee<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(cb) = self.callback.as_mut() {
            cb.write(&buf[..n]);
        }
        *self.read += n as u64;
        Ok(n)
    }
}

impl<'a> SectionReader<'a> {
    fn raw(&self, section: &Section, from: u64) -> FiddResult<io::Take<Box<dyn Read + 'a>>> {
        let input = self
            .source
            .open_body_at(self.message_number, section.offset() + from)?;
        Ok(input.take(section.length().saturating_sub(from)))
    }

    /// Decrypt a whole section, verifying its checksum when enabled.
    pub fn read_all(&self, label: &str, section: &Section) -> FiddResult<Vec<u8>> {
        tracing::debug!(message = self.message_number, section = label, "reading section");
        let cipher = self.engines.cipher_for(section.encryption_algorithm())?;
        let checksum = match (self.verify_checksums, section.checksum_algorithm()) {
            (true, Some(name)) => Some(self.engines.checksums.get(name)?),
            _ => None,
        };

        let mut callback = checksum.as_ref().map(|c| c.new_callback());
        let mut read = 0u64;
        let mut plaintext = Vec::new();
        {
            let tee = Tee {
                inner: self.raw(section, 0)?,
                callback: callback.as_mut(),
                read: &mut read,
            };
            let mut reader = cipher.decrypted_reader(section.encryption_key_data(), Box::new(tee))?;
            reader.read_to_end(&mut plaintext)?;
        }

        if read != section.length() {
            return Err(FiddError::Format(format!(
                "{label}: body ended after {read} of {} section bytes",
                section.length()
            )));
        }
        if let (Some(cb), Some(expected)) = (callback, section.checksum()) {
            let actual = cb.checksum();
            if actual[..] != *expected {
                tracing::warn!(
                    message = self.message_number,
                    section = label,
                    "checksum mismatch"
                );
                return Err(FiddError::ChecksumMismatch {
                    section: label.to_string(),
                    expected: hex::encode(expected),
                    actual: hex::encode(actual),
                });
            }
        }
        Ok(plaintext)
    }

    /// Decrypt plaintext `[offset, offset + length)` of a section.
    ///
    /// Only the blocks covering the range are read. A checksum covers the
    /// whole stored section, so none is verified here.
    pub fn read_range(
        &self,
        label: &str,
        section: &Section,
        offset: u64,
        length: u64,
    ) -> FiddResult<Vec<u8>> {
        section.check_range(offset, length)?;
        tracing::debug!(
            message = self.message_number,
            section = label,
            offset,
            length,
            "reading section range"
        );
        let cipher = self.engines.cipher_for(section.encryption_algorithm())?;
        let origin = cipher.seek_origin(offset);
        let mut input = self.raw(section, origin)?;

        let mut out = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        let written = cipher.random_access_decrypt_stream(
            section.encryption_key_data(),
            offset,
            length,
            &mut input,
            &mut out,
        )?;
        if written < length {
            // stored ciphertext is longer than the plaintext (block padding)
            return Err(FiddError::range(offset, length, offset + written));
        }
        Ok(out)
    }

    /// Lazily decrypting view of a whole section.
    pub fn open(&self, section: &Section) -> FiddResult<Box<dyn Read + 'a>> {
        let cipher = self.engines.cipher_for(section.encryption_algorithm())?;
        cipher.decrypted_reader(section.encryption_key_data(), Box::new(self.raw(section, 0)?))
    }
}
