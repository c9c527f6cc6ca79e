//! Fixed-size section checksums
//!
//! Whatever the native width of the algorithm, a checksum is always 4 bytes,
//! big-endian. Checksums detect corruption only; they are not a MAC.

use std::io::Read;

use fidd_core::FiddResult;

use crate::registry::Named;
use crate::STREAM_CHUNK_SIZE;

pub const CHECKSUM_LEN: usize = 4;

pub type Checksum = [u8; CHECKSUM_LEN];

/// Incremental checksum state for one streaming operation.
///
/// Owned by exactly one operation; a fresh callback is created per call.
pub trait ChecksumCallback: Send {
    fn write(&mut self, data: &[u8]);

    fn write_byte(&mut self, byte: u8) {
        self.write(&[byte]);
    }

    /// Checksum of everything written so far. Does not reset the state.
    fn checksum(&self) -> Checksum;
}

pub trait ChecksumAlgorithm: Named + Send + Sync {
    fn new_callback(&self) -> Box<dyn ChecksumCallback>;

    fn checksum(&self, data: &[u8]) -> Checksum {
        let mut callback = self.new_callback();
        callback.write(data);
        callback.checksum()
    }

    /// Checksum a stream in bounded-size reads.
    fn checksum_reader(&self, reader: &mut dyn Read) -> FiddResult<Checksum> {
        let mut callback = self.new_callback();
        let mut buf = [0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            callback.write(&buf[..n]);
        }
        Ok(callback.checksum())
    }
}

/// CRC-32 (IEEE)
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

struct Crc32State(crc32fast::Hasher);

impl ChecksumCallback for Crc32State {
    fn write(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn checksum(&self) -> Checksum {
        self.0.clone().finalize().to_be_bytes()
    }
}

impl Named for Crc32 {
    fn name(&self) -> &str {
        "CRC32"
    }
}

impl ChecksumAlgorithm for Crc32 {
    fn new_callback(&self) -> Box<dyn ChecksumCallback> {
        Box::new(Crc32State(crc32fast::Hasher::new()))
    }

    fn checksum(&self, data: &[u8]) -> Checksum {
        crc32fast::hash(data).to_be_bytes()
    }
}

/// Adler-32 rolling checksum
#[derive(Debug, Clone, Copy, Default)]
pub struct Adler32;

struct Adler32State(adler2::Adler32);

impl ChecksumCallback for Adler32State {
    fn write(&mut self, data: &[u8]) {
        self.0.write_slice(data);
    }

    fn checksum(&self) -> Checksum {
        self.0.checksum().to_be_bytes()
    }
}

impl Named for Adler32 {
    fn name(&self) -> &str {
        "ADLER32"
    }
}

impl ChecksumAlgorithm for Adler32 {
    fn new_callback(&self) -> Box<dyn ChecksumCallback> {
        Box::new(Adler32State(adler2::Adler32::new()))
    }
}

/// First 4 bytes of the BLAKE3 digest
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Truncated;

struct Blake3State(blake3::Hasher);

impl ChecksumCallback for Blake3State {
    fn write(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn checksum(&self) -> Checksum {
        let digest = self.0.finalize();
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LEN]);
        out
    }
}

impl Named for Blake3Truncated {
    fn name(&self) -> &str {
        "BLAKE3-32"
    }
}

impl ChecksumAlgorithm for Blake3Truncated {
    fn new_callback(&self) -> Box<dyn ChecksumCallback> {
        Box::new(Blake3State(blake3::Hasher::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all() -> Vec<Box<dyn ChecksumAlgorithm>> {
        vec![Box::new(Crc32), Box::new(Adler32), Box::new(Blake3Truncated)]
    }

    #[test]
    fn test_known_values() {
        // standard check values for "123456789"
        assert_eq!(Crc32.checksum(b"123456789"), 0xCBF4_3926u32.to_be_bytes());
        assert_eq!(Adler32.checksum(b"123456789"), 0x091E_01DEu32.to_be_bytes());
        assert_eq!(Adler32.checksum(b""), 1u32.to_be_bytes());
        assert_eq!(Crc32.checksum(b""), [0, 0, 0, 0]);
    }

    #[test]
    fn test_blake3_prefix() {
        let full = blake3::hash(b"fidd");
        assert_eq!(&Blake3Truncated.checksum(b"fidd")[..], &full.as_bytes()[..4]);
    }

    #[test]
    fn test_reader_matches_bytes_across_chunk_boundary() {
        let data: Vec<u8> = (0..3 * STREAM_CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        for algo in all() {
            let from_reader = algo.checksum_reader(&mut data.as_slice()).unwrap();
            assert_eq!(from_reader, algo.checksum(&data), "{}", algo.name());
        }
    }

    #[test]
    fn test_callback_readable_mid_stream() {
        let mut cb = Crc32.new_callback();
        cb.write(b"abc");
        let partial = cb.checksum();
        assert_eq!(partial, Crc32.checksum(b"abc"));
        cb.write_byte(b'd');
        assert_eq!(cb.checksum(), Crc32.checksum(b"abcd"));
    }

    proptest! {
        #[test]
        fn incremental_equals_whole(
            data in proptest::collection::vec(any::<u8>(), 0..=2048),
            cuts in proptest::collection::vec(0usize..=2048, 0..=8),
        ) {
            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(data.len())).collect();
            cuts.sort_unstable();
            for algo in all() {
                let mut cb = algo.new_callback();
                let mut start = 0;
                for &cut in &cuts {
                    cb.write(&data[start..cut]);
                    start = cut;
                }
                cb.write(&data[start..]);
                prop_assert_eq!(cb.checksum(), algo.checksum(&data));
                prop_assert_eq!(cb.checksum().len(), CHECKSUM_LEN);
            }
        }
    }
}
