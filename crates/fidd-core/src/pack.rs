//! Length-prefixed multi-blob packing
//!
//! Wire format (all integers big-endian):
//! ```text
//! [4 bytes: blob count N][N x 8 bytes: blob lengths][blob 0][blob 1]...[blob N-1]
//! ```
//!
//! The total length must equal `4 + 8*N + sum(lengths)` exactly. Counts and
//! lengths are signed on the wire, so values with the top bit set are
//! rejected as negative.

use crate::error::{FiddError, FiddResult};

const COUNT_SIZE: u64 = 4;
const LENGTH_SIZE: u64 = 8;

/// Pack an ordered sequence of blobs into one buffer.
pub fn pack<B: AsRef<[u8]>>(blobs: &[B]) -> Vec<u8> {
    let lengths: Vec<u64> = blobs.iter().map(|b| b.as_ref().len() as u64).collect();
    let mut out = pack_header(&lengths);
    for blob in blobs {
        out.extend_from_slice(blob.as_ref());
    }
    out
}

/// Build only the header (count + lengths) for blobs of the given lengths.
///
/// Writing the header followed by the blob bodies in order yields exactly the
/// output of [`pack`], which lets callers stream large blobs.
pub fn pack_header(lengths: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(COUNT_SIZE as usize + LENGTH_SIZE as usize * lengths.len());
    out.extend_from_slice(&(lengths.len() as u32).to_be_bytes());
    for len in lengths {
        out.extend_from_slice(&len.to_be_bytes());
    }
    out
}

/// Total packed size for blobs of the given lengths.
pub fn packed_len(lengths: &[u64]) -> u64 {
    COUNT_SIZE + LENGTH_SIZE * lengths.len() as u64 + lengths.iter().sum::<u64>()
}

/// Unpack a buffer produced by [`pack`].
///
/// Never returns a partial list: any header or length inconsistency is a
/// [`FiddError::Format`].
pub fn unpack(packed: &[u8]) -> FiddResult<Vec<Vec<u8>>> {
    let total = packed.len() as u64;
    if total < COUNT_SIZE {
        return Err(FiddError::Format(format!(
            "packed buffer too short for blob count: {total} bytes"
        )));
    }

    let raw_count = u32::from_be_bytes(read_array(packed, 0));
    if raw_count > i32::MAX as u32 {
        return Err(FiddError::Format(format!(
            "negative blob count: {}",
            raw_count as i32
        )));
    }
    let count = raw_count as u64;

    let header_len = COUNT_SIZE + LENGTH_SIZE * count;
    if total < header_len {
        return Err(FiddError::Format(format!(
            "packed buffer too short for {count} blob lengths: {total} < {header_len} bytes"
        )));
    }

    let mut lengths = Vec::with_capacity(count as usize);
    let mut expected = header_len;
    for i in 0..count as usize {
        let at = (COUNT_SIZE + LENGTH_SIZE * i as u64) as usize;
        let len = u64::from_be_bytes(read_array(packed, at));
        if len > i64::MAX as u64 {
            return Err(FiddError::Format(format!(
                "negative length for blob {i}: {}",
                len as i64
            )));
        }
        expected = expected.checked_add(len).ok_or_else(|| {
            FiddError::Format(format!("blob lengths overflow at blob {i}"))
        })?;
        lengths.push(len as usize);
    }

    if expected != total {
        return Err(FiddError::Format(format!(
            "packed length mismatch: header declares {expected} bytes, buffer has {total}"
        )));
    }

    let mut blobs = Vec::with_capacity(lengths.len());
    let mut pos = header_len as usize;
    for len in lengths {
        blobs.push(packed[pos..pos + len].to_vec());
        pos += len;
    }
    Ok(blobs)
}

fn read_array<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}
