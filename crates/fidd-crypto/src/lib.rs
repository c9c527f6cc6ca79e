//! fidd-crypto: pluggable engines for fidd packages
//!
//! Every engine is looked up by a stable, case-sensitive name, which is what
//! a `FiddKey` records for each section:
//!
//! ```text
//! ciphers     none | AES-256-CTR | AES-256-CBC
//! checksums   CRC32 | ADLER32 | BLAKE3-32        (always 4 bytes, big-endian)
//! signatures  ED25519PH
//! key formats ed25519-raw | ed25519-hex
//! sig formats ED25519PH
//! ```
//!
//! Engines hold no per-call state: a single instance serves concurrent
//! callers. Streaming operations are blocking; abandoning the underlying
//! reader or writer is the only cancellation.

pub mod aes_cbc;
pub mod aes_ctr;
pub mod checksum;
pub mod cipher;
pub mod encoding;
pub mod registry;
pub mod signature;

pub use checksum::{Checksum, ChecksumAlgorithm, ChecksumCallback, CHECKSUM_LEN};
pub use cipher::{CipherAlgorithm, Unencrypted};
pub use encoding::{PublicKeyFormat, SignatureFormat};
pub use registry::{Engines, Named, Registry};
pub use signature::{Ed25519Ph, SignatureScheme, SigningIdentity};

/// Read size used by every streaming operation
pub const STREAM_CHUNK_SIZE: usize = 4096;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;
