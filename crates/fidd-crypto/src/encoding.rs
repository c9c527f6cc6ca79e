//! Named encodings of public keys and signatures
//!
//! Records store author keys and signatures in a named format
//! (`author_public_key_format`, `*_signature_format`). A format decodes the
//! stored bytes into the raw material its signature scheme verifies with, so
//! new key or certificate encodings plug in without a new scheme.
//!
//! ```text
//! public keys   ed25519-raw | ed25519-hex   -> ED25519PH
//! signatures    ED25519PH                   -> ED25519PH
//! ```

use fidd_core::{FiddError, FiddResult};

use crate::registry::Named;

/// Stored encoding of an author public key.
pub trait PublicKeyFormat: Named + Send + Sync {
    /// Signature scheme the decoded key belongs to.
    fn scheme(&self) -> &str;

    fn encode(&self, raw: &[u8]) -> FiddResult<Vec<u8>>;

    /// Fails with [`FiddError::Signature`] on undecodable input.
    fn decode(&self, encoded: &[u8]) -> FiddResult<Vec<u8>>;
}

/// Stored encoding of a detached signature.
pub trait SignatureFormat: Named + Send + Sync {
    fn scheme(&self) -> &str;

    fn encode(&self, raw: &[u8]) -> FiddResult<Vec<u8>>;

    fn decode(&self, encoded: &[u8]) -> FiddResult<Vec<u8>>;
}

/// 32 raw key bytes, as the ED25519PH scheme produces them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519RawKey;

impl Named for Ed25519RawKey {
    fn name(&self) -> &str {
        "ed25519-raw"
    }
}

impl PublicKeyFormat for Ed25519RawKey {
    fn scheme(&self) -> &str {
        "ED25519PH"
    }

    fn encode(&self, raw: &[u8]) -> FiddResult<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decode(&self, encoded: &[u8]) -> FiddResult<Vec<u8>> {
        Ok(encoded.to_vec())
    }
}

/// Lowercase hex text of the raw key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519HexKey;

impl Named for Ed25519HexKey {
    fn name(&self) -> &str {
        "ed25519-hex"
    }
}

impl PublicKeyFormat for Ed25519HexKey {
    fn scheme(&self) -> &str {
        "ED25519PH"
    }

    fn encode(&self, raw: &[u8]) -> FiddResult<Vec<u8>> {
        Ok(hex::encode(raw).into_bytes())
    }

    fn decode(&self, encoded: &[u8]) -> FiddResult<Vec<u8>> {
        hex::decode(encoded)
            .map_err(|e| FiddError::Signature(format!("ed25519-hex public key: {e}")))
    }
}

/// Raw 64-byte Ed25519ph signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519PhSignature;

impl Named for Ed25519PhSignature {
    fn name(&self) -> &str {
        "ED25519PH"
    }
}

impl SignatureFormat for Ed25519PhSignature {
    fn scheme(&self) -> &str {
        "ED25519PH"
    }

    fn encode(&self, raw: &[u8]) -> FiddResult<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decode(&self, encoded: &[u8]) -> FiddResult<Vec<u8>> {
        Ok(encoded.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{Ed25519Ph, SignatureScheme};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_hex_key_decodes_to_raw() {
        let id = Ed25519Ph.generate_identity(&mut StdRng::seed_from_u64(3));
        let stored = Ed25519HexKey.encode(id.public_key()).unwrap();
        assert_eq!(stored.len(), 64);
        assert_eq!(Ed25519HexKey.decode(&stored).unwrap(), id.public_key());

        let sig = Ed25519Ph.sign(id.private_key(), b"data").unwrap();
        let key = Ed25519HexKey.decode(&stored).unwrap();
        assert!(Ed25519Ph.verify(&key, b"data", &sig).unwrap());
    }

    #[test]
    fn test_bad_hex_is_signature_error() {
        assert!(matches!(
            Ed25519HexKey.decode(b"zz"),
            Err(FiddError::Signature(_))
        ));
    }

    #[test]
    fn test_raw_formats_name_their_scheme() {
        assert_eq!(Ed25519RawKey.name(), Ed25519Ph.public_key_format());
        assert_eq!(Ed25519RawKey.scheme(), Ed25519Ph.name());
        assert_eq!(Ed25519PhSignature.scheme(), Ed25519Ph.name());
    }
}
