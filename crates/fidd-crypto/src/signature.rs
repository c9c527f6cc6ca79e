//! Detached author signatures
//!
//! `verify` answers `Ok(false)` for any tampered data or signature and only
//! fails on key material that cannot be decoded.

use std::fmt;
use std::io::Read;

use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use fidd_core::{FiddError, FiddResult};
use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::registry::Named;
use crate::STREAM_CHUNK_SIZE;

/// Domain separation context for every fidd Ed25519ph signature
const CONTEXT: &[u8] = b"fidd";

/// A private/public key pair bound to the scheme that produced it.
#[derive(Clone)]
pub struct SigningIdentity {
    scheme: String,
    private_key: Zeroizing<Vec<u8>>,
    public_key: Vec<u8>,
}

impl SigningIdentity {
    /// Rebuild an identity from stored private key material.
    pub fn from_private_key(
        scheme: &dyn SignatureScheme,
        private_key: Vec<u8>,
    ) -> FiddResult<Self> {
        let public_key = scheme.public_key_for(&private_key)?;
        Ok(Self {
            scheme: scheme.name().to_string(),
            private_key: Zeroizing::new(private_key),
            public_key,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("scheme", &self.scheme)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

pub trait SignatureScheme: Named + Send + Sync {
    /// Name of the encoding this scheme uses for public keys.
    fn public_key_format(&self) -> &str;

    fn generate_identity(&self, rng: &mut dyn RngCore) -> SigningIdentity;

    fn public_key_for(&self, private_key: &[u8]) -> FiddResult<Vec<u8>>;

    fn sign_reader(&self, private_key: &[u8], data: &mut dyn Read) -> FiddResult<Vec<u8>>;

    fn verify_reader(
        &self,
        public_key: &[u8],
        data: &mut dyn Read,
        signature: &[u8],
    ) -> FiddResult<bool>;

    fn sign(&self, private_key: &[u8], data: &[u8]) -> FiddResult<Vec<u8>> {
        self.sign_reader(private_key, &mut &data[..])
    }

    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> FiddResult<bool> {
        self.verify_reader(public_key, &mut &data[..], signature)
    }
}

/// Ed25519ph (RFC 8032 prehashed variant) over SHA-512, so arbitrarily large
/// inputs can be signed as streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Ph;

fn prehash(data: &mut dyn Read) -> FiddResult<Sha512> {
    let mut hasher = Sha512::new();
    let mut buf = [0u8; STREAM_CHUNK_SIZE];
    loop {
        let n = data.read(&mut buf)?;
        if n == 0 {
            return Ok(hasher);
        }
        hasher.update(&buf[..n]);
    }
}

fn signing_key(private_key: &[u8]) -> FiddResult<SigningKey> {
    let seed: &[u8; 32] = private_key.try_into().map_err(|_| {
        FiddError::Signature(format!(
            "ed25519 private key must be 32 bytes, got {}",
            private_key.len()
        ))
    })?;
    Ok(SigningKey::from_bytes(seed))
}

fn verifying_key(public_key: &[u8]) -> FiddResult<VerifyingKey> {
    let bytes: &[u8; 32] = public_key.try_into().map_err(|_| {
        FiddError::Signature(format!(
            "ed25519 public key must be 32 bytes, got {}",
            public_key.len()
        ))
    })?;
    VerifyingKey::from_bytes(bytes)
        .map_err(|e| FiddError::Signature(format!("invalid ed25519 public key: {e}")))
}

impl Named for Ed25519Ph {
    fn name(&self) -> &str {
        "ED25519PH"
    }
}

impl SignatureScheme for Ed25519Ph {
    fn public_key_format(&self) -> &str {
        "ed25519-raw"
    }

    fn generate_identity(&self, rng: &mut dyn RngCore) -> SigningIdentity {
        let mut seed = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut seed[..]);
        let key = SigningKey::from_bytes(&seed);
        SigningIdentity {
            scheme: self.name().to_string(),
            private_key: Zeroizing::new(seed.to_vec()),
            public_key: key.verifying_key().to_bytes().to_vec(),
        }
    }

    fn public_key_for(&self, private_key: &[u8]) -> FiddResult<Vec<u8>> {
        Ok(signing_key(private_key)?.verifying_key().to_bytes().to_vec())
    }

    fn sign_reader(&self, private_key: &[u8], data: &mut dyn Read) -> FiddResult<Vec<u8>> {
        let key = signing_key(private_key)?;
        let digest = prehash(data)?;
        let signature = key
            .sign_prehashed(digest, Some(CONTEXT))
            .map_err(|e| FiddError::Signature(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify_reader(
        &self,
        public_key: &[u8],
        data: &mut dyn Read,
        signature: &[u8],
    ) -> FiddResult<bool> {
        let key = verifying_key(public_key)?;
        let Ok(bytes) = <&[u8; 64]>::try_from(signature) else {
            return Ok(false);
        };
        let signature = Signature::from_bytes(bytes);
        let digest = prehash(data)?;
        Ok(key
            .verify_prehashed(digest, Some(CONTEXT), &signature)
            .is_ok())
    }
}
