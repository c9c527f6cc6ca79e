//! Name-keyed registries of pluggable engines

use std::collections::BTreeMap;
use std::sync::Arc;

use fidd_core::config::CryptoConfig;
use fidd_core::{FiddError, FiddResult};

use crate::aes_cbc::Aes256Cbc;
use crate::aes_ctr::Aes256Ctr;
use crate::checksum::{Adler32, Blake3Truncated, ChecksumAlgorithm, Crc32};
use crate::cipher::{CipherAlgorithm, Unencrypted};
use crate::encoding::{
    Ed25519HexKey, Ed25519PhSignature, Ed25519RawKey, PublicKeyFormat, SignatureFormat,
};
use crate::signature::{Ed25519Ph, SignatureScheme};

/// Anything registered under a stable name.
pub trait Named {
    /// Registry key; case-sensitive, unique within its category.
    fn name(&self) -> &str;
}

/// Engines of one category, keyed by name.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: BTreeMap<String, Arc<T>>,
}

impl<T: ?Sized + Named> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Add an engine. Names are unique within a registry.
    pub fn register(&mut self, engine: Arc<T>) -> FiddResult<()> {
        let name = engine.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(FiddError::DuplicateAlgorithm {
                kind: self.kind,
                name,
            });
        }
        tracing::debug!(kind = self.kind, %name, "registered engine");
        self.entries.insert(name, engine);
        Ok(())
    }

    pub fn get(&self, name: &str) -> FiddResult<Arc<T>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| FiddError::UnknownAlgorithm {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    fn insert_builtin(&mut self, engine: Arc<T>) {
        self.entries.insert(engine.name().to_string(), engine);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// The full set of engines a package reader or writer resolves names against.
pub struct Engines {
    pub ciphers: Registry<dyn CipherAlgorithm>,
    pub checksums: Registry<dyn ChecksumAlgorithm>,
    pub signatures: Registry<dyn SignatureScheme>,
    /// Keyed by `author_public_key_format`
    pub public_key_formats: Registry<dyn PublicKeyFormat>,
    /// Keyed by the `*_signature_format` record fields
    pub signature_formats: Registry<dyn SignatureFormat>,
}

impl Engines {
    /// Empty registries; register engines before use.
    pub fn empty() -> Self {
        Self {
            ciphers: Registry::new("cipher"),
            checksums: Registry::new("checksum"),
            signatures: Registry::new("signature"),
            public_key_formats: Registry::new("public key format"),
            signature_formats: Registry::new("signature format"),
        }
    }

    /// Every built-in engine.
    pub fn standard() -> Self {
        let mut engines = Self::empty();
        let ciphers: [Arc<dyn CipherAlgorithm>; 3] =
            [Arc::new(Unencrypted), Arc::new(Aes256Ctr), Arc::new(Aes256Cbc)];
        for c in ciphers {
            engines.ciphers.insert_builtin(c);
        }
        let checksums: [Arc<dyn ChecksumAlgorithm>; 3] =
            [Arc::new(Crc32), Arc::new(Adler32), Arc::new(Blake3Truncated)];
        for c in checksums {
            engines.checksums.insert_builtin(c);
        }
        engines.signatures.insert_builtin(Arc::new(Ed25519Ph));
        let key_formats: [Arc<dyn PublicKeyFormat>; 2] =
            [Arc::new(Ed25519RawKey), Arc::new(Ed25519HexKey)];
        for f in key_formats {
            engines.public_key_formats.insert_builtin(f);
        }
        engines
            .signature_formats
            .insert_builtin(Arc::new(Ed25519PhSignature));
        engines
    }

    /// Cipher for a section; an absent algorithm means unencrypted.
    pub fn cipher_for(&self, name: Option<&str>) -> FiddResult<Arc<dyn CipherAlgorithm>> {
        self.ciphers.get(name.unwrap_or(crate::cipher::UNENCRYPTED))
    }

    /// Check that every algorithm named in the config is registered.
    pub fn check_config(&self, config: &CryptoConfig) -> FiddResult<()> {
        for (ok, field, name) in [
            (self.ciphers.contains(&config.cipher), "crypto.cipher", &config.cipher),
            (self.checksums.contains(&config.checksum), "crypto.checksum", &config.checksum),
            (self.signatures.contains(&config.signature), "crypto.signature", &config.signature),
        ] {
            if !ok {
                return Err(FiddError::Config(format!("{field}: unknown algorithm {name:?}")));
            }
        }
        Ok(())
    }
}

impl Default for Engines {
    fn default() -> Self {
        Self::standard()
    }
}
