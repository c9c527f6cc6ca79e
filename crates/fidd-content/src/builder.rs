//! Package authoring
//!
//! Body layout: the metadata section first, then one section per logical file
//! in the order they were added. Every section gets its own key and its
//! checksum is taken over the ciphertext while it is written.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::sync::Arc;

use fidd_core::config::CryptoConfig;
use fidd_core::pack::pack_header;
use fidd_core::types::validate_file_path;
use fidd_core::{
    FiddError, FiddKey, FiddResult, LogicalFileMetadata, LogicalFileSection, MessageMetadata,
    Section, Serializers,
};
use fidd_crypto::cipher::UNENCRYPTED;
use fidd_crypto::{
    ChecksumAlgorithm, CipherAlgorithm, Engines, Named, PublicKeyFormat, SignatureFormat,
    SignatureScheme, SigningIdentity,
};
use rand::RngCore;

/// One authored message: encrypted body plus the FiddKey that unlocks it.
#[derive(Debug, Clone)]
pub struct Package {
    metadata: MessageMetadata,
    body: Vec<u8>,
    key: FiddKey,
}

impl Package {
    pub fn message_number(&self) -> u64 {
        self.metadata.message_number()
    }

    /// Metadata as stored (author key stamped in when signed).
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn key(&self) -> &FiddKey {
        &self.key
    }

    pub fn into_parts(self) -> (Vec<u8>, FiddKey) {
        (self.body, self.key)
    }
}

struct PendingFile {
    path: String,
    metadata: LogicalFileMetadata,
    data: Vec<u8>,
}

/// Builds a [`Package`] from message metadata and logical files.
pub struct PackageBuilder {
    engines: Arc<Engines>,
    serializers: Serializers,
    metadata: MessageMetadata,
    files: Vec<PendingFile>,
    cipher: String,
    checksum: Option<String>,
    identity: Option<SigningIdentity>,
    public_key_format: Option<String>,
}

/// A signing identity resolved against the engine registries.
struct Signer<'a> {
    identity: &'a SigningIdentity,
    scheme: Arc<dyn SignatureScheme>,
    key_format: Arc<dyn PublicKeyFormat>,
    signature_format: Arc<dyn SignatureFormat>,
}

impl<'a> Signer<'a> {
    fn resolve(
        engines: &Engines,
        identity: &'a SigningIdentity,
        public_key_format: Option<&str>,
    ) -> FiddResult<Self> {
        let scheme = engines.signatures.get(identity.scheme())?;
        let key_format = engines
            .public_key_formats
            .get(public_key_format.unwrap_or(scheme.public_key_format()))?;
        let signature_format = engines.signature_formats.get(scheme.name())?;
        for (kind, format_scheme) in [
            ("public key format", key_format.scheme()),
            ("signature format", signature_format.scheme()),
        ] {
            if format_scheme != scheme.name() {
                return Err(FiddError::InvalidRecord(format!(
                    "{kind} is for {format_scheme}, identity signs with {}",
                    scheme.name()
                )));
            }
        }
        Ok(Self {
            identity,
            scheme,
            key_format,
            signature_format,
        })
    }

    fn sign(&self, data: &[u8]) -> FiddResult<Vec<u8>> {
        let raw = self.scheme.sign(self.identity.private_key(), data)?;
        self.signature_format.encode(&raw)
    }

    fn format(&self) -> &str {
        self.signature_format.name()
    }
}

impl PackageBuilder {
    /// A builder using the default crypto settings.
    pub fn new(engines: Arc<Engines>, metadata: MessageMetadata) -> Self {
        let defaults = CryptoConfig::default();
        Self {
            engines,
            serializers: Serializers::default(),
            metadata,
            files: Vec::new(),
            cipher: defaults.cipher,
            checksum: Some(defaults.checksum),
            identity: None,
            public_key_format: None,
        }
    }

    /// Take cipher and checksum names from config.
    pub fn with_config(mut self, config: &CryptoConfig) -> Self {
        self.cipher = config.cipher.clone();
        self.checksum = Some(config.checksum.clone());
        self
    }

    pub fn serializers(mut self, serializers: Serializers) -> Self {
        self.serializers = serializers;
        self
    }

    pub fn cipher(mut self, name: impl Into<String>) -> Self {
        self.cipher = name.into();
        self
    }

    /// Checksum algorithm for every section; `None` leaves sections unchecked.
    pub fn checksum(mut self, name: Option<&str>) -> Self {
        self.checksum = name.map(str::to_string);
        self
    }

    /// Sign the key, the metadata, and every file with this identity.
    pub fn sign_with(mut self, identity: SigningIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Encoding of the author public key stamped into the metadata.
    /// Defaults to the signing scheme's native format.
    pub fn public_key_format(mut self, name: impl Into<String>) -> Self {
        self.public_key_format = Some(name.into());
        self
    }

    pub fn add_file(
        mut self,
        path: impl Into<String>,
        metadata: LogicalFileMetadata,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.files.push(PendingFile {
            path: path.into(),
            metadata,
            data: data.into(),
        });
        self
    }

    pub fn build(self) -> FiddResult<Package> {
        self.build_with_rng(&mut rand::thread_rng())
    }

    pub fn build_with_rng(self, rng: &mut dyn RngCore) -> FiddResult<Package> {
        self.validate()?;

        let Self {
            engines,
            serializers,
            mut metadata,
            mut files,
            cipher,
            checksum,
            identity,
            public_key_format,
        } = self;

        let cipher = engines.ciphers.get(&cipher)?;
        let checksum = checksum
            .as_deref()
            .map(|name| engines.checksums.get(name))
            .transpose()?;

        let signer = identity
            .as_ref()
            .map(|id| Signer::resolve(&engines, id, public_key_format.as_deref()))
            .transpose()?;

        let mut metadata_signature = Vec::new();
        let metadata_bytes = match &signer {
            Some(signer) => {
                let public_key = signer.key_format.encode(signer.identity.public_key())?;
                metadata = metadata
                    .to_builder()
                    .author_public_key(signer.key_format.name(), public_key)
                    .metadata_signature_format(Some(signer.format().to_string()))
                    .build()?;
                for file in &mut files {
                    let signature = signer.sign(&file.data)?;
                    file.metadata = file.metadata.signed(signer.format(), signature);
                }
                let bytes = serializers.message.serialize(&metadata)?;
                metadata_signature = signer.sign(&bytes)?;
                bytes
            }
            None => serializers.message.serialize(&metadata)?,
        };

        let mut blobs = vec![metadata_bytes, metadata_signature];
        for file in &files {
            blobs.push(serializers.file.serialize(&file.metadata)?);
        }

        let mut body = Vec::new();
        let header = pack_header(&blobs.iter().map(|b| b.len() as u64).collect::<Vec<_>>());
        let mut streams: Vec<Cursor<&[u8]>> = std::iter::once(header.as_slice())
            .chain(blobs.iter().map(Vec::as_slice))
            .map(Cursor::new)
            .collect();
        let mut inputs: Vec<&mut dyn Read> =
            streams.iter_mut().map(|s| s as &mut dyn Read).collect();
        let metadata_section = encrypt_section(
            cipher.as_ref(),
            checksum.as_deref(),
            rng,
            &mut inputs,
            &mut body,
        )?;

        let mut file_sections = Vec::with_capacity(files.len());
        for file in &files {
            let mut data = file.data.as_slice();
            let section = encrypt_section(
                cipher.as_ref(),
                checksum.as_deref(),
                rng,
                &mut [&mut data],
                &mut body,
            )?;
            tracing::debug!(
                path = %file.path,
                plain = file.data.len(),
                stored = section.length(),
                "encrypted logical file"
            );
            file_sections.push(LogicalFileSection::new(file.path.clone(), section)?);
        }

        let mut key = FiddKey::new(metadata_section, file_sections)?;
        if let Some(signer) = &signer {
            let signature = signer.sign(&serializers.key.serialize(&key)?)?;
            key = key.signed(signer.format(), signature);
        }

        tracing::debug!(
            message = metadata.message_number(),
            files = files.len(),
            bytes = body.len(),
            cipher = cipher.name(),
            signed = signer.is_some(),
            "built package"
        );
        Ok(Package {
            metadata,
            body,
            key,
        })
    }

    fn validate(&self) -> FiddResult<()> {
        if self.metadata.is_delete() && !self.files.is_empty() {
            return Err(FiddError::InvalidRecord(format!(
                "delete message {} must not carry logical files",
                self.metadata.message_number()
            )));
        }
        let mut seen = HashSet::new();
        for file in &self.files {
            validate_file_path(&file.path)?;
            if !seen.insert(file.path.as_str()) {
                return Err(FiddError::InvalidRecord(format!(
                    "duplicate logical file path: {}",
                    file.path
                )));
            }
        }
        Ok(())
    }
}

/// Encrypt the concatenated inputs as one new section at the end of `body`.
fn encrypt_section(
    cipher: &dyn CipherAlgorithm,
    checksum: Option<&dyn ChecksumAlgorithm>,
    rng: &mut dyn RngCore,
    inputs: &mut [&mut dyn Read],
    body: &mut Vec<u8>,
) -> FiddResult<Section> {
    let offset = body.len() as u64;
    let key_data = cipher.generate_key_data(rng);
    let mut callback = checksum.map(|c| c.new_callback());
    let written = match callback.as_mut() {
        Some(cb) => cipher.encrypt_streams(&key_data, inputs, body, &mut [&mut **cb])?,
        None => cipher.encrypt_streams(&key_data, inputs, body, &mut [])?,
    };

    let mut section = Section::new(offset, written);
    if cipher.name() != UNENCRYPTED {
        section = section.with_encryption(cipher.name(), key_data);
    }
    if let (Some(algorithm), Some(cb)) = (checksum, callback) {
        section = section.with_checksum(algorithm.name(), cb.checksum().to_vec());
    }
    Ok(section)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidd_core::pack::unpack;
    use fidd_core::UpdateType;
    use fidd_crypto::SignatureScheme;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn engines() -> Arc<Engines> {
        Arc::new(Engines::standard())
    }

    fn file_meta() -> LogicalFileMetadata {
        LogicalFileMetadata::builder(UpdateType::CreateOrOverride)
            .mime_type("text/plain")
            .build()
            .unwrap()
    }

    #[test]
    fn test_unencrypted_layout() {
        let meta = MessageMetadata::builder(1, "post").build().unwrap();
        let package = PackageBuilder::new(engines(), meta)
            .cipher("none")
            .add_file("a.txt", file_meta(), b"alpha".to_vec())
            .add_file("dir/b.txt", file_meta(), b"bravo!".to_vec())
            .build()
            .unwrap();

        let key = package.key();
        let meta_section = key.metadata_section();
        assert_eq!(meta_section.offset(), 0);
        assert!(meta_section.encryption_algorithm().is_none());
        assert_eq!(meta_section.checksum_algorithm(), Some("CRC32"));

        let files = key.logical_files();
        assert_eq!(files.len(), 2);
        let a = files[0].section();
        assert_eq!(a.offset(), meta_section.length());
        assert_eq!(&package.body()[a.offset() as usize..][..5], b"alpha");
        assert_eq!(files[1].section().offset(), a.offset() + 5);
        assert_eq!(package.body().len() as u64, a.offset() + 5 + 6);

        let blobs = unpack(&package.body()[..meta_section.length() as usize]).unwrap();
        assert_eq!(blobs.len(), 4);
        assert!(blobs[1].is_empty());
    }

    #[test]
    fn test_sections_get_independent_keys() {
        let meta = MessageMetadata::builder(2, "post").build().unwrap();
        let package = PackageBuilder::new(engines(), meta)
            .add_file("a", file_meta(), vec![0u8; 32])
            .add_file("b", file_meta(), vec![0u8; 32])
            .build_with_rng(&mut StdRng::seed_from_u64(5))
            .unwrap();
        let keys: Vec<&[u8]> = package.key().sections().map(|s| s.encryption_key_data()).collect();
        assert_eq!(keys.len(), 3);
        assert_ne!(keys[1], keys[2]);
        assert_ne!(keys[0], keys[1]);
    }

    #[test]
    fn test_checksum_covers_ciphertext() {
        let engines = engines();
        let meta = MessageMetadata::builder(3, "post").build().unwrap();
        let package = PackageBuilder::new(engines.clone(), meta)
            .cipher("AES-256-CBC")
            .checksum(Some("ADLER32"))
            .add_file("f", file_meta(), b"some file content".to_vec())
            .build()
            .unwrap();
        let section = package.key().logical_files()[0].section();
        let stored = &package.body()[section.offset() as usize..][..section.length() as usize];
        let adler = engines.checksums.get("ADLER32").unwrap();
        assert_eq!(section.checksum(), Some(&adler.checksum(stored)[..]));
    }

    #[test]
    fn test_rejects_invalid_files() {
        let meta = MessageMetadata::builder(4, "post").build().unwrap();
        let dup = PackageBuilder::new(engines(), meta.clone())
            .add_file("a", file_meta(), b"1".to_vec())
            .add_file("a", file_meta(), b"2".to_vec())
            .build();
        assert!(matches!(dup, Err(FiddError::InvalidRecord(_))));

        let escape = PackageBuilder::new(engines(), meta)
            .add_file("../a", file_meta(), b"1".to_vec())
            .build();
        assert!(matches!(escape, Err(FiddError::InvalidRecord(_))));

        let delete = MessageMetadata::builder(5, "post").delete(true).build().unwrap();
        let with_files = PackageBuilder::new(engines(), delete.clone())
            .add_file("a", file_meta(), b"1".to_vec())
            .build();
        assert!(matches!(with_files, Err(FiddError::InvalidRecord(_))));
        assert!(PackageBuilder::new(engines(), delete).build().is_ok());
    }

    #[test]
    fn test_unknown_algorithm() {
        let meta = MessageMetadata::builder(6, "post").build().unwrap();
        let result = PackageBuilder::new(engines(), meta).cipher("ROT13").build();
        assert!(matches!(result, Err(FiddError::UnknownAlgorithm { kind: "cipher", .. })));
    }

    #[test]
    fn test_signing_stamps_author_key() {
        let engines = engines();
        let scheme = engines.signatures.get("ED25519PH").unwrap();
        let identity = scheme.generate_identity(&mut StdRng::seed_from_u64(9));
        let meta = MessageMetadata::builder(7, "post").build().unwrap();
        let package = PackageBuilder::new(engines.clone(), meta)
            .sign_with(identity.clone())
            .add_file("a", file_meta(), b"signed".to_vec())
            .build()
            .unwrap();

        assert_eq!(package.metadata().author_public_key(), Some(identity.public_key()));
        assert_eq!(package.metadata().author_public_key_format(), Some("ed25519-raw"));
        assert_eq!(package.key().author_signature_format(), Some("ED25519PH"));

        let unsigned = Serializers::default().key.serialize(&package.key().unsigned()).unwrap();
        let signature = package.key().author_signature().unwrap();
        assert!(scheme.verify(identity.public_key(), &unsigned, signature).unwrap());
    }
}
