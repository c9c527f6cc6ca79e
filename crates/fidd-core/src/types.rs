use serde::{Deserialize, Serialize};

use crate::error::{FiddError, FiddResult};
use crate::FORMAT_VERSION;

/// A described byte range inside a package body.
///
/// Absent algorithm fields mean the section is stored unencrypted / unchecked.
/// Key data is opaque here; its layout belongs to the named cipher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    offset: u64,
    length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encryption_algorithm: Option<String>,
    #[serde(default, with = "b64", skip_serializing_if = "Option::is_none")]
    encryption_key_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum_algorithm: Option<String>,
    #[serde(default, with = "b64", skip_serializing_if = "Option::is_none")]
    checksum: Option<Vec<u8>>,
}

impl Section {
    /// An unencrypted, unchecked section.
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            encryption_algorithm: None,
            encryption_key_data: None,
            checksum_algorithm: None,
            checksum: None,
        }
    }

    pub fn with_encryption(mut self, algorithm: impl Into<String>, key_data: Vec<u8>) -> Self {
        self.encryption_algorithm = Some(algorithm.into());
        self.encryption_key_data = Some(key_data);
        self
    }

    pub fn with_checksum(mut self, algorithm: impl Into<String>, checksum: Vec<u8>) -> Self {
        self.checksum_algorithm = Some(algorithm.into());
        self.checksum = Some(checksum);
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn encryption_algorithm(&self) -> Option<&str> {
        self.encryption_algorithm.as_deref()
    }

    pub fn encryption_key_data(&self) -> &[u8] {
        self.encryption_key_data.as_deref().unwrap_or_default()
    }

    pub fn checksum_algorithm(&self) -> Option<&str> {
        self.checksum_algorithm.as_deref()
    }

    pub fn checksum(&self) -> Option<&[u8]> {
        self.checksum.as_deref()
    }

    /// Check that `[offset, offset + length)` (section-relative) lies inside this section.
    pub fn check_range(&self, offset: u64, length: u64) -> FiddResult<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.length => Ok(()),
            _ => Err(FiddError::range(offset, length, self.length)),
        }
    }

    /// Check that the section lies inside a body of `body_len` bytes.
    pub fn check_within(&self, body_len: u64) -> FiddResult<()> {
        match self.offset.checked_add(self.length) {
            Some(end) if end <= body_len => Ok(()),
            _ => Err(FiddError::Format(format!(
                "section [{}, +{}) exceeds body of {} bytes",
                self.offset, self.length, body_len
            ))),
        }
    }

    fn validate(&self) -> FiddResult<()> {
        if self.encryption_algorithm.is_none() && self.encryption_key_data.is_some() {
            return Err(FiddError::InvalidRecord(
                "section carries key data without an encryption algorithm".into(),
            ));
        }
        if self.checksum_algorithm.is_some() != self.checksum.is_some() {
            return Err(FiddError::InvalidRecord(
                "section checksum algorithm and checksum must be set together".into(),
            ));
        }
        if self.offset.checked_add(self.length).is_none() {
            return Err(FiddError::InvalidRecord("section end overflows u64".into()));
        }
        Ok(())
    }
}

/// A section holding one logical file, identified by its relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFileSection {
    file_path: String,
    #[serde(flatten)]
    section: Section,
}

impl LogicalFileSection {
    pub fn new(file_path: impl Into<String>, section: Section) -> FiddResult<Self> {
        let file_path = file_path.into();
        validate_file_path(&file_path)?;
        Ok(Self { file_path, section })
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn section(&self) -> &Section {
        &self.section
    }
}

/// Section index of one package.
///
/// Immutable once built. The author signature covers the serialized index
/// with both signature fields cleared (see [`FiddKey::unsigned`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiddKey {
    metadata_section: Section,
    logical_files: Vec<LogicalFileSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author_signature_format: Option<String>,
    #[serde(default, with = "b64", skip_serializing_if = "Option::is_none")]
    author_signature: Option<Vec<u8>>,
}

impl FiddKey {
    pub fn new(metadata_section: Section, logical_files: Vec<LogicalFileSection>) -> FiddResult<Self> {
        let key = Self {
            metadata_section,
            logical_files,
            author_signature_format: None,
            author_signature: None,
        };
        key.validate()?;
        Ok(key)
    }

    pub fn validate(&self) -> FiddResult<()> {
        for section in self.sections() {
            section.validate()?;
        }
        let mut seen = std::collections::HashSet::new();
        for file in &self.logical_files {
            validate_file_path(&file.file_path)?;
            if !seen.insert(file.file_path.as_str()) {
                return Err(FiddError::InvalidRecord(format!(
                    "duplicate logical file path: {}",
                    file.file_path
                )));
            }
        }
        if self.author_signature_format.is_some() != self.author_signature.is_some() {
            return Err(FiddError::InvalidRecord(
                "author signature and its format must be set together".into(),
            ));
        }
        Ok(())
    }

    /// Copy of this key carrying the given author signature.
    pub fn signed(&self, format: impl Into<String>, signature: Vec<u8>) -> Self {
        Self {
            author_signature_format: Some(format.into()),
            author_signature: Some(signature),
            ..self.clone()
        }
    }

    /// Copy of this key with the author signature removed (the signed form).
    pub fn unsigned(&self) -> Self {
        Self {
            author_signature_format: None,
            author_signature: None,
            ..self.clone()
        }
    }

    pub fn metadata_section(&self) -> &Section {
        &self.metadata_section
    }

    pub fn logical_files(&self) -> &[LogicalFileSection] {
        &self.logical_files
    }

    /// Position and section of the logical file with the given path.
    pub fn find_file(&self, file_path: &str) -> Option<(usize, &LogicalFileSection)> {
        self.logical_files
            .iter()
            .enumerate()
            .find(|(_, f)| f.file_path == file_path)
    }

    pub fn author_signature_format(&self) -> Option<&str> {
        self.author_signature_format.as_deref()
    }

    pub fn author_signature(&self) -> Option<&[u8]> {
        self.author_signature.as_deref()
    }

    /// Every section, metadata first.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        std::iter::once(&self.metadata_section).chain(self.logical_files.iter().map(|f| &f.section))
    }

    /// Check that every section fits inside a body of `body_len` bytes.
    pub fn check_within(&self, body_len: u64) -> FiddResult<()> {
        self.sections().try_for_each(|s| s.check_within(body_len))
    }
}

/// Update semantics of a logical file within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    CreateOrOverride,
    Delete,
}

/// Identity and revision lineage of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    format_version: u32,
    message_number: u64,
    post_id: String,
    version_number: u32,
    is_new_or_squash: bool,
    is_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_message_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author_public_key_format: Option<String>,
    #[serde(default, with = "b64", skip_serializing_if = "Option::is_none")]
    author_public_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata_signature_format: Option<String>,
}

impl MessageMetadata {
    pub fn builder(message_number: u64, post_id: impl Into<String>) -> MessageMetadataBuilder {
        MessageMetadataBuilder {
            inner: MessageMetadata {
                format_version: FORMAT_VERSION,
                message_number,
                post_id: post_id.into(),
                version_number: 0,
                is_new_or_squash: true,
                is_delete: false,
                previous_message_number: None,
                author_public_key_format: None,
                author_public_key: None,
                metadata_signature_format: None,
            },
        }
    }

    /// Start a builder pre-filled with this record's fields.
    pub fn to_builder(&self) -> MessageMetadataBuilder {
        MessageMetadataBuilder {
            inner: self.clone(),
        }
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn message_number(&self) -> u64 {
        self.message_number
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn version_number(&self) -> u32 {
        self.version_number
    }

    pub fn is_new_or_squash(&self) -> bool {
        self.is_new_or_squash
    }

    pub fn is_delete(&self) -> bool {
        self.is_delete
    }

    pub fn previous_message_number(&self) -> Option<u64> {
        self.previous_message_number
    }

    pub fn author_public_key_format(&self) -> Option<&str> {
        self.author_public_key_format.as_deref()
    }

    pub fn author_public_key(&self) -> Option<&[u8]> {
        self.author_public_key.as_deref()
    }

    pub fn metadata_signature_format(&self) -> Option<&str> {
        self.metadata_signature_format.as_deref()
    }

    pub fn validate(&self) -> FiddResult<()> {
        if self.post_id.is_empty() {
            return Err(FiddError::InvalidRecord("post_id must not be empty".into()));
        }
        if !self.is_new_or_squash {
            match self.previous_message_number {
                None => {
                    return Err(FiddError::InvalidRecord(format!(
                        "message {} is a revision but has no previous_message_number",
                        self.message_number
                    )))
                }
                Some(prev) if prev >= self.message_number => {
                    return Err(FiddError::InvalidRecord(format!(
                        "previous_message_number {prev} must be lower than {}",
                        self.message_number
                    )))
                }
                Some(_) => {}
            }
        }
        if self.author_public_key_format.is_some() != self.author_public_key.is_some() {
            return Err(FiddError::InvalidRecord(
                "author public key and its format must be set together".into(),
            ));
        }
        Ok(())
    }
}

/// Validating builder for [`MessageMetadata`].
#[derive(Debug, Clone)]
pub struct MessageMetadataBuilder {
    inner: MessageMetadata,
}

impl MessageMetadataBuilder {
    pub fn version_number(mut self, version: u32) -> Self {
        self.inner.version_number = version;
        self
    }

    pub fn new_or_squash(mut self, value: bool) -> Self {
        self.inner.is_new_or_squash = value;
        self
    }

    pub fn delete(mut self, value: bool) -> Self {
        self.inner.is_delete = value;
        self
    }

    /// Mark this message as a revision of `previous` (clears new-or-squash).
    pub fn revision_of(mut self, previous: u64) -> Self {
        self.inner.previous_message_number = Some(previous);
        self.inner.is_new_or_squash = false;
        self
    }

    pub fn previous_message_number(mut self, previous: Option<u64>) -> Self {
        self.inner.previous_message_number = previous;
        self
    }

    pub fn author_public_key(mut self, format: impl Into<String>, key: Vec<u8>) -> Self {
        self.inner.author_public_key_format = Some(format.into());
        self.inner.author_public_key = Some(key);
        self
    }

    pub fn metadata_signature_format(mut self, format: Option<String>) -> Self {
        self.inner.metadata_signature_format = format;
        self
    }

    pub fn build(self) -> FiddResult<MessageMetadata> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

/// Per-file metadata carried in the metadata section of its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFileMetadata {
    update_type: UpdateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding_type: Option<String>,
    /// Unix timestamp, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<u64>,
    /// Unix timestamp, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author_file_signature_format: Option<String>,
    #[serde(default, with = "b64", skip_serializing_if = "Option::is_none")]
    author_file_signature: Option<Vec<u8>>,
}

impl LogicalFileMetadata {
    pub fn builder(update_type: UpdateType) -> LogicalFileMetadataBuilder {
        LogicalFileMetadataBuilder {
            inner: LogicalFileMetadata {
                update_type,
                mime_type: None,
                encoding_type: None,
                created_at: None,
                updated_at: None,
                author_file_signature_format: None,
                author_file_signature: None,
            },
        }
    }

    /// Copy carrying the author's signature over the file's plaintext.
    pub fn signed(&self, format: impl Into<String>, signature: Vec<u8>) -> Self {
        Self {
            author_file_signature_format: Some(format.into()),
            author_file_signature: Some(signature),
            ..self.clone()
        }
    }

    pub fn update_type(&self) -> UpdateType {
        self.update_type
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn encoding_type(&self) -> Option<&str> {
        self.encoding_type.as_deref()
    }

    pub fn created_at(&self) -> Option<u64> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<u64> {
        self.updated_at
    }

    pub fn author_file_signature_format(&self) -> Option<&str> {
        self.author_file_signature_format.as_deref()
    }

    pub fn author_file_signature(&self) -> Option<&[u8]> {
        self.author_file_signature.as_deref()
    }

    pub fn validate(&self) -> FiddResult<()> {
        if self.author_file_signature_format.is_some() != self.author_file_signature.is_some() {
            return Err(FiddError::InvalidRecord(
                "file signature and its format must be set together".into(),
            ));
        }
        if let (Some(created), Some(updated)) = (self.created_at, self.updated_at) {
            if updated < created {
                return Err(FiddError::InvalidRecord(format!(
                    "updated_at {updated} precedes created_at {created}"
                )));
            }
        }
        Ok(())
    }
}

/// Validating builder for [`LogicalFileMetadata`].
#[derive(Debug, Clone)]
pub struct LogicalFileMetadataBuilder {
    inner: LogicalFileMetadata,
}

impl LogicalFileMetadataBuilder {
    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.inner.mime_type = Some(mime.into());
        self
    }

    pub fn encoding_type(mut self, encoding: impl Into<String>) -> Self {
        self.inner.encoding_type = Some(encoding.into());
        self
    }

    pub fn created_at(mut self, millis: u64) -> Self {
        self.inner.created_at = Some(millis);
        self
    }

    pub fn updated_at(mut self, millis: u64) -> Self {
        self.inner.updated_at = Some(millis);
        self
    }

    pub fn build(self) -> FiddResult<LogicalFileMetadata> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

/// A reader entitled to section keys, known by its public key.
///
/// `label` names the subscriber's key files (`<n>.<label>.fiddkey`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    label: String,
    public_key_format: String,
    #[serde(with = "b64::required")]
    public_key: Vec<u8>,
}

impl Subscriber {
    pub fn new(
        label: impl Into<String>,
        public_key_format: impl Into<String>,
        public_key: Vec<u8>,
    ) -> FiddResult<Self> {
        let subscriber = Self {
            label: label.into(),
            public_key_format: public_key_format.into(),
            public_key,
        };
        subscriber.validate()?;
        Ok(subscriber)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn public_key_format(&self) -> &str {
        &self.public_key_format
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn validate(&self) -> FiddResult<()> {
        if self.label.is_empty()
            || !self
                .label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(FiddError::InvalidRecord(format!(
                "subscriber label must be a non-empty [A-Za-z0-9_-] word: {:?}",
                self.label
            )));
        }
        if self.public_key_format.is_empty() || self.public_key.is_empty() {
            return Err(FiddError::InvalidRecord(format!(
                "subscriber {}: public key and its format are required",
                self.label
            )));
        }
        Ok(())
    }
}

/// Logical file paths are non-empty, relative, and never climb out of the message.
pub fn validate_file_path(path: &str) -> FiddResult<()> {
    if path.is_empty() {
        return Err(FiddError::InvalidRecord("empty logical file path".into()));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(FiddError::InvalidRecord(format!(
            "logical file path must be relative: {path}"
        )));
    }
    if path.split(|c: char| c == '/' || c == '\\').any(|c| c == ".." || c.is_empty()) {
        return Err(FiddError::InvalidRecord(format!(
            "invalid logical file path: {path}"
        )));
    }
    Ok(())
}

/// Optional byte fields as standard base64 strings
mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }

    /// Required byte fields
    pub mod required {
        use super::*;

        pub fn serialize<S: Serializer>(value: &[u8], s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&STANDARD.encode(value))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
            let encoded = String::deserialize(d)?;
            STANDARD.decode(encoded).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> FiddKey {
        let meta = Section::new(0, 100)
            .with_encryption("AES-256-CTR", vec![1u8; 48])
            .with_checksum("CRC32", vec![0, 1, 2, 3]);
        let file = LogicalFileSection::new("docs/readme.md", Section::new(100, 50)).unwrap();
        FiddKey::new(meta, vec![file]).unwrap()
    }

    #[test]
    fn test_section_range_checks() {
        let section = Section::new(10, 100);
        assert!(section.check_range(0, 100).is_ok());
        assert!(section.check_range(99, 1).is_ok());
        assert!(section.check_range(100, 0).is_ok());
        assert!(matches!(
            section.check_range(50, 51),
            Err(FiddError::Range { limit: 100, .. })
        ));
        assert!(section.check_range(u64::MAX, 2).is_err());

        assert!(section.check_within(110).is_ok());
        assert!(matches!(section.check_within(109), Err(FiddError::Format(_))));
    }

    #[test]
    fn test_fidd_key_find_file() {
        let key = sample_key();
        let (idx, file) = key.find_file("docs/readme.md").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(file.section().offset(), 100);
        assert!(key.find_file("missing").is_none());
        assert_eq!(key.sections().count(), 2);
    }

    #[test]
    fn test_fidd_key_rejects_duplicate_paths() {
        let a = LogicalFileSection::new("a.txt", Section::new(0, 1)).unwrap();
        let b = LogicalFileSection::new("a.txt", Section::new(1, 1)).unwrap();
        assert!(FiddKey::new(Section::new(0, 0), vec![a, b]).is_err());
    }

    #[test]
    fn test_signed_and_unsigned() {
        let key = sample_key();
        let signed = key.signed("ED25519PH", vec![9u8; 64]);
        assert_eq!(signed.author_signature(), Some([9u8; 64].as_slice()));
        assert_eq!(signed.unsigned(), key);
    }

    #[test]
    fn test_invalid_file_paths() {
        for bad in ["", "/etc/passwd", "a/../b", "a//b", "..", "dir/"] {
            assert!(validate_file_path(bad).is_err(), "{bad:?} should be rejected");
        }
        for good in ["a", "a/b.txt", "img/logo.png"] {
            assert!(validate_file_path(good).is_ok());
        }
    }

    #[test]
    fn test_message_metadata_builder_defaults() {
        let meta = MessageMetadata::builder(7, "post-1").build().unwrap();
        assert_eq!(meta.format_version(), FORMAT_VERSION);
        assert!(meta.is_new_or_squash());
        assert!(!meta.is_delete());
        assert_eq!(meta.previous_message_number(), None);
    }

    #[test]
    fn test_revision_requires_lower_previous() {
        assert!(MessageMetadata::builder(7, "p").revision_of(3).build().is_ok());
        assert!(MessageMetadata::builder(7, "p").revision_of(7).build().is_err());
        assert!(MessageMetadata::builder(7, "p")
            .new_or_squash(false)
            .build()
            .is_err());
        assert!(MessageMetadata::builder(7, "").build().is_err());
    }

    #[test]
    fn test_logical_file_metadata_timestamps() {
        let ok = LogicalFileMetadata::builder(UpdateType::CreateOrOverride)
            .mime_type("text/plain")
            .created_at(10)
            .updated_at(20)
            .build()
            .unwrap();
        assert_eq!(ok.mime_type(), Some("text/plain"));

        let bad = LogicalFileMetadata::builder(UpdateType::Delete)
            .created_at(20)
            .updated_at(10)
            .build();
        assert!(bad.is_err());
    }

    #[test]
    fn test_json_shape_uses_base64() {
        let key = sample_key();
        let json = serde_json::to_value(&key).unwrap();
        let meta = &json["metadata_section"];
        assert_eq!(meta["checksum"], "AAECAw==");
        assert_eq!(json["logical_files"][0]["file_path"], "docs/readme.md");
        assert!(json.get("author_signature").is_none());
    }

    #[test]
    fn test_subscriber_validation() {
        let sub = Subscriber::new("alice", "ed25519-raw", vec![1u8; 32]).unwrap();
        assert_eq!(sub.label(), "alice");
        assert_eq!(sub.public_key_format(), "ed25519-raw");

        for label in ["", "a.b", "x/y", "two words"] {
            assert!(Subscriber::new(label, "ed25519-raw", vec![1]).is_err(), "{label:?}");
        }
        assert!(Subscriber::new("bob", "", vec![1]).is_err());
        assert!(Subscriber::new("bob", "ed25519-raw", vec![]).is_err());
    }
}
