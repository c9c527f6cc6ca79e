//! Read-only content access over one message stream.

use std::collections::BTreeSet;
use std::io::Read;
use std::ops::Bound;
use std::sync::Arc;

use fidd_core::config::ContentConfig;
use fidd_core::pack::unpack;
use fidd_core::{
    FiddError, FiddKey, FiddResult, LogicalFileMetadata, MessageMetadata, Serializers,
};
use fidd_crypto::{Engines, SignatureScheme};

use crate::section::SectionReader;
use crate::source::PackageSource;

/// Label used for the metadata section in errors and logs.
const METADATA_SECTION: &str = "<metadata>";

/// A logical file as listed by the content service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFileInfo {
    pub path: String,
    pub metadata: LogicalFileMetadata,
    /// Stored (ciphertext) size of the file's section
    pub size: u64,
}

/// Outcome of checking one author signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    Valid,
    Invalid,
    Unsigned,
}

impl std::fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureStatus::Valid => write!(f, "valid"),
            SignatureStatus::Invalid => write!(f, "INVALID"),
            SignatureStatus::Unsigned => write!(f, "unsigned"),
        }
    }
}

/// Authorship check of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub message_number: u64,
    pub key: SignatureStatus,
    pub metadata: SignatureStatus,
    pub files: Vec<(String, SignatureStatus)>,
}

impl VerificationReport {
    /// Every signature present and valid.
    pub fn is_valid(&self) -> bool {
        self.key == SignatureStatus::Valid
            && self.metadata == SignatureStatus::Valid
            && self.files.iter().all(|(_, s)| *s == SignatureStatus::Valid)
    }

    /// No signature failed to verify (unsigned parts allowed).
    pub fn has_invalid(&self) -> bool {
        self.key == SignatureStatus::Invalid
            || self.metadata == SignatureStatus::Invalid
            || self.files.iter().any(|(_, s)| *s == SignatureStatus::Invalid)
    }
}

/// Query surface over one package/message stream.
///
/// Enumerations return message numbers in strictly descending order, and
/// fewer than `count` only when the stream runs out. Unknown message numbers
/// and file paths yield `None`; out-of-bounds chunks are a [`FiddError::Range`].
pub trait FiddContentService: Send + Sync {
    /// The `count` highest message numbers.
    fn message_numbers_tail(&self, count: usize) -> FiddResult<Vec<u64>>;

    /// Up to `count` message numbers below (or at, if `inclusive`) `message_number`.
    fn message_numbers_before(
        &self,
        message_number: u64,
        count: usize,
        inclusive: bool,
    ) -> FiddResult<Vec<u64>>;

    /// Up to `count` message numbers between `lo` and `hi`. With
    /// `prefer_latest` the highest matches are returned, otherwise the lowest.
    fn message_numbers_between(
        &self,
        hi: u64,
        inclusive_hi: bool,
        lo: u64,
        inclusive_lo: bool,
        count: usize,
        prefer_latest: bool,
    ) -> FiddResult<Vec<u64>>;

    /// The FiddKey accepted for a message.
    fn get_fidd_key(&self, message_number: u64) -> FiddResult<Option<FiddKey>>;

    fn get_fidd_file_metadata(&self, message_number: u64) -> FiddResult<Option<MessageMetadata>>;

    fn get_logical_files(&self, message_number: u64) -> FiddResult<Option<Vec<LogicalFileInfo>>>;

    fn get_logical_file_info(
        &self,
        message_number: u64,
        path: &str,
    ) -> FiddResult<Option<LogicalFileInfo>>;

    /// Whole plaintext of a logical file; checksum-verified when enabled.
    fn read_logical_file(&self, message_number: u64, path: &str) -> FiddResult<Option<Vec<u8>>>;

    /// Plaintext `[offset, offset + length)` of a logical file.
    fn read_logical_file_chunk(
        &self,
        message_number: u64,
        path: &str,
        offset: u64,
        length: u64,
    ) -> FiddResult<Option<Vec<u8>>>;

    /// Check the key, metadata, and file signatures of a message.
    fn verify_message(&self, message_number: u64) -> FiddResult<Option<VerificationReport>>;
}

// ── Enumeration ──────────────────────────────────────────────────────────

fn tail(messages: &BTreeSet<u64>, count: usize) -> Vec<u64> {
    messages.iter().rev().take(count).copied().collect()
}

fn before(messages: &BTreeSet<u64>, message_number: u64, count: usize, inclusive: bool) -> Vec<u64> {
    let upper = if inclusive {
        Bound::Included(message_number)
    } else {
        Bound::Excluded(message_number)
    };
    messages
        .range((Bound::Unbounded, upper))
        .rev()
        .take(count)
        .copied()
        .collect()
}

fn between(
    messages: &BTreeSet<u64>,
    hi: u64,
    inclusive_hi: bool,
    lo: u64,
    inclusive_lo: bool,
    count: usize,
    prefer_latest: bool,
) -> Vec<u64> {
    // BTreeSet::range panics on inverted or doubly-excluded empty bounds
    if lo > hi || (lo == hi && !(inclusive_lo && inclusive_hi)) {
        return Vec::new();
    }
    let bound = |v, inclusive| {
        if inclusive {
            Bound::Included(v)
        } else {
            Bound::Excluded(v)
        }
    };
    let range = messages.range((bound(lo, inclusive_lo), bound(hi, inclusive_hi)));
    if prefer_latest {
        range.rev().take(count).copied().collect()
    } else {
        let mut oldest: Vec<u64> = range.take(count).copied().collect();
        oldest.reverse();
        oldest
    }
}

// ── Package-backed service ───────────────────────────────────────────────

/// Everything decoded from an accepted key and its metadata section.
struct ResolvedMessage {
    key: FiddKey,
    metadata: MessageMetadata,
    metadata_bytes: Vec<u8>,
    metadata_signature: Vec<u8>,
    files: Vec<LogicalFileMetadata>,
}

impl ResolvedMessage {
    fn file_info(&self, index: usize) -> Option<LogicalFileInfo> {
        let section = self.key.logical_files().get(index)?;
        Some(LogicalFileInfo {
            path: section.file_path().to_string(),
            metadata: self.files.get(index)?.clone(),
            size: section.section().length(),
        })
    }
}

/// [`FiddContentService`] over a [`PackageSource`].
///
/// The message list is captured at open; keys are resolved on each call.
pub struct PackageContentService<S> {
    source: S,
    messages: BTreeSet<u64>,
    engines: Arc<Engines>,
    serializers: Serializers,
    config: ContentConfig,
}

impl<S: PackageSource> PackageContentService<S> {
    pub fn open(
        source: S,
        engines: Arc<Engines>,
        serializers: Serializers,
        config: ContentConfig,
    ) -> FiddResult<Self> {
        if config.max_page_size == Some(0) {
            return Err(FiddError::Config("content.max_page_size must be > 0".into()));
        }
        let messages: BTreeSet<u64> = source.message_numbers()?.into_iter().collect();
        tracing::debug!(messages = messages.len(), "opened content service");
        Ok(Self {
            source,
            messages,
            engines,
            serializers,
            config,
        })
    }

    /// Standard engines, JSON records, default content settings.
    pub fn with_defaults(source: S) -> FiddResult<Self> {
        Self::open(
            source,
            Arc::new(Engines::standard()),
            Serializers::default(),
            ContentConfig::default(),
        )
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Reject counts above the configured page limit.
    fn page(&self, count: usize) -> FiddResult<usize> {
        match self.config.max_page_size {
            Some(limit) if count > limit => Err(FiddError::PageSize {
                requested: count,
                limit,
            }),
            _ => Ok(count),
        }
    }

    fn reader(&self, message_number: u64, verify_checksums: bool) -> SectionReader<'_> {
        SectionReader {
            source: &self.source,
            engines: &self.engines,
            message_number,
            verify_checksums,
        }
    }

    /// Try each candidate key; the first whose metadata section decodes wins.
    fn resolve(&self, message_number: u64) -> FiddResult<Option<ResolvedMessage>> {
        if !self.messages.contains(&message_number) {
            return Ok(None);
        }
        let body_len = self.source.body_len(message_number)?.ok_or_else(|| {
            FiddError::Format(format!("message {message_number} has no stored body"))
        })?;

        let mut last_err = None;
        for (i, candidate) in self.source.key_candidates(message_number)?.iter().enumerate() {
            match self.try_candidate(message_number, body_len, candidate) {
                Ok(resolved) => {
                    tracing::debug!(message = message_number, candidate = i, "accepted key");
                    return Ok(Some(resolved));
                }
                Err(e) => {
                    tracing::warn!(message = message_number, candidate = i, "rejected key: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            FiddError::Format(format!("no key stored for message {message_number}"))
        }))
    }

    fn try_candidate(
        &self,
        message_number: u64,
        body_len: u64,
        candidate: &[u8],
    ) -> FiddResult<ResolvedMessage> {
        let key = self.serializers.key.deserialize(candidate)?;
        key.check_within(body_len)?;

        let packed = self
            .reader(message_number, true)
            .read_all(METADATA_SECTION, key.metadata_section())?;
        let mut blobs = unpack(&packed)?.into_iter();
        let expected = 2 + key.logical_files().len();
        if blobs.len() != expected {
            return Err(FiddError::Format(format!(
                "metadata section holds {} records, expected {expected}",
                blobs.len()
            )));
        }

        let (Some(metadata_bytes), Some(metadata_signature)) = (blobs.next(), blobs.next()) else {
            return Err(FiddError::Format("metadata section is empty".into()));
        };
        let metadata = self.serializers.message.deserialize(&metadata_bytes)?;
        if metadata.message_number() != message_number {
            return Err(FiddError::Format(format!(
                "metadata names message {}, stored as {message_number}",
                metadata.message_number()
            )));
        }
        let files = blobs
            .map(|b| self.serializers.file.deserialize(&b))
            .collect::<FiddResult<Vec<_>>>()?;

        let resolved = ResolvedMessage {
            key,
            metadata,
            metadata_bytes,
            metadata_signature,
            files,
        };
        if self.config.verify_key_signature
            && self.key_signature_status(&resolved)? != SignatureStatus::Valid
        {
            return Err(FiddError::Signature(format!(
                "author signature on key for message {message_number} does not verify"
            )));
        }
        Ok(resolved)
    }

    /// Decode the stored signature and author key through their named
    /// formats. `None` when either format is unknown, they name different
    /// schemes, or the stored bytes do not decode.
    fn decode_signature(
        &self,
        signature_format: &str,
        signature: &[u8],
        metadata: &MessageMetadata,
    ) -> FiddResult<Option<(Arc<dyn SignatureScheme>, Vec<u8>, Vec<u8>)>> {
        let (Some(key_format), Some(public_key)) =
            (metadata.author_public_key_format(), metadata.author_public_key())
        else {
            return Ok(None);
        };
        let formats = self
            .engines
            .signature_formats
            .get(signature_format)
            .and_then(|sig| Ok((sig, self.engines.public_key_formats.get(key_format)?)));
        let (sig_format, key_format) = match formats {
            Ok(formats) => formats,
            Err(e) => {
                tracing::warn!("cannot verify signature: {e}");
                return Ok(None);
            }
        };
        if sig_format.scheme() != key_format.scheme() {
            tracing::warn!(
                signature = sig_format.scheme(),
                key = key_format.scheme(),
                "signature and author key belong to different schemes"
            );
            return Ok(None);
        }
        let scheme = match self.engines.signatures.get(sig_format.scheme()) {
            Ok(scheme) => scheme,
            Err(e) => {
                tracing::warn!("cannot verify signature: {e}");
                return Ok(None);
            }
        };
        match (key_format.decode(public_key), sig_format.decode(signature)) {
            (Ok(key), Ok(signature)) => Ok(Some((scheme, key, signature))),
            (Err(FiddError::Signature(e)), _) | (_, Err(FiddError::Signature(e))) => {
                tracing::warn!("undecodable signature material: {e}");
                Ok(None)
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    fn check(
        &self,
        format: Option<&str>,
        signature: Option<&[u8]>,
        metadata: &MessageMetadata,
        data: &mut dyn Read,
    ) -> FiddResult<SignatureStatus> {
        let Some(signature) = signature.filter(|s| !s.is_empty()) else {
            return Ok(SignatureStatus::Unsigned);
        };
        let Some(format) = format else {
            return Ok(SignatureStatus::Invalid);
        };
        let Some((scheme, public_key, signature)) =
            self.decode_signature(format, signature, metadata)?
        else {
            return Ok(SignatureStatus::Invalid);
        };
        match scheme.verify_reader(&public_key, data, &signature) {
            Ok(true) => Ok(SignatureStatus::Valid),
            Ok(false) => Ok(SignatureStatus::Invalid),
            Err(FiddError::Signature(e)) => {
                tracing::warn!("unusable author key: {e}");
                Ok(SignatureStatus::Invalid)
            }
            Err(e) => Err(e),
        }
    }

    fn key_signature_status(&self, resolved: &ResolvedMessage) -> FiddResult<SignatureStatus> {
        let unsigned = self.serializers.key.serialize(&resolved.key.unsigned())?;
        self.check(
            resolved.key.author_signature_format(),
            resolved.key.author_signature(),
            &resolved.metadata,
            &mut unsigned.as_slice(),
        )
    }

    fn with_file<T>(
        &self,
        message_number: u64,
        path: &str,
        f: impl FnOnce(&ResolvedMessage, usize) -> FiddResult<T>,
    ) -> FiddResult<Option<T>> {
        let Some(resolved) = self.resolve(message_number)? else {
            return Ok(None);
        };
        match resolved.key.find_file(path) {
            Some((index, _)) => f(&resolved, index).map(Some),
            None => Ok(None),
        }
    }
}

impl<S: PackageSource> FiddContentService for PackageContentService<S> {
    fn message_numbers_tail(&self, count: usize) -> FiddResult<Vec<u64>> {
        Ok(tail(&self.messages, self.page(count)?))
    }

    fn message_numbers_before(
        &self,
        message_number: u64,
        count: usize,
        inclusive: bool,
    ) -> FiddResult<Vec<u64>> {
        Ok(before(&self.messages, message_number, self.page(count)?, inclusive))
    }

    fn message_numbers_between(
        &self,
        hi: u64,
        inclusive_hi: bool,
        lo: u64,
        inclusive_lo: bool,
        count: usize,
        prefer_latest: bool,
    ) -> FiddResult<Vec<u64>> {
        Ok(between(
            &self.messages,
            hi,
            inclusive_hi,
            lo,
            inclusive_lo,
            self.page(count)?,
            prefer_latest,
        ))
    }

    fn get_fidd_key(&self, message_number: u64) -> FiddResult<Option<FiddKey>> {
        Ok(self.resolve(message_number)?.map(|r| r.key))
    }

    fn get_fidd_file_metadata(&self, message_number: u64) -> FiddResult<Option<MessageMetadata>> {
        Ok(self.resolve(message_number)?.map(|r| r.metadata))
    }

    fn get_logical_files(&self, message_number: u64) -> FiddResult<Option<Vec<LogicalFileInfo>>> {
        Ok(self.resolve(message_number)?.map(|r| {
            (0..r.key.logical_files().len())
                .filter_map(|i| r.file_info(i))
                .collect()
        }))
    }

    fn get_logical_file_info(
        &self,
        message_number: u64,
        path: &str,
    ) -> FiddResult<Option<LogicalFileInfo>> {
        Ok(self
            .with_file(message_number, path, |r, i| Ok(r.file_info(i)))?
            .flatten())
    }

    fn read_logical_file(&self, message_number: u64, path: &str) -> FiddResult<Option<Vec<u8>>> {
        self.with_file(message_number, path, |r, i| {
            let file = &r.key.logical_files()[i];
            self.reader(message_number, self.config.verify_checksums)
                .read_all(file.file_path(), file.section())
        })
    }

    fn read_logical_file_chunk(
        &self,
        message_number: u64,
        path: &str,
        offset: u64,
        length: u64,
    ) -> FiddResult<Option<Vec<u8>>> {
        self.with_file(message_number, path, |r, i| {
            let file = &r.key.logical_files()[i];
            self.reader(message_number, false)
                .read_range(file.file_path(), file.section(), offset, length)
        })
    }

    fn verify_message(&self, message_number: u64) -> FiddResult<Option<VerificationReport>> {
        let Some(resolved) = self.resolve(message_number)? else {
            return Ok(None);
        };
        let metadata = &resolved.metadata;

        let key = self.key_signature_status(&resolved)?;
        let metadata_status = self.check(
            metadata.metadata_signature_format(),
            Some(resolved.metadata_signature.as_slice()),
            metadata,
            &mut resolved.metadata_bytes.as_slice(),
        )?;

        let reader = self.reader(message_number, false);
        let mut files = Vec::with_capacity(resolved.files.len());
        for (file, file_meta) in resolved.key.logical_files().iter().zip(&resolved.files) {
            let mut plaintext = reader.open(file.section())?;
            let status = self.check(
                file_meta.author_file_signature_format(),
                file_meta.author_file_signature(),
                metadata,
                &mut plaintext,
            )?;
            files.push((file.file_path().to_string(), status));
        }

        let report = VerificationReport {
            message_number,
            key,
            metadata: metadata_status,
            files,
        };
        if report.has_invalid() {
            tracing::warn!(message = message_number, "signature verification failed");
        }
        Ok(Some(report))
    }
}
