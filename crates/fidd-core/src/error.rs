use thiserror::Error;

pub type FiddResult<T> = Result<T, FiddError>;

#[derive(Debug, Error)]
pub enum FiddError {
    /// Malformed binary packing: bad count, truncated buffer, length mismatch.
    #[error("format error: {0}")]
    Format(String),

    /// Requested byte range lies outside the section.
    #[error("range error: offset {offset} + length {length} exceeds {limit}")]
    Range { offset: u64, length: u64, limit: u64 },

    /// Wrong key, corrupt ciphertext, or an incomplete final block.
    #[error("decrypt error: {0}")]
    Decrypt(String),

    /// Enumeration `count` above the configured page limit.
    #[error("page size {requested} exceeds content.max_page_size {limit}")]
    PageSize { requested: usize, limit: usize },

    #[error("checksum mismatch in {section}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        section: String,
        expected: String,
        actual: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed signing or verifying key material.
    #[error("signature error: {0}")]
    Signature(String),

    #[error("unknown {kind} algorithm: {name}")]
    UnknownAlgorithm { kind: &'static str, name: String },

    #[error("duplicate {kind} algorithm: {name}")]
    DuplicateAlgorithm { kind: &'static str, name: String },

    /// A record failed builder validation.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FiddError {
    /// Wrap this error in an `io::Error` so it can cross a `Read`/`Write` boundary.
    ///
    /// Converting the result back with `FiddError::from` restores the original kind.
    pub fn into_io(self) -> std::io::Error {
        match self {
            FiddError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }

    pub fn range(offset: u64, length: u64, limit: u64) -> Self {
        FiddError::Range {
            offset,
            length,
            limit,
        }
    }
}

impl From<std::io::Error> for FiddError {
    fn from(e: std::io::Error) -> Self {
        if !e.get_ref().is_some_and(|inner| inner.is::<FiddError>()) {
            return FiddError::Io(e);
        }
        match e.into_inner().map(|inner| inner.downcast::<FiddError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => FiddError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                other,
            )),
            None => FiddError::Io(std::io::ErrorKind::InvalidData.into()),
        }
    }
}
