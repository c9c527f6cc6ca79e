//! Record (de)serialization
//!
//! The package format only stores opaque bytes for each record; the textual
//! encoding is injected through [`RecordSerializer`]. [`JsonSerializer`] is
//! the stock implementation.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FiddError, FiddResult};
use crate::types::{FiddKey, LogicalFileMetadata, MessageMetadata, Subscriber};

/// A record type that can be validated after decoding.
pub trait Record: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn validate_record(&self) -> FiddResult<()>;
}

impl Record for FiddKey {
    const KIND: &'static str = "fidd key";

    fn validate_record(&self) -> FiddResult<()> {
        self.validate()
    }
}

impl Record for MessageMetadata {
    const KIND: &'static str = "message metadata";

    fn validate_record(&self) -> FiddResult<()> {
        self.validate()
    }
}

impl Record for LogicalFileMetadata {
    const KIND: &'static str = "logical file metadata";

    fn validate_record(&self) -> FiddResult<()> {
        self.validate()
    }
}

impl Record for Subscriber {
    const KIND: &'static str = "subscriber";

    fn validate_record(&self) -> FiddResult<()> {
        self.validate()
    }
}

/// Serializes one record type to bytes and back.
///
/// `deserialize` fails with [`FiddError::Serialization`] on malformed input,
/// never returning a partially filled record.
pub trait RecordSerializer<T>: Send + Sync {
    fn name(&self) -> &str;

    fn serialize(&self, record: &T) -> FiddResult<Vec<u8>>;

    fn deserialize(&self, data: &[u8]) -> FiddResult<T>;
}

/// Compact JSON encoding via serde_json. Byte fields are base64 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T: Record> RecordSerializer<T> for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn serialize(&self, record: &T) -> FiddResult<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| FiddError::Serialization(format!("{} serialization: {e}", T::KIND)))
    }

    fn deserialize(&self, data: &[u8]) -> FiddResult<T> {
        let record: T = serde_json::from_slice(data)
            .map_err(|e| FiddError::Serialization(format!("{} deserialization: {e}", T::KIND)))?;
        record
            .validate_record()
            .map_err(|e| FiddError::Serialization(format!("{} is invalid: {e}", T::KIND)))?;
        Ok(record)
    }
}

/// The serializer for each record type a package carries.
#[derive(Clone)]
pub struct Serializers {
    pub key: Arc<dyn RecordSerializer<FiddKey>>,
    pub message: Arc<dyn RecordSerializer<MessageMetadata>>,
    pub file: Arc<dyn RecordSerializer<LogicalFileMetadata>>,
    pub subscriber: Arc<dyn RecordSerializer<Subscriber>>,
}

impl Serializers {
    pub fn json() -> Self {
        Self {
            key: Arc::new(JsonSerializer),
            message: Arc::new(JsonSerializer),
            file: Arc::new(JsonSerializer),
            subscriber: Arc::new(JsonSerializer),
        }
    }
}

impl Default for Serializers {
    fn default() -> Self {
        Self::json()
    }
}

impl std::fmt::Debug for Serializers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializers")
            .field("key", &self.key.name())
            .field("message", &self.message.name())
            .field("file", &self.file.name())
            .field("subscriber", &self.subscriber.name())
            .finish()
    }
}
