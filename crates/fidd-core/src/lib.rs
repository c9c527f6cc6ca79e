//! fidd-core: shared types for the fidd package format
//!
//! A package is one message: an encrypted body made of independent sections
//! (the metadata section followed by one section per logical file) plus a
//! `FiddKey` describing where each section lives and how to decrypt and
//! verify it.
//!
//! ```text
//! body:  [ metadata section ][ logical file 0 ][ logical file 1 ] ...
//! key:   FiddKey { metadata_section, logical_files[], author_signature }
//! metadata plaintext: pack([MessageMetadata, signature, LogicalFileMetadata x N])
//! ```

pub mod config;
pub mod error;
pub mod pack;
pub mod serializer;
pub mod types;

pub use error::{FiddError, FiddResult};
pub use serializer::{JsonSerializer, Record, RecordSerializer, Serializers};
pub use types::{
    FiddKey, LogicalFileMetadata, LogicalFileSection, MessageMetadata, Section, Subscriber,
    UpdateType,
};

/// Current message metadata format version written by the builder
pub const FORMAT_VERSION: u32 = 1;
