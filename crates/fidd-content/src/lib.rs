//! fidd-content: authoring and reading fidd packages
//!
//! - [`PackageBuilder`] turns message metadata plus logical files into an
//!   encrypted body and its [`FiddKey`](fidd_core::FiddKey).
//! - A [`PackageSource`] stores bodies and candidate keys per message number.
//! - [`PackageContentService`] answers [`FiddContentService`] queries over a
//!   source: message enumeration, metadata, whole-file and ranged reads, and
//!   signature verification.
//! - [`ContentServiceRegistry`] shares named services across a process.

pub mod builder;
pub mod registry;
mod section;
pub mod service;
pub mod source;

pub use builder::{Package, PackageBuilder};
pub use registry::ContentServiceRegistry;
pub use service::{
    FiddContentService, LogicalFileInfo, PackageContentService, SignatureStatus,
    VerificationReport,
};
pub use source::{DirectorySource, MemorySource, PackageSource};
