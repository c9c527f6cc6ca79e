//! Where package bodies and their candidate keys come from.
//!
//! Two sources are available:
//!   - **memory**: packages held in a `BTreeMap`, for tests and embedding.
//!   - **directory**: one body file plus one or more key files per message.
//!
//! Directory layout:
//! ```text
//! <n>.fidd                 encrypted body of message n
//! <n>.fiddkey              serialized FiddKey (author / default key)
//! <n>.<label>.fiddkey      further candidate keys, e.g. one per subscriber
//! ```

use anyhow::Context;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use fidd_core::{FiddError, FiddKey, FiddResult, RecordSerializer};

use crate::builder::Package;

pub const BODY_EXTENSION: &str = "fidd";
pub const KEY_EXTENSION: &str = "fiddkey";

/// Read access to the stored packages of one message stream.
///
/// Packages are write-once: a body never changes while it is being read.
pub trait PackageSource: Send + Sync {
    /// Every message number with a stored body, in any order.
    fn message_numbers(&self) -> FiddResult<Vec<u64>>;

    /// Serialized FiddKey candidates for a message, in preference order.
    fn key_candidates(&self, message_number: u64) -> FiddResult<Vec<Vec<u8>>>;

    /// Body size in bytes, or `None` for an unknown message.
    fn body_len(&self, message_number: u64) -> FiddResult<Option<u64>>;

    /// Body bytes from `position` to the end.
    fn open_body_at(&self, message_number: u64, position: u64) -> FiddResult<Box<dyn Read + '_>>;
}

// ── Memory ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StoredPackage {
    body: Vec<u8>,
    keys: Vec<Vec<u8>>,
}

/// Packages held in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    packages: BTreeMap<u64, StoredPackage>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a body with its candidate keys, replacing any previous entry.
    pub fn insert(&mut self, message_number: u64, body: Vec<u8>, keys: Vec<Vec<u8>>) {
        self.packages
            .insert(message_number, StoredPackage { body, keys });
    }

    pub fn insert_package(
        &mut self,
        package: &Package,
        serializer: &dyn RecordSerializer<FiddKey>,
    ) -> FiddResult<()> {
        let key = serializer.serialize(package.key())?;
        self.insert(package.message_number(), package.body().to_vec(), vec![key]);
        Ok(())
    }

    /// Append a candidate key to an already stored message.
    pub fn add_key_candidate(&mut self, message_number: u64, key: Vec<u8>) -> FiddResult<()> {
        let stored = self.packages.get_mut(&message_number).ok_or_else(|| {
            FiddError::Format(format!("no body stored for message {message_number}"))
        })?;
        stored.keys.push(key);
        Ok(())
    }

    pub fn body_mut(&mut self, message_number: u64) -> Option<&mut Vec<u8>> {
        self.packages.get_mut(&message_number).map(|p| &mut p.body)
    }
}

impl PackageSource for MemorySource {
    fn message_numbers(&self) -> FiddResult<Vec<u64>> {
        Ok(self.packages.keys().copied().collect())
    }

    fn key_candidates(&self, message_number: u64) -> FiddResult<Vec<Vec<u8>>> {
        Ok(self
            .packages
            .get(&message_number)
            .map(|p| p.keys.clone())
            .unwrap_or_default())
    }

    fn body_len(&self, message_number: u64) -> FiddResult<Option<u64>> {
        Ok(self
            .packages
            .get(&message_number)
            .map(|p| p.body.len() as u64))
    }

    fn open_body_at(&self, message_number: u64, position: u64) -> FiddResult<Box<dyn Read + '_>> {
        let body = self
            .packages
            .get(&message_number)
            .map(|p| p.body.as_slice())
            .unwrap_or_default();
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(body.len());
        Ok(Box::new(&body[start..]))
    }
}

// ── Directory ────────────────────────────────────────────────────────────

/// Packages stored as files in one directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Open an existing package directory.
    pub fn open(root: impl Into<PathBuf>) -> FiddResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(FiddError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("package directory not found: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }

    /// Open a package directory, creating it if needed.
    pub fn create(root: impl Into<PathBuf>) -> FiddResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating package dir: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn body_path(&self, message_number: u64) -> PathBuf {
        self.root
            .join(format!("{message_number}.{BODY_EXTENSION}"))
    }

    /// `<n>.fiddkey`, or `<n>.<label>.fiddkey` for a labelled candidate.
    pub fn key_path(&self, message_number: u64, label: Option<&str>) -> PathBuf {
        match label {
            Some(label) => self
                .root
                .join(format!("{message_number}.{label}.{KEY_EXTENSION}")),
            None => self
                .root
                .join(format!("{message_number}.{KEY_EXTENSION}")),
        }
    }

    /// Persist a package body and its key.
    pub fn write_package(
        &self,
        package: &Package,
        serializer: &dyn RecordSerializer<FiddKey>,
    ) -> FiddResult<()> {
        let n = package.message_number();
        write_atomic(&self.body_path(n), package.body())?;
        self.write_key(n, None, &serializer.serialize(package.key())?)?;
        tracing::debug!(
            message = n,
            bytes = package.body().len(),
            dir = %self.root.display(),
            "wrote package"
        );
        Ok(())
    }

    /// Persist one serialized candidate key.
    pub fn write_key(&self, message_number: u64, label: Option<&str>, key: &[u8]) -> FiddResult<()> {
        if let Some(label) = label {
            if label.is_empty() || label.contains(|c: char| matches!(c, '.' | '/' | '\\')) {
                return Err(FiddError::InvalidRecord(format!(
                    "invalid key label: {label:?}"
                )));
            }
        }
        write_atomic(&self.key_path(message_number, label), key)
    }

    fn entries(&self) -> FiddResult<Vec<String>> {
        let mut names = Vec::new();
        let dir = std::fs::read_dir(&self.root)
            .with_context(|| format!("reading package dir: {}", self.root.display()))?;
        for entry in dir {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

/// Write then rename, so readers never observe a partial file.
fn write_atomic(path: &Path, data: &[u8]) -> FiddResult<()> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, data).with_context(|| format!("writing temp: {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming to: {}", path.display()))?;
    Ok(())
}

/// `<file name>.tmp` beside `path`; distinct for every distinct target.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Message number of a key file name, with its label if any.
fn parse_key_name(name: &str) -> Option<(u64, Option<&str>)> {
    let stem = name.strip_suffix(KEY_EXTENSION)?.strip_suffix('.')?;
    match stem.split_once('.') {
        Some((n, label)) if !label.is_empty() && !label.contains('.') => {
            Some((n.parse().ok()?, Some(label)))
        }
        Some(_) => None,
        None => Some((stem.parse().ok()?, None)),
    }
}

impl PackageSource for DirectorySource {
    fn message_numbers(&self) -> FiddResult<Vec<u64>> {
        let mut numbers = Vec::new();
        for name in self.entries()? {
            let Some(stem) = name.strip_suffix(BODY_EXTENSION).and_then(|s| s.strip_suffix('.'))
            else {
                continue;
            };
            match stem.parse::<u64>() {
                Ok(n) => numbers.push(n),
                Err(_) => tracing::debug!(file = %name, "skipping non-message body file"),
            }
        }
        Ok(numbers)
    }

    fn key_candidates(&self, message_number: u64) -> FiddResult<Vec<Vec<u8>>> {
        let mut found: Vec<(Option<String>, PathBuf)> = self
            .entries()?
            .iter()
            .filter_map(|name| match parse_key_name(name) {
                Some((n, label)) if n == message_number => {
                    Some((label.map(str::to_string), self.root.join(name)))
                }
                _ => None,
            })
            .collect();
        // unlabelled key first, then labels alphabetically
        found.sort();

        found
            .into_iter()
            .map(|(_, path)| {
                std::fs::read(&path)
                    .with_context(|| format!("reading key: {}", path.display()))
                    .map_err(FiddError::from)
            })
            .collect()
    }

    fn body_len(&self, message_number: u64) -> FiddResult<Option<u64>> {
        match std::fs::metadata(self.body_path(message_number)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open_body_at(&self, message_number: u64, position: u64) -> FiddResult<Box<dyn Read + '_>> {
        let mut file = File::open(self.body_path(message_number))?;
        file.seek(SeekFrom::Start(position))?;
        Ok(Box::new(BufReader::new(file)))
    }
}
