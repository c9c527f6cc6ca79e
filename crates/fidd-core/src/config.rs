use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FiddError, FiddResult};

/// Top-level configuration (loaded from fidd.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FiddConfig {
    pub logging: LoggingConfig,
    pub crypto: CryptoConfig,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Algorithms used when authoring packages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Section cipher name (default: AES-256-CTR)
    pub cipher: String,
    /// Section checksum name (default: CRC32)
    pub checksum: String,
    /// Author signature scheme name (default: ED25519PH)
    pub signature: String,
}

/// Read-side behaviour of the content service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Verify section checksums on full-section reads (default: true)
    pub verify_checksums: bool,
    /// Reject key candidates whose author signature does not verify (default: false)
    pub verify_key_signature: bool,
    /// Largest `count` accepted by message enumeration; larger requests are
    /// rejected, never truncated (default: unbounded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_page_size: Option<usize>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            cipher: "AES-256-CTR".into(),
            checksum: "CRC32".into(),
            signature: "ED25519PH".into(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            verify_key_signature: false,
            max_page_size: None,
        }
    }
}

impl FiddConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> FiddResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| FiddError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> FiddResult<Self> {
        let config: FiddConfig =
            toml::from_str(content).map_err(|e| FiddError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not need the algorithm registries.
    pub fn validate(&self) -> FiddResult<()> {
        if !matches!(self.logging.format.as_str(), "json" | "text") {
            return Err(FiddError::Config(format!(
                "logging.format must be \"json\" or \"text\", got {:?}",
                self.logging.format
            )));
        }
        if self.content.max_page_size == Some(0) {
            return Err(FiddError::Config("content.max_page_size must be > 0".into()));
        }
        for (field, value) in [
            ("crypto.cipher", &self.crypto.cipher),
            ("crypto.checksum", &self.crypto.checksum),
            ("crypto.signature", &self.crypto.signature),
        ] {
            if value.is_empty() {
                return Err(FiddError::Config(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}
