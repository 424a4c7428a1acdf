use std::path::Path;

use serde::Deserialize;

use crate::core::BackoffPolicy;
use crate::error::{Error, Result};

/// Archive codec and buffering settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveOptions {
    /// Deflate level, 0 to 9.
    pub compression_level: i64,
    /// Archive bytes are handed to the sinks in chunks of about this size.
    pub chunk_size:        usize,
    /// Chunks buffered between the codec and the sinks, and between each
    /// source read and the codec.
    pub channel_capacity:  usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compression_level: 9,
            chunk_size:        64 * 1024,
            channel_capacity:  16,
        }
    }
}

impl ArchiveOptions {
    #[must_use]
    pub fn compression_level(mut self, level: i64) -> Self {
        self.compression_level = level;
        self
    }

    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Tuning shared by every run of a [`Pipeline`](crate::Pipeline).
///
/// Each remote call site has its own retry budget.
///
/// # Examples
///
/// ```
/// use zipbucket::PipelineConfig;
///
/// let config = PipelineConfig::from_toml_str(
///     r#"
///     [list_backoff]
///     max_attempts = 5
///
///     [verify_backoff]
///     max_attempts = 10
///     base_ms = 200
///
///     [archive]
///     compression_level = 6
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.list_backoff.max_attempts, 5);
/// assert_eq!(config.verify_backoff.max_attempts, 10);
/// assert_eq!(config.upload_backoff.max_attempts, 3);
/// assert_eq!(config.archive.compression_level, 6);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub list_backoff:   BackoffPolicy,
    pub upload_backoff: BackoffPolicy,
    pub verify_backoff: BackoffPolicy,
    pub archive:        ArchiveOptions,
}

impl PipelineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> { Ok(toml::from_str(source)?) }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    #[must_use]
    pub fn list_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.list_backoff = policy;
        self
    }

    #[must_use]
    pub fn upload_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.upload_backoff = policy;
        self
    }

    #[must_use]
    pub fn verify_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.verify_backoff = policy;
        self
    }

    #[must_use]
    pub fn archive(mut self, archive: ArchiveOptions) -> Self {
        self.archive = archive;
        self
    }
}
