use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A listed source object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Full path within the source container.
    pub name: String,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into() } }
}

/// Integrity check a store should apply while serving a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityMode {
    Crc32c,
    Md5,
}

impl fmt::Display for IntegrityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityMode::Crc32c => write!(f, "crc32c"),
            IntegrityMode::Md5 => write!(f, "md5"),
        }
    }
}

impl FromStr for IntegrityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crc32c" => Ok(IntegrityMode::Crc32c),
            "md5" => Ok(IntegrityMode::Md5),
            other => Err(format!("unknown integrity mode '{other}' (expected crc32c or md5)")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub integrity: Option<IntegrityMode>,
}

impl ReadOptions {
    #[must_use]
    pub fn integrity(mut self, integrity: Option<IntegrityMode>) -> Self {
        self.integrity = integrity;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    /// User metadata attached to the written object.
    pub metadata:     BTreeMap<String, String>,
    /// Whether the store may use a resumable upload session.
    pub resumable:    bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            metadata:     BTreeMap::new(),
            resumable:    true,
        }
    }
}

impl WriteOptions {
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }
}
