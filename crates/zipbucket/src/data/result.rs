use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Serialize, Serializer};

/// One archived object: where it came from and where it sits in the archive.
///
/// Serializes as a two-element array `[source_name, archive_path]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    pub source_name:  String,
    pub archive_path: String,
}

impl ManifestEntry {
    pub fn new(source_name: impl Into<String>, archive_path: impl Into<String>) -> Self {
        Self {
            source_name:  source_name.into(),
            archive_path: archive_path.into(),
        }
    }
}

impl Serialize for ManifestEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.source_name, &self.archive_path).serialize(serializer)
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveResult {
    pub keep_path:        Option<PathBuf>,
    pub source_container: String,
    pub source_prefix:    String,
    pub dest_container:   Option<String>,
    pub dest_path:        Option<String>,
    pub extra_metadata:   Option<BTreeMap<String, String>>,
    /// Entries in the order they were written into the archive.
    pub manifest:         Vec<ManifestEntry>,
    /// Size of the produced archive.
    pub bytes_written:    u64,
}
