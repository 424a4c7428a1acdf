use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use super::object::{IntegrityMode, ObjectRef};
use crate::error::{Error, Result};

/// User override for archive naming.
///
/// Receives the listed object and the default suggestion. Returning `None`
/// or an empty string leaves the object out of the archive.
/// Paths must be unique: two objects mapped to the same path fail the run
/// with [`Error::DuplicateEntry`] before anything is fetched.
pub type NameMapper = Arc<dyn Fn(&ObjectRef, &str) -> Option<String> + Send + Sync>;

/// One archiving job.
///
/// Source fields are optional so that a request assembled from untrusted
/// input can be rejected in one place; [`ArchiveRequest::new`] fills both.
///
/// # Examples
///
/// ```
/// use zipbucket::ArchiveRequest;
///
/// let request = ArchiveRequest::new("photos", "2024/01/")
///     .destination("backups", "photos-2024-01.zip")
///     .keep("/tmp/photos-2024-01.zip")
///     .metadata("origin", "photos")
///     .concurrency(4);
///
/// assert_eq!(request.concurrency_limit, 4);
/// assert!(request.resumable_upload);
/// ```
#[derive(Clone)]
pub struct ArchiveRequest {
    pub source_container:   Option<String>,
    /// `""` selects every object in the container.
    pub source_prefix:      Option<String>,
    pub dest_container:     Option<String>,
    pub dest_path:          Option<String>,
    /// Local path that receives a copy of the archive.
    pub keep_path:          Option<PathBuf>,
    pub name_mapper:        Option<NameMapper>,
    pub extra_metadata:     Option<BTreeMap<String, String>>,
    pub emit_progress:      bool,
    pub concurrency_limit:  usize,
    pub download_integrity: Option<IntegrityMode>,
    pub resumable_upload:   bool,
}

impl fmt::Debug for ArchiveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveRequest")
            .field("source_container", &self.source_container)
            .field("source_prefix", &self.source_prefix)
            .field("dest_container", &self.dest_container)
            .field("dest_path", &self.dest_path)
            .field("keep_path", &self.keep_path)
            .field("name_mapper", &self.name_mapper.as_ref().map(|_| "{ ... }"))
            .field("extra_metadata", &self.extra_metadata)
            .field("emit_progress", &self.emit_progress)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("download_integrity", &self.download_integrity)
            .field("resumable_upload", &self.resumable_upload)
            .finish()
    }
}

impl Default for ArchiveRequest {
    fn default() -> Self {
        Self {
            source_container:   None,
            source_prefix:      None,
            dest_container:     None,
            dest_path:          None,
            keep_path:          None,
            name_mapper:        None,
            extra_metadata:     None,
            emit_progress:      false,
            concurrency_limit:  1,
            download_integrity: None,
            resumable_upload:   true,
        }
    }
}

impl ArchiveRequest {
    pub fn new(container: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            source_container: Some(container.into()),
            source_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Upload the archive to `container/path`.
    #[must_use]
    pub fn destination(mut self, container: impl Into<String>, path: impl Into<String>) -> Self {
        self.dest_container = Some(container.into());
        self.dest_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn keep(mut self, path: impl Into<PathBuf>) -> Self {
        self.keep_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn name_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&ObjectRef, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.name_mapper = Some(Arc::new(mapper));
        self
    }

    /// Add one user metadata pair for the uploaded object.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn progress(mut self, emit_progress: bool) -> Self {
        self.emit_progress = emit_progress;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    #[must_use]
    pub fn integrity(mut self, mode: Option<IntegrityMode>) -> Self {
        self.download_integrity = mode;
        self
    }

    #[must_use]
    pub fn resumable_upload(mut self, resumable: bool) -> Self {
        self.resumable_upload = resumable;
        self
    }

    /// Check the request and resolve where the archive goes.
    ///
    /// `Ok(None)` means the request has no sink and there is nothing to do.
    pub(crate) fn plan(&self) -> Result<Option<ArchivePlan>> {
        let container = match self.source_container.as_deref() {
            None => return Err(invalid("source container is required")),
            Some("") => return Err(invalid("source container must not be empty")),
            Some(container) => container.to_string(),
        };
        let prefix = self
            .source_prefix
            .clone()
            .ok_or_else(|| invalid("source prefix is required (use \"\" for every object)"))?;

        if self.concurrency_limit == 0 {
            return Err(invalid("concurrency limit must be at least 1"));
        }

        if let Some(keep) = &self.keep_path
            && keep.as_os_str().is_empty()
        {
            return Err(invalid("keep path must not be empty"));
        }

        let remote = match (self.dest_container.as_deref(), self.dest_path.as_deref()) {
            (Some(""), _) => return Err(invalid("destination container must not be empty")),
            (Some(_), None) | (Some(_), Some("")) => {
                return Err(invalid(
                    "destination path is required when a destination container is set",
                ));
            }
            (Some(container), Some(path)) => Some(RemoteTarget {
                container: container.to_string(),
                path:      path.to_string(),
            }),
            (None, Some(path)) => {
                warn!(path, "destination path given without a destination container; ignoring it");
                None
            }
            (None, None) => None,
        };

        if remote.is_none() && self.keep_path.is_none() {
            return Ok(None);
        }

        Ok(Some(ArchivePlan {
            container,
            prefix,
            keep: self.keep_path.clone(),
            remote,
        }))
    }
}

fn invalid(message: &str) -> Error { Error::Validation(message.to_string()) }

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub container: String,
    pub path:      String,
}

/// A validated request with at least one sink.
#[derive(Debug, Clone)]
pub(crate) struct ArchivePlan {
    pub container: String,
    pub prefix:    String,
    pub keep:      Option<PathBuf>,
    pub remote:    Option<RemoteTarget>,
}
