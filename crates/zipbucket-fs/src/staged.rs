use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::{Error, Result};

#[cfg(unix)]
const DEFAULT_PERMISSIONS: u32 = 0o644;

#[cfg(not(unix))]
const DEFAULT_PERMISSIONS: u32 = 0;

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug)]
pub struct StageOptions {
    permissions: u32,
    prefix:      &'static str,
    suffix:      &'static str,
}

impl Default for StageOptions {
    fn default() -> Self { Self::new() }
}

impl StageOptions {
    pub fn new() -> Self {
        Self {
            permissions: DEFAULT_PERMISSIONS,
            prefix:      ".",
            suffix:      ".partial",
        }
    }

    #[cfg(unix)]
    pub fn permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    #[cfg(not(unix))]
    pub fn permissions(self, _permissions: u32) -> Self { self }

    pub fn staging_prefix(&self) -> &'static str { self.prefix }

    pub fn staging_suffix(&self) -> &'static str { self.suffix }

    #[cfg(unix)]
    fn into_permissions(self) -> Option<std::fs::Permissions> {
        Some(std::fs::Permissions::from_mode(self.permissions))
    }

    #[cfg(not(unix))]
    fn into_permissions(self) -> Option<std::fs::Permissions> { None }
}

/// A file being written under a temporary name beside its destination.
///
/// Each handle gets its own staging name, so concurrent writers targeting the
/// same destination never share a staging file; the last commit wins.
#[derive(Debug)]
pub struct StagedFile {
    staging_path:     PathBuf,
    destination_path: PathBuf,
    options:          StageOptions,
    committed:        bool,
}

impl StagedFile {
    /// Create the staging file and return it opened for writing.
    pub fn create(destination: impl AsRef<Path>, options: StageOptions) -> Result<(Self, File)> {
        let destination_path = destination.as_ref().to_path_buf();
        let file_name = destination_path
            .file_name()
            .ok_or_else(|| Error::InvalidDestination(destination_path.clone()))?
            .to_string_lossy()
            .into_owned();
        let parent = match destination_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let sequence = STAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let staging_name = format!(
            "{}{}.{}.{}{}",
            options.prefix,
            file_name,
            std::process::id(),
            sequence,
            options.suffix
        );
        let staging_path = parent.join(staging_name);

        let file = File::create(&staging_path).map_err(|source| Error::Create {
            path: staging_path.clone(),
            source,
        })?;

        Ok((
            Self {
                staging_path,
                destination_path,
                options,
                committed: false,
            },
            file,
        ))
    }

    pub fn staging_path(&self) -> &Path { &self.staging_path }

    /// Move the staging file over the destination, replacing any existing file.
    ///
    /// The caller must have flushed and closed its writer first.
    pub fn commit(mut self) -> Result<()> {
        if let Some(perms) = self.options.into_permissions() {
            std::fs::set_permissions(&self.staging_path, perms).map_err(|source| {
                Error::Permissions {
                    path: self.staging_path.clone(),
                    source,
                }
            })?;
        }

        std::fs::rename(&self.staging_path, &self.destination_path).map_err(|source| {
            Error::Commit {
                from: self.staging_path.clone(),
                to: self.destination_path.clone(),
                source,
            }
        })?;

        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.staging_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_commit_moves_into_place() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");

        let (staged, mut file) = StagedFile::create(&dest, StageOptions::new()).unwrap();
        file.write_all(b"data").unwrap();
        drop(file);

        let staging = staged.staging_path().to_path_buf();
        assert!(staging.exists());
        assert!(!dest.exists());

        staged.commit().unwrap();
        assert!(!staging.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"data");
    }

    #[test]
    fn test_commit_replaces_existing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");
        std::fs::write(&dest, b"old contents").unwrap();

        let (staged, mut file) = StagedFile::create(&dest, StageOptions::new()).unwrap();
        file.write_all(b"new").unwrap();
        drop(file);
        staged.commit().unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_cleanup_on_drop() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");
        let staging = {
            let (staged, mut file) = StagedFile::create(&dest, StageOptions::new()).unwrap();
            file.write_all(b"partial").unwrap();
            staged.staging_path().to_path_buf()
        };

        assert!(!staging.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn test_staging_names_are_unique() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");

        let (first, _f1) = StagedFile::create(&dest, StageOptions::new()).unwrap();
        let (second, _f2) = StagedFile::create(&dest, StageOptions::new()).unwrap();

        assert_ne!(first.staging_path(), second.staging_path());
        assert_eq!(first.staging_path().parent(), Some(dir.path()));
    }

    #[test]
    fn test_rejects_destination_without_file_name() {
        let err = StagedFile::create("/", StageOptions::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidDestination(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_applies_permissions() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");

        let (staged, file) =
            StagedFile::create(&dest, StageOptions::new().permissions(0o600)).unwrap();
        drop(file);
        staged.commit().unwrap();

        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
