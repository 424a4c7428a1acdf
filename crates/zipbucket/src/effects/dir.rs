use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::stream;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use walkdir::WalkDir;
use zipbucket_fs::{StageOptions, StagedFile};

use super::store::{ByteStream, ObjectStore, ObjectWriter};
use crate::data::{ObjectRef, ReadOptions, WriteOptions};
use crate::error::StoreError;

const READ_CHUNK: usize = 64 * 1024;

/// [`ObjectStore`] over a local directory tree.
///
/// Each top-level directory under the root is a container, and object names
/// are `/`-separated paths inside it. Content type and metadata are not
/// persisted, and integrity modes are not checked.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn root(&self) -> &Path { &self.root }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StoreError> {
        if container.is_empty() || container.contains(['/', '\\']) || container == "." || container == ".." {
            return Err(StoreError::permanent(format!("invalid container name '{container}'")));
        }
        Ok(self.root.join(container))
    }

    fn object_path(&self, container: &str, name: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(StoreError::permanent(format!("invalid object name '{name}'")));
        }
        Ok(self.container_dir(container)?.join(relative))
    }
}

/// Staging files left by in-flight uploads are not objects.
fn is_staging_file(path: &Path) -> bool {
    let defaults = StageOptions::new();
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(defaults.staging_prefix()) && name.ends_with(defaults.staging_suffix()))
}

fn list_dir(dir: &Path, prefix: &str) -> Result<Vec<ObjectRef>, StoreError> {
    if !dir.is_dir() {
        return Err(StoreError::not_found(format!("container '{}' does not exist", dir.display())));
    }

    let mut objects = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|err| StoreError::from(io::Error::from(err)))?;
        if !entry.file_type().is_file() || is_staging_file(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name.starts_with(prefix) {
            objects.push(ObjectRef::new(name));
        }
    }
    objects.sort();
    Ok(objects)
}

#[async_trait]
impl ObjectStore for DirStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<ObjectRef>, StoreError> {
        let dir = self.container_dir(container)?;
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || list_dir(&dir, &prefix))
            .await
            .map_err(|err| StoreError::permanent(format!("listing task failed: {err}")))?
    }

    async fn open_read(
        &self,
        container: &str,
        name: &str,
        _options: &ReadOptions,
    ) -> Result<ByteStream, StoreError> {
        let path = self.object_path(container, name)?;
        let file = tokio::fs::File::open(&path).await?;
        debug!(path = %path.display(), "opened object for reading");

        let stream = stream::try_unfold(file, |mut file| async move {
            let mut buffer = BytesMut::with_capacity(READ_CHUNK);
            if file.read_buf(&mut buffer).await? == 0 {
                return Ok::<_, StoreError>(None);
            }
            Ok(Some((buffer.freeze(), file)))
        });
        Ok(Box::pin(stream))
    }

    async fn open_write(
        &self,
        container: &str,
        name: &str,
        _options: &WriteOptions,
    ) -> Result<ObjectWriter, StoreError> {
        let path = self.object_path(container, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let (staged, file) = StagedFile::create(&path, StageOptions::new())
            .map_err(|err| StoreError::permanent(err.to_string()))?;
        Ok(Box::pin(DirWriter::Writing {
            file: tokio::fs::File::from_std(file),
            staged,
        }))
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError> {
        let path = self.object_path(container, name)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, container: &str, name: &str) -> Result<(), StoreError> {
        let path = self.object_path(container, name)?;
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }
}

type Commit = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Writes into a staging file and renames it into place on shutdown.
enum DirWriter {
    Writing {
        file:   tokio::fs::File,
        staged: StagedFile,
    },
    Committing(Commit),
    Done,
}

/// Flush and sync the staged upload, then rename it over the object.
async fn commit(mut file: tokio::fs::File, staged: StagedFile) -> io::Result<()> {
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::task::spawn_blocking(move || staged.commit())
        .await
        .map_err(io::Error::other)?
        .map_err(io::Error::other)
}

fn completed() -> io::Error { io::Error::new(io::ErrorKind::BrokenPipe, "upload already completed") }

impl AsyncWrite for DirWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            DirWriter::Writing { file, .. } => Pin::new(file).poll_write(cx, buf),
            _ => Poll::Ready(Err(completed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DirWriter::Writing { file, .. } => Pin::new(file).poll_flush(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(this, DirWriter::Done) {
                DirWriter::Writing { file, staged } => *this = DirWriter::Committing(Box::pin(commit(file, staged))),
                DirWriter::Committing(mut pending) => {
                    let poll = pending.as_mut().poll(cx);
                    if poll.is_pending() {
                        *this = DirWriter::Committing(pending);
                    }
                    return poll;
                }
                DirWriter::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}
