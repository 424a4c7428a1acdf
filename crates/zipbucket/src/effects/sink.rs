use std::fmt;
use std::path::{Path, PathBuf};

use futures_util::future::try_join_all;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use zipbucket_fs::{StageOptions, StagedFile};

use super::archiver::ArchiveOutput;
use super::store::{ObjectStore, ObjectWriter};
use crate::core::BackoffPolicy;
use crate::data::{RemoteTarget, WriteOptions};
use crate::error::{Error, Result};

/// Where a copy of the archive goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    LocalFile(PathBuf),
    Remote { container: String, path: String },
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkTarget::LocalFile(path) => write!(f, "local file '{}'", path.display()),
            SinkTarget::Remote { container, path } => write!(f, "remote object {container}/{path}"),
        }
    }
}

enum SinkWriter {
    /// Written under a staging name; renamed onto the keep path on completion.
    Local {
        file:   tokio::fs::File,
        staged: StagedFile,
    },
    Remote(ObjectWriter),
}

struct Sink {
    target: SinkTarget,
    writer: SinkWriter,
}

impl Sink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let written = match &mut self.writer {
            SinkWriter::Local { file, .. } => file.write_all(chunk).await,
            SinkWriter::Remote(writer) => writer.write_all(chunk).await,
        };
        written.map_err(|source| Error::Sink {
            sink: self.target.to_string(),
            source,
        })
    }

    async fn complete(self) -> Result<()> {
        let target = self.target;
        let failed = |source| Error::Sink {
            sink: target.to_string(),
            source,
        };
        match self.writer {
            SinkWriter::Local { mut file, staged } => {
                file.flush().await.map_err(failed)?;
                file.sync_all().await.map_err(failed)?;
                drop(file);
                staged.commit()?;
            }
            SinkWriter::Remote(mut writer) => writer.shutdown().await.map_err(failed)?,
        }
        info!(sink = %target, "archive written");
        Ok(())
    }
}

/// Every destination of one run.
///
/// Each archive chunk is written to all sinks before the next is taken, so
/// the slowest sink paces the archiver. Nothing becomes visible at a
/// destination until [`complete`](Self::complete); dropping the set instead
/// removes the local staging file and abandons the upload.
pub struct SinkSet {
    sinks: Vec<Sink>,
}

impl SinkSet {
    /// Open the local file and the remote upload.
    ///
    /// Opening the upload is retried under `upload_policy`.
    pub async fn open<S: ObjectStore + ?Sized>(
        store: &S,
        keep: Option<&Path>,
        remote: Option<(&RemoteTarget, &WriteOptions)>,
        upload_policy: &BackoffPolicy,
    ) -> Result<Self> {
        let mut sinks = Vec::new();

        if let Some(path) = keep {
            let (staged, file) = StagedFile::create(path, StageOptions::new())?;
            debug!(staging = %staged.staging_path().display(), "staging local archive");
            sinks.push(Sink {
                target: SinkTarget::LocalFile(path.to_path_buf()),
                writer: SinkWriter::Local {
                    file: tokio::fs::File::from_std(file),
                    staged,
                },
            });
        }

        if let Some((target, options)) = remote {
            let writer = upload_policy
                .attempt("open upload", |attempt| {
                    debug!(container = %target.container, path = %target.path, attempt, "opening upload");
                    store.open_write(&target.container, &target.path, options)
                })
                .await
                .map_err(|source| Error::OpenUpload {
                    container: target.container.clone(),
                    path: target.path.clone(),
                    source,
                })?;
            sinks.push(Sink {
                target: SinkTarget::Remote {
                    container: target.container.clone(),
                    path:      target.path.clone(),
                },
                writer: SinkWriter::Remote(writer),
            });
        }

        Ok(Self { sinks })
    }

    pub fn targets(&self) -> impl Iterator<Item = &SinkTarget> { self.sinks.iter().map(|sink| &sink.target) }

    /// Copy the archive stream into every sink until the archiver stops.
    ///
    /// Returns the set for [`complete`](Self::complete). A failing sink ends
    /// the drain, which in turn makes the archiver's next write fail.
    pub async fn drain(mut self, mut output: ArchiveOutput) -> Result<Self> {
        let mut total = 0u64;
        while let Some(chunk) = output.next_chunk().await {
            try_join_all(self.sinks.iter_mut().map(|sink| sink.write(&chunk))).await?;
            total += chunk.len() as u64;
        }
        debug!(bytes = total, sinks = self.sinks.len(), "archive stream drained");
        Ok(self)
    }

    /// Make the archive visible at every destination.
    ///
    /// Call only after the archive was finalized. The upload is completed
    /// before the local file is renamed into place, so a rejected upload
    /// leaves no local copy either.
    pub async fn complete(self) -> Result<()> {
        for sink in self.sinks.into_iter().rev() {
            sink.complete().await?;
        }
        Ok(())
    }
}
