//! Error types for zipbucket.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::Transient;
use crate::data::Stage;

/// Classification reported by an [`ObjectStore`](crate::ObjectStore) implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Network failure, throttling, or anything else worth retrying.
    Transient,
    /// The named container or object does not exist.
    NotFound,
    /// Any other failure; retrying will not help.
    Permanent,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreError {
    pub kind:    StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Permanent, message)
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => StoreErrorKind::NotFound,
            io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => StoreErrorKind::Transient,
            _ => StoreErrorKind::Permanent,
        };
        Self::new(kind, err.to_string())
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool { self.kind == StoreErrorKind::Transient }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("failed to list {container}/{prefix}: {source}")]
    List {
        container: String,
        prefix:    String,
        #[source]
        source:    StoreError,
    },

    #[error("failed to read source object '{name}': {source}")]
    SourceRead {
        name:   String,
        #[source]
        source: StoreError,
    },

    #[error("archive path '{path}' would be written for both '{first}' and '{second}'")]
    DuplicateEntry {
        path:   String,
        first:  String,
        second: String,
    },

    #[error("failed to open upload to {container}/{path}: {source}")]
    OpenUpload {
        container: String,
        path:      String,
        #[source]
        source:    StoreError,
    },

    #[error("failed to write archive to {sink}: {source}")]
    Sink {
        sink:   String,
        #[source]
        source: io::Error,
    },

    #[error("local staging failed: {0}")]
    Staging(#[from] zipbucket_fs::Error),

    #[error("archive codec error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive output closed before the archive was complete")]
    OutputClosed,

    #[error("archiver is no longer accepting entries")]
    ArchiverClosed,

    #[error("{container}/{path} not found after upload ({attempts} checks)")]
    NotFoundAfterUpload {
        container: String,
        path:      String,
        attempts:  u32,
    },

    #[error("failed to check {container}/{path}: {source}")]
    Verify {
        container: String,
        path:      String,
        #[source]
        source:    StoreError,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to read configuration file '{path}': {source}")]
    ConfigRead {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{stage} failed: {source}")]
    Stage {
        stage:  Stage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attribute this error to a pipeline stage.
    ///
    /// Validation errors and errors that already carry a stage are returned as is.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Error::Validation(_) | Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            Error::Validation(_) => Some(Stage::Validating),
            _ => None,
        }
    }

    /// The underlying error with any stage attribution removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
