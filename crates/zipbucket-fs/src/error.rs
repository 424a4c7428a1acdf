use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("destination has no file name: '{0}'")]
    InvalidDestination(PathBuf),

    #[error("failed to create staging file '{path}': {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to set permissions on '{path}': {source}")]
    Permissions { path: PathBuf, source: io::Error },

    #[error("failed to move '{from}' to '{to}': {source}")]
    Commit {
        from:   PathBuf,
        to:     PathBuf,
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
