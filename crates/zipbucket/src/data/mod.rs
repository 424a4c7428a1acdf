//! Immutable request, result, and configuration types.

mod config;
mod object;
mod progress;
mod request;
mod result;

pub use config::{ArchiveOptions, PipelineConfig};
pub use object::{IntegrityMode, ObjectRef, ReadOptions, WriteOptions};
pub(crate) use progress::Reporter;
pub use progress::{Progress, ProgressCallback, Stage};
pub(crate) use request::ArchivePlan;
pub use request::{ArchiveRequest, NameMapper, RemoteTarget};
pub use result::{ArchiveResult, ManifestEntry};
