//! Stream every object under a container prefix into one zip archive.
//!
//! The archive is written to a local file, uploaded back to an object store,
//! or both, without ever being buffered whole in memory or on disk.
//!
//! # Architecture
//!
//! The crate follows a three-layer layout:
//! - `data` - requests, results, configuration, and progress events
//! - `core` - pure policy: retry timing and archive naming
//! - `effects` - the [`ObjectStore`] seam and everything that does I/O
//!
//! [`Pipeline`] ties them together: it lists the sources, fetches them with
//! bounded concurrency into a [`StreamingArchiver`], fans the archive out to
//! every sink, and verifies the upload.
//!
//! # Example
//!
//! ```
//! use zipbucket::{ArchiveRequest, MemoryStore, Pipeline};
//!
//! # tokio_test_block(async {
//! let store = MemoryStore::new();
//! store.insert("photos", "2024/a.jpg", "aaa");
//! store.insert("photos", "2024/b.jpg", "bbb");
//!
//! let pipeline = Pipeline::new(store.clone());
//! let request = ArchiveRequest::new("photos", "2024/").destination("backups", "2024.zip");
//! let result = pipeline.run(&request).await.unwrap().unwrap();
//!
//! assert_eq!(result.manifest.len(), 2);
//! assert_eq!(result.manifest[0].archive_path, "a.jpg");
//! assert!(store.get("backups", "2024.zip").is_some());
//! # });
//! # fn tokio_test_block<F: std::future::Future>(future: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(future)
//! # }
//! ```

mod core;
mod data;
mod effects;
mod error;
mod pipeline;

pub use core::{BackoffPolicy, Transient, archive_path, suggest_name};
pub use data::{
    ArchiveOptions, ArchiveRequest, ArchiveResult, IntegrityMode, ManifestEntry, NameMapper, ObjectRef,
    PipelineConfig, Progress, ProgressCallback, ReadOptions, RemoteTarget, Stage, WriteOptions,
};
pub use effects::{
    ArchiveOutput, BoxStream, ByteStream, DirStore, EntryReceipt, EntryStream, FetchPool, MemoryStore, ObjectStore,
    ObjectWriter, SinkSet, SinkTarget, StoredObject, StreamingArchiver, list_sources, verify_destination,
};
pub use error::{Error, Result, StoreError, StoreErrorKind};
pub use pipeline::{Pipeline, ZIP_CONTENT_TYPE};
