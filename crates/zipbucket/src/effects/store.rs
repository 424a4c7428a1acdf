use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use tokio::io::AsyncWrite;

use crate::data::{ObjectRef, ReadOptions, WriteOptions};
use crate::error::StoreError;

pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Bytes of one object, delivered incrementally.
pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// An open upload.
///
/// The object is committed only when `shutdown` completes. Dropping the
/// writer before that abandons the upload.
pub type ObjectWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// The remote blob store the pipeline reads from and writes to.
///
/// Implementations classify failures through [`StoreError::kind`]; only
/// transient failures are retried by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every object in `container` whose name starts with `prefix`.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<ObjectRef>, StoreError>;

    async fn open_read(
        &self,
        container: &str,
        name: &str,
        options: &ReadOptions,
    ) -> Result<ByteStream, StoreError>;

    /// Open an upload, replacing any existing object of the same name once committed.
    async fn open_write(
        &self,
        container: &str,
        name: &str,
        options: &WriteOptions,
    ) -> Result<ObjectWriter, StoreError>;

    async fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError>;

    async fn delete(&self, container: &str, name: &str) -> Result<(), StoreError>;
}
