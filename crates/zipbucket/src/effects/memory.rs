use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use tokio::io::AsyncWrite;

use super::store::{ByteStream, ObjectStore, ObjectWriter};
use crate::data::{ObjectRef, ReadOptions, WriteOptions};
use crate::error::StoreError;

/// An object held by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data:         Bytes,
    pub content_type: Option<String>,
    pub metadata:     BTreeMap<String, String>,
}

/// In-process [`ObjectStore`] with failure injection.
///
/// Clones share the same objects. Besides serving tests, it records how the
/// pipeline used it: list and exists calls, concurrently open reads, and the
/// options each read and write was opened with.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    objects:      Mutex<BTreeMap<(String, String), StoredObject>>,
    faults:       Mutex<Faults>,
    reads_seen:   Mutex<Vec<ReadOptions>>,
    list_calls:   AtomicUsize,
    exists_calls: AtomicUsize,
    open_reads:   AtomicUsize,
    peak_reads:   AtomicUsize,
}

#[derive(Default)]
struct Faults {
    list:          VecDeque<StoreError>,
    broken_reads:  HashSet<(String, String)>,
    reject_writes: bool,
    hidden:        bool,
    chunk_size:    Option<usize>,
    read_delay:    Option<Duration>,
}

const DEFAULT_CHUNK: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

fn key(container: &str, name: &str) -> (String, String) { (container.to_string(), name.to_string()) }

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, container: &str, name: &str, data: impl Into<Bytes>) {
        lock(&self.inner.objects).insert(key(container, name), StoredObject {
            data:         data.into(),
            content_type: None,
            metadata:     BTreeMap::new(),
        });
    }

    pub fn get(&self, container: &str, name: &str) -> Option<StoredObject> {
        lock(&self.inner.objects).get(&key(container, name)).cloned()
    }

    /// Names in `container`, sorted.
    pub fn names(&self, container: &str) -> Vec<String> {
        lock(&self.inner.objects)
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Fail the next `list` calls, one queued error per call.
    pub fn fail_lists(&self, errors: impl IntoIterator<Item = StoreError>) {
        lock(&self.inner.faults).list.extend(errors);
    }

    /// Reads of this object yield one chunk, then a transient error.
    pub fn break_read(&self, container: &str, name: &str) {
        lock(&self.inner.faults).broken_reads.insert(key(container, name));
    }

    /// Uploads fail when they are completed.
    pub fn reject_writes(&self, reject: bool) { lock(&self.inner.faults).reject_writes = reject; }

    /// `exists` reports `false` for every object.
    pub fn hide_objects(&self, hidden: bool) { lock(&self.inner.faults).hidden = hidden; }

    pub fn set_chunk_size(&self, size: usize) { lock(&self.inner.faults).chunk_size = Some(size.max(1)); }

    /// Pause before each chunk of a read.
    pub fn set_read_delay(&self, delay: Duration) { lock(&self.inner.faults).read_delay = Some(delay); }

    pub fn list_calls(&self) -> usize { self.inner.list_calls.load(Ordering::SeqCst) }

    pub fn exists_calls(&self) -> usize { self.inner.exists_calls.load(Ordering::SeqCst) }

    /// Highest number of reads that were open at the same time.
    pub fn peak_open_reads(&self) -> usize { self.inner.peak_reads.load(Ordering::SeqCst) }

    pub fn read_options_seen(&self) -> Vec<ReadOptions> { lock(&self.inner.reads_seen).clone() }
}

/// Counts one open read until dropped.
struct ReadGuard(Arc<Inner>);

impl ReadGuard {
    fn open(inner: &Arc<Inner>) -> Self {
        let open = inner.open_reads.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_reads.fetch_max(open, Ordering::SeqCst);
        Self(Arc::clone(inner))
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) { self.0.open_reads.fetch_sub(1, Ordering::SeqCst); }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<ObjectRef>, StoreError> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.inner.faults).list.pop_front() {
            return Err(err);
        }
        Ok(lock(&self.inner.objects)
            .keys()
            .filter(|(c, name)| c == container && name.starts_with(prefix))
            .map(|(_, name)| ObjectRef::new(name.clone()))
            .collect())
    }

    async fn open_read(
        &self,
        container: &str,
        name: &str,
        options: &ReadOptions,
    ) -> Result<ByteStream, StoreError> {
        lock(&self.inner.reads_seen).push(options.clone());
        let data = self
            .get(container, name)
            .ok_or_else(|| StoreError::not_found(format!("{container}/{name} does not exist")))?
            .data;

        let (chunk_size, delay, broken) = {
            let faults = lock(&self.inner.faults);
            (
                faults.chunk_size.unwrap_or(DEFAULT_CHUNK),
                faults.read_delay,
                faults.broken_reads.contains(&key(container, name)),
            )
        };

        let mut chunks: VecDeque<Result<Bytes, StoreError>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..data.len().min(start + chunk_size))))
            .collect();
        if broken {
            chunks.truncate(1);
            chunks.push_back(Err(StoreError::transient(format!(
                "connection reset while reading {container}/{name}"
            ))));
        }

        let guard = ReadGuard::open(&self.inner);
        let stream = stream::unfold((chunks, guard), move |(mut chunks, guard)| async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
            let item = chunks.pop_front()?;
            Some((item, (chunks, guard)))
        });
        Ok(Box::pin(stream))
    }

    async fn open_write(
        &self,
        container: &str,
        name: &str,
        options: &WriteOptions,
    ) -> Result<ObjectWriter, StoreError> {
        Ok(Box::pin(MemoryWriter {
            inner:     Arc::clone(&self.inner),
            key:       key(container, name),
            options:   options.clone(),
            buffer:    Vec::new(),
            committed: false,
        }))
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError> {
        self.inner.exists_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.inner.faults).hidden {
            return Ok(false);
        }
        Ok(lock(&self.inner.objects).contains_key(&key(container, name)))
    }

    async fn delete(&self, container: &str, name: &str) -> Result<(), StoreError> {
        lock(&self.inner.objects)
            .remove(&key(container, name))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("{container}/{name} does not exist")))
    }
}

/// Buffers an upload and publishes it on shutdown.
struct MemoryWriter {
    inner:     Arc<Inner>,
    key:       (String, String),
    options:   WriteOptions,
    buffer:    Vec<u8>,
    committed: bool,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "upload already completed")));
        }
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> { Poll::Ready(Ok(())) }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Ok(()));
        }
        if lock(&this.inner.faults).reject_writes {
            return Poll::Ready(Err(io::Error::other(format!(
                "upload of {}/{} rejected",
                this.key.0, this.key.1
            ))));
        }
        let object = StoredObject {
            data:         Bytes::from(std::mem::take(&mut this.buffer)),
            content_type: this.options.content_type.clone(),
            metadata:     this.options.metadata.clone(),
        };
        lock(&this.inner.objects).insert(this.key.clone(), object);
        this.committed = true;
        Poll::Ready(Ok(()))
    }
}
