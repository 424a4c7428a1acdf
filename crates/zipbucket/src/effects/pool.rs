use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{StreamExt, TryStreamExt, stream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::archiver::{EntryReceipt, EntryStream, StreamingArchiver};
use super::store::ObjectStore;
use crate::core::archive_path;
use crate::data::{ArchiveOptions, ManifestEntry, NameMapper, ObjectRef, Progress, ReadOptions, Reporter};
use crate::error::{Error, Result};

type Fetched = Result<(EntryReceipt, ManifestEntry)>;

/// Streams listed objects into the archiver with bounded concurrency.
///
/// Fetches are started in listing order and at most `limit` are in flight.
/// Each fetch opens its source only once it holds a slot, so open reads never
/// exceed the limit. With a limit of one the archive order equals the listing
/// order.
///
/// Entries are written one at a time, but a fetch keeps reading while it
/// waits for its turn: up to `read_ahead` chunks are buffered per fetch.
pub struct FetchPool<S: ObjectStore + ?Sized> {
    store:      Arc<S>,
    archiver:   Arc<StreamingArchiver>,
    container:  String,
    prefix:     String,
    mapper:     Option<NameMapper>,
    limit:      usize,
    read_ahead: usize,
    options:    ReadOptions,
    reporter:   Reporter,
}

impl<S: ObjectStore + ?Sized + 'static> FetchPool<S> {
    pub fn new(
        store: Arc<S>,
        archiver: Arc<StreamingArchiver>,
        container: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            archiver,
            container: container.into(),
            prefix: prefix.into(),
            mapper: None,
            limit: 1,
            read_ahead: ArchiveOptions::default().channel_capacity,
            options: ReadOptions::default(),
            reporter: Reporter::default(),
        }
    }

    #[must_use]
    pub fn mapper(mut self, mapper: Option<NameMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Chunks each fetch may buffer ahead of the archiver.
    #[must_use]
    pub fn read_ahead(mut self, chunks: usize) -> Self {
        self.read_ahead = chunks.max(1);
        self
    }

    #[must_use]
    pub fn read_options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub(crate) fn reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Archive every object the name mapper does not exclude.
    ///
    /// Returns the manifest in archive order. The first failure stops new
    /// fetches and cancels the ones in flight. Two objects mapped to the same
    /// archive path are rejected before anything is fetched.
    pub async fn run(self, objects: Vec<ObjectRef>) -> Result<Vec<ManifestEntry>> {
        let planned = self.plan(objects)?;
        let context = Arc::new(FetchContext {
            store:      self.store,
            archiver:   self.archiver,
            container:  self.container,
            options:    self.options,
            read_ahead: self.read_ahead,
            reporter:   self.reporter,
        });

        let mut tasks: JoinSet<Fetched> = JoinSet::new();
        let mut archived = Vec::with_capacity(planned.len());
        for (object, entry) in planned {
            while tasks.len() >= self.limit {
                if let Some(joined) = tasks.join_next().await {
                    archived.push(settle(joined, &mut tasks).await?);
                }
            }

            context.reporter.emit(Progress::FetchStarted {
                source: object.name.clone(),
                entry:  entry.clone(),
            });
            tasks.spawn(fetch_one(Arc::clone(&context), object, entry));
        }

        while let Some(joined) = tasks.join_next().await {
            archived.push(settle(joined, &mut tasks).await?);
        }

        archived.sort_by_key(|(receipt, _)| receipt.index);
        let manifest: Vec<ManifestEntry> = archived.into_iter().map(|(_, entry)| entry).collect();
        info!(archived = manifest.len(), "fetch pool finished");
        Ok(manifest)
    }

    /// Pair each kept object with its archive path.
    fn plan(&self, objects: Vec<ObjectRef>) -> Result<Vec<(ObjectRef, String)>> {
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut planned = Vec::with_capacity(objects.len());
        let mut excluded = 0usize;
        for object in objects {
            let Some(entry) = archive_path(&object, &self.prefix, self.mapper.as_ref()) else {
                debug!(name = %object.name, "excluded by name mapper");
                excluded += 1;
                continue;
            };
            if let Some(first) = claimed.insert(entry.clone(), object.name.clone()) {
                return Err(Error::DuplicateEntry {
                    path: entry,
                    first,
                    second: object.name,
                });
            }
            planned.push((object, entry));
        }
        debug!(kept = planned.len(), excluded, "archive planned");
        Ok(planned)
    }
}

/// What every fetch of one run shares.
struct FetchContext<S: ?Sized> {
    store:      Arc<S>,
    archiver:   Arc<StreamingArchiver>,
    container:  String,
    options:    ReadOptions,
    read_ahead: usize,
    reporter:   Reporter,
}

/// Unwrap one finished fetch.
///
/// Once one fetch fails the archiver is closed, and fetches still waiting on
/// it fail with `ArchiverClosed`. If that is the error seen first, the
/// remaining fetches are drained so the failure that closed it is reported.
async fn settle(
    joined: std::result::Result<Fetched, tokio::task::JoinError>,
    tasks: &mut JoinSet<Fetched>,
) -> Result<(EntryReceipt, ManifestEntry)> {
    let err = match joined? {
        Ok(fetched) => return Ok(fetched),
        Err(err) => err,
    };
    if !matches!(err, Error::ArchiverClosed) {
        return Err(err);
    }
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Err(cause)) = joined
            && !matches!(cause, Error::ArchiverClosed)
        {
            return Err(cause);
        }
    }
    Err(err)
}

async fn fetch_one<S: ObjectStore + ?Sized>(context: Arc<FetchContext<S>>, object: ObjectRef, entry: String) -> Fetched {
    let source = context
        .store
        .open_read(&context.container, &object.name, &context.options)
        .await
        .map_err(|source| Error::SourceRead {
            name: object.name.clone(),
            source,
        })?;

    let name = object.name.clone();
    let source = source
        .map_err(move |source| Error::SourceRead {
            name: name.clone(),
            source,
        })
        .boxed();

    let (buffered, pump) = read_ahead_of(source, context.read_ahead);
    let ((), receipt) = tokio::join!(pump, context.archiver.append(&entry, buffered));
    let receipt = receipt?;
    debug!(source = %object.name, entry, bytes = receipt.bytes, "fetched into archive");
    context.reporter.emit(Progress::EntryArchived {
        source: object.name.clone(),
        entry:  entry.clone(),
        bytes:  receipt.bytes,
    });
    Ok((receipt, ManifestEntry::new(object.name, entry)))
}

/// Split `source` into a bounded buffer and the future that fills it.
///
/// The pump stops after forwarding an error, or once the buffer's reader is
/// dropped.
fn read_ahead_of(mut source: EntryStream, chunks: usize) -> (EntryStream, impl Future<Output = ()>) {
    let (tx, rx) = mpsc::channel(chunks.max(1));
    let pump = async move {
        while let Some(item) = source.next().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    };
    let buffered = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed();
    (buffered, pump)
}
