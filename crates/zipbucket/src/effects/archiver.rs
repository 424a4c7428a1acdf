use std::io::{self, Seek, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use super::store::BoxStream;
use crate::data::ArchiveOptions;
use crate::error::{Error, Result};

/// Bytes of one archive entry.
pub type EntryStream = BoxStream<'static, Result<Bytes>>;

/// Acknowledgement that an entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryReceipt {
    /// Position of the entry in the archive.
    pub index: u64,
    /// Uncompressed size.
    pub bytes: u64,
}

enum Command {
    Entry {
        path:   String,
        chunks: mpsc::Receiver<Bytes>,
        done:   oneshot::Sender<Result<EntryReceipt>>,
    },
    Finish,
}

/// The archive byte stream, consumed by the sinks.
///
/// The archiver applies backpressure: it stops producing while this side is
/// not being drained. Dropping it makes further archive writes fail.
pub struct ArchiveOutput {
    chunks: mpsc::Receiver<Bytes>,
}

impl ArchiveOutput {
    /// The next archive chunk, or `None` once the archiver has stopped.
    pub async fn next_chunk(&mut self) -> Option<Bytes> { self.chunks.recv().await }
}

/// A streaming zip writer shared by concurrent fetches.
///
/// The codec runs on a blocking thread. Entries are written one at a time:
/// [`append`](Self::append) holds an exclusive lock from the entry header to
/// its last byte, so entries never interleave. Data only moves through bounded
/// channels, so memory stays proportional to the channel capacities rather
/// than to object sizes.
///
/// If the archiver is dropped, or an entry fails, before
/// [`finalize`](Self::finalize), no central directory is written and the
/// output ends as an incomplete archive.
pub struct StreamingArchiver {
    commands: AsyncMutex<Option<mpsc::Sender<Command>>>,
    worker:   Mutex<Option<JoinHandle<Result<u64>>>>,
    capacity: usize,
}

impl StreamingArchiver {
    /// Start the codec. Must be called within a Tokio runtime.
    pub fn spawn(options: ArchiveOptions) -> (Self, ArchiveOutput) {
        let capacity = options.channel_capacity.max(1);
        let (command_tx, command_rx) = mpsc::channel(1);
        let (output_tx, output_rx) = mpsc::channel(capacity);
        let worker = tokio::task::spawn_blocking(move || run_codec(command_rx, output_tx, options));

        let archiver = Self {
            commands: AsyncMutex::new(Some(command_tx)),
            worker: Mutex::new(Some(worker)),
            capacity,
        };
        (archiver, ArchiveOutput { chunks: output_rx })
    }

    /// Write one entry named `path` from `source`.
    ///
    /// Concurrent callers are served in the order they requested the lock.
    /// If `source` fails, the archiver is closed and the error returned.
    pub async fn append(&self, path: &str, mut source: EntryStream) -> Result<EntryReceipt> {
        let mut commands = self.commands.lock().await;
        let sender = commands.as_ref().ok_or(Error::ArchiverClosed)?.clone();

        let (chunk_tx, chunk_rx) = mpsc::channel(self.capacity);
        let (done_tx, done_rx) = oneshot::channel();
        let entry = Command::Entry {
            path:   path.to_string(),
            chunks: chunk_rx,
            done:   done_tx,
        };
        if sender.send(entry).await.is_err() {
            commands.take();
            return Err(self.worker_error().await);
        }
        drop(sender);

        while let Some(chunk) = source.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    debug!(path, error = %err, "entry source failed; closing archiver");
                    commands.take();
                    return Err(err);
                }
            };
            if chunk_tx.send(chunk).await.is_err() {
                break;
            }
        }
        drop(chunk_tx);

        match done_rx.await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(err)) => {
                commands.take();
                Err(err)
            }
            Err(_) => {
                commands.take();
                Err(self.worker_error().await)
            }
        }
    }

    /// Write the central directory and stop the codec.
    ///
    /// Returns the total archive size. Fails if the archiver was already
    /// closed by an entry failure.
    pub async fn finalize(&self) -> Result<u64> {
        let sender = self.commands.lock().await.take().ok_or(Error::ArchiverClosed)?;
        if sender.send(Command::Finish).await.is_err() {
            debug!("archive codec exited before finalize");
        }
        drop(sender);

        let Some(worker) = self.take_worker() else {
            return Err(Error::ArchiverClosed);
        };
        worker.await?
    }

    fn take_worker(&self) -> Option<JoinHandle<Result<u64>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// The reason the codec stopped early.
    async fn worker_error(&self) -> Error {
        match self.take_worker() {
            Some(worker) => match worker.await {
                Ok(Ok(_)) => Error::ArchiverClosed,
                Ok(Err(err)) => err,
                Err(err) => err.into(),
            },
            None => Error::ArchiverClosed,
        }
    }
}

/// Sink for the zip codec that hands full chunks to the output channel.
///
/// Clones share state so the final partial chunk can be flushed after the
/// codec has consumed its writer.
#[derive(Clone)]
struct ChannelWriter {
    state: Arc<Mutex<WriterState>>,
}

struct WriterState {
    output:     mpsc::Sender<Bytes>,
    buffer:     Vec<u8>,
    chunk_size: usize,
    written:    u64,
    abandoned:  bool,
}

impl ChannelWriter {
    fn new(output: mpsc::Sender<Bytes>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            state: Arc::new(Mutex::new(WriterState {
                output,
                buffer: Vec::with_capacity(chunk_size),
                chunk_size,
                written: 0,
                abandoned: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, WriterState> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    fn written(&self) -> u64 { self.state().written }

    /// Discard everything written from now on.
    ///
    /// `ZipWriter` writes a central directory when dropped, which must not
    /// reach the sinks for an archive that was not finalized.
    fn abandon(&self) {
        let mut state = self.state();
        state.abandoned = true;
        state.buffer.clear();
    }
}

impl WriterState {
    fn emit(&mut self) -> io::Result<()> {
        if self.abandoned || self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size));
        self.output
            .blocking_send(Bytes::from(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive output closed"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.abandoned {
            return Ok(buf.len());
        }
        state.buffer.extend_from_slice(buf);
        state.written += buf.len() as u64;
        if state.buffer.len() >= state.chunk_size {
            state.emit()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { self.state().emit() }
}

fn io_error(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::BrokenPipe {
        Error::OutputClosed
    } else {
        Error::Archive(ZipError::Io(err))
    }
}

fn codec_error(err: ZipError) -> Error {
    match err {
        ZipError::Io(err) => io_error(err),
        other => Error::Archive(other),
    }
}

fn run_codec(
    mut commands: mpsc::Receiver<Command>,
    output: mpsc::Sender<Bytes>,
    options: ArchiveOptions,
) -> Result<u64> {
    let mut writer = ChannelWriter::new(output, options.chunk_size);
    let mut zip = ZipWriter::new_stream(writer.clone());
    // Entry sizes are unknown when the header is written, so every entry
    // carries ZIP64 fields in case it grows past 4 GiB.
    let entry_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(options.compression_level))
        .last_modified_time(DateTime::default())
        .large_file(true);

    let mut entries = 0u64;
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Entry { path, mut chunks, done } => {
                let index = entries;
                entries += 1;
                match write_entry(&mut zip, &path, &mut chunks, entry_options) {
                    Ok(bytes) => {
                        debug!(path, index, bytes, "entry written");
                        let _ = done.send(Ok(EntryReceipt { index, bytes }));
                    }
                    Err(err) => {
                        debug!(path, error = %err, "entry failed; abandoning archive");
                        let _ = done.send(Err(err));
                        writer.abandon();
                        return Err(Error::ArchiverClosed);
                    }
                }
            }
            Command::Finish => {
                drop(zip.finish().map_err(codec_error)?);
                writer.flush().map_err(io_error)?;
                let total = writer.written();
                info!(entries, bytes = total, "archive finalized");
                return Ok(total);
            }
        }
    }

    debug!(entries, "archiver dropped before finalize; archive abandoned");
    writer.abandon();
    Err(Error::ArchiverClosed)
}

fn write_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    path: &str,
    chunks: &mut mpsc::Receiver<Bytes>,
    options: SimpleFileOptions,
) -> Result<u64> {
    zip.start_file(path, options).map_err(codec_error)?;
    let mut bytes = 0u64;
    while let Some(chunk) = chunks.blocking_recv() {
        zip.write_all(&chunk).map_err(io_error)?;
        bytes += chunk.len() as u64;
    }
    Ok(bytes)
}
