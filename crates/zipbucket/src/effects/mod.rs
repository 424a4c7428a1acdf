//! I/O: object stores, the streaming archiver, sinks, and the fetch pool.

mod archiver;
mod dir;
mod lister;
mod memory;
mod pool;
mod sink;
mod store;
mod verify;

pub use archiver::{ArchiveOutput, EntryReceipt, EntryStream, StreamingArchiver};
pub use dir::DirStore;
pub use lister::list_sources;
pub use memory::{MemoryStore, StoredObject};
pub use pool::FetchPool;
pub use sink::{SinkSet, SinkTarget};
pub use store::{BoxStream, ByteStream, ObjectStore, ObjectWriter};
pub use verify::verify_destination;
