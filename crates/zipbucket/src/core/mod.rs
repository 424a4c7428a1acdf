//! Pure policy: retry timing and archive naming.
//!
//! Nothing in here touches the network or the filesystem. The backoff
//! policy's `attempt` only sleeps between the caller's own operations.

mod backoff;
mod naming;

pub use backoff::{BackoffPolicy, Transient};
pub use naming::{archive_path, suggest_name};
