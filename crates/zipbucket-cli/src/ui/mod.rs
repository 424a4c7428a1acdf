mod table;
mod tracker;

pub use table::Formatter;
pub use tracker::{ArchiveTracker, ArchiveTrackerConfig, Tracker};
