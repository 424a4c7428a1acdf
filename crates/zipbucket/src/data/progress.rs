use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Pipeline stages in the order a successful run passes through them.
///
/// A request with no sink stops after `Validating`. A failure in any stage
/// ends the run with an error attributed to that stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validating,
    ListingSources,
    FetchingAndArchiving,
    Finalizing,
    VerifyingDestination,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validating => write!(f, "validating"),
            Stage::ListingSources => write!(f, "listing sources"),
            Stage::FetchingAndArchiving => write!(f, "fetching and archiving"),
            Stage::Finalizing => write!(f, "finalizing"),
            Stage::VerifyingDestination => write!(f, "verifying destination"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// A progress notification.
///
/// Delivered synchronously from the task that caused it, so callbacks should
/// return quickly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    StageStarted(Stage),

    /// The source listing finished.
    Listed { objects: usize },

    /// A fetch acquired its slot and is about to open the source.
    FetchStarted { source: String, entry: String },

    /// All bytes of an entry have been written into the archive.
    EntryArchived {
        source: String,
        entry:  String,
        bytes:  u64,
    },

    /// The archive trailer was written and every sink confirmed.
    Finalized { bytes: u64 },
}

pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Routes progress events to the caller's callback, if one is enabled.
///
/// Every event is also traced at debug level.
#[derive(Clone, Default)]
pub(crate) struct Reporter {
    callback: Option<ProgressCallback>,
}

impl Reporter {
    pub(crate) fn new(callback: Option<ProgressCallback>) -> Self { Self { callback } }

    pub(crate) fn emit(&self, event: Progress) {
        debug!(?event, "progress");
        if let Some(callback) = &self.callback {
            callback(&event);
        }
    }

    pub(crate) fn stage(&self, stage: Stage) { self.emit(Progress::StageStarted(stage)); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_reporter_forwards_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = Reporter::new(Some(Arc::new(move |event: &Progress| {
            sink.lock().unwrap().push(event.clone());
        })));

        reporter.stage(Stage::ListingSources);
        reporter.emit(Progress::Listed { objects: 2 });

        assert_eq!(*seen.lock().unwrap(), vec![
            Progress::StageStarted(Stage::ListingSources),
            Progress::Listed { objects: 2 },
        ]);
    }

    #[test]
    fn test_silent_reporter() { Reporter::default().stage(Stage::Done); }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::FetchingAndArchiving.to_string(), "fetching and archiving");
    }
}
