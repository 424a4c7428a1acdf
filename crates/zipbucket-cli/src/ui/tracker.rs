use std::sync::Arc;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use zipbucket::{Progress, ProgressCallback};

pub trait Tracker {
    type Ctx: Clone;
    fn new(ctx: Self::Ctx) -> Self;
    fn finish(&self, msg: Option<String>);
}

const PB_STYLE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {wide_msg}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const PB_CHARS: &str = "█▓▒░  ";

static PB_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| {
    let pb_style = match ProgressStyle::with_template(PB_STYLE) {
        Ok(pb_style) => pb_style.tick_chars(TICK).progress_chars(PB_CHARS),
        Err(_) => return None,
    };

    Some(pb_style)
});

/// Renders pipeline progress as one bar counting archived entries.
#[derive(Clone)]
pub struct ArchiveTracker {
    pub pb: ProgressBar,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveTrackerConfig {
    /// Track without drawing anything.
    pub hidden: bool,
}

impl Tracker for ArchiveTracker {
    type Ctx = ArchiveTrackerConfig;

    fn new(ctx: Self::Ctx) -> Self {
        let pb = if ctx.hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::no_length()
        };

        if let Some(pb_style) = PB_TEMPLATE.as_ref() {
            pb.set_style(pb_style.clone());
        }
        ArchiveTracker { pb }
    }

    fn finish(&self, msg: Option<String>) {
        match msg {
            Some(msg) => self.pb.finish_with_message(msg),
            None => self.pb.finish_and_clear(),
        }
    }
}

impl ArchiveTracker {
    pub fn observe(&self, event: &Progress) {
        match event {
            Progress::StageStarted(stage) => self.pb.set_message(stage.to_string()),
            Progress::Listed { objects } => self.pb.set_length(*objects as u64),
            Progress::FetchStarted { entry, .. } => self.pb.set_message(format!("fetching {entry}")),
            Progress::EntryArchived { .. } => self.pb.inc(1),
            Progress::Finalized { bytes } => self.pb.set_message(format!("wrote {}", HumanBytes(*bytes))),
        }
    }

    /// A pipeline callback feeding this tracker.
    pub fn callback(&self) -> ProgressCallback {
        let tracker = self.clone();
        Arc::new(move |event: &Progress| tracker.observe(event))
    }
}
