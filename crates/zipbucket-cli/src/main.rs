use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use zipbucket::{DirStore, Pipeline};

use crate::cli::App;
use crate::ui::{ArchiveTracker, ArchiveTrackerConfig, Formatter, Tracker};

mod cli;
mod ui;

const LOG_ENV: &str = "ZIPBUCKET_LOG";

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = App::parse();
    init_logging(app.verbose);

    let request = app.request()?;
    let config = app.pipeline_config()?;

    let mut pipeline = Pipeline::new(DirStore::new(&app.root)).with_config(config);
    let tracker = app.progress.then(|| ArchiveTracker::new(ArchiveTrackerConfig::default()));
    if let Some(tracker) = &tracker {
        pipeline = pipeline.on_progress(tracker.callback());
    }

    let outcome = pipeline.run(&request).await;
    if let Some(tracker) = &tracker {
        tracker.finish(None);
    }

    let Some(result) = outcome.with_context(|| format!("failed to archive {}", app.from))? else {
        warn!("nothing to do: give a destination or --keep");
        return Ok(());
    };

    if app.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", Formatter::manifest(&result));
    }
    Ok(())
}
