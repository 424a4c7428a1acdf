use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};
use zipbucket::{ArchiveRequest, IntegrityMode, PipelineConfig};

use super::parse::{Location, parse_meta};

/// Zip every object under a container prefix into one archive.
#[derive(Clone, Debug, Parser)]
#[command(name = "zipbucket", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
pub struct App {
    /// Objects to archive, as scheme://container/prefix
    pub from: String,

    /// Where to upload the archive, as scheme://container/path
    pub to: Option<String>,

    /// Keep a local copy of the archive at this path
    #[arg(long, value_name = "PATH")]
    pub keep: Option<PathBuf>,

    /// Show progress while archiving
    #[arg(long)]
    pub progress: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Directory whose subdirectories are the containers
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Objects fetched at the same time
    #[arg(long, short = 'j', value_name = "N")]
    pub concurrency: Option<usize>,

    /// Pipeline configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Deflate level, overriding the configuration file
    #[arg(long, value_name = "0-9", value_parser = clap::value_parser!(i64).range(0..=9))]
    pub level: Option<i64>,

    /// Metadata attached to the uploaded archive
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
    pub metadata: Vec<(String, String)>,

    /// Integrity check requested for source reads (crc32c or md5)
    #[arg(long, value_name = "MODE")]
    pub integrity: Option<IntegrityMode>,

    /// Upload in a single request instead of a resumable session
    #[arg(long)]
    pub no_resumable: bool,

    /// Log debug output to stderr
    #[arg(long, short)]
    pub verbose: bool,
}

impl App {
    /// Build the archive request from the positional locations and flags.
    ///
    /// An unparsable destination is ignored with a warning.
    pub fn request(&self) -> Result<ArchiveRequest> {
        let from = Location::try_from(self.from.as_str()).context("invalid source")?;
        debug!(source = %from, "parsed source location");

        let mut request = ArchiveRequest::new(&from.container, &from.path)
            .progress(self.progress)
            .integrity(self.integrity)
            .resumable_upload(!self.no_resumable);

        if let Some(to) = &self.to {
            match Location::try_from(to.as_str()) {
                Ok(to) => request = request.destination(to.container, to.path),
                Err(err) => warn!(destination = %to, error = %err, "ignoring unparsable destination"),
            }
        }
        if let Some(keep) = &self.keep {
            request = request.keep(keep);
        }
        if let Some(limit) = self.concurrency {
            request = request.concurrency(limit);
        }
        for (key, value) in &self.metadata {
            request = request.metadata(key, value);
        }
        Ok(request)
    }

    /// Load the configuration file, if any, and apply flag overrides.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(level) = self.level {
            config.archive = config.archive.compression_level(level);
        }
        Ok(config)
    }
}
