use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

use crate::data::{
    ArchivePlan, ArchiveRequest, ArchiveResult, ManifestEntry, ObjectRef, PipelineConfig, Progress, ProgressCallback,
    ReadOptions, Reporter, Stage, WriteOptions,
};
use crate::effects::{FetchPool, ObjectStore, SinkSet, StreamingArchiver, list_sources, verify_destination};
use crate::error::{Error, Result};

/// Content type of the uploaded archive.
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Archives a prefix of a container into a single zip.
///
/// One pipeline can serve any number of requests; runs share nothing but the
/// store and configuration.
pub struct Pipeline<S: ObjectStore + ?Sized> {
    store:       Arc<S>,
    config:      PipelineConfig,
    on_progress: Option<ProgressCallback>,
}

impl<S: ObjectStore + 'static> Pipeline<S> {
    pub fn new(store: S) -> Self { Self::from_shared(Arc::new(store)) }
}

impl<S: ObjectStore + ?Sized + 'static> Pipeline<S> {
    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            config: PipelineConfig::default(),
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Receive progress events for requests that ask for them.
    #[must_use]
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Run one request to completion.
    ///
    /// Returns `Ok(None)` without touching the store when the request names
    /// neither a keep path nor a remote destination. On failure no partial
    /// archive is left at either destination.
    pub async fn run(&self, request: &ArchiveRequest) -> Result<Option<ArchiveResult>> {
        let callback = if request.emit_progress { self.on_progress.clone() } else { None };
        let reporter = Reporter::new(callback);

        reporter.stage(Stage::Validating);
        let Some(plan) = request.plan()? else {
            info!("no keep path or destination given; nothing to do");
            return Ok(None);
        };

        let span = info_span!("archive", container = %plan.container, prefix = %plan.prefix);
        let outcome = self.execute(request, &plan, &reporter).instrument(span).await;
        match &outcome {
            Ok(result) => info!(
                entries = result.manifest.len(),
                bytes = result.bytes_written,
                "archive complete"
            ),
            Err(err) => error!(error = %err, "archive failed"),
        }
        outcome.map(Some)
    }

    async fn execute(&self, request: &ArchiveRequest, plan: &ArchivePlan, reporter: &Reporter) -> Result<ArchiveResult> {
        reporter.stage(Stage::ListingSources);
        let objects = list_sources(&*self.store, &plan.container, &plan.prefix, &self.config.list_backoff)
            .await
            .map_err(|err| err.at(Stage::ListingSources))?;
        reporter.emit(Progress::Listed { objects: objects.len() });

        reporter.stage(Stage::FetchingAndArchiving);
        let (manifest, archiver, fanout) = self
            .archive(request, plan, reporter, objects)
            .await
            .map_err(|err| err.at(Stage::FetchingAndArchiving))?;

        reporter.stage(Stage::Finalizing);
        let bytes_written = match archiver.finalize().await {
            Ok(bytes) => bytes,
            Err(err) => return Err(settle_failure(fanout, err).await.at(Stage::Finalizing)),
        };
        let sinks = fanout
            .await
            .map_err(Error::from)
            .and_then(|drained| drained)
            .map_err(|err| err.at(Stage::Finalizing))?;
        sinks.complete().await.map_err(|err| err.at(Stage::Finalizing))?;
        reporter.emit(Progress::Finalized { bytes: bytes_written });

        if let Some(remote) = &plan.remote {
            reporter.stage(Stage::VerifyingDestination);
            verify_destination(&*self.store, &remote.container, &remote.path, &self.config.verify_backoff)
                .await
                .map_err(|err| err.at(Stage::VerifyingDestination))?;
        }

        reporter.stage(Stage::Done);
        Ok(ArchiveResult {
            keep_path: plan.keep.clone(),
            source_container: plan.container.clone(),
            source_prefix: plan.prefix.clone(),
            dest_container: plan.remote.as_ref().map(|remote| remote.container.clone()),
            dest_path: plan.remote.as_ref().map(|remote| remote.path.clone()),
            extra_metadata: request.extra_metadata.clone(),
            manifest,
            bytes_written,
        })
    }

    /// Open the sinks and stream every source object into the archive.
    async fn archive(
        &self,
        request: &ArchiveRequest,
        plan: &ArchivePlan,
        reporter: &Reporter,
        objects: Vec<ObjectRef>,
    ) -> Result<(Vec<ManifestEntry>, Arc<StreamingArchiver>, JoinHandle<Result<SinkSet>>)> {
        let write_options = WriteOptions::default()
            .content_type(ZIP_CONTENT_TYPE)
            .metadata(request.extra_metadata.clone().unwrap_or_default())
            .resumable(request.resumable_upload);
        let remote = plan.remote.as_ref().map(|target| (target, &write_options));
        let sinks = SinkSet::open(&*self.store, plan.keep.as_deref(), remote, &self.config.upload_backoff).await?;

        let (archiver, output) = StreamingArchiver::spawn(self.config.archive);
        let archiver = Arc::new(archiver);
        let fanout = tokio::spawn(sinks.drain(output).in_current_span());

        let pool = FetchPool::new(
            Arc::clone(&self.store),
            Arc::clone(&archiver),
            plan.container.clone(),
            plan.prefix.clone(),
        )
        .mapper(request.name_mapper.clone())
        .limit(request.concurrency_limit)
        .read_ahead(self.config.archive.channel_capacity)
        .read_options(ReadOptions::default().integrity(request.download_integrity))
        .reporter(reporter.clone());

        match pool.run(objects).await {
            Ok(manifest) => Ok((manifest, archiver, fanout)),
            Err(err) => Err(settle_failure(fanout, err).await),
        }
    }
}

/// Settle the sink task after the archive side failed.
///
/// When the archiver stopped because its output went away, the sink failure
/// that caused it is the error worth reporting. Otherwise the sinks are
/// dropped, which discards the staging file and abandons the upload.
async fn settle_failure(fanout: JoinHandle<Result<SinkSet>>, err: Error) -> Error {
    if matches!(err.root(), Error::OutputClosed) {
        return match fanout.await {
            Ok(Err(sink_err)) => sink_err,
            _ => err,
        };
    }
    fanout.abort();
    let _ = fanout.await;
    err
}
