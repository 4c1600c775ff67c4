//! End-to-end "harvest N messages" run

use crate::acquisition::{AcquisitionCoordinator, AcquisitionReport};
use crate::config::Config;
use crate::dedup::DedupCache;
use crate::error::Result;
use crate::extract::ContentExtractor;
use crate::harvester::MessageHarvester;
use crate::output::OutputLayout;
use crate::progress::ProgressReporter;
use crate::scroll::ScrollDriver;
use crate::surface::{ElementHandle, RenderSurface, SerialSurface};
use crate::types::Event;
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Summary of one [`Pipeline::run`]
#[derive(Clone, Debug, Serialize)]
pub struct HarvestReport {
    /// Messages submitted for acquisition
    pub harvested: usize,
    /// Scroll cycles run
    pub cycles: u64,
    /// Whether the feed ran out before the limit was reached
    pub exhausted: bool,
    /// Whether the run was cancelled
    pub cancelled: bool,
    /// Per-message acquisition results
    pub acquisition: AcquisitionReport,
}

/// Harvesting pipeline over one render surface
///
/// Dedup state and folder numbering live as long as the pipeline, so a second
/// [`run`](Self::run) continues where the first stopped.
pub struct Pipeline {
    config: Arc<Config>,
    surface: SerialSurface,
    container: ElementHandle,
    layout: Arc<OutputLayout>,
    progress: ProgressReporter,
    cancel: CancellationToken,
    dedup: Arc<DedupCache>,
}

impl Pipeline {
    /// Validate `config`, probe the surface and create the working directories
    ///
    /// These are the only fatal checks; everything after this is recovered
    /// per cluster or per file.
    pub async fn new(config: Config, surface: Arc<dyn RenderSurface>) -> Result<Self> {
        config.validate()?;

        let surface = SerialSurface::new(surface);
        let container = surface.scroll_container().await?;

        tokio::fs::create_dir_all(config.download_dir()).await?;
        tokio::fs::create_dir_all(config.output_dir()).await?;

        tracing::info!(
            download_dir = %config.download_dir().display(),
            output_dir = %config.output_dir().display(),
            max_concurrent = config.acquisition.max_concurrent_downloads,
            "pipeline ready"
        );

        Ok(Self {
            dedup: Arc::new(DedupCache::new(config.dedup.capacity)),
            layout: Arc::new(OutputLayout::new(&config.output)),
            config: Arc::new(config),
            surface,
            container,
            progress: ProgressReporter::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to progress events
    ///
    /// Subscribe before calling [`run`](Self::run) to see every event.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.progress.subscribe()
    }

    /// Progress events as a stream (lagged events are skipped)
    pub fn events(&self) -> impl Stream<Item = Event> + Send + 'static {
        self.progress.stream()
    }

    /// Token that stops the run when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Harvest up to `limit` new messages and acquire their attachments
    ///
    /// Returns after every submitted message reached a terminal state, when
    /// the limit is reached, the feed is exhausted or the run is cancelled.
    /// An error means a message folder could not be written; units already
    /// submitted are drained first.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, limit: usize) -> Result<HarvestReport> {
        let coordinator = AcquisitionCoordinator::new(
            self.config.acquisition.clone(),
            self.layout.clone(),
            self.surface.clone(),
            self.progress.clone(),
            self.cancel.clone(),
        )?;
        let extractor = ContentExtractor::new(
            self.surface.clone(),
            self.config.selectors.clone(),
            self.config.extraction.clone(),
        );
        let harvester = MessageHarvester::new(
            self.surface.clone(),
            extractor,
            self.dedup.clone(),
            self.container.clone(),
            self.config.selectors.message.clone(),
            self.progress.clone(),
        );
        let mut driver = ScrollDriver::new(
            self.surface.clone(),
            self.container.clone(),
            self.config.scroll.clone(),
            self.config.selectors.message.clone(),
            self.progress.clone(),
            self.cancel.clone(),
        );

        self.progress.status(format!("harvesting up to {limit} messages"));
        tracing::info!(limit, "harvest started");

        let mut harvested = 0;
        let mut exhausted = false;
        let mut failure = None;

        'cycles: while harvested < limit && !self.cancel.is_cancelled() {
            let batch = if exhausted {
                harvester.harvest_remaining().await
            } else {
                harvester.harvest_visible().await
            };
            let mut units = batch.into_iter();
            while let Some(unit) = units.next() {
                if harvested >= limit || self.cancel.is_cancelled() {
                    // Not submitted; leave them for a later run
                    self.dedup.remove(&unit.id);
                    for rest in units.by_ref() {
                        self.dedup.remove(&rest.id);
                    }
                    break 'cycles;
                }
                let id = unit.id.clone();
                match coordinator.submit(unit).await {
                    Ok(_) => harvested += 1,
                    Err(e) => {
                        tracing::error!(
                            message_id = %id,
                            error = %e,
                            "could not write message folder"
                        );
                        self.dedup.remove(&id);
                        failure = Some(e);
                        break 'cycles;
                    }
                }
            }

            if exhausted || harvested >= limit {
                break;
            }
            // One last pass over what the exhausted feed still renders
            exhausted = driver.advance().await.is_done();
        }

        if exhausted {
            self.progress.status("feed exhausted");
        }
        let acquisition = coordinator.drain().await;
        let cancelled = self.cancel.is_cancelled();

        self.progress.emit(Event::Finished {
            harvested,
            cancelled,
        });
        tracing::info!(
            harvested,
            cycles = driver.cycles(),
            exhausted,
            cancelled,
            acquired = acquisition.acquired,
            failed = acquisition.failed,
            "harvest finished"
        );

        if let Some(e) = failure {
            return Err(e);
        }
        Ok(HarvestReport {
            harvested,
            cycles: driver.cycles(),
            exhausted,
            cancelled,
            acquisition,
        })
    }
}
