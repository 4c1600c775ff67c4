//! Bounded-concurrency acquisition of message attachments
//!
//! [`AcquisitionCoordinator::submit`] writes a unit's folder and spawns one
//! tracked tokio task per unit; that task drives one download task per
//! attachment and reports [`Event::MessageCompleted`] when all of them are
//! terminal. [`AcquisitionCoordinator::drain`] waits for everything submitted.
//!
//! Concurrency is bounded by a semaphore of `max_concurrent_downloads`
//! permits. A permit is held from the trigger until the artifact has been
//! relocated and is released while a task waits out a retry backoff.

mod fetch;
mod relocate;
mod task;
mod watch;

use crate::config::AcquisitionConfig;
use crate::error::Result;
use crate::name_matcher::NameMatcher;
use crate::output::OutputLayout;
use crate::progress::ProgressReporter;
use crate::surface::SerialSurface;
use crate::types::{DownloadState, DownloadTask, Event, MessageId, MessageUnit, TaskId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use watch::Claims;

/// Outcome of one message's acquisition
#[derive(Clone, Debug, Serialize)]
pub struct UnitReport {
    /// Message id
    pub message_id: MessageId,
    /// Message folder
    pub folder: PathBuf,
    /// Final state of every download task
    pub tasks: Vec<DownloadTask>,
}

impl UnitReport {
    /// Attachments that reached the folder
    pub fn acquired(&self) -> usize {
        self.count(DownloadState::Completed)
    }

    /// Attachments that failed terminally
    pub fn failed(&self) -> usize {
        self.count(DownloadState::Failed)
    }

    /// Attachments stopped by cancellation
    pub fn cancelled(&self) -> usize {
        self.count(DownloadState::Cancelled)
    }

    fn count(&self, state: DownloadState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }
}

/// Summary returned by [`AcquisitionCoordinator::drain`]
#[derive(Clone, Debug, Default, Serialize)]
pub struct AcquisitionReport {
    /// One report per submitted unit, ordered by folder
    pub units: Vec<UnitReport>,
    /// Attachments acquired
    pub acquired: usize,
    /// Attachments failed
    pub failed: usize,
    /// Attachments cancelled
    pub cancelled: usize,
    /// Highest number of simultaneously triggered tasks
    pub peak_concurrency: usize,
}

/// State shared by all unit and download tasks
pub(crate) struct Shared {
    config: AcquisitionConfig,
    surface: SerialSurface,
    progress: ProgressReporter,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
    matcher: NameMatcher,
    http: reqwest::Client,
    claims: Claims,
    active: Mutex<HashMap<TaskId, DownloadTask>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Download engine for harvested units
pub struct AcquisitionCoordinator {
    shared: Arc<Shared>,
    layout: Arc<OutputLayout>,
    next_task: AtomicU64,
    units: tokio::sync::Mutex<JoinSet<UnitReport>>,
}

impl AcquisitionCoordinator {
    /// Create a coordinator
    ///
    /// Fails only if the HTTP client for direct media fetches cannot be built.
    pub fn new(
        config: AcquisitionConfig,
        layout: Arc<OutputLayout>,
        surface: SerialSurface,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;
        let shared = Shared {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            matcher: NameMatcher::new(config.provisional_suffixes.clone()),
            config,
            surface,
            progress,
            cancel,
            http,
            claims: Claims::default(),
            active: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        Ok(Self {
            shared: Arc::new(shared),
            layout,
            next_task: AtomicU64::new(1),
            units: tokio::sync::Mutex::new(JoinSet::new()),
        })
    }

    /// Write the unit's folder and start acquiring its attachments
    ///
    /// Returns the folder once the work is spawned; it does not wait for downloads.
    pub async fn submit(&self, unit: MessageUnit) -> Result<PathBuf> {
        let folder = self.layout.create_unit_folder(&unit).await?;

        self.shared.progress.emit(Event::MessageHarvested {
            id: unit.id.clone(),
            title: unit.title.clone(),
            files: unit.files.len(),
            folder: folder.clone(),
        });

        let tasks: Vec<DownloadTask> = unit
            .files
            .into_iter()
            .map(|descriptor| DownloadTask {
                id: TaskId(self.next_task.fetch_add(1, Ordering::Relaxed)),
                message_id: unit.id.clone(),
                descriptor,
                target_folder: folder.clone(),
                state: DownloadState::Pending,
                retry_count: 0,
                matched_artifact_path: None,
            })
            .collect();

        let span = tracing::info_span!("message", message_id = %unit.id);
        let shared = self.shared.clone();
        let unit_folder = folder.clone();
        self.units
            .lock()
            .await
            .spawn(shared.run_unit(unit.id, unit_folder, tasks).instrument(span));

        Ok(folder)
    }

    /// Wait for every submitted unit to finish
    pub async fn drain(&self) -> AcquisitionReport {
        let mut set = std::mem::take(&mut *self.units.lock().await);
        let mut report = AcquisitionReport::default();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(unit) => {
                    report.acquired += unit.acquired();
                    report.failed += unit.failed();
                    report.cancelled += unit.cancelled();
                    report.units.push(unit);
                }
                Err(e) => tracing::error!(error = %e, "message acquisition task panicked"),
            }
        }

        report.units.sort_by(|a, b| a.folder.cmp(&b.folder));
        report.peak_concurrency = self.peak_concurrency();
        report
    }

    /// Snapshot of tasks that have not reached a terminal state, by id
    pub fn active_tasks(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self.shared.active().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Tasks currently holding a concurrency permit
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously triggered tasks so far
    pub fn peak_concurrency(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }
}

impl Shared {
    async fn run_unit(
        self: Arc<Self>,
        message_id: MessageId,
        folder: PathBuf,
        tasks: Vec<DownloadTask>,
    ) -> UnitReport {
        let runs = tasks.into_iter().map(|task| {
            let span = tracing::debug_span!("file", task = %task.id, file = %task.descriptor.name);
            let shared = self.clone();
            async move { shared.run_task(task).await }.instrument(span)
        });
        let tasks = futures::future::join_all(runs).await;

        let report = UnitReport {
            message_id,
            folder,
            tasks,
        };
        self.progress.emit(Event::MessageCompleted {
            id: report.message_id.clone(),
            folder: report.folder.clone(),
            acquired: report.acquired(),
            failed: report.failed() + report.cancelled(),
        });
        tracing::info!(
            folder = %report.folder.display(),
            acquired = report.acquired(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "message acquisition finished"
        );
        report
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, DownloadTask>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
