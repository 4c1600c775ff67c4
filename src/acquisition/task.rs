//! The per-attachment download state machine
//!
//! `Pending -> Triggered -> Watching -> Matched -> Relocated -> Completed`,
//! with any step able to fall into `Retrying` and, once retries run out,
//! `Failed`. Cancellation ends a task as `Cancelled` from any state.

use super::Shared;
use super::fetch::{fetch_into, is_fetchable};
use super::relocate::{LockPolicy, relocate};
use super::watch::{WatchTick, Watcher, snapshot};
use crate::error::{AcquisitionError, Error, Result};
use crate::retry::retry_with_backoff;
use crate::surface::RenderSurface;
use crate::types::{DownloadState, DownloadTask, FileKind, TaskId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Ceiling of the size-independent progress estimate
const RAMP_CEILING: f64 = 95.0;
/// Time constant of the size-independent progress estimate
const RAMP_TIME_CONSTANT: Duration = Duration::from_secs(30);

/// Marks a task as holding a concurrency permit
struct FlightSlot<'a> {
    shared: &'a Shared,
}

impl<'a> FlightSlot<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let now = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak.fetch_max(now, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State carried from one attempt of a task to the next
#[derive(Default)]
struct Carry {
    /// Artifact matched and claimed by an attempt whose relocation failed
    pending: Mutex<Option<PathBuf>>,
    /// Download directory contents before the first trigger
    baseline: Mutex<Option<HashSet<String>>>,
}

impl Carry {
    fn take_pending(&self) -> Option<PathBuf> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn set_pending(&self, path: PathBuf) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(path);
    }

    fn baseline(&self) -> Option<HashSet<String>> {
        self.baseline.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_baseline(&self, names: HashSet<String>) {
        *self.baseline.lock().unwrap_or_else(|e| e.into_inner()) = Some(names);
    }
}

/// Estimated completion while watching
fn estimate_percent(tick: WatchTick, total_bytes: Option<u64>) -> f32 {
    match (tick.provisional_bytes, total_bytes) {
        (Some(bytes), Some(total)) if total > 0 => {
            ((bytes as f64 / total as f64) * 100.0).min(99.0) as f32
        }
        _ => {
            let t = tick.elapsed.as_secs_f64() / RAMP_TIME_CONSTANT.as_secs_f64();
            (RAMP_CEILING * (1.0 - (-t).exp())) as f32
        }
    }
}

impl Shared {
    /// Drive one task to a terminal state and return its final view
    pub(super) async fn run_task(self: &Arc<Self>, task: DownloadTask) -> DownloadTask {
        let id = task.id;
        self.active().insert(id, task.clone());
        self.report(&task, 0.0, "queued");

        let carry = Carry::default();

        let outcome = {
            let shared: &Shared = self;
            let task_ref = &task;
            let carry_ref = &carry;
            retry_with_backoff(
                &self.config.retry,
                &self.cancel,
                move |attempt| shared.attempt(task_ref, attempt, carry_ref),
                |retry, error: &Error, delay| {
                    if let Some(view) = self.update(id, |t| {
                        t.state = DownloadState::Retrying;
                        t.retry_count = retry;
                    }) {
                        self.report(
                            &view,
                            0.0,
                            format!("retry {retry} in {}ms: {error}", delay.as_millis()),
                        );
                    }
                },
            )
            .await
        };

        if let Some(path) = carry.take_pending() {
            self.claims.release(&path);
        }

        let mut done = self.active().remove(&id).unwrap_or(task);
        match outcome {
            Ok(dest) => {
                done.state = DownloadState::Completed;
                done.matched_artifact_path = Some(dest.clone());
                self.report(&done, 100.0, "acquired");
                tracing::info!(
                    file = %done.descriptor.name,
                    dest = %dest.display(),
                    retries = done.retry_count,
                    "attachment acquired"
                );
            }
            Err(e) if e.is_cancelled() => {
                done.state = DownloadState::Cancelled;
                self.report(&done, 0.0, "cancelled");
                tracing::debug!(file = %done.descriptor.name, "attachment cancelled");
            }
            Err(e) => {
                done.state = DownloadState::Failed;
                self.report(&done, 0.0, e.to_string());
                tracing::error!(
                    file = %done.descriptor.name,
                    code = e.code(),
                    error = %e,
                    retries = done.retry_count,
                    "attachment failed"
                );
            }
        }
        done
    }

    /// One pass through trigger, watch and relocate under a permit
    async fn attempt(
        &self,
        task: &DownloadTask,
        attempt: u32,
        carry: &Carry,
    ) -> Result<PathBuf> {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map_err(|_| Error::Other("download semaphore closed".into()))?,
        };
        let _slot = FlightSlot::enter(self);

        let reusable = carry.take_pending().filter(|path| {
            let exists = path.exists();
            if !exists {
                self.claims.release(path);
            }
            exists
        });
        let artifact = match reusable {
            Some(path) => {
                tracing::debug!(
                    attempt,
                    path = %path.display(),
                    "retrying relocation of matched artifact"
                );
                path
            }
            None => self.acquire_artifact(task, carry).await?,
        };

        self.transition(task.id, DownloadState::Matched, 99.0, |t| {
            t.matched_artifact_path = Some(artifact.clone());
        });

        let policy = LockPolicy {
            retries: self.config.lock_retries,
            delay: self.config.lock_retry_delay,
        };
        match relocate(&artifact, &task.target_folder, policy).await {
            Ok(dest) => {
                self.claims.release(&artifact);
                self.transition(task.id, DownloadState::Relocated, 99.0, |t| {
                    t.matched_artifact_path = Some(dest.clone());
                });
                Ok(dest)
            }
            Err(e) => {
                carry.set_pending(artifact);
                Err(e)
            }
        }
    }

    /// Trigger the download and wait for its finished artifact
    ///
    /// The baseline is the directory as it was before the first attempt, so an
    /// artifact that only finished after an earlier attempt timed out still
    /// matches.
    async fn acquire_artifact(&self, task: &DownloadTask, carry: &Carry) -> Result<PathBuf> {
        let dir = &self.config.download_dir;
        let baseline = match carry.baseline() {
            Some(names) => names,
            None => {
                let names = snapshot(dir).await?;
                carry.set_baseline(names.clone());
                names
            }
        };

        self.transition(task.id, DownloadState::Triggered, 0.0, |_| {});
        self.trigger(task).await?;
        self.transition(task.id, DownloadState::Watching, 0.0, |_| {});

        let watcher = Watcher {
            dir,
            matcher: &self.matcher,
            claims: &self.claims,
            poll_interval: self.config.poll_interval,
            timeout: self.config.watch_timeout,
            cancel: &self.cancel,
        };
        let total = task.descriptor.size_bytes();
        watcher
            .wait_for(&task.descriptor.name, &baseline, |tick| {
                self.report(task, estimate_percent(tick, total), "downloading");
            })
            .await
    }

    async fn trigger(&self, task: &DownloadTask) -> Result<()> {
        let descriptor = &task.descriptor;

        if descriptor.kind == FileKind::Image {
            if let Some(url) = descriptor.source_url.as_deref().filter(|u| is_fetchable(u)) {
                let suffix = self
                    .config
                    .provisional_suffixes
                    .first()
                    .map(String::as_str)
                    .unwrap_or(".part");
                fetch_into(
                    &self.http,
                    url,
                    &self.config.download_dir,
                    &descriptor.name,
                    suffix,
                    &self.cancel,
                )
                .await?;
                return Ok(());
            }
        }

        let control = descriptor
            .trigger
            .as_ref()
            .ok_or_else(|| AcquisitionError::TriggerFailed {
                name: descriptor.name.clone(),
                reason: "no download control".into(),
            })?;
        self.surface
            .click(control)
            .await
            .map_err(|e| AcquisitionError::TriggerFailed {
                name: descriptor.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn transition(
        &self,
        id: TaskId,
        state: DownloadState,
        percent: f32,
        edit: impl FnOnce(&mut DownloadTask),
    ) {
        if let Some(view) = self.update(id, |t| {
            t.state = state;
            edit(t);
        }) {
            self.report(&view, percent, state.to_string());
        }
    }

    fn update(&self, id: TaskId, edit: impl FnOnce(&mut DownloadTask)) -> Option<DownloadTask> {
        let mut active = self.active();
        let task = active.get_mut(&id)?;
        edit(task);
        Some(task.clone())
    }

    fn report(&self, task: &DownloadTask, percent: f32, message: impl Into<String>) {
        self.progress.file(
            task.id,
            &task.message_id,
            &task.descriptor.name,
            &task.descriptor.size,
            percent,
            task.state,
            message,
        );
    }
}
