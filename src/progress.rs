//! Progress event channel
//!
//! Every component reports through a cloneable [`ProgressReporter`] that wraps a
//! `tokio::sync::broadcast` sender. Consumers subscribe with
//! [`ProgressReporter::subscribe`] or take a `Stream` via
//! [`ProgressReporter::stream`]. Sending never blocks and never fails the
//! sender; events without subscribers are dropped, and slow subscribers lag.

use crate::types::{DownloadState, Event, FileProgress, MessageId, TaskId};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Buffer size of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Cloneable handle for emitting [`Event`]s
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    tx: broadcast::Sender<Event>,
}

impl ProgressReporter {
    /// Create a reporter with a fresh channel
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Events as a `Stream`, skipping over lag gaps
    pub fn stream(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::debug!(error = %e, "progress subscriber lagged");
                    None
                }
            }
        })
    }

    /// Emit an event
    pub fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.tx.send(event).ok();
    }

    /// Emit a free-form status line
    pub fn status(&self, message: impl Into<String>) {
        self.emit(Event::Status {
            message: message.into(),
        });
    }

    /// Emit a per-file progress event
    #[allow(clippy::too_many_arguments)]
    pub fn file(
        &self,
        task: TaskId,
        message_id: &MessageId,
        name: &str,
        size: &str,
        percent: f32,
        state: DownloadState,
        message: impl Into<String>,
    ) {
        self.emit(Event::File(FileProgress {
            task,
            message_id: message_id.clone(),
            name: name.to_string(),
            size: size.to_string(),
            percent: percent.clamp(0.0, 100.0),
            state,
            message: message.into(),
        }));
    }

    /// Number of live subscribers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
