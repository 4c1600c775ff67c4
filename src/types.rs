//! Core types for feed-harvest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::surface::ElementHandle;

/// Stable identifier of a harvested message
///
/// Assigned by the harvester, not by the source feed: a short digest over the
/// message's text, links and the stable parts of its attachments, so the same
/// rendered message yields the same id in every scroll cycle.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Number of hex characters kept from the digest
    const LEN: usize = 16;

    /// Derive an id from message content
    pub fn from_content<'a>(
        text: &str,
        links: &[String],
        attachment_keys: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        for link in links {
            hasher.update([0x1f]);
            hasher.update(link.as_bytes());
        }
        for key in attachment_keys {
            hasher.update([0x1e]);
            hasher.update(key.as_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(Self::LEN);
        for byte in digest.iter().take(Self::LEN / 2) {
            use std::fmt::Write;
            let _ = write!(&mut hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attachment kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Document attachment with rendered name/size/type fields
    Document,
    /// Inline image without textual metadata
    Image,
}

/// One attachment as rendered in the feed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Name as rendered (may be localized or truncated)
    pub name: String,
    /// Display size ("12.4 MB", "1280x720"); not authoritative
    pub size: String,
    /// Attachment kind
    pub kind: FileKind,
    /// Source URL for inline media
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// UI control that starts the native download
    #[serde(skip)]
    pub trigger: Option<ElementHandle>,
}

impl FileDescriptor {
    /// Key used for message identity; synthesized media names are not stable
    pub(crate) fn identity_key(&self) -> &str {
        match (self.kind, self.source_url.as_deref()) {
            (FileKind::Image, Some(url)) => url,
            _ => &self.name,
        }
    }

    /// Size in bytes when the display string can be parsed
    pub fn size_bytes(&self) -> Option<u64> {
        crate::utils::parse_display_size(&self.size)
    }
}

/// One logical harvested message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageUnit {
    /// Harvest-assigned id
    pub id: MessageId,
    /// First meaningful line
    pub title: String,
    /// Cleaned body lines
    pub body: Vec<String>,
    /// Absolute URLs in first-seen order, no duplicates
    pub links: Vec<String>,
    /// Attachments in rendered order
    pub files: Vec<FileDescriptor>,
    /// When the harvester closed the cluster
    pub harvested_at: DateTime<Utc>,
}

impl MessageUnit {
    /// Title and body, newline-joined
    pub fn text(&self) -> String {
        let mut lines = Vec::with_capacity(self.body.len() + 1);
        if !self.title.is_empty() {
            lines.push(self.title.as_str());
        }
        lines.extend(self.body.iter().map(String::as_str));
        lines.join("\n")
    }
}

/// Identifier of a download task within a coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Download task state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Waiting for a concurrency permit
    Pending,
    /// Native download initiated
    Triggered,
    /// Polling the download directory
    Watching,
    /// A finished artifact was accepted
    Matched,
    /// Artifact moved into the message folder
    Relocated,
    /// Terminal success
    Completed,
    /// Waiting out a backoff before the next attempt
    Retrying,
    /// Terminal failure
    Failed,
    /// Stopped because the run was cancelled
    Cancelled,
}

impl DownloadState {
    /// Whether no further transitions can happen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }

    /// Whether the task holds a concurrency permit in this state
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            DownloadState::Triggered
                | DownloadState::Watching
                | DownloadState::Matched
                | DownloadState::Relocated
        )
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DownloadState::Pending => "pending",
            DownloadState::Triggered => "triggered",
            DownloadState::Watching => "watching",
            DownloadState::Matched => "matched",
            DownloadState::Relocated => "relocated",
            DownloadState::Completed => "completed",
            DownloadState::Retrying => "retrying",
            DownloadState::Failed => "failed",
            DownloadState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a download task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Task id
    pub id: TaskId,
    /// Owning message
    pub message_id: MessageId,
    /// Attachment being acquired
    pub descriptor: FileDescriptor,
    /// Message folder the artifact is moved into
    pub target_folder: PathBuf,
    /// Current state
    pub state: DownloadState,
    /// Retries used so far
    pub retry_count: u32,
    /// Final artifact path once matched/relocated
    pub matched_artifact_path: Option<PathBuf>,
}

/// Scroll driver phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollPhase {
    /// Issuing a one-element step
    Scrolling,
    /// Waiting for the surface to render
    Settling,
    /// Comparing against the previous cycle
    Evaluating,
    /// Feed exhausted (terminal)
    Done,
}

/// Viewport metrics recomputed every cycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrollState {
    /// Scroll offset of the container
    pub position: f64,
    /// Full scrollable height
    pub content_height: f64,
    /// Visible height
    pub viewport_height: f64,
    /// Viewport touches the top
    pub at_top: bool,
    /// Viewport touches the bottom
    pub at_bottom: bool,
    /// Message elements currently rendered
    pub visible_message_count: usize,
    /// Distinct message elements observed this session
    pub seen_message_count: usize,
    /// Consecutive cycles without new content
    pub stalled_cycles: u32,
    /// Phase after this cycle
    pub phase: ScrollPhase,
}

impl ScrollState {
    /// Whether the driver reached its terminal phase
    pub fn is_done(&self) -> bool {
        self.phase == ScrollPhase::Done
    }
}

/// Structured per-file progress
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileProgress {
    /// Task id
    pub task: TaskId,
    /// Owning message
    pub message_id: MessageId,
    /// Logical file name
    pub name: String,
    /// Display size
    pub size: String,
    /// Estimated completion (0.0 to 100.0)
    pub percent: f32,
    /// Task state
    pub state: DownloadState,
    /// Human-readable detail
    pub message: String,
}

/// Progress events emitted by the pipeline
///
/// Consumers subscribe through [`Pipeline::subscribe`](crate::Pipeline::subscribe);
/// the core has no dependency on any consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Free-form status line
    Status {
        /// Message text
        message: String,
    },

    /// A scroll cycle finished
    ScrollCycle {
        /// Cycle number (1-based)
        cycle: u64,
        /// Viewport state after the cycle
        state: ScrollState,
    },

    /// A new message unit passed dedup and was submitted
    MessageHarvested {
        /// Message id
        id: MessageId,
        /// Title
        title: String,
        /// Number of attachments
        files: usize,
        /// Output folder
        folder: PathBuf,
    },

    /// A cluster was not harvested
    ClusterSkipped {
        /// Why it was skipped
        reason: String,
    },

    /// Per-file acquisition progress
    File(FileProgress),

    /// All attachments of a message reached a terminal state
    MessageCompleted {
        /// Message id
        id: MessageId,
        /// Output folder
        folder: PathBuf,
        /// Attachments acquired
        acquired: usize,
        /// Attachments failed or cancelled
        failed: usize,
    },

    /// The run finished
    Finished {
        /// Messages harvested
        harvested: usize,
        /// Whether the run was cancelled
        cancelled: bool,
    },
}
