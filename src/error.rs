//! Error types for feed-harvest
//!
//! This module provides the error taxonomy for the library:
//! - Surface errors (the rendering surface could not be queried or is stale)
//! - Acquisition errors (trigger, match timeout, relocation, file locks)
//! - Configuration errors with the offending key
//!
//! Only setup failures cross the pipeline boundary. Everything raised while
//! harvesting or acquiring is caught per item and reported through the
//! progress channel.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for feed-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for feed-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "acquisition.download_dir")
        key: Option<String>,
    },

    /// Rendering surface error
    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// File acquisition error
    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error (inline media fetches)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a [`RenderSurface`](crate::surface::RenderSurface)
#[derive(Debug, Clone, Error)]
pub enum SurfaceError {
    /// The surface cannot be reached at all (session closed, browser gone)
    #[error("rendering surface unavailable: {0}")]
    Unavailable(String),

    /// The element handle no longer refers to a rendered element
    #[error("element {handle} is stale")]
    StaleElement {
        /// The handle that went stale
        handle: String,
    },

    /// A required element was not found
    #[error("no element matches selector {selector}")]
    NotFound {
        /// The selector that matched nothing
        selector: String,
    },

    /// A script evaluation failed or returned an unexpected shape
    #[error("script failed: {0}")]
    Script(String),
}

/// Errors raised while acquiring a single file
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The native download could not be started
    #[error("failed to trigger download of {name}: {reason}")]
    TriggerFailed {
        /// Logical file name
        name: String,
        /// Why the trigger failed
        reason: String,
    },

    /// No finished artifact matched within the watch ceiling
    #[error("no artifact matching {name} appeared within {waited_secs}s")]
    MatchTimeout {
        /// Logical file name
        name: String,
        /// How long the watcher waited
        waited_secs: u64,
    },

    /// The matched artifact could not be moved into its message folder
    #[error("failed to relocate {source_path} to {dest_path}: {reason}")]
    RelocationFailed {
        /// Artifact in the downloader directory
        source_path: PathBuf,
        /// Intended destination
        dest_path: PathBuf,
        /// The reason relocation failed
        reason: String,
    },

    /// The artifact stayed locked by another process past the local retry bound
    #[error("{path} is locked after {attempts} attempts")]
    FileLocked {
        /// Locked file
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
    },

    /// Fetching an inline media URL failed with a non-network cause
    #[error("failed to fetch {url}: {reason}")]
    Fetch {
        /// Source URL
        url: String,
        /// The reason the fetch failed
        reason: String,
    },
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Machine-readable error code, used in progress messages
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Surface(e) => match e {
                SurfaceError::Unavailable(_) => "surface_unavailable",
                SurfaceError::StaleElement { .. } => "stale_element",
                SurfaceError::NotFound { .. } => "element_not_found",
                SurfaceError::Script(_) => "script_error",
            },
            Error::Acquisition(e) => match e {
                AcquisitionError::TriggerFailed { .. } => "trigger_failed",
                AcquisitionError::MatchTimeout { .. } => "match_timeout",
                AcquisitionError::RelocationFailed { .. } => "relocation_failed",
                AcquisitionError::FileLocked { .. } => "file_locked",
                AcquisitionError::Fetch { .. } => "fetch_failed",
            },
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether this error means the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
