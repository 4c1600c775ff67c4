//! # feed-harvest
//!
//! Harvests messages and their attachments from a virtualized, infinite-scroll
//! web feed into an on-disk archive.
//!
//! ## Design Philosophy
//!
//! feed-harvest is designed to be:
//! - **Surface-agnostic** - The browser session is injected as a [`RenderSurface`]
//! - **Sensible defaults** - Selectors, pacing and retries all have defaults
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use feed_harvest::{Config, Pipeline, RenderSurface};
//! use std::sync::Arc;
//!
//! async fn harvest(surface: Arc<dyn RenderSurface>) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.output.output_dir = "archive".into();
//!
//!     let pipeline = Pipeline::new(config, surface).await?;
//!     feed_harvest::cancel_on_signal(pipeline.cancel_token());
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = pipeline.run(50).await?;
//!     println!("harvested {} messages", report.harvested);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bounded-concurrency attachment acquisition
pub mod acquisition;
/// Configuration types
pub mod config;
/// Duplicate suppression
pub mod dedup;
/// Error types
pub mod error;
/// Content extraction from rendered elements
pub mod extract;
/// Grouping rendered elements into message units
pub mod harvester;
/// Fuzzy file name matching
pub mod name_matcher;
/// On-disk archive layout
pub mod output;
/// End-to-end harvesting pipeline
pub mod pipeline;
/// Progress event channel
pub mod progress;
/// Retry logic with linear backoff
pub mod retry;
/// Viewport pagination
pub mod scroll;
/// Rendering-surface capability
pub mod surface;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use acquisition::{AcquisitionCoordinator, AcquisitionReport, UnitReport};
pub use config::{
    AcquisitionConfig, Config, DedupConfig, ExtractionConfig, OutputConfig, RetryConfig,
    ScrollConfig, ScrollDirection, SelectorConfig,
};
pub use error::{AcquisitionError, Error, Result, SurfaceError};
pub use pipeline::{HarvestReport, Pipeline};
pub use progress::ProgressReporter;
pub use surface::{ElementHandle, RenderSurface, SerialSurface};
pub use types::{
    DownloadState, DownloadTask, Event, FileDescriptor, FileKind, FileProgress, MessageId,
    MessageUnit, ScrollPhase, ScrollState, TaskId,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The returned handle can be aborted to stop listening.
///
/// # Example
///
/// ```no_run
/// use feed_harvest::{Pipeline, RenderSurface, cancel_on_signal};
/// use std::sync::Arc;
///
/// async fn run(surface: Arc<dyn RenderSurface>) -> feed_harvest::Result<()> {
///     let pipeline = Pipeline::new(Default::default(), surface).await?;
///     let listener = cancel_on_signal(pipeline.cancel_token());
///     pipeline.run(100).await?;
///     listener.abort();
///     Ok(())
/// }
/// ```
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Cancelling harvest");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, falling back to ctrl_c");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
