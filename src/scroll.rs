//! Incremental pagination over a virtualized feed
//!
//! Each [`ScrollDriver::advance`] call is one cycle:
//!
//! - **Scrolling**: find the first visible message element and bring its
//!   neighbour in scroll direction into view (one element per step, never a
//!   proportional jump, so the virtualized list never skips content)
//! - **Settling**: wait `settle_interval` for the surface to render
//! - **Evaluating**: re-query; progress means the number of distinct message
//!   elements seen this session grew
//!
//! When the first visible element has no rendered neighbour (a list rendered
//! without an off-screen buffer) the step scrolls the container by that
//! element's height instead.
//!
//! After `stall_threshold` cycles without progress the driver checks whether
//! the viewport sits at an extreme. Only the extreme it is heading for counts
//! (the opposite one is where the walk starts), except when the content fits
//! the viewport and both are reached at once. At the extreme the feed is
//! exhausted. If not, one coarse jump to that extreme is made; a second stall
//! without progress in between ends the feed as well.

use crate::config::{ScrollConfig, ScrollDirection};
use crate::error::SurfaceError;
use crate::progress::ProgressReporter;
use crate::retry::sleep_or_cancel;
use crate::surface::{Align, ElementHandle, Extreme, RenderSurface, ScrollMetrics, SerialSurface};
use crate::types::{Event, ScrollPhase, ScrollState};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Viewport state machine
pub struct ScrollDriver {
    surface: SerialSurface,
    container: ElementHandle,
    config: ScrollConfig,
    message_selector: String,
    progress: ProgressReporter,
    cancel: CancellationToken,
    seen: HashSet<ElementHandle>,
    coarse_since_progress: bool,
    cycle: u64,
    state: ScrollState,
}

impl ScrollDriver {
    /// Create a driver for the feed scrolled by `container`
    pub fn new(
        surface: SerialSurface,
        container: ElementHandle,
        config: ScrollConfig,
        message_selector: impl Into<String>,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            surface,
            container,
            config,
            message_selector: message_selector.into(),
            progress,
            cancel,
            seen: HashSet::new(),
            coarse_since_progress: false,
            cycle: 0,
            state: ScrollState {
                position: 0.0,
                content_height: 0.0,
                viewport_height: 0.0,
                at_top: false,
                at_bottom: false,
                visible_message_count: 0,
                seen_message_count: 0,
                stalled_cycles: 0,
                phase: ScrollPhase::Scrolling,
            },
        }
    }

    /// State after the most recent cycle
    pub fn state(&self) -> &ScrollState {
        &self.state
    }

    /// Cycles run so far
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Run one scroll cycle and return the resulting state
    ///
    /// Once the state is [`ScrollPhase::Done`] further calls return it unchanged.
    /// Surface failures are logged and count as a cycle without progress.
    pub async fn advance(&mut self) -> ScrollState {
        if self.state.is_done() {
            return self.state.clone();
        }
        self.cycle += 1;

        self.state.phase = ScrollPhase::Scrolling;
        let stepped = match self.step().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, cycle = self.cycle, "scroll step failed");
                false
            }
        };

        self.state.phase = ScrollPhase::Settling;
        if sleep_or_cancel(self.config.settle_interval, &self.cancel)
            .await
            .is_err()
        {
            self.state.phase = ScrollPhase::Scrolling;
            return self.state.clone();
        }

        self.state.phase = ScrollPhase::Evaluating;
        let progressed = stepped
            && match self.observe().await {
                Ok(progressed) => progressed,
                Err(e) => {
                    tracing::warn!(error = %e, cycle = self.cycle, "scroll evaluation failed");
                    false
                }
            };

        if progressed {
            self.state.stalled_cycles = 0;
            self.coarse_since_progress = false;
        } else {
            self.state.stalled_cycles += 1;
            if self.state.stalled_cycles >= self.config.stall_threshold {
                self.on_stall().await;
            }
        }

        if !self.state.is_done() {
            self.state.phase = ScrollPhase::Scrolling;
        }

        tracing::debug!(
            cycle = self.cycle,
            position = self.state.position,
            visible = self.state.visible_message_count,
            seen = self.state.seen_message_count,
            stalled = self.state.stalled_cycles,
            phase = ?self.state.phase,
            "scroll cycle finished"
        );
        self.progress.emit(Event::ScrollCycle {
            cycle: self.cycle,
            state: self.state.clone(),
        });

        self.state.clone()
    }

    /// Bring the element next to the first visible one (in scroll direction) into view
    async fn step(&self) -> Result<(), SurfaceError> {
        let elements = self.surface.query(&self.message_selector).await?;
        if elements.is_empty() {
            return Err(SurfaceError::NotFound {
                selector: self.message_selector.clone(),
            });
        }
        let viewport = self.surface.bounding_box(&self.container).await?;

        let order: Vec<usize> = match self.config.direction {
            ScrollDirection::Up => (0..elements.len()).collect(),
            ScrollDirection::Down => (0..elements.len()).rev().collect(),
        };

        let mut first_visible = None;
        for idx in order {
            match self.surface.bounding_box(&elements[idx]).await {
                Ok(b) if b.intersects(&viewport) => {
                    first_visible = Some((idx, b));
                    break;
                }
                Ok(_) => {}
                // The list re-rendered under us; skip to the next element
                Err(SurfaceError::StaleElement { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let last = elements.len() - 1;
        let Some((idx, visible)) = first_visible else {
            let (target, align) = match self.config.direction {
                ScrollDirection::Up => (&elements[0], Align::Start),
                ScrollDirection::Down => (&elements[last], Align::End),
            };
            return self.surface.scroll_into_view(target, align).await;
        };

        // Without a rendered neighbour, move by the visible element's own height
        let height = (visible.bottom - visible.top).max(1.0);
        match self.config.direction {
            ScrollDirection::Up if idx > 0 => {
                self.surface
                    .scroll_into_view(&elements[idx - 1], Align::Start)
                    .await
            }
            ScrollDirection::Up => self.surface.scroll_by(&self.container, -height).await,
            ScrollDirection::Down if idx < last => {
                self.surface
                    .scroll_into_view(&elements[idx + 1], Align::End)
                    .await
            }
            ScrollDirection::Down => self.surface.scroll_by(&self.container, height).await,
        }
    }

    /// Re-query the feed; returns whether new message elements appeared
    async fn observe(&mut self) -> Result<bool, SurfaceError> {
        let elements = self.surface.query(&self.message_selector).await?;
        let before = self.seen.len();
        self.state.visible_message_count = elements.len();
        self.seen.extend(elements);
        self.state.seen_message_count = self.seen.len();

        let metrics = self.surface.scroll_metrics(&self.container).await?;
        self.apply_metrics(&metrics);

        Ok(self.seen.len() > before)
    }

    async fn on_stall(&mut self) {
        let at_extreme = match self.surface.scroll_metrics(&self.container).await {
            Ok(metrics) => {
                self.apply_metrics(&metrics);
                self.is_at_target_extreme(&metrics)
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not probe scroll extreme");
                false
            }
        };

        if at_extreme || self.coarse_since_progress {
            tracing::info!(
                cycles = self.cycle,
                seen = self.state.seen_message_count,
                at_extreme,
                "feed exhausted"
            );
            self.state.phase = ScrollPhase::Done;
            return;
        }

        let extreme = match self.config.direction {
            ScrollDirection::Up => Extreme::Top,
            ScrollDirection::Down => Extreme::Bottom,
        };
        match self.surface.scroll_to_extreme(&self.container, extreme).await {
            Ok(()) => tracing::info!(?extreme, "stalled, jumping to feed extreme"),
            Err(e) => tracing::warn!(error = %e, "coarse scroll failed"),
        }
        self.coarse_since_progress = true;
        self.state.stalled_cycles = 0;
    }

    fn is_at_target_extreme(&self, metrics: &ScrollMetrics) -> bool {
        // Nothing to scroll at all
        if metrics.at_top() && metrics.at_bottom() {
            return true;
        }
        match self.config.direction {
            ScrollDirection::Up => metrics.at_top(),
            ScrollDirection::Down => metrics.at_bottom(),
        }
    }

    fn apply_metrics(&mut self, metrics: &ScrollMetrics) {
        self.state.position = metrics.position;
        self.state.content_height = metrics.content_height;
        self.state.viewport_height = metrics.viewport_height;
        self.state.at_top = metrics.at_top();
        self.state.at_bottom = metrics.at_bottom();
    }
}
