//! Grouping visible feed elements into message units
//!
//! A feed renders one logical message as several sibling elements: a
//! text-bearing element plus any number of attachment-only elements. Walking
//! the rendered elements from the most recent (lowest on screen) upwards, each
//! text-bearing element opens a cluster and the attachment-only elements that
//! follow join it.
//!
//! The oldest (topmost) cluster of the rendered window may still be missing
//! attachments that are not rendered yet. It is only emitted once the start of
//! the feed is in view, or through [`MessageHarvester::harvest_remaining`]
//! after the feed is exhausted.

use crate::dedup::DedupCache;
use crate::extract::{ClusterOutcome, ContentExtractor};
use crate::progress::ProgressReporter;
use crate::surface::{ElementHandle, RenderSurface, SerialSurface};
use crate::types::{Event, MessageUnit};
use std::sync::Arc;

/// Per-cycle harvester over the currently rendered elements
pub struct MessageHarvester {
    surface: SerialSurface,
    extractor: ContentExtractor,
    dedup: Arc<DedupCache>,
    container: ElementHandle,
    message_selector: String,
    progress: ProgressReporter,
}

impl MessageHarvester {
    /// Create a harvester for the feed scrolled by `container`
    pub fn new(
        surface: SerialSurface,
        extractor: ContentExtractor,
        dedup: Arc<DedupCache>,
        container: ElementHandle,
        message_selector: impl Into<String>,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            surface,
            extractor,
            dedup,
            container,
            message_selector: message_selector.into(),
            progress,
        }
    }

    /// Units from the rendered elements that were not harvested before, most recent first
    ///
    /// Never fails: surface errors skip the affected element or cluster.
    pub async fn harvest_visible(&self) -> Vec<MessageUnit> {
        self.harvest(false).await
    }

    /// Like [`harvest_visible`](Self::harvest_visible), but the oldest rendered
    /// cluster is emitted even when the feed start is not in view
    pub async fn harvest_remaining(&self) -> Vec<MessageUnit> {
        self.harvest(true).await
    }

    async fn harvest(&self, include_oldest: bool) -> Vec<MessageUnit> {
        let clusters = match self.clusters(include_oldest).await {
            Ok(clusters) => clusters,
            Err(e) => {
                tracing::warn!(error = %e, "could not list rendered messages");
                return Vec::new();
            }
        };

        let mut units = Vec::new();
        for cluster in clusters {
            match self.extractor.extract(&cluster).await {
                ClusterOutcome::Harvested(unit) => {
                    if self.dedup.insert(unit.id.clone()) {
                        tracing::debug!(
                            message_id = %unit.id,
                            title = %unit.title,
                            files = unit.files.len(),
                            "harvested message"
                        );
                        units.push(unit);
                    } else {
                        tracing::trace!(message_id = %unit.id, "already harvested");
                    }
                }
                ClusterOutcome::Skipped(reason) => {
                    tracing::debug!(%reason, "cluster skipped");
                    self.progress.emit(Event::ClusterSkipped {
                        reason: reason.to_string(),
                    });
                }
                ClusterOutcome::Failed(reason) => {
                    tracing::warn!(%reason, "cluster extraction failed");
                    self.progress.emit(Event::ClusterSkipped { reason });
                }
            }
        }
        units
    }

    /// Rendered elements grouped into clusters, most recent cluster first
    async fn clusters(
        &self,
        include_oldest: bool,
    ) -> Result<Vec<Vec<ElementHandle>>, crate::error::SurfaceError> {
        let elements = self.surface.query(&self.message_selector).await?;

        let mut positioned = Vec::with_capacity(elements.len());
        for element in elements {
            match self.surface.bounding_box(&element).await {
                Ok(b) => positioned.push((b.top, element)),
                Err(e) => tracing::debug!(
                    error = %e,
                    element = %element,
                    "skipping element without geometry"
                ),
            }
        }
        positioned.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut clusters: Vec<Vec<ElementHandle>> = Vec::new();
        let mut open: Option<Vec<ElementHandle>> = None;
        for (_, element) in positioned {
            let text_bearing = match self.extractor.is_text_bearing(&element).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(error = %e, element = %element, "skipping unreadable element");
                    continue;
                }
            };
            if text_bearing {
                if let Some(done) = open.replace(vec![element]) {
                    clusters.push(done);
                }
            } else if let Some(cluster) = open.as_mut() {
                cluster.push(element);
            } else {
                tracing::trace!(element = %element, "dropping attachment without a text element");
            }
        }
        if let Some(oldest) = open {
            if include_oldest || self.at_feed_start().await {
                clusters.push(oldest);
            } else {
                tracing::trace!(
                    element = %oldest[0],
                    "holding back oldest cluster until its boundary renders"
                );
            }
        }
        Ok(clusters)
    }

    async fn at_feed_start(&self) -> bool {
        match self.surface.scroll_metrics(&self.container).await {
            Ok(metrics) => metrics.at_top(),
            Err(e) => {
                tracing::debug!(error = %e, "could not read scroll position");
                false
            }
        }
    }
}
