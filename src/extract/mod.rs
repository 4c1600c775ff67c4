//! Turning a cluster of rendered elements into a [`MessageUnit`]
//!
//! Extraction runs in two stages. [`ContentExtractor::gather`] reads raw text,
//! hrefs and attachment metadata through the configured selectors; it is the
//! only part that talks to the surface. [`ContentExtractor::build`] is pure and
//! applies cleaning, link filtering and validation.

mod files;
mod links;
mod text;

pub use files::{
    MediaNamer, RawDocument, RawMedia, document_descriptor, extension_from_url, media_descriptor,
};
pub use links::LinkFilter;
pub use text::{TextCleaner, meaningful_lines, urls_in};

use crate::config::{ExtractionConfig, SelectorConfig};
use crate::error::SurfaceError;
use crate::surface::{ElementHandle, RenderSurface, SerialSurface};
use crate::types::{FileDescriptor, MessageId, MessageUnit};
use chrono::Utc;

/// Why a cluster produced no unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No text, no files and no links
    Empty,
    /// The only text is the name of one of the attachments
    TitleIsFileName {
        /// The attachment name
        name: String,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Empty => f.write_str("cluster has no text, files or links"),
            SkipReason::TitleIsFileName { name } => {
                write!(f, "title only repeats attachment name {name}")
            }
        }
    }
}

/// Result of extracting one cluster
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterOutcome {
    /// A valid unit
    Harvested(MessageUnit),
    /// Valid input that does not make a unit
    Skipped(SkipReason),
    /// The surface failed while reading the cluster
    Failed(String),
}

/// Raw content of one cluster, as read from the surface
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawCluster {
    /// Text of every text-bearing sub-element
    pub texts: Vec<String>,
    /// `href` of every link anchor
    pub hrefs: Vec<String>,
    /// Document attachments
    pub documents: Vec<RawDocument>,
    /// Inline media
    pub media: Vec<RawMedia>,
}

/// Cluster-to-unit extractor
pub struct ContentExtractor {
    surface: SerialSurface,
    selectors: SelectorConfig,
    config: ExtractionConfig,
    cleaner: TextCleaner,
    links: LinkFilter,
    namer: MediaNamer,
}

impl ContentExtractor {
    /// Create an extractor reading through `surface`
    pub fn new(
        surface: SerialSurface,
        selectors: SelectorConfig,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            surface,
            cleaner: TextCleaner::new(&config.boilerplate_words),
            links: LinkFilter::new(&config),
            namer: MediaNamer::new(),
            selectors,
            config,
        }
    }

    /// Gather and build one cluster
    pub async fn extract(&self, cluster: &[ElementHandle]) -> ClusterOutcome {
        match self.gather(cluster).await {
            Ok(raw) => self.build(raw),
            Err(e) => ClusterOutcome::Failed(e.to_string()),
        }
    }

    /// Whether `element` carries non-blank text content
    pub async fn is_text_bearing(&self, element: &ElementHandle) -> Result<bool, SurfaceError> {
        for t in self.surface.query_within(element, &self.selectors.text).await? {
            if !self.surface.text(&t).await?.trim().is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read raw content of every element in the cluster
    pub async fn gather(&self, cluster: &[ElementHandle]) -> Result<RawCluster, SurfaceError> {
        let s = &self.selectors;
        let mut raw = RawCluster::default();

        for element in cluster {
            for t in self.surface.query_within(element, &s.text).await? {
                raw.texts.push(self.surface.text(&t).await?);
            }

            for a in self.surface.query_within(element, &s.link).await? {
                if let Some(href) = self.surface.attribute(&a, "href").await? {
                    raw.hrefs.push(href);
                }
            }

            for doc in self.surface.query_within(element, &s.document).await? {
                let trigger = self
                    .surface
                    .query_within(&doc, &s.document_download)
                    .await?
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| doc.clone());
                raw.documents.push(RawDocument {
                    name: self.first_text(&doc, &s.document_name).await?,
                    size: self.first_text(&doc, &s.document_size).await?,
                    file_type: self.first_text(&doc, &s.document_type).await?,
                    trigger: Some(trigger),
                });
            }

            for media in self.surface.query_within(element, &s.media).await? {
                let src = self.surface.attribute(&media, "src").await?;
                // Not loaded yet: dimensions are reported as 0x0
                let (width, height) = match self.surface.natural_dimensions(&media).await {
                    Ok(dims) => dims,
                    Err(SurfaceError::Script(_)) => (0, 0),
                    Err(e) => return Err(e),
                };
                raw.media.push(RawMedia {
                    src,
                    width,
                    height,
                    trigger: media,
                });
            }
        }

        Ok(raw)
    }

    /// Clean, filter and validate raw content
    pub fn build(&self, raw: RawCluster) -> ClusterOutcome {
        let (title, body) = self.cleaner.title_and_body(&raw.texts);

        let text_urls = urls_in(&raw.texts);
        let links = self.links.collect(
            raw.hrefs
                .iter()
                .map(String::as_str)
                .chain(text_urls.iter().map(String::as_str)),
        );

        let mut files: Vec<FileDescriptor> = raw
            .documents
            .into_iter()
            .filter_map(document_descriptor)
            .collect();
        files.extend(raw.media.into_iter().map(|m| {
            media_descriptor(m, self.namer.next_stamp(), &self.config.default_media_extension)
        }));

        if title.is_none() && files.is_empty() && links.is_empty() {
            return ClusterOutcome::Skipped(SkipReason::Empty);
        }

        let title = title.unwrap_or_default();
        if !title.is_empty() {
            if let Some(file) = files.iter().find(|f| title_is_file_name(&title, &f.name)) {
                return ClusterOutcome::Skipped(SkipReason::TitleIsFileName {
                    name: file.name.clone(),
                });
            }
        }

        let mut unit = MessageUnit {
            id: MessageId(String::new()),
            title,
            body,
            links,
            files,
            harvested_at: Utc::now(),
        };
        let id = MessageId::from_content(
            &unit.text(),
            &unit.links,
            unit.files.iter().map(FileDescriptor::identity_key),
        );
        unit.id = id;
        ClusterOutcome::Harvested(unit)
    }

    async fn first_text(
        &self,
        scope: &ElementHandle,
        selector: &str,
    ) -> Result<String, SurfaceError> {
        match self.surface.query_within(scope, selector).await?.first() {
            Some(el) => Ok(self.surface.text(el).await?.trim().to_string()),
            None => Ok(String::new()),
        }
    }
}

fn title_is_file_name(title: &str, file_name: &str) -> bool {
    if title == file_name {
        return true;
    }
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => title == stem,
        _ => false,
    }
}
