//! Attachment descriptors from raw rendered metadata

use crate::surface::ElementHandle;
use crate::types::{FileDescriptor, FileKind};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// Document metadata as read from the surface
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawDocument {
    /// Rendered name
    pub name: String,
    /// Rendered size
    pub size: String,
    /// Rendered type label ("ZIP", "pdf", ...), often empty
    pub file_type: String,
    /// Download control
    pub trigger: Option<ElementHandle>,
}

/// Inline media metadata as read from the surface
#[derive(Clone, Debug, PartialEq)]
pub struct RawMedia {
    /// `src` attribute
    pub src: Option<String>,
    /// Natural width in pixels
    pub width: u32,
    /// Natural height in pixels
    pub height: u32,
    /// The media element, clicked to download
    pub trigger: ElementHandle,
}

/// Issues strictly increasing millisecond timestamps for media names
#[derive(Debug, Default)]
pub struct MediaNamer {
    last: AtomicU64,
}

impl MediaNamer {
    /// Create a namer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in ms, bumped past the previously issued value if needed
    pub fn next_stamp(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Descriptor for a document attachment; `None` when it has no name
pub fn document_descriptor(raw: RawDocument) -> Option<FileDescriptor> {
    let name = raw.name.trim();
    if name.is_empty() {
        return None;
    }
    let file_type = raw.file_type.trim();
    let has_extension = name.rsplit_once('.').is_some_and(|(base, _)| !base.is_empty());
    let name = if !has_extension && is_extension_like(file_type) {
        format!("{name}.{}", file_type.to_ascii_lowercase())
    } else {
        name.to_string()
    };
    Some(FileDescriptor {
        name,
        size: raw.size.trim().to_string(),
        kind: FileKind::Document,
        source_url: None,
        trigger: raw.trigger,
    })
}

/// Descriptor for inline media, named `<stamp>.<ext>` and sized `<w>x<h>`
pub fn media_descriptor(raw: RawMedia, stamp: u64, default_extension: &str) -> FileDescriptor {
    let src = raw.src.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let extension = src
        .as_deref()
        .and_then(extension_from_url)
        .unwrap_or_else(|| default_extension.trim_start_matches('.').to_string());
    FileDescriptor {
        name: format!("{stamp}.{extension}"),
        size: format!("{}x{}", raw.width, raw.height),
        kind: FileKind::Image,
        source_url: src,
        trigger: Some(raw.trigger),
    }
}

/// Lowercased extension of the last path segment of `url`
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (base, ext) = segment.rsplit_once('.')?;
    (!base.is_empty() && is_extension_like(ext)).then(|| ext.to_ascii_lowercase())
}

fn is_extension_like(s: &str) -> bool {
    (1..=5).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric())
}
