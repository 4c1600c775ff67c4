//! Shared test helpers: an in-memory feed implementing [`RenderSurface`].
//!
//! `FakeFeed` lays rows out on a fixed 100px grid, renders only the rows around
//! the viewport (plus a buffer) and answers the default selectors of
//! [`SelectorConfig`](crate::config::SelectorConfig). Clicking a download
//! control simulates a native downloader: `<name>.crdownload` appears in the
//! download directory, grows, and is renamed to `<name>` when finished.

use crate::config::Config;
use crate::error::SurfaceError;
use crate::surface::{
    Align, ElementBox, ElementHandle, Extreme, RenderSurface, ScriptArg, ScrollMetrics,
    SurfaceResult,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Height of every row
pub(crate) const ROW_HEIGHT: f64 = 100.0;

const CONTAINER: &str = "container";

/// What happens when a download control is clicked
#[derive(Clone, Debug)]
pub(crate) struct FakeDownload {
    /// Name the downloader writes to disk
    pub disk_name: String,
    /// Final size of the artifact
    pub bytes: usize,
    /// Time between the provisional file appearing and the rename
    pub duration: Duration,
    /// Clicks that start nothing before one succeeds
    pub fail_first: u32,
}

impl FakeDownload {
    pub(crate) fn named(disk_name: &str) -> Self {
        Self {
            disk_name: disk_name.to_string(),
            bytes: 64,
            duration: Duration::from_millis(40),
            fail_first: 0,
        }
    }

    pub(crate) fn taking(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub(crate) fn failing_first(mut self, clicks: u32) -> Self {
        self.fail_first = clicks;
        self
    }
}

/// Document attachment inside a row
#[derive(Clone, Debug)]
pub(crate) struct FakeDocument {
    pub name: String,
    pub size: String,
    pub file_type: String,
    pub download: Option<FakeDownload>,
}

/// Inline media inside a row
#[derive(Clone, Debug)]
pub(crate) struct FakeMedia {
    pub src: String,
    pub width: u32,
    pub height: u32,
    pub download: Option<FakeDownload>,
}

/// One rendered feed element
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeRow {
    pub text: Option<String>,
    pub links: Vec<String>,
    pub documents: Vec<FakeDocument>,
    pub media: Vec<FakeMedia>,
}

impl FakeRow {
    pub(crate) fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn with_link(mut self, href: &str) -> Self {
        self.links.push(href.to_string());
        self
    }

    pub(crate) fn with_document(mut self, name: &str, size: &str, download: FakeDownload) -> Self {
        self.documents.push(FakeDocument {
            name: name.to_string(),
            size: size.to_string(),
            file_type: String::new(),
            download: Some(download),
        });
        self
    }

    pub(crate) fn document(name: &str, size: &str, download: FakeDownload) -> Self {
        Self::default().with_document(name, size, download)
    }

    pub(crate) fn media(
        src: &str,
        width: u32,
        height: u32,
        download: Option<FakeDownload>,
    ) -> Self {
        Self {
            media: vec![FakeMedia {
                src: src.to_string(),
                width,
                height,
                download,
            }],
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct FeedState {
    rows: Vec<FakeRow>,
    position: f64,
    viewport_rows: usize,
    buffer_rows: usize,
    /// scroll_into_view and scroll_by do nothing
    frozen: bool,
    /// scroll_to_extreme does nothing either
    pinned: bool,
    /// Clicks on rows outside the rendered window fail as stale
    stale_clicks: bool,
    /// Upcoming `query` calls that fail
    failing_queries: u32,
    clicks: HashMap<String, u32>,
    active_downloads: usize,
    max_active_downloads: usize,
    commands_in_flight: usize,
    max_commands_in_flight: usize,
}

impl FeedState {
    fn viewport_height(&self) -> f64 {
        self.viewport_rows as f64 * ROW_HEIGHT
    }

    fn content_height(&self) -> f64 {
        self.rows.len() as f64 * ROW_HEIGHT
    }

    fn max_position(&self) -> f64 {
        (self.content_height() - self.viewport_height()).max(0.0)
    }

    fn clamp(&self, position: f64) -> f64 {
        position.clamp(0.0, self.max_position())
    }

    fn is_rendered(&self, row: usize) -> bool {
        if row >= self.rows.len() {
            return false;
        }
        let buffer = self.buffer_rows as f64 * ROW_HEIGHT;
        let low = self.position - buffer;
        let high = self.position + self.viewport_height() + buffer;
        let top = row as f64 * ROW_HEIGHT;
        top + ROW_HEIGHT > low && top < high
    }

    fn rendered(&self) -> Vec<usize> {
        (0..self.rows.len()).filter(|&i| self.is_rendered(i)).collect()
    }
}

/// Parsed element handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
    Container,
    Row(usize),
    Text(usize),
    Link(usize, usize),
    Document(usize, usize),
    DocumentName(usize, usize),
    DocumentSize(usize, usize),
    DocumentType(usize, usize),
    DocumentDownload(usize, usize),
    Media(usize, usize),
}

impl Node {
    fn parse(handle: &ElementHandle) -> Option<Node> {
        let id = handle.id();
        if id == CONTAINER {
            return Some(Node::Container);
        }
        let mut parts = id.split('/');
        let row: usize = parts.next()?.strip_prefix("row-")?.parse().ok()?;
        let Some(second) = parts.next() else {
            return Some(Node::Row(row));
        };
        if second == "text" {
            return Some(Node::Text(row));
        }
        if let Some(j) = second.strip_prefix("link-") {
            return Some(Node::Link(row, j.parse().ok()?));
        }
        if let Some(j) = second.strip_prefix("media-") {
            return Some(Node::Media(row, j.parse().ok()?));
        }
        let j: usize = second.strip_prefix("doc-")?.parse().ok()?;
        match parts.next() {
            None => Some(Node::Document(row, j)),
            Some("name") => Some(Node::DocumentName(row, j)),
            Some("size") => Some(Node::DocumentSize(row, j)),
            Some("type") => Some(Node::DocumentType(row, j)),
            Some("download") => Some(Node::DocumentDownload(row, j)),
            Some(_) => None,
        }
    }

    fn row(self) -> Option<usize> {
        match self {
            Node::Container => None,
            Node::Row(i)
            | Node::Text(i)
            | Node::Link(i, _)
            | Node::Document(i, _)
            | Node::DocumentName(i, _)
            | Node::DocumentSize(i, _)
            | Node::DocumentType(i, _)
            | Node::DocumentDownload(i, _)
            | Node::Media(i, _) => Some(i),
        }
    }
}

fn row_handle(i: usize) -> ElementHandle {
    ElementHandle::new(format!("row-{i}"))
}

fn child(i: usize, suffix: &str) -> ElementHandle {
    ElementHandle::new(format!("row-{i}/{suffix}"))
}

/// In-memory virtualized feed with a simulated native downloader
#[derive(Clone, Debug)]
pub(crate) struct FakeFeed {
    state: Arc<Mutex<FeedState>>,
    download_dir: PathBuf,
}

impl FakeFeed {
    /// Feed positioned at the bottom (newest rows visible), `rows[0]` being the oldest
    pub(crate) fn new(rows: Vec<FakeRow>, download_dir: &Path) -> Self {
        let mut state = FeedState {
            rows,
            position: 0.0,
            viewport_rows: 3,
            buffer_rows: 1,
            frozen: false,
            pinned: false,
            stale_clicks: false,
            failing_queries: 0,
            clicks: HashMap::new(),
            active_downloads: 0,
            max_active_downloads: 0,
            commands_in_flight: 0,
            max_commands_in_flight: 0,
        };
        state.position = state.max_position();
        Self {
            state: Arc::new(Mutex::new(state)),
            download_dir: download_dir.to_path_buf(),
        }
    }

    pub(crate) fn with_viewport(self, viewport_rows: usize, buffer_rows: usize) -> Self {
        {
            let mut s = self.lock();
            s.viewport_rows = viewport_rows;
            s.buffer_rows = buffer_rows;
            s.position = s.max_position();
        }
        self
    }

    pub(crate) fn set_frozen(&self, frozen: bool) {
        self.lock().frozen = frozen;
    }

    pub(crate) fn set_pinned(&self, pinned: bool) {
        let mut s = self.lock();
        s.pinned = pinned;
        s.frozen = pinned || s.frozen;
    }

    pub(crate) fn set_stale_clicks(&self, stale: bool) {
        self.lock().stale_clicks = stale;
    }

    pub(crate) fn fail_next_queries(&self, n: u32) {
        self.lock().failing_queries = n;
    }

    pub(crate) fn position(&self) -> f64 {
        self.lock().position
    }

    pub(crate) fn max_active_downloads(&self) -> usize {
        self.lock().max_active_downloads
    }

    pub(crate) fn max_commands_in_flight(&self) -> usize {
        self.lock().max_commands_in_flight
    }

    pub(crate) fn clicks(&self, handle: &str) -> u32 {
        self.lock().clicks.get(handle).copied().unwrap_or(0)
    }

    /// Handle of the download control of document `j` in row `i`
    pub(crate) fn document_trigger(i: usize, j: usize) -> ElementHandle {
        child(i, &format!("doc-{j}/download"))
    }

    pub(crate) fn row(i: usize) -> ElementHandle {
        row_handle(i)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a command for overlap detection; the returned guard ends it
    fn enter(&self) -> CommandGuard {
        let mut s = self.lock();
        s.commands_in_flight += 1;
        s.max_commands_in_flight = s.max_commands_in_flight.max(s.commands_in_flight);
        CommandGuard {
            state: self.state.clone(),
        }
    }

    fn resolve(&self, handle: &ElementHandle) -> SurfaceResult<Node> {
        let node = Node::parse(handle).ok_or_else(|| SurfaceError::StaleElement {
            handle: handle.id().to_string(),
        })?;
        if let Some(row) = node.row() {
            if !self.lock().is_rendered(row) {
                return Err(SurfaceError::StaleElement {
                    handle: handle.id().to_string(),
                });
            }
        }
        Ok(node)
    }

    fn start_download(&self, key: String, download: FakeDownload) {
        let clicks = {
            let mut s = self.lock();
            let count = s.clicks.entry(key).or_insert(0);
            *count += 1;
            *count
        };
        if clicks <= download.fail_first {
            return;
        }

        let state = self.state.clone();
        let dir = self.download_dir.clone();
        tokio::spawn(async move {
            {
                let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
                s.active_downloads += 1;
                s.max_active_downloads = s.max_active_downloads.max(s.active_downloads);
            }
            let final_path = crate::utils::get_unique_path(&dir.join(&download.disk_name))
                .unwrap_or_else(|_| dir.join(&download.disk_name));
            let file_name = final_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let provisional = dir.join(format!("{file_name}.crdownload"));

            let half = vec![b'x'; download.bytes / 2];
            let _ = tokio::fs::write(&provisional, &half).await;
            tokio::time::sleep(download.duration).await;
            let full = vec![b'x'; download.bytes];
            let _ = tokio::fs::write(&provisional, &full).await;
            let _ = tokio::fs::rename(&provisional, &final_path).await;

            let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
            s.active_downloads -= 1;
        });
    }
}

struct CommandGuard {
    state: Arc<Mutex<FeedState>>,
}

impl Drop for CommandGuard {
    fn drop(&mut self) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.commands_in_flight -= 1;
    }
}

#[async_trait]
impl RenderSurface for FakeFeed {
    async fn query(&self, selector: &str) -> SurfaceResult<Vec<ElementHandle>> {
        let _guard = self.enter();
        tokio::task::yield_now().await;
        let mut s = self.lock();
        if s.failing_queries > 0 {
            s.failing_queries -= 1;
            return Err(SurfaceError::Script("renderer busy".into()));
        }
        if selector == ".message" {
            Ok(s.rendered().into_iter().map(row_handle).collect())
        } else {
            Ok(Vec::new())
        }
    }

    async fn query_within(
        &self,
        scope: &ElementHandle,
        selector: &str,
    ) -> SurfaceResult<Vec<ElementHandle>> {
        let _guard = self.enter();
        let node = self.resolve(scope)?;
        let s = self.lock();
        let handles = match node {
            Node::Row(i) => {
                let row = &s.rows[i];
                match selector {
                    ".text-content" => row.text.iter().map(|_| child(i, "text")).collect(),
                    "a[href]" => (0..row.links.len())
                        .map(|j| child(i, &format!("link-{j}")))
                        .collect(),
                    ".document" => (0..row.documents.len())
                        .map(|j| child(i, &format!("doc-{j}")))
                        .collect(),
                    "img.media-photo" => (0..row.media.len())
                        .map(|j| child(i, &format!("media-{j}")))
                        .collect(),
                    _ => Vec::new(),
                }
            }
            Node::Document(i, j) => match selector {
                ".document-name" => vec![child(i, &format!("doc-{j}/name"))],
                ".document-size" => vec![child(i, &format!("doc-{j}/size"))],
                ".document-type" => vec![child(i, &format!("doc-{j}/type"))],
                ".document-download" => vec![child(i, &format!("doc-{j}/download"))],
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(handles)
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> SurfaceResult<Option<String>> {
        let _guard = self.enter();
        let node = self.resolve(element)?;
        let s = self.lock();
        Ok(match (node, name) {
            (Node::Link(i, j), "href") => s.rows[i].links.get(j).cloned(),
            (Node::Media(i, j), "src") => s.rows[i].media.get(j).map(|m| m.src.clone()),
            _ => None,
        })
    }

    async fn text(&self, element: &ElementHandle) -> SurfaceResult<String> {
        let _guard = self.enter();
        let node = self.resolve(element)?;
        let s = self.lock();
        let text = match node {
            Node::Text(i) => s.rows[i].text.clone(),
            Node::DocumentName(i, j) => s.rows[i].documents.get(j).map(|d| d.name.clone()),
            Node::DocumentSize(i, j) => s.rows[i].documents.get(j).map(|d| d.size.clone()),
            Node::DocumentType(i, j) => s.rows[i].documents.get(j).map(|d| d.file_type.clone()),
            _ => Some(String::new()),
        };
        Ok(text.unwrap_or_default())
    }

    async fn click(&self, element: &ElementHandle) -> SurfaceResult<()> {
        let _guard = self.enter();
        let node = Node::parse(element).ok_or_else(|| SurfaceError::StaleElement {
            handle: element.id().to_string(),
        })?;
        let download = {
            let s = self.lock();
            if let Some(row) = node.row() {
                if s.stale_clicks && !s.is_rendered(row) {
                    return Err(SurfaceError::StaleElement {
                        handle: element.id().to_string(),
                    });
                }
            }
            match node {
                Node::DocumentDownload(i, j) => s
                    .rows
                    .get(i)
                    .and_then(|r| r.documents.get(j))
                    .and_then(|d| d.download.clone()),
                Node::Media(i, j) => s
                    .rows
                    .get(i)
                    .and_then(|r| r.media.get(j))
                    .and_then(|m| m.download.clone()),
                _ => None,
            }
        };
        if let Some(download) = download {
            self.start_download(element.id().to_string(), download);
        }
        Ok(())
    }

    async fn run_script(&self, source: &str, _args: &[ScriptArg]) -> SurfaceResult<Value> {
        Err(SurfaceError::Script(format!("unsupported script: {source}")))
    }

    async fn scroll_container(&self) -> SurfaceResult<ElementHandle> {
        Ok(ElementHandle::new(CONTAINER))
    }

    async fn scroll_metrics(&self, _container: &ElementHandle) -> SurfaceResult<ScrollMetrics> {
        let _guard = self.enter();
        let s = self.lock();
        Ok(ScrollMetrics {
            position: s.position,
            content_height: s.content_height(),
            viewport_height: s.viewport_height(),
        })
    }

    async fn bounding_box(&self, element: &ElementHandle) -> SurfaceResult<ElementBox> {
        let _guard = self.enter();
        let node = self.resolve(element)?;
        let s = self.lock();
        Ok(match node.row() {
            None => ElementBox {
                top: 0.0,
                bottom: s.viewport_height(),
            },
            Some(i) => {
                let top = i as f64 * ROW_HEIGHT - s.position;
                ElementBox {
                    top,
                    bottom: top + ROW_HEIGHT,
                }
            }
        })
    }

    async fn scroll_into_view(&self, element: &ElementHandle, align: Align) -> SurfaceResult<()> {
        let _guard = self.enter();
        let node = self.resolve(element)?;
        let mut s = self.lock();
        if s.frozen {
            return Ok(());
        }
        if let Some(i) = node.row() {
            let target = match align {
                Align::Start => i as f64 * ROW_HEIGHT,
                Align::End => (i + 1) as f64 * ROW_HEIGHT - s.viewport_height(),
            };
            s.position = s.clamp(target);
        }
        Ok(())
    }

    async fn scroll_to_extreme(
        &self,
        _container: &ElementHandle,
        extreme: Extreme,
    ) -> SurfaceResult<()> {
        let _guard = self.enter();
        let mut s = self.lock();
        if s.pinned {
            return Ok(());
        }
        s.position = match extreme {
            Extreme::Top => 0.0,
            Extreme::Bottom => s.max_position(),
        };
        Ok(())
    }

    async fn scroll_by(&self, _container: &ElementHandle, delta: f64) -> SurfaceResult<()> {
        let _guard = self.enter();
        let mut s = self.lock();
        if !s.frozen {
            s.position = s.clamp(s.position + delta);
        }
        Ok(())
    }

    async fn natural_dimensions(&self, element: &ElementHandle) -> SurfaceResult<(u32, u32)> {
        let _guard = self.enter();
        let node = self.resolve(element)?;
        let s = self.lock();
        match node {
            Node::Media(i, j) => s.rows[i]
                .media
                .get(j)
                .map(|m| (m.width, m.height))
                .ok_or_else(|| SurfaceError::StaleElement {
                    handle: element.id().to_string(),
                }),
            _ => Err(SurfaceError::Script("not a media element".into())),
        }
    }
}

/// Config pointing at `root/downloads` and `root/harvest`, tuned for fast tests
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.acquisition.download_dir = root.join("downloads");
    config.output.output_dir = root.join("harvest");
    config.acquisition.poll_interval = Duration::from_millis(10);
    config.acquisition.watch_timeout = Duration::from_millis(600);
    config.acquisition.lock_retry_delay = Duration::from_millis(5);
    config.acquisition.retry.base_delay = Duration::from_millis(10);
    config.acquisition.retry.max_delay = Duration::from_millis(50);
    config.scroll.settle_interval = Duration::from_millis(1);
    std::fs::create_dir_all(&config.acquisition.download_dir).ok();
    std::fs::create_dir_all(&config.output.output_dir).ok();
    config
}
