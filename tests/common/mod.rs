//! Shared helpers for integration tests
//!
//! [`StaticFeed`] is a fully rendered, non-scrolling feed built only on the
//! public [`RenderSurface`] API. Clicking a document's download control
//! writes `<name>.crdownload` into the download directory and renames it
//! shortly after, like a browser would.

#![allow(dead_code)]

use async_trait::async_trait;
use feed_harvest::surface::{
    Align, ElementBox, Extreme, ScriptArg, ScrollMetrics, SurfaceResult,
};
use feed_harvest::{Config, ElementHandle, Event, RenderSurface, SurfaceError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

const ROW_HEIGHT: f64 = 100.0;

/// One message: text plus an optional document attachment
#[derive(Clone, Debug)]
pub struct StaticMessage {
    pub text: String,
    pub document: Option<String>,
}

impl StaticMessage {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            document: None,
        }
    }

    pub fn with_document(mut self, name: &str) -> Self {
        self.document = Some(name.to_string());
        self
    }
}

/// Feed whose messages are all rendered at once
pub struct StaticFeed {
    messages: Vec<StaticMessage>,
    download_dir: PathBuf,
}

impl StaticFeed {
    pub fn new(messages: Vec<StaticMessage>, download_dir: &Path) -> Self {
        Self {
            messages,
            download_dir: download_dir.to_path_buf(),
        }
    }

    fn index(&self, handle: &ElementHandle) -> SurfaceResult<usize> {
        handle
            .id()
            .split('/')
            .next()
            .and_then(|head| head.strip_prefix('m'))
            .and_then(|i| i.parse::<usize>().ok())
            .filter(|&i| i < self.messages.len())
            .ok_or_else(|| SurfaceError::StaleElement {
                handle: handle.id().to_string(),
            })
    }
}

#[async_trait]
impl RenderSurface for StaticFeed {
    async fn query(&self, selector: &str) -> SurfaceResult<Vec<ElementHandle>> {
        if selector != ".message" {
            return Ok(Vec::new());
        }
        Ok((0..self.messages.len())
            .map(|i| ElementHandle::new(format!("m{i}")))
            .collect())
    }

    async fn query_within(
        &self,
        scope: &ElementHandle,
        selector: &str,
    ) -> SurfaceResult<Vec<ElementHandle>> {
        let i = self.index(scope)?;
        let has_document = self.messages[i].document.is_some();
        let child = |suffix: &str| vec![ElementHandle::new(format!("{}/{suffix}", scope.id()))];
        Ok(match (scope.id().ends_with("/doc"), selector) {
            (false, ".text-content") => child("text"),
            (false, ".document") if has_document => child("doc"),
            (true, ".document-name") => child("name"),
            (true, ".document-download") => child("download"),
            _ => Vec::new(),
        })
    }

    async fn attribute(&self, _: &ElementHandle, _: &str) -> SurfaceResult<Option<String>> {
        Ok(None)
    }

    async fn text(&self, element: &ElementHandle) -> SurfaceResult<String> {
        let message = &self.messages[self.index(element)?];
        if element.id().ends_with("/text") {
            Ok(message.text.clone())
        } else if element.id().ends_with("/doc/name") {
            Ok(message.document.clone().unwrap_or_default())
        } else {
            Ok(String::new())
        }
    }

    async fn click(&self, element: &ElementHandle) -> SurfaceResult<()> {
        let message = &self.messages[self.index(element)?];
        let Some(name) = message.document.clone() else {
            return Ok(());
        };
        let dir = self.download_dir.clone();
        tokio::spawn(async move {
            let provisional = dir.join(format!("{name}.crdownload"));
            let _ = tokio::fs::write(&provisional, b"partial").await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tokio::fs::write(&provisional, b"complete payload").await;
            let _ = tokio::fs::rename(&provisional, dir.join(&name)).await;
        });
        Ok(())
    }

    async fn run_script(&self, source: &str, _: &[ScriptArg]) -> SurfaceResult<serde_json::Value> {
        Err(SurfaceError::Script(format!("unsupported script: {source}")))
    }

    async fn scroll_container(&self) -> SurfaceResult<ElementHandle> {
        Ok(ElementHandle::new("container"))
    }

    async fn scroll_metrics(&self, _: &ElementHandle) -> SurfaceResult<ScrollMetrics> {
        let height = self.messages.len() as f64 * ROW_HEIGHT;
        Ok(ScrollMetrics {
            position: 0.0,
            content_height: height,
            viewport_height: height,
        })
    }

    async fn bounding_box(&self, element: &ElementHandle) -> SurfaceResult<ElementBox> {
        if element.id() == "container" {
            return Ok(ElementBox {
                top: 0.0,
                bottom: self.messages.len() as f64 * ROW_HEIGHT,
            });
        }
        let top = self.index(element)? as f64 * ROW_HEIGHT;
        Ok(ElementBox {
            top,
            bottom: top + ROW_HEIGHT,
        })
    }

    async fn scroll_into_view(&self, _: &ElementHandle, _: Align) -> SurfaceResult<()> {
        Ok(())
    }

    async fn scroll_to_extreme(&self, _: &ElementHandle, _: Extreme) -> SurfaceResult<()> {
        Ok(())
    }

    async fn scroll_by(&self, _: &ElementHandle, _: f64) -> SurfaceResult<()> {
        Ok(())
    }
}

/// Config rooted at `root` with timings suited to tests
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.acquisition.download_dir = root.join("downloads");
    config.output.output_dir = root.join("archive");
    config.acquisition.poll_interval = Duration::from_millis(10);
    config.acquisition.watch_timeout = Duration::from_secs(5);
    config.acquisition.retry.base_delay = Duration::from_millis(10);
    config.scroll.settle_interval = Duration::from_millis(1);
    config
}

/// Receive events until `Finished` (inclusive) or until `timeout`
pub async fn collect_events_until_finished(
    rx: &mut broadcast::Receiver<Event>,
    timeout: Duration,
) -> Vec<Event> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = rx.recv().await {
            let done = matches!(event, Event::Finished { .. });
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    events
}
