//! Rendering-surface capability
//!
//! The browser-automation session is an external collaborator. The pipeline only
//! sees it through [`RenderSurface`]: element queries, attribute/text reads,
//! clicks and script evaluation. Geometry helpers have default implementations
//! built on [`RenderSurface::run_script`], so a driver only has to provide the
//! primitive operations; test doubles override the helpers directly.
//!
//! The surface is single-owner and non-reentrant. [`SerialSurface`] wraps an
//! implementation so that every command is issued alone, no matter how many
//! components hold a clone.

use crate::error::SurfaceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result type for surface operations
pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;

/// Scroll offsets of the scroll container, read with the container as `arguments[0]`
pub const SCROLL_METRICS_JS: &str = "const el = arguments[0]; \
     return { position: el.scrollTop, content_height: el.scrollHeight, viewport_height: el.clientHeight };";

/// Client rectangle of `arguments[0]`
pub const BOUNDING_BOX_JS: &str =
    "const r = arguments[0].getBoundingClientRect(); return { top: r.top, bottom: r.bottom };";

/// Scrolls `arguments[0]` into view, aligned by `arguments[1]` ("start" or "end")
pub const SCROLL_INTO_VIEW_JS: &str = "arguments[0].scrollIntoView({ block: arguments[1] });";

/// Moves the container `arguments[0]` to the extreme named by `arguments[1]`
pub const SCROLL_TO_EXTREME_JS: &str = "const el = arguments[0]; \
     el.scrollTop = arguments[1] === 'top' ? 0 : el.scrollHeight;";

/// Moves the container `arguments[0]` by `arguments[1]` pixels
pub const SCROLL_BY_JS: &str = "arguments[0].scrollTop += arguments[1];";

/// Natural pixel dimensions of the media element `arguments[0]`
pub const NATURAL_DIMENSIONS_JS: &str =
    "const el = arguments[0]; return [el.naturalWidth, el.naturalHeight];";

/// Slack used when deciding whether the viewport touches an extreme
const EXTREME_EPSILON: f64 = 2.0;

/// Opaque reference to a rendered element
///
/// Handles are issued by the surface and may go stale when the virtualized list
/// discards the node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ElementHandle(Arc<str>);

impl ElementHandle {
    /// Wrap a driver-specific element reference
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Driver-specific element reference
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Script argument
#[derive(Clone, Debug)]
pub enum ScriptArg {
    /// A rendered element
    Element(ElementHandle),
    /// A plain JSON value
    Value(Value),
}

/// Scroll offsets of the scroll container
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    /// Current scroll offset
    pub position: f64,
    /// Full scrollable height
    pub content_height: f64,
    /// Visible height
    pub viewport_height: f64,
}

impl ScrollMetrics {
    /// Offset is at (or within a couple of pixels of) the top
    pub fn at_top(&self) -> bool {
        self.position <= EXTREME_EPSILON
    }

    /// Offset is at (or within a couple of pixels of) the bottom
    pub fn at_bottom(&self) -> bool {
        self.position + self.viewport_height >= self.content_height - EXTREME_EPSILON
    }
}

/// Vertical client rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementBox {
    /// Top edge
    pub top: f64,
    /// Bottom edge
    pub bottom: f64,
}

impl ElementBox {
    /// Whether any part of `self` lies inside `viewport`
    pub fn intersects(&self, viewport: &ElementBox) -> bool {
        self.bottom > viewport.top && self.top < viewport.bottom
    }
}

/// Scroll extreme
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extreme {
    /// Start of the feed container
    Top,
    /// End of the feed container
    Bottom,
}

impl Extreme {
    fn as_str(self) -> &'static str {
        match self {
            Extreme::Top => "top",
            Extreme::Bottom => "bottom",
        }
    }
}

/// Alignment for [`RenderSurface::scroll_into_view`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    /// Element's top edge at the viewport top
    Start,
    /// Element's bottom edge at the viewport bottom
    End,
}

impl Align {
    fn as_str(self) -> &'static str {
        match self {
            Align::Start => "start",
            Align::End => "end",
        }
    }
}

/// Capability interface over the browser-automation session
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// All rendered elements matching `selector`, in document order
    async fn query(&self, selector: &str) -> SurfaceResult<Vec<ElementHandle>>;

    /// Elements matching `selector` inside `scope`, in document order
    async fn query_within(
        &self,
        scope: &ElementHandle,
        selector: &str,
    ) -> SurfaceResult<Vec<ElementHandle>>;

    /// Attribute value, `None` when absent
    async fn attribute(&self, element: &ElementHandle, name: &str)
    -> SurfaceResult<Option<String>>;

    /// Rendered text
    async fn text(&self, element: &ElementHandle) -> SurfaceResult<String>;

    /// Click the element
    async fn click(&self, element: &ElementHandle) -> SurfaceResult<()>;

    /// Evaluate a script with positional `arguments`
    async fn run_script(&self, source: &str, args: &[ScriptArg]) -> SurfaceResult<Value>;

    /// The element that scrolls the feed
    async fn scroll_container(&self) -> SurfaceResult<ElementHandle>;

    /// Scroll offsets of `container`
    async fn scroll_metrics(&self, container: &ElementHandle) -> SurfaceResult<ScrollMetrics> {
        let value = self
            .run_script(SCROLL_METRICS_JS, &[ScriptArg::Element(container.clone())])
            .await?;
        serde_json::from_value(value)
            .map_err(|e| SurfaceError::Script(format!("unexpected scroll metrics: {e}")))
    }

    /// Client rectangle of `element`
    async fn bounding_box(&self, element: &ElementHandle) -> SurfaceResult<ElementBox> {
        let value = self
            .run_script(BOUNDING_BOX_JS, &[ScriptArg::Element(element.clone())])
            .await?;
        serde_json::from_value(value)
            .map_err(|e| SurfaceError::Script(format!("unexpected bounding box: {e}")))
    }

    /// Bring `element` into view
    async fn scroll_into_view(&self, element: &ElementHandle, align: Align) -> SurfaceResult<()> {
        self.run_script(
            SCROLL_INTO_VIEW_JS,
            &[
                ScriptArg::Element(element.clone()),
                ScriptArg::Value(Value::from(align.as_str())),
            ],
        )
        .await
        .map(|_| ())
    }

    /// Jump `container` to an extreme
    async fn scroll_to_extreme(
        &self,
        container: &ElementHandle,
        extreme: Extreme,
    ) -> SurfaceResult<()> {
        self.run_script(
            SCROLL_TO_EXTREME_JS,
            &[
                ScriptArg::Element(container.clone()),
                ScriptArg::Value(Value::from(extreme.as_str())),
            ],
        )
        .await
        .map(|_| ())
    }

    /// Move `container` by `delta` pixels, negative towards the top
    async fn scroll_by(&self, container: &ElementHandle, delta: f64) -> SurfaceResult<()> {
        self.run_script(
            SCROLL_BY_JS,
            &[
                ScriptArg::Element(container.clone()),
                ScriptArg::Value(Value::from(delta)),
            ],
        )
        .await
        .map(|_| ())
    }

    /// Natural pixel dimensions of a media element
    async fn natural_dimensions(&self, element: &ElementHandle) -> SurfaceResult<(u32, u32)> {
        let value = self
            .run_script(NATURAL_DIMENSIONS_JS, &[ScriptArg::Element(element.clone())])
            .await?;
        serde_json::from_value(value)
            .map_err(|e| SurfaceError::Script(format!("unexpected dimensions: {e}")))
    }
}

/// Serialized access to a shared [`RenderSurface`]
///
/// Cloning is cheap; all clones share one gate, so at most one command is in
/// flight against the underlying session.
#[derive(Clone)]
pub struct SerialSurface {
    inner: Arc<dyn RenderSurface>,
    gate: Arc<Mutex<()>>,
}

impl SerialSurface {
    /// Wrap a surface
    pub fn new(inner: Arc<dyn RenderSurface>) -> Self {
        Self {
            inner,
            gate: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl RenderSurface for SerialSurface {
    async fn query(&self, selector: &str) -> SurfaceResult<Vec<ElementHandle>> {
        let _guard = self.gate.lock().await;
        self.inner.query(selector).await
    }

    async fn query_within(
        &self,
        scope: &ElementHandle,
        selector: &str,
    ) -> SurfaceResult<Vec<ElementHandle>> {
        let _guard = self.gate.lock().await;
        self.inner.query_within(scope, selector).await
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> SurfaceResult<Option<String>> {
        let _guard = self.gate.lock().await;
        self.inner.attribute(element, name).await
    }

    async fn text(&self, element: &ElementHandle) -> SurfaceResult<String> {
        let _guard = self.gate.lock().await;
        self.inner.text(element).await
    }

    async fn click(&self, element: &ElementHandle) -> SurfaceResult<()> {
        let _guard = self.gate.lock().await;
        self.inner.click(element).await
    }

    async fn run_script(&self, source: &str, args: &[ScriptArg]) -> SurfaceResult<Value> {
        let _guard = self.gate.lock().await;
        self.inner.run_script(source, args).await
    }

    async fn scroll_container(&self) -> SurfaceResult<ElementHandle> {
        let _guard = self.gate.lock().await;
        self.inner.scroll_container().await
    }

    async fn scroll_metrics(&self, container: &ElementHandle) -> SurfaceResult<ScrollMetrics> {
        let _guard = self.gate.lock().await;
        self.inner.scroll_metrics(container).await
    }

    async fn bounding_box(&self, element: &ElementHandle) -> SurfaceResult<ElementBox> {
        let _guard = self.gate.lock().await;
        self.inner.bounding_box(element).await
    }

    async fn scroll_into_view(&self, element: &ElementHandle, align: Align) -> SurfaceResult<()> {
        let _guard = self.gate.lock().await;
        self.inner.scroll_into_view(element, align).await
    }

    async fn scroll_to_extreme(
        &self,
        container: &ElementHandle,
        extreme: Extreme,
    ) -> SurfaceResult<()> {
        let _guard = self.gate.lock().await;
        self.inner.scroll_to_extreme(container, extreme).await
    }

    async fn scroll_by(&self, container: &ElementHandle, delta: f64) -> SurfaceResult<()> {
        let _guard = self.gate.lock().await;
        self.inner.scroll_by(container, delta).await
    }

    async fn natural_dimensions(&self, element: &ElementHandle) -> SurfaceResult<(u32, u32)> {
        let _guard = self.gate.lock().await;
        self.inner.natural_dimensions(element).await
    }
}
