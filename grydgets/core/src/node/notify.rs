//! Notification Overrides
//!
//! A [`NotifiableNode`] wraps exactly one child and temporarily replaces it
//! with an [`Overlay`] when a payload arrives from outside the render loop.
//!
//! ```text
//!   any thread                     render thread (tick)
//!   ──────────                     ────────────────────
//!   handle.notify(json) ──► Inbox ──► pop ──► overlay.begin ──┬─ Ready   ──► Showing
//!                         (Mutex<VecDeque>)                   ├─ Pending ──► Loading ──poll──► Showing
//!                                                             └─ Failed  ──► Child
//!
//!   Showing ──(duration elapsed)──► Child, dirty once
//! ```
//!
//! Payloads queue up while an override is showing and are taken one at a
//! time after it expires. The wrapped child keeps ticking throughout, so it
//! is current again the moment the override ends.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{render_child, BoxedNode, Children, ImageContent, ImageLoader, Node, TextNode, TextStyle};
use crate::clock::SharedClock;
use crate::error::{BuildError, NotifyError, RenderError, TopologyError};
use crate::surface::{Color, FitMode, SharedFont, Size, Surface};

/// How long an override shows when its payload names no duration
pub const DEFAULT_OVERRIDE_DURATION: Duration = Duration::from_secs(5);

// ============================================================================
// Notifiable / Inbox
// ============================================================================

/// Entry point for external notifications
pub trait Notifiable: Send + Sync {
    /// Queue `payload`; never blocks on rendering
    fn notify(&self, payload: Value) -> Result<(), NotifyError>;
}

/// Shared handle to a notifiable node's inbox
pub type NotifyHandle = Arc<dyn Notifiable>;

/// Thread-safe FIFO of decoded payloads
pub struct Inbox<P> {
    owner: String,
    queue: Mutex<VecDeque<P>>,
}

impl<P> fmt::Debug for Inbox<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox")
            .field("owner", &self.owner)
            .field("pending", &self.queue.lock().len())
            .finish()
    }
}

impl<P> Inbox<P> {
    /// Empty inbox for the node called `owner`
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Oldest pending payload
    pub fn pop(&self) -> Option<P> {
        self.queue.lock().pop_front()
    }

    /// Number of pending payloads
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<P> Notifiable for Inbox<P>
where
    P: DeserializeOwned + Send,
{
    fn notify(&self, payload: Value) -> Result<(), NotifyError> {
        let payload: P = serde_json::from_value(payload).map_err(|e| NotifyError::InvalidPayload(e.to_string()))?;
        let mut queue = self.queue.lock();
        queue.push_back(payload);
        debug!(node = %self.owner, pending = queue.len(), "Queued notification");
        Ok(())
    }
}

// ============================================================================
// Overlay
// ============================================================================

/// Result of starting or polling an overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Content is ready to show
    Ready,
    /// Content is still being prepared off-thread
    Pending,
    /// Content could not be prepared; keep showing the child
    Failed,
}

/// Content shown in place of the wrapped child
pub trait Overlay: Send + fmt::Debug {
    /// Payload accepted by [`Notifiable::notify`]
    type Payload: DeserializeOwned + Send + fmt::Debug + 'static;

    /// Requested display time in seconds
    fn duration(payload: &Self::Payload) -> Option<f64>;

    /// Prepare content for `payload`
    fn begin(&mut self, payload: Self::Payload) -> Readiness;

    /// Check on content that was [`Readiness::Pending`]
    fn poll(&mut self) -> Readiness {
        Readiness::Ready
    }

    /// Whether the next render differs from the last
    fn is_dirty(&self) -> bool;

    /// Draw the content
    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError>;
}

/// `{"text": "...", "color": [r, g, b]?, "duration": secs?}`
#[derive(Debug, Clone, Deserialize)]
pub struct TextPayload {
    /// Text to show
    pub text: String,
    /// Text color, the overlay default if absent
    #[serde(default)]
    pub color: Option<Color>,
    /// Display time in seconds
    #[serde(default)]
    pub duration: Option<f64>,
}

fn white() -> Color {
    Color::WHITE
}

/// Parameters of a `notifiabletext` node
#[derive(Debug, Clone, Deserialize)]
pub struct NotifiableTextParams {
    /// Maximum pixel size of the override text
    #[serde(default)]
    pub text_size: Option<u32>,
    /// Inset around the override text
    #[serde(default)]
    pub padding: u32,
    /// Default override color
    #[serde(default = "white")]
    pub color: Color,
}

impl NotifiableTextParams {
    /// Style of the override text
    pub fn style(&self) -> TextStyle {
        TextStyle {
            color: self.color,
            text_size: self.text_size,
            ..TextStyle::centered(self.padding)
        }
    }
}

/// Centered text override
#[derive(Debug)]
pub struct TextOverlay {
    text: TextNode,
    color: Color,
}

impl TextOverlay {
    /// Overlay drawing with `style`; payload colors override `style.color`
    pub fn new(owner: &str, style: TextStyle, font: SharedFont) -> Self {
        Self {
            color: style.color,
            text: TextNode::new(format!("{owner}_text"), "", style, font),
        }
    }

    /// Text of the current or last override
    pub fn text(&self) -> &str {
        self.text.text()
    }
}

impl Overlay for TextOverlay {
    type Payload = TextPayload;

    fn duration(payload: &TextPayload) -> Option<f64> {
        payload.duration
    }

    fn begin(&mut self, payload: TextPayload) -> Readiness {
        self.text.set_text(payload.text);
        self.text.set_color(payload.color.unwrap_or(self.color));
        Readiness::Ready
    }

    fn is_dirty(&self) -> bool {
        self.text.is_dirty()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        self.text.render(size)
    }
}

/// `{"url": "...", "duration": secs?}`
#[derive(Debug, Clone, Deserialize)]
pub struct ImagePayload {
    /// `http(s)://`, `file://` or a local path
    pub url: String,
    /// Display time in seconds
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Image override, fetched on a background thread
#[derive(Debug)]
pub struct ImageOverlay {
    loader: ImageLoader,
    content: ImageContent,
}

impl ImageOverlay {
    /// Overlay loading images for the node called `owner`
    pub fn new(owner: &str) -> Self {
        Self {
            loader: ImageLoader::new(owner, None),
            content: ImageContent::new(FitMode::Contain),
        }
    }
}

impl Overlay for ImageOverlay {
    type Payload = ImagePayload;

    fn duration(payload: &ImagePayload) -> Option<f64> {
        payload.duration
    }

    fn begin(&mut self, payload: ImagePayload) -> Readiness {
        self.loader.request(&payload.url);
        Readiness::Pending
    }

    fn poll(&mut self) -> Readiness {
        match self.loader.take_ready() {
            Some(Ok(image)) => {
                self.content.set(image);
                Readiness::Ready
            }
            Some(Err(_)) => Readiness::Failed,
            None => Readiness::Pending,
        }
    }

    fn is_dirty(&self) -> bool {
        self.content.is_dirty()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        Ok(self.content.render(size))
    }
}

// ============================================================================
// NotifiableNode
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Child,
    Loading { duration: Duration },
    Showing { started: Instant, duration: Duration },
}

fn display_time(seconds: Option<f64>) -> Duration {
    seconds
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or(DEFAULT_OVERRIDE_DURATION)
}

/// Wraps one child and shows overrides on demand
#[derive(Debug)]
pub struct NotifiableNode<O: Overlay> {
    name: String,
    children: Children,
    inbox: Arc<Inbox<O::Payload>>,
    overlay: O,
    clock: SharedClock,
    mode: Mode,
    dirty: bool,
}

impl<O: Overlay> NotifiableNode<O> {
    /// Wrapper around `overlay`
    pub fn new(name: impl Into<String>, overlay: O, clock: SharedClock) -> Self {
        let name = name.into();
        Self {
            children: Children::exactly(name.clone(), 1),
            inbox: Arc::new(Inbox::new(name.clone())),
            name,
            overlay,
            clock,
            mode: Mode::Child,
            dirty: true,
        }
    }

    /// Whether an override is on screen
    pub fn is_showing(&self) -> bool {
        matches!(self.mode, Mode::Showing { .. })
    }

    /// Whether an override is being prepared
    pub fn is_loading(&self) -> bool {
        matches!(self.mode, Mode::Loading { .. })
    }

    /// The overlay, for inspection
    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    fn show(&mut self, now: Instant, duration: Duration) {
        debug!(node = %self.name, duration_secs = duration.as_secs_f64(), "Showing override");
        self.mode = Mode::Showing { started: now, duration };
        self.dirty = true;
    }

    fn advance(&mut self, now: Instant) {
        match self.mode {
            Mode::Showing { started, duration } if now.saturating_duration_since(started) >= duration => {
                debug!(node = %self.name, "Override expired");
                self.mode = Mode::Child;
                self.dirty = true;
            }
            Mode::Loading { duration } => match self.overlay.poll() {
                Readiness::Ready => self.show(now, duration),
                Readiness::Failed => {
                    debug!(node = %self.name, "Override content failed, keeping child");
                    self.mode = Mode::Child;
                }
                Readiness::Pending => {}
            },
            _ => {}
        }

        if self.mode != Mode::Child {
            return;
        }
        let Some(payload) = self.inbox.pop() else {
            return;
        };
        let duration = display_time(O::duration(&payload));
        match self.overlay.begin(payload) {
            Readiness::Ready => self.show(now, duration),
            Readiness::Pending => self.mode = Mode::Loading { duration },
            Readiness::Failed => debug!(node = %self.name, "Override rejected"),
        }
    }
}

impl<O: Overlay + 'static> Node for NotifiableNode<O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) {
        let now = self.clock.now();
        self.advance(now);
        self.children.tick_all();
    }

    fn is_dirty(&self) -> bool {
        self.dirty
            || if self.is_showing() {
                self.overlay.is_dirty()
            } else {
                self.children.any_dirty()
            }
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        let surface = if self.is_showing() {
            self.overlay.render(size)?
        } else {
            let child = self
                .children
                .get_mut(0)
                .ok_or_else(|| RenderError::EmptyChildren(self.name.clone()))?;
            match render_child(child.as_mut(), size) {
                Some(surface) => surface,
                None => {
                    self.dirty = true;
                    return Ok(Arc::new(Surface::new(size)));
                }
            }
        };
        self.dirty = false;
        Ok(surface)
    }

    fn add_child(&mut self, child: BoxedNode) -> Result<(), TopologyError> {
        self.children.push(child)?;
        self.dirty = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BuildError> {
        Ok(self.children.check_min()?)
    }

    fn children(&self) -> &[BoxedNode] {
        self.children.as_slice()
    }

    fn children_mut(&mut self) -> &mut [BoxedNode] {
        self.children.as_mut_slice()
    }

    fn notify_handle(&self) -> Option<NotifyHandle> {
        Some(Arc::clone(&self.inbox) as NotifyHandle)
    }
}
