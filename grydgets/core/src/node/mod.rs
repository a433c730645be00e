//! Display Nodes
//!
//! The dashboard is a tree of [`Node`]s. The render loop drives it in three
//! passes per frame:
//!
//! ```text
//!   tick()      top-down   advance clocks, state machines, provider reads
//!   is_dirty()  bottom-up  does anything need re-rendering?
//!   render(sz)  top-down   produce a Surface, memoized while clean
//! ```
//!
//! # Contracts
//!
//! - `tick` never blocks. Nodes that need external data get it from a
//!   provider cache or from their own background [`Refresher`].
//! - `is_dirty` is recomputed on every call; children change state from
//!   other threads between frames.
//! - `render(size)` returns the same surface for the same `(size, state)`
//!   until something marks the node dirty. A size change always forces a
//!   recompute.
//! - A container that gets an error or a wrongly-sized surface from a child
//!   skips that child for the frame (see [`render_child`]).
//!
//! Capabilities are opt-in: a node that accepts override payloads returns a
//! handle from [`Node::notify_handle`]; a node that owns a background loop
//! stops it in [`Node::stop`].

mod composite;
mod dateclock;
mod flip;
mod format;
mod grid;
mod image;
mod label;
mod notify;
mod pill;
mod provider;
mod refresh;
mod screen;
mod text;
mod transition;

pub use self::composite::Children;
pub use self::dateclock::{DateClockNode, DateClockParams};
pub use self::flip::{
    FlipNode, FlipParams, HttpFlipNode, HttpFlipParams, ProviderFlipNode, ProviderFlipParams, Schedule,
    ScheduleFlipNode, ScheduleFlipParams, ValueMap,
};
pub use self::format::format_value;
pub use self::grid::{GridNode, GridParams};
pub use self::image::{ImageContent, ImageLoader, ImageNode, ImageParams};
pub use self::label::{LabelNode, LabelParams, LabelPosition};
pub use self::notify::{
    ImageOverlay, ImagePayload, Inbox, Notifiable, NotifiableNode, NotifiableTextParams, NotifyHandle, Overlay,
    Readiness, TextOverlay, TextPayload, DEFAULT_OVERRIDE_DURATION,
};
pub use self::pill::{PillNode, PillParams};
pub use self::provider::{ProviderImageNode, ProviderImageParams, ProviderTextNode, ProviderTextParams, TextFallback};
pub(crate) use self::refresh::frequency;
pub use self::refresh::{Refresher, RestImageNode, RestImageParams, RestNode, RestParams, REFRESH_STOP_TIMEOUT};
pub use self::screen::{ScreenNode, ScreenParams};
pub use self::text::{Align, TextNode, TextParams, TextStyle, VAlign};
pub use self::transition::{ease_in_out, Blend, Phase, TransitionController, TransitionSettings};

use std::sync::Arc;

use tracing::warn;

use crate::error::{BuildError, RenderError, TopologyError};
use crate::surface::{Size, Surface};

/// Owned, type-erased node
pub type BoxedNode = Box<dyn Node>;

/// A unit of the display tree
pub trait Node: Send {
    /// Unique name within the tree
    fn name(&self) -> &str;

    /// Advance time- or data-driven state; must not block
    fn tick(&mut self) {}

    /// Whether the next `render` would differ from the last one
    fn is_dirty(&self) -> bool;

    /// Produce a surface of exactly `size`
    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError>;

    /// Append a child; containers enforce their maximum arity here
    fn add_child(&mut self, _child: BoxedNode) -> Result<(), TopologyError> {
        Err(TopologyError::LeafNode {
            node: self.name().to_string(),
        })
    }

    /// Called once after all children are added
    ///
    /// Containers check their minimum arity and resolve child names
    /// (schedules, value mappings) here.
    fn finish(&mut self) -> Result<(), BuildError> {
        Ok(())
    }

    /// Child nodes in layout order
    fn children(&self) -> &[BoxedNode] {
        &[]
    }

    /// Mutable child nodes in layout order
    fn children_mut(&mut self) -> &mut [BoxedNode] {
        &mut []
    }

    /// Stop this node's own background work (not its children's)
    fn stop(&mut self) {}

    /// Override entry point, if this node accepts notifications
    fn notify_handle(&self) -> Option<NotifyHandle> {
        None
    }
}

// ============================================================================
// Render helpers
// ============================================================================

/// Last rendered surface and the size it was rendered at
#[derive(Debug, Default, Clone)]
pub struct RenderMemo {
    entry: Option<Arc<Surface>>,
}

impl RenderMemo {
    /// Cached surface, if it was rendered at `size`
    pub fn get(&self, size: Size) -> Option<Arc<Surface>> {
        self.entry.as_ref().filter(|s| s.size() == size).cloned()
    }

    /// Whether a surface of `size` is cached
    pub fn holds(&self, size: Size) -> bool {
        self.entry.as_ref().is_some_and(|s| s.size() == size)
    }

    /// Cache `surface` and return a shared handle to it
    pub fn store(&mut self, surface: Surface) -> Arc<Surface> {
        let shared = Arc::new(surface);
        self.entry = Some(Arc::clone(&shared));
        shared
    }

    /// Cache an already shared surface
    pub fn store_shared(&mut self, surface: Arc<Surface>) -> Arc<Surface> {
        self.entry = Some(Arc::clone(&surface));
        surface
    }

    /// Drop the cached surface
    pub fn clear(&mut self) {
        self.entry = None;
    }
}

/// Render a child, or `None` if it failed or returned the wrong size
///
/// Failures are logged and the caller draws nothing for that child this
/// frame.
pub fn render_child(child: &mut dyn Node, size: Size) -> Option<Arc<Surface>> {
    match child.render(size) {
        Ok(surface) if surface.size() == size => Some(surface),
        Ok(surface) => {
            let error = RenderError::ShapeMismatch {
                expected: size,
                actual: surface.size(),
            };
            warn!(node = %child.name(), error = %error, "Skipping child for this frame");
            None
        }
        Err(error) => {
            warn!(node = %child.name(), error = %error, "Skipping child for this frame");
            None
        }
    }
}

/// Walk a tree depth-first, parents before children
pub fn walk<'a>(node: &'a dyn Node, visit: &mut dyn FnMut(&'a dyn Node)) {
    visit(node);
    for child in node.children() {
        walk(child.as_ref(), visit);
    }
}

/// Stop every background loop in a tree, children first
pub fn stop_tree(node: &mut dyn Node) {
    for child in node.children_mut() {
        stop_tree(child.as_mut());
    }
    node.stop();
}
