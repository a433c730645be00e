//! Tree Manager
//!
//! Turns a declarative [`WidgetSpec`] into a live node tree and owns it for
//! the lifetime of one configuration:
//!
//! ```text
//!   WidgetSpec ──build──► root: BoxedNode ──walk──► NotifyRegistry
//!                          │                        (name -> inbox)
//!   render loop ── tick / is_dirty / render          ▲
//!   notify socket ───────────────────────────────────┘
//! ```
//!
//! # Naming
//!
//! Every node gets a unique name: the explicit `name` parameter if there is
//! one, otherwise the path of `<kind><n>` segments from the root joined with
//! `_`, where `n` counts nodes of that kind among siblings (`grid1_flip2`).
//!
//! # Teardown
//!
//! [`TreeManager::stop_all`] stops every node's background loop and empties
//! the registry. A failed build stops whatever it had already started.

mod registry;

pub use self::registry::{constructor, widget_types, BuildContext, Constructor, WidgetContext, WIDGETS};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{BuildError, NotifyError, RenderError};
use crate::node::{stop_tree, walk, BoxedNode, Node, NotifyHandle, ScreenNode};
use crate::surface::{Color, Size, Surface};

// ============================================================================
// WidgetSpec
// ============================================================================

/// Declarative description of one node and its subtree
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WidgetSpec {
    /// Widget tag, one of [`widget_types`]
    #[serde(rename = "widget")]
    pub kind: String,

    /// Explicit unique name, used for notifications
    #[serde(default)]
    pub name: Option<String>,

    /// Child declarations in layout order
    #[serde(default)]
    pub children: Vec<WidgetSpec>,

    /// Names of providers this widget reads
    #[serde(default)]
    pub providers: Vec<String>,

    /// Widget-specific parameters
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl WidgetSpec {
    /// Spec with no parameters or children
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            children: Vec::new(),
            providers: Vec::new(),
            params: Map::new(),
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    /// Add a child
    #[must_use]
    pub fn child(mut self, child: WidgetSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Set the explicit name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reference a provider
    #[must_use]
    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.providers.push(name.into());
        self
    }
}

// ============================================================================
// NotifyRegistry
// ============================================================================

/// Name-to-inbox map shared between the tree and the notification endpoint
#[derive(Clone, Default)]
pub struct NotifyRegistry {
    entries: Arc<DashMap<String, NotifyHandle>>,
}

impl fmt::Debug for NotifyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyRegistry").field("names", &self.names()).finish()
    }
}

impl NotifyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `name`; the first registration wins
    pub fn register(&self, name: &str, handle: NotifyHandle) -> bool {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => {
                warn!(node = %name, "Duplicate notifiable name, keeping the first");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Deliver `payload` to the node called `name`
    pub fn notify(&self, name: &str, payload: Value) -> Result<(), NotifyError> {
        let handle = self
            .entries
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| NotifyError::WidgetNotFound(name.to_string()))?;
        handle.notify(payload)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.entries.clear();
    }
}

// ============================================================================
// TreeManager
// ============================================================================

/// Owner of a live node tree
pub struct TreeManager {
    root: BoxedNode,
    registry: NotifyRegistry,
    names: Vec<String>,
}

impl fmt::Debug for TreeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeManager")
            .field("root", &self.root.name())
            .field("nodes", &self.names.len())
            .field("registry", &self.registry)
            .finish()
    }
}

impl TreeManager {
    /// Build a tree with its own registry
    pub fn build(spec: &WidgetSpec, ctx: &BuildContext<'_>) -> Result<Self, BuildError> {
        Self::build_into(spec, ctx, NotifyRegistry::new())
    }

    /// Build a tree that registers its notifiable nodes in `registry`
    ///
    /// A root that is not a `screen` is wrapped in a black one.
    pub fn build_into(spec: &WidgetSpec, ctx: &BuildContext<'_>, registry: NotifyRegistry) -> Result<Self, BuildError> {
        let mut counter = HashMap::new();
        let built = build_node(spec, &[], &mut counter, ctx)?;
        let root: BoxedNode = if spec.kind == "screen" {
            built
        } else {
            let mut screen = ScreenNode::new("screen", Color::BLACK);
            screen.add_child(built)?;
            Box::new(screen)
        };

        let mut names = Vec::new();
        walk(root.as_ref(), &mut |node: &dyn Node| {
            names.push(node.name().to_string());
            if let Some(handle) = node.notify_handle() {
                if registry.register(node.name(), handle) {
                    debug!(node = %node.name(), "Registered notifiable node");
                }
            }
        });
        info!(nodes = names.len(), notifiable = registry.len(), "Built node tree");

        Ok(Self { root, registry, names })
    }

    /// The root node
    pub fn root(&self) -> &dyn Node {
        self.root.as_ref()
    }

    /// The root node, mutably
    pub fn root_mut(&mut self) -> &mut dyn Node {
        self.root.as_mut()
    }

    /// Advance every node
    pub fn tick(&mut self) {
        self.root.tick();
    }

    /// Whether anything needs re-rendering
    pub fn is_dirty(&self) -> bool {
        self.root.is_dirty()
    }

    /// Render the whole tree
    pub fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        self.root.render(size)
    }

    /// Deliver an override to a notifiable node
    pub fn notify(&self, name: &str, payload: Value) -> Result<(), NotifyError> {
        self.registry.notify(name, payload)
    }

    /// Handle for delivering overrides from other threads
    pub fn notify_registry(&self) -> NotifyRegistry {
        self.registry.clone()
    }

    /// Every node name, parents before children
    pub fn node_names(&self) -> &[String] {
        &self.names
    }

    /// Stop every background loop and empty the registry
    pub fn stop_all(&mut self) {
        info!("Stopping node tree");
        stop_tree(self.root.as_mut());
        self.registry.clear();
    }
}

fn build_node(
    spec: &WidgetSpec,
    path: &[String],
    counter: &mut HashMap<String, usize>,
    ctx: &BuildContext<'_>,
) -> Result<BoxedNode, BuildError> {
    let n = counter.entry(spec.kind.clone()).or_insert(0);
    *n += 1;
    let segment = format!("{}{}", spec.kind, n);
    let mut child_path = path.to_vec();
    child_path.push(segment);
    let name = spec.name.clone().unwrap_or_else(|| child_path.join("_"));

    let build = constructor(&spec.kind).ok_or_else(|| BuildError::UnknownWidgetType {
        kind: spec.kind.clone(),
        available: widget_types().join(", "),
    })?;
    ctx.providers.validate_references(&name, &spec.providers)?;

    debug!(node = %name, kind = %spec.kind, "Adding to node tree");
    let mut node = build(&WidgetContext {
        name: &name,
        spec,
        build: ctx,
    })?;

    let mut child_counter = HashMap::new();
    for child_spec in &spec.children {
        let child = match build_node(child_spec, &child_path, &mut child_counter, ctx) {
            Ok(child) => child,
            Err(e) => {
                stop_tree(node.as_mut());
                return Err(e);
            }
        };
        if let Err(e) = node.add_child(child) {
            stop_tree(node.as_mut());
            return Err(e.into());
        }
    }

    if let Err(e) = node.finish() {
        stop_tree(node.as_mut());
        return Err(e);
    }
    Ok(node)
}
