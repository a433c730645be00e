//! Grydgets Core - Dashboard Node Tree and Data Providers
//!
//! This crate holds everything a grydgets dashboard needs except a display:
//! the node tree, animated transitions, background data providers and the
//! override queue. A binary (see `grydgets-daemon`) owns the window or
//! framebuffer and drives the tree once per frame.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Render thread                             │
//! │   TreeManager ── tick() ── is_dirty() ── render(size) ──► Surface│
//! │      │                                                           │
//! │      ├── FlipNode / ScheduleFlipNode ── TransitionController     │
//! │      ├── NotifiableNode ◄── Inbox ◄───────────┐                  │
//! │      └── ProviderTextNode ── ProviderWatch    │                  │
//! └───────────────────────────────┬───────────────┼──────────────────┘
//!                                 │ reads cache   │ notify(name, payload)
//! ┌───────────────────────────────┴──────┐   ┌────┴─────────────────┐
//! │ Worker threads                       │   │ NotifyRegistry       │
//! │  DataProvider ── Source::fetch()     │   │ (socket, HTTP, ...)  │
//! │  RestNode / HttpFlipNode Refresher   │   └──────────────────────┘
//! └──────────────────────────────────────┘
//! ```
//!
//! Rendering never waits on the network: every fetch happens on a worker
//! thread and lands in a cache the render thread reads without blocking.
//!
//! # Key Types
//!
//! - [`Node`]: one unit of the display tree
//! - [`TreeManager`]: builds a tree from a [`WidgetSpec`] and owns it
//! - [`DataProvider`]: shared, periodically refreshed value
//! - [`ProviderManager`]: every provider of one configuration
//! - [`NotifyRegistry`]: name to override inbox, shared with transports
//! - [`DashboardConfig`]: a parsed configuration file
//!
//! # Quick Start
//!
//! ```ignore
//! use grydgets_core::{load_config, BuildContext, ProviderManager, TreeManager};
//!
//! let config = load_config(path)?;
//! let providers = ProviderManager::from_specs(&config.providers)?;
//! providers.start_all()?;
//!
//! let ctx = BuildContext::new(&providers);
//! let mut tree = TreeManager::build(config.root_widget().unwrap(), &ctx)?;
//! loop {
//!     tree.tick();
//!     if tree.is_dirty() {
//!         let frame = tree.render(config.graphics.size())?;
//!         // present `frame`
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`clock`]: injectable time source
//! - [`config`]: TOML configuration
//! - [`error`]: error types, split by when they surface
//! - [`extract`]: `json_path` and query extraction from JSON values
//! - [`fetch`]: REST and file sources
//! - [`node`]: the node trait and every widget
//! - [`provider`]: cached, periodically refreshed providers
//! - [`surface`]: RGBA buffers, fonts and image scaling
//! - [`tree`]: tree construction, naming and notification routing
//! - [`worker`]: background loop shared by providers and refreshing nodes

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod node;
pub mod provider;
pub mod surface;
pub mod tree;
pub mod worker;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{BuildError, ConfigError, ExtractionError, FetchError, NotifyError, RenderError, TopologyError};
pub use extract::{value_to_text, Extraction};
pub use fetch::{Auth, FileSource, RestSource, SharedSource, Source};
pub use node::{BoxedNode, Node, NotifyHandle, TransitionController, TransitionSettings};
pub use provider::{DataProvider, ProviderManager, ProviderSpec, ProviderWatch, SharedProvider, Stamp};
pub use surface::{BlockFont, Color, FontRenderer, SharedFont, Size, Surface};
pub use tree::{BuildContext, NotifyRegistry, TreeManager, WidgetSpec};
pub use worker::{Cadence, Worker};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_str, load_providers, DashboardConfig, GraphicsConfig,
    LogLevel, LoggingConfig,
};
