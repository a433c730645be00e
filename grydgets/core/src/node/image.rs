//! Image display
//!
//! - [`ImageContent`]: a decoded image plus its fit mode, scaled and
//!   memoized per size. Shared by every node that shows a picture.
//! - [`ImageLoader`]: one-shot background fetch + decode. Each request gets
//!   a generation number and only the newest request may publish its
//!   result, so a slow stale download can never overwrite a fresh one.
//! - [`ImageNode`]: leaf showing a local file.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Node, RenderMemo};
use crate::error::{BuildError, RenderError};
use crate::fetch::{fetch_bytes, Auth, DEFAULT_TIMEOUT};
use crate::surface::{decode_image, scale_to_fit, FitMode, Size, Surface};

/// Read and decode an image at build time
pub(crate) fn load_image_file(owner: &str, path: &Path) -> Result<Surface, BuildError> {
    let bytes = std::fs::read(path)
        .map_err(|e| BuildError::invalid(owner, format!("cannot read image {}: {e}", path.display())))?;
    decode_image(&bytes).map_err(|e| BuildError::invalid(owner, format!("{}: {e}", path.display())))
}

/// Fit mode for the `preserve_aspect_ratio` flag
pub(crate) fn fit_for(preserve_aspect_ratio: bool) -> FitMode {
    if preserve_aspect_ratio {
        FitMode::Contain
    } else {
        FitMode::Stretch
    }
}

// ============================================================================
// ImageContent
// ============================================================================

/// A picture that can be swapped at runtime
#[derive(Debug)]
pub struct ImageContent {
    source: Option<Surface>,
    fit: FitMode,
    dirty: bool,
    memo: RenderMemo,
}

impl ImageContent {
    /// Empty content, rendered as transparent
    pub fn new(fit: FitMode) -> Self {
        Self {
            source: None,
            fit,
            dirty: true,
            memo: RenderMemo::default(),
        }
    }

    /// Content showing `image`
    pub fn with_image(image: Surface, fit: FitMode) -> Self {
        Self {
            source: Some(image),
            ..Self::new(fit)
        }
    }

    /// Replace the picture
    pub fn set(&mut self, image: Surface) {
        self.source = Some(image);
        self.dirty = true;
    }

    /// Drop the picture
    pub fn clear(&mut self) {
        if self.source.take().is_some() {
            self.dirty = true;
        }
    }

    /// Whether a picture is loaded
    pub fn has_image(&self) -> bool {
        self.source.is_some()
    }

    /// Whether the next render differs from the last
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Scaled picture of exactly `size`
    pub fn render(&mut self, size: Size) -> Arc<Surface> {
        if !self.dirty {
            if let Some(cached) = self.memo.get(size) {
                return cached;
            }
        }
        let surface = match &self.source {
            Some(image) => scale_to_fit(image, size, self.fit),
            None => Surface::new(size),
        };
        self.dirty = false;
        self.memo.store(surface)
    }
}

// ============================================================================
// ImageLoader
// ============================================================================

#[derive(Debug, Default)]
struct LoadSlot {
    generation: u64,
    pending: bool,
    result: Option<Result<Surface, String>>,
}

/// Fetches and decodes images off the render thread
///
/// Each request runs on its own detached thread that is never joined. The
/// thread ends when its fetch returns, so an HTTP load lives at most as long
/// as the loader timeout. A result that arrives after its owner stopped or
/// issued a newer request is dropped.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    owner: String,
    auth: Option<Auth>,
    timeout: Duration,
    slot: Arc<Mutex<LoadSlot>>,
}

impl ImageLoader {
    /// Loader for the node called `owner`
    pub fn new(owner: impl Into<String>, auth: Option<Auth>) -> Self {
        Self {
            owner: owner.into(),
            auth,
            timeout: DEFAULT_TIMEOUT,
            slot: Arc::new(Mutex::new(LoadSlot::default())),
        }
    }

    /// Bound every HTTP load to `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start loading `url`, superseding any load still in flight
    pub fn request(&self, url: &str) {
        let generation = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            slot.pending = true;
            slot.result = None;
            slot.generation
        };

        let slot = Arc::clone(&self.slot);
        let owner = self.owner.clone();
        let auth = self.auth.clone();
        let timeout = self.timeout;
        let target = url.to_string();
        let spawned = std::thread::Builder::new()
            .name(format!("grydgets:{}:image", self.owner))
            .spawn(move || {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| load(&target, auth.as_ref(), timeout)))
                    .unwrap_or_else(|_| Err("image loader panicked".to_string()));
                match &result {
                    Ok(image) => debug!(node = %owner, url = %target, size = %image.size(), "Loaded image"),
                    Err(error) => warn!(node = %owner, url = %target, error = %error, "Failed to load image"),
                }
                let mut slot = slot.lock();
                if slot.generation == generation {
                    slot.pending = false;
                    slot.result = Some(result);
                }
            });

        if let Err(e) = spawned {
            warn!(node = %self.owner, url = %url, error = %e, "Could not spawn image loader");
            let mut slot = self.slot.lock();
            slot.pending = false;
            slot.result = Some(Err(e.to_string()));
        }
    }

    /// Whether a requested load has not finished yet
    pub fn is_pending(&self) -> bool {
        self.slot.lock().pending
    }

    /// Whether a finished result is waiting to be taken
    pub fn is_ready(&self) -> bool {
        self.slot.lock().result.is_some()
    }

    /// Take the result of the newest request, if it has finished
    pub fn take_ready(&self) -> Option<Result<Surface, String>> {
        self.slot.lock().result.take()
    }
}

fn load(url: &str, auth: Option<&Auth>, timeout: Duration) -> Result<Surface, String> {
    let bytes = fetch_bytes(url, auth, timeout).map_err(|e| e.to_string())?;
    decode_image(&bytes).map_err(|e| e.to_string())
}

// ============================================================================
// ImageNode
// ============================================================================

/// Parameters of an [`ImageNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct ImageParams {
    /// Local image file
    #[serde(alias = "path")]
    pub image_path: PathBuf,
    /// Letterbox instead of stretching
    #[serde(default)]
    pub preserve_aspect_ratio: bool,
}

/// Leaf showing a local image file
#[derive(Debug)]
pub struct ImageNode {
    name: String,
    content: ImageContent,
}

impl ImageNode {
    /// Node showing an already decoded image
    pub fn new(name: impl Into<String>, image: Surface, fit: FitMode) -> Self {
        Self {
            name: name.into(),
            content: ImageContent::with_image(image, fit),
        }
    }

    /// Load the file named in `params`
    pub fn from_params(name: impl Into<String>, params: &ImageParams) -> Result<Self, BuildError> {
        let name = name.into();
        let image = load_image_file(&name, &params.image_path)?;
        Ok(Self::new(name, image, fit_for(params.preserve_aspect_ratio)))
    }
}

impl Node for ImageNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dirty(&self) -> bool {
        self.content.is_dirty()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        Ok(self.content.render(size))
    }
}
