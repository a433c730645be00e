//! Refreshing Nodes
//!
//! A node whose content comes from its own periodic work (not a shared
//! provider) owns a [`Refresher`]:
//!
//! ```text
//!   build ──► update() on the calling thread  (first frame has data)
//!         └─► Worker: wait(interval + jitter) ──► update() ──► wait ...
//! ```
//!
//! `update` writes node-local state behind a mutex; `tick`/`render` copy it
//! out briefly. A failing update is logged and the loop carries on.
//!
//! [`RestNode`] refreshes text, [`RestImageNode`] refreshes a picture.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::image::fit_for;
use super::{format_value, ImageContent, Node, TextNode, TextStyle, VAlign};
use crate::error::{BuildError, FetchError, RenderError};
use crate::extract::{value_to_text, Extraction};
use crate::fetch::{fetch_bytes, Auth, FileSource, FileSpec, RestSource, RestSpec, SharedSource, DEFAULT_TIMEOUT};
use crate::surface::{decode_image, Color, SharedFont, Size, Surface};
use crate::worker::{Cadence, Worker};

/// How long `stop` waits for an update in progress
pub const REFRESH_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Background refresh loop tied to one node
#[derive(Debug)]
pub struct Refresher {
    name: String,
    worker: Option<Worker>,
}

impl Refresher {
    /// Run `update` once now, then every `interval` (plus jitter) on a
    /// background thread
    pub fn start<F>(name: impl Into<String>, interval: Duration, mut update: F) -> Result<Self, BuildError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        run_update(&name, &mut update);

        let loop_name = name.clone();
        let worker = Worker::spawn(format!("refresh:{name}"), Cadence::refreshing(interval), move || {
            run_update(&loop_name, &mut update);
        })?;
        Ok(Self {
            name,
            worker: Some(worker),
        })
    }

    /// Whether the loop has not been stopped
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    /// Stop the loop, waiting up to [`REFRESH_STOP_TIMEOUT`]
    pub fn stop(&mut self) -> bool {
        match self.worker.take() {
            Some(mut worker) => {
                debug!(node = %self.name, "Stopping refresh loop");
                worker.stop(REFRESH_STOP_TIMEOUT)
            }
            None => true,
        }
    }
}

fn run_update<F>(name: &str, update: &mut F)
where
    F: FnMut() -> anyhow::Result<()>,
{
    match update() {
        Ok(()) => debug!(node = %name, "Updated"),
        Err(e) => warn!(node = %name, error = %format!("{e:#}"), "Update failed"),
    }
}

// ============================================================================
// RestNode
// ============================================================================

const DEFAULT_REST_FREQUENCY: f64 = 30.0;
const REST_PADDING: u32 = 6;

fn default_rest_frequency() -> f64 {
    DEFAULT_REST_FREQUENCY
}

fn center() -> VAlign {
    VAlign::Center
}

fn white() -> Color {
    Color::WHITE
}

/// Parameters of a [`RestNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct RestParams {
    /// The request and its extraction rule
    #[serde(flatten)]
    pub request: RestSpec,
    /// Template for the displayed text; `{}` and `{value}` both work
    #[serde(default)]
    pub format_string: Option<String>,
    /// Seconds between refreshes
    #[serde(default = "default_rest_frequency")]
    pub update_frequency: f64,
    /// Maximum pixel size of the text
    #[serde(default)]
    pub text_size: Option<u32>,
    /// Vertical alignment of the text
    #[serde(default = "center")]
    pub vertical_align: VAlign,
    /// Text color
    #[serde(default = "white")]
    pub color: Color,
}

/// Text shown when a fetch fails, by failure kind
fn failure_text(error: &FetchError) -> String {
    match error {
        FetchError::Http { status, .. } => format!("Error {status}"),
        FetchError::InvalidRequest(_) | FetchError::Transport(_) | FetchError::Io(_) => "Unavailable".to_string(),
        FetchError::Decode(_) | FetchError::Extraction(_) => "--".to_string(),
    }
}

/// Parse a frequency in seconds
pub(crate) fn frequency(owner: &str, seconds: f64) -> Result<Duration, BuildError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(BuildError::invalid(owner, format!("update_frequency must be positive, got {seconds}")));
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Text fetched on a timer and run through a template
#[derive(Debug)]
pub struct RestNode {
    name: String,
    latest: Arc<Mutex<String>>,
    text: TextNode,
    refresher: Refresher,
}

impl RestNode {
    /// Build the node and start refreshing from `source`
    pub fn new(
        name: impl Into<String>,
        source: SharedSource,
        format_string: Option<String>,
        update_frequency: Duration,
        style: TextStyle,
        font: SharedFont,
    ) -> Result<Self, BuildError> {
        let name = name.into();
        let template = format_string.unwrap_or_else(|| "{}".to_string());
        let latest = Arc::new(Mutex::new(String::new()));

        let slot = Arc::clone(&latest);
        let owner = name.clone();
        let refresher = Refresher::start(name.clone(), update_frequency, move || {
            let shown = match source.fetch() {
                Ok(value) => value_to_text(&value),
                Err(e) => {
                    warn!(node = %owner, url = %source.describe(), error = %e, "Fetch failed");
                    failure_text(&e)
                }
            };
            *slot.lock() = format_value(&template, &serde_json::Value::String(shown));
            Ok(())
        })?;

        let initial = latest.lock().clone();
        Ok(Self {
            text: TextNode::new(name.clone(), initial, style, font),
            name,
            latest,
            refresher,
        })
    }

    /// Text style used by the registry
    pub fn style(params: &RestParams) -> TextStyle {
        TextStyle {
            color: params.color,
            vertical_align: params.vertical_align,
            text_size: params.text_size,
            ..TextStyle::centered(REST_PADDING)
        }
    }

    /// Currently displayed text
    pub fn text(&self) -> &str {
        self.text.text()
    }

    fn sync(&mut self) {
        let latest = self.latest.lock().clone();
        self.text.set_text(latest);
    }
}

impl Node for RestNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) {
        self.sync();
    }

    fn is_dirty(&self) -> bool {
        self.text.is_dirty()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        self.sync();
        self.text.render(size)
    }

    fn stop(&mut self) {
        if !self.refresher.stop() {
            warn!(node = %self.name, "Refresh loop still busy after stop timeout");
        }
    }
}

// ============================================================================
// RestImageNode
// ============================================================================

const DEFAULT_IMAGE_FREQUENCY: f64 = 30.0;

fn default_image_frequency() -> f64 {
    DEFAULT_IMAGE_FREQUENCY
}

/// Parameters of a [`RestImageNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct RestImageParams {
    /// Image URL, or a JSON document naming it when an extraction is set
    pub url: String,
    /// Path/query resolving the image URL inside the JSON response
    #[serde(flatten)]
    pub extraction: Extraction,
    /// Authorization for the main URL only
    #[serde(default)]
    pub auth: Option<Auth>,
    /// Letterbox instead of stretching
    #[serde(default)]
    pub preserve_aspect_ratio: bool,
    /// Seconds between refreshes
    #[serde(default = "default_image_frequency")]
    pub update_frequency: f64,
}

/// Where each refresh gets its picture
#[derive(Debug)]
enum ImageTarget {
    /// The URL serves the image bytes
    Direct { url: String, auth: Option<Auth> },
    /// The source yields the URL of the image
    Indirect(SharedSource),
}

impl ImageTarget {
    fn from_params(owner: &str, params: &RestImageParams) -> Result<Self, BuildError> {
        if params.extraction.is_identity() {
            return Ok(Self::Direct {
                url: params.url.clone(),
                auth: params.auth.clone(),
            });
        }

        let source: SharedSource = if params.url.starts_with("http://") || params.url.starts_with("https://") {
            let spec = RestSpec {
                auth: params.auth.clone(),
                extraction: params.extraction.clone(),
                ..RestSpec::get(params.url.clone())
            };
            Arc::new(RestSource::new(spec).map_err(|e| BuildError::invalid(owner, e))?)
        } else {
            let path = params.url.strip_prefix("file://").unwrap_or(&params.url);
            let spec = FileSpec {
                path: PathBuf::from(path),
                extraction: params.extraction.clone(),
                raw: false,
            };
            Arc::new(FileSource::new(spec).map_err(|e| BuildError::invalid(owner, e))?)
        };
        Ok(Self::Indirect(source))
    }

    fn load(&self) -> anyhow::Result<Surface> {
        let bytes = match self {
            Self::Direct { url, auth } => {
                fetch_bytes(url, auth.as_ref(), DEFAULT_TIMEOUT).with_context(|| format!("fetching {url}"))?
            }
            Self::Indirect(source) => {
                let value = source
                    .fetch()
                    .with_context(|| format!("fetching {}", source.describe()))?;
                let text = value_to_text(&value);
                let url = text.trim();
                anyhow::ensure!(!url.is_empty(), "{} named no image URL", source.describe());
                debug!(url = %url, "Resolved image URL");
                fetch_bytes(url, None, DEFAULT_TIMEOUT).with_context(|| format!("fetching {url}"))?
            }
        };
        decode_image(&bytes).context("decoding image")
    }
}

/// Picture fetched on a timer, directly or through a JSON document
///
/// A failed refresh keeps the previous picture.
#[derive(Debug)]
pub struct RestImageNode {
    name: String,
    latest: Arc<Mutex<Option<Surface>>>,
    content: ImageContent,
    refresher: Refresher,
}

impl RestImageNode {
    /// Build the node and load the first picture before returning
    pub fn new(name: impl Into<String>, params: &RestImageParams) -> Result<Self, BuildError> {
        let name = name.into();
        let interval = frequency(&name, params.update_frequency)?;
        let target = ImageTarget::from_params(&name, params)?;
        let latest = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&latest);
        let refresher = Refresher::start(name.clone(), interval, move || {
            let image = target.load()?;
            *slot.lock() = Some(image);
            Ok(())
        })?;

        let mut node = Self {
            name,
            latest,
            content: ImageContent::new(fit_for(params.preserve_aspect_ratio)),
            refresher,
        };
        node.sync();
        Ok(node)
    }

    /// Whether any picture has loaded yet
    pub fn has_image(&self) -> bool {
        self.content.has_image() || self.latest.lock().is_some()
    }

    fn sync(&mut self) {
        if let Some(image) = self.latest.lock().take() {
            self.content.set(image);
        }
    }
}

impl Node for RestImageNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) {
        self.sync();
    }

    fn is_dirty(&self) -> bool {
        self.content.is_dirty() || self.latest.lock().is_some()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        self.sync();
        Ok(self.content.render(size))
    }

    fn stop(&mut self) {
        if !self.refresher.stop() {
            warn!(node = %self.name, "Refresh loop still busy after stop timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::image::tests::write_png;
    use crate::provider::testing::ScriptedSource;
    use crate::surface::BlockFont;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Debug)]
    struct FailingSource(fn() -> FetchError);

    impl crate::fetch::Source for FailingSource {
        fn fetch(&self) -> Result<serde_json::Value, FetchError> {
            Err((self.0)())
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    fn rest(source: SharedSource, format: Option<&str>) -> RestNode {
        RestNode::new(
            "rest",
            source,
            format.map(str::to_string),
            Duration::from_secs(3600),
            TextStyle::centered(REST_PADDING),
            Arc::new(BlockFont::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_first_update_is_synchronous() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(json!(21.5))]));
        let mut node = rest(source.clone(), Some("{}°"));

        assert_eq!(node.text(), "21.5°");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        node.stop();
    }

    #[test]
    fn test_failure_texts() {
        let cases: [(fn() -> FetchError, &str); 4] = [
            (|| FetchError::Http { status: 503, body: String::new() }, "Error 503"),
            (|| FetchError::Transport("refused".into()), "Unavailable"),
            (|| FetchError::Decode("eof".into()), "--"),
            (|| FetchError::Extraction(crate::error::ExtractionError::NoResult), "--"),
        ];
        for (make, expected) in cases {
            let mut node = rest(Arc::new(FailingSource(make)), None);
            assert_eq!(node.text(), expected);
            node.stop();
        }
    }

    #[test]
    fn test_value_placeholder_and_strings_unquoted() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(json!("sunny"))]));
        let mut node = rest(source, Some("Sky: {value}"));
        assert_eq!(node.text(), "Sky: sunny");
        node.stop();
    }

    #[test]
    fn test_refresher_survives_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut refresher = Refresher::start("flaky", Duration::from_millis(10), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                anyhow::bail!("failure {n}");
            }
            Ok(())
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) < 4 {
            assert!(Instant::now() < deadline, "refresh loop stalled");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(refresher.is_running());
        assert!(refresher.stop());
        assert!(!refresher.is_running());
    }

    #[test]
    fn test_stop_tree_stops_refresher() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(json!(1))]));
        let mut node = rest(source, None);
        crate::node::stop_tree(&mut node);
        assert!(!node.refresher.is_running());
    }

    fn rest_image(params: serde_json::Value) -> RestImageNode {
        let params: RestImageParams = serde_json::from_value(params).unwrap();
        RestImageNode::new("restimg", &params).unwrap()
    }

    #[test]
    fn test_rest_image_url_from_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "cam.png", Size::new(2, 2), Color::rgb(200, 10, 10));
        let feed = dir.path().join("feed.json");
        let doc = json!({"images": [{"src": format!("file://{}", png.display())}]});
        std::fs::write(&feed, doc.to_string()).unwrap();

        let mut node = rest_image(json!({
            "url": format!("file://{}", feed.display()),
            "json_path": "images[0].src",
            "update_frequency": 3600,
        }));

        assert!(node.has_image());
        assert!(node.is_dirty());
        let s = node.render(Size::new(4, 4)).unwrap();
        assert_eq!(s.pixel(1, 1), Some(Color::rgb(200, 10, 10)));
        assert!(!node.is_dirty());
        node.stop();
        assert!(!node.refresher.is_running());
    }

    #[test]
    fn test_rest_image_direct_url_with_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "wide.png", Size::new(4, 2), Color::rgb(0, 90, 0));

        let mut node = rest_image(json!({
            "url": format!("file://{}", png.display()),
            "preserve_aspect_ratio": true,
            "update_frequency": 3600,
        }));

        let s = node.render(Size::new(4, 4)).unwrap();
        assert_eq!(s.pixel(2, 2), Some(Color::rgb(0, 90, 0)));
        assert_eq!(s.pixel(2, 0).map(|p| p.a), Some(0));
        node.stop();
    }

    #[test]
    fn test_rest_image_failed_refresh_keeps_picture() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "p.png", Size::new(2, 2), Color::rgb(7, 7, 7));
        let mut node = rest_image(json!({
            "url": png.display().to_string(),
            "update_frequency": 0.01,
        }));
        node.render(Size::new(2, 2)).unwrap();

        std::fs::write(&png, b"not an image").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        node.tick();

        assert!(node.has_image());
        let s = node.render(Size::new(2, 2)).unwrap();
        assert_eq!(s.pixel(0, 0), Some(Color::rgb(7, 7, 7)));
        node.stop();
    }

    #[test]
    fn test_rest_image_unreachable_starts_empty() {
        let mut node = rest_image(json!({
            "url": "http://127.0.0.1:1/feed",
            "jq_expression": ".url",
            "auth": {"bearer": "secret"},
            "update_frequency": 3600,
        }));

        assert!(!node.has_image());
        let s = node.render(Size::new(2, 2)).unwrap();
        assert!(s.pixels().iter().all(|p| p.a == 0));
        node.stop();
    }

    #[test]
    fn test_rest_image_rejects_bad_params() {
        let params: RestImageParams =
            serde_json::from_value(json!({"url": "file:///x.json", "update_frequency": 0})).unwrap();
        assert!(RestImageNode::new("restimg", &params).is_err());

        let params: RestImageParams =
            serde_json::from_value(json!({"url": "file:///x.json", "json_path": "a[b]"})).unwrap();
        assert!(RestImageNode::new("restimg", &params).is_err());
    }

    #[test]
    fn test_frequency_validation() {
        assert!(frequency("x", 0.0).is_err());
        assert_eq!(frequency("x", 2.5).unwrap(), Duration::from_millis(2500));
    }
}
