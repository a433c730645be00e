//! Provider-backed leaves
//!
//! Both nodes read a shared [`DataProvider`](crate::provider::DataProvider)
//! through a [`ProviderWatch`] and never fetch the value themselves:
//!
//! ```text
//!   is_dirty()  local dirty || watch.has_update()
//!   render()    watch.observe() ──► extract ──► format / load ──► draw
//! ```
//!
//! Extraction failures and provider errors become fallback content, not
//! render errors.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::image::{fit_for, load_image_file};
use super::{format_value, ImageContent, ImageLoader, Node, TextNode, TextStyle, VAlign};
use crate::error::{BuildError, RenderError};
use crate::extract::{value_to_text, Extraction};
use crate::fetch::Auth;
use crate::provider::{CacheSnapshot, ProviderWatch, SharedProvider};
use crate::surface::{Color, SharedFont, Size, Surface};

const PROVIDER_TEXT_PADDING: u32 = 6;

fn default_format() -> String {
    "{value}".to_string()
}

fn default_fallback() -> String {
    "--".to_string()
}

fn center() -> VAlign {
    VAlign::Center
}

fn white() -> Color {
    Color::WHITE
}

// ============================================================================
// ProviderTextNode
// ============================================================================

/// Parameters of a [`ProviderTextNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTextParams {
    /// Path/query applied to the provider value
    #[serde(flatten)]
    pub extraction: Extraction,
    /// Template for the displayed text
    #[serde(default = "default_format")]
    pub format_string: String,
    /// Shown while there is no usable value
    #[serde(default = "default_fallback")]
    pub fallback_text: String,
    /// Show `Error: <message>` instead of the fallback when the provider failed
    #[serde(default)]
    pub show_errors: bool,
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

/// What a text consumer shows without a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFallback {
    /// Placeholder text
    pub text: String,
    /// Whether provider errors are spelled out
    pub show_errors: bool,
}

impl Default for TextFallback {
    fn default() -> Self {
        Self {
            text: default_fallback(),
            show_errors: false,
        }
    }
}

impl TextFallback {
    fn for_error(&self, error: &str) -> String {
        if self.show_errors {
            format!("Error: {error}")
        } else {
            self.text.clone()
        }
    }
}

/// Formatted provider value
#[derive(Debug)]
pub struct ProviderTextNode {
    name: String,
    watch: ProviderWatch,
    extraction: Extraction,
    template: String,
    fallback: TextFallback,
    text: TextNode,
}

impl ProviderTextNode {
    /// Text node reading `provider`
    pub fn new(
        name: impl Into<String>,
        provider: SharedProvider,
        extraction: Extraction,
        template: impl Into<String>,
        fallback: TextFallback,
        style: TextStyle,
        font: SharedFont,
    ) -> Result<Self, BuildError> {
        let name = name.into();
        extraction.validate().map_err(|e| BuildError::invalid(&name, e))?;
        Ok(Self {
            text: TextNode::new(name.clone(), fallback.text.clone(), style, font),
            name,
            watch: ProviderWatch::new(provider),
            extraction,
            template: template.into(),
            fallback,
        })
    }

    /// Build from deserialized parameters
    pub fn from_params(
        name: impl Into<String>,
        provider: SharedProvider,
        params: &ProviderTextParams,
        font: SharedFont,
    ) -> Result<Self, BuildError> {
        let style = TextStyle {
            color: params.color,
            vertical_align: params.vertical_align,
            text_size: params.text_size,
            ..TextStyle::centered(PROVIDER_TEXT_PADDING)
        };
        let fallback = TextFallback {
            text: params.fallback_text.clone(),
            show_errors: params.show_errors,
        };
        Self::new(
            name,
            provider,
            params.extraction.clone(),
            params.format_string.clone(),
            fallback,
            style,
            font,
        )
    }

    /// Currently displayed text
    pub fn text(&self) -> &str {
        self.text.text()
    }

    fn refresh(&mut self) {
        let CacheSnapshot { value, error, .. } = self.watch.observe();
        let shown = match (error, value) {
            (Some(error), _) => self.fallback.for_error(&error),
            (None, None) => self.fallback.text.clone(),
            (None, Some(value)) => match self.extraction.apply(value) {
                Ok(extracted) => format_value(&self.template, &extracted),
                Err(e) => {
                    debug!(node = %self.name, provider = %self.watch.provider().name(), error = %e, "Extraction failed, showing fallback");
                    self.fallback.text.clone()
                }
            },
        };
        self.text.set_text(shown);
    }
}

impl Node for ProviderTextNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dirty(&self) -> bool {
        self.text.is_dirty() || self.watch.has_update()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        if self.watch.has_update() {
            self.refresh();
        }
        self.text.render(size)
    }
}

// ============================================================================
// ProviderImageNode
// ============================================================================

/// Parameters of a [`ProviderImageNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderImageParams {
    /// Path/query selecting the image URL
    #[serde(flatten)]
    pub extraction: Extraction,
    /// Local image shown while no URL is available or a load failed
    #[serde(default)]
    pub fallback_image: Option<PathBuf>,
    /// Authorization for the image request
    #[serde(default)]
    pub auth: Option<Auth>,
    /// Letterbox instead of stretching
    #[serde(default)]
    pub preserve_aspect_ratio: bool,
}

/// Image whose URL comes from a provider
///
/// A new URL starts a background load; the previous picture stays up until
/// the new one is decoded. An unchanged URL is not fetched again.
#[derive(Debug)]
pub struct ProviderImageNode {
    name: String,
    watch: ProviderWatch,
    extraction: Extraction,
    loader: ImageLoader,
    content: ImageContent,
    fallback: Option<Surface>,
    url: Option<String>,
}

impl ProviderImageNode {
    /// Image node reading URLs from `provider`
    pub fn from_params(
        name: impl Into<String>,
        provider: SharedProvider,
        params: &ProviderImageParams,
    ) -> Result<Self, BuildError> {
        let name = name.into();
        params.extraction.validate().map_err(|e| BuildError::invalid(&name, e))?;
        let fallback = params
            .fallback_image
            .as_deref()
            .map(|path| load_image_file(&name, path))
            .transpose()?;
        let fit = fit_for(params.preserve_aspect_ratio);
        let content = match &fallback {
            Some(image) => ImageContent::with_image(image.clone(), fit),
            None => ImageContent::new(fit),
        };
        Ok(Self {
            loader: ImageLoader::new(name.clone(), params.auth.clone()),
            name,
            watch: ProviderWatch::new(provider),
            extraction: params.extraction.clone(),
            content,
            fallback,
            url: None,
        })
    }

    /// URL of the image shown or loading
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Whether a picture (loaded or fallback) is showing
    pub fn has_image(&self) -> bool {
        self.content.has_image()
    }

    fn show_fallback(&mut self) {
        match &self.fallback {
            Some(image) => self.content.set(image.clone()),
            None => self.content.clear(),
        }
    }

    fn resolve_url(&self, value: Value) -> Option<String> {
        match self.extraction.apply(value) {
            Ok(extracted) => {
                let url = value_to_text(&extracted).trim().to_string();
                (!url.is_empty()).then_some(url)
            }
            Err(e) => {
                debug!(node = %self.name, provider = %self.watch.provider().name(), error = %e, "No image URL in provider data");
                None
            }
        }
    }

    fn sync(&mut self) {
        if self.watch.has_update() {
            let CacheSnapshot { value, error, .. } = self.watch.observe();
            let url = match (error, value) {
                (None, Some(value)) => self.resolve_url(value),
                (error, _) => {
                    debug!(node = %self.name, error = ?error, "Provider has no data");
                    None
                }
            };
            match url {
                Some(url) if self.url.as_deref() == Some(url.as_str()) => {}
                Some(url) => {
                    debug!(node = %self.name, url = %url, "Loading image");
                    self.loader.request(&url);
                    self.url = Some(url);
                }
                None => {
                    if self.url.take().is_some() || !self.content.has_image() {
                        self.show_fallback();
                    }
                }
            }
        }

        match self.loader.take_ready() {
            Some(Ok(image)) => self.content.set(image),
            Some(Err(_)) => {
                self.url = None;
                self.show_fallback();
            }
            None => {}
        }
    }
}

impl Node for ProviderImageNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) {
        self.sync();
    }

    fn is_dirty(&self) -> bool {
        self.content.is_dirty() || self.watch.has_update() || self.loader.is_ready()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        self.sync();
        Ok(self.content.render(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::image::tests::write_png;
    use crate::provider::testing::ScriptedSource;
    use crate::provider::DataProvider;
    use crate::surface::BlockFont;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn provider(script: Vec<Result<Value, String>>) -> (Arc<ScriptedSource>, SharedProvider) {
        let source = Arc::new(ScriptedSource::new(script));
        let provider = Arc::new(DataProvider::new(
            "p",
            Arc::clone(&source) as crate::fetch::SharedSource,
            Duration::from_secs(60),
            Duration::ZERO,
        ));
        (source, provider)
    }

    fn text_node(provider: SharedProvider, fallback: TextFallback) -> ProviderTextNode {
        ProviderTextNode::new(
            "temp",
            provider,
            Extraction::path("current.temp"),
            "{value}°",
            fallback,
            TextStyle::centered(PROVIDER_TEXT_PADDING),
            Arc::new(BlockFont::default()),
        )
        .unwrap()
    }

    const SIZE: Size = Size::new(60, 20);

    #[test]
    fn test_text_shows_fallback_until_data() {
        let (_, p) = provider(vec![Ok(json!({"current": {"temp": 21}}))]);
        let mut node = text_node(Arc::clone(&p), TextFallback::default());

        node.render(SIZE).unwrap();
        assert_eq!(node.text(), "--");
        assert!(!node.is_dirty());

        p.fetch_once();
        assert!(node.is_dirty());
        node.render(SIZE).unwrap();
        assert_eq!(node.text(), "21°");
        assert!(!node.is_dirty());
    }

    #[test]
    fn test_text_errors_and_extraction_failures() {
        let (source, p) = provider(vec![Err("boom".into())]);
        let mut node = text_node(
            Arc::clone(&p),
            TextFallback {
                text: "n/a".into(),
                show_errors: true,
            },
        );

        p.fetch_once();
        node.render(SIZE).unwrap();
        assert_eq!(node.text(), "Error: transport error: boom");

        source.push(Ok(json!({"current": {}})));
        p.fetch_once();
        node.render(SIZE).unwrap();
        assert_eq!(node.text(), "n/a");
    }

    #[test]
    fn test_text_hides_errors_by_default() {
        let (_, p) = provider(vec![Err("boom".into())]);
        let mut node = text_node(Arc::clone(&p), TextFallback::default());
        p.fetch_once();
        node.render(SIZE).unwrap();
        assert_eq!(node.text(), "--");
    }

    #[test]
    fn test_bad_path_is_build_error() {
        let (_, p) = provider(vec![]);
        let result = ProviderTextNode::new(
            "bad",
            p,
            Extraction::path("a[x"),
            "{value}",
            TextFallback::default(),
            TextStyle::default(),
            Arc::new(BlockFont::default()),
        );
        assert!(matches!(result, Err(BuildError::InvalidParams { .. })));
    }

    fn image_params(fallback: Option<PathBuf>) -> ProviderImageParams {
        ProviderImageParams {
            extraction: Extraction::path("picture"),
            fallback_image: fallback,
            auth: None,
            preserve_aspect_ratio: false,
        }
    }

    fn render_until(node: &mut ProviderImageNode, color: Color) -> Arc<Surface> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            node.tick();
            let surface = node.render(Size::new(4, 4)).unwrap();
            if surface.pixel(1, 1) == Some(color) {
                return surface;
            }
            assert!(Instant::now() < deadline, "image never appeared");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_image_loads_url_once() {
        let dir = tempfile::tempdir().unwrap();
        let red = write_png(dir.path(), "red.png", Size::new(2, 2), Color::rgb(255, 0, 0));
        let (_, p) = provider(vec![Ok(json!({"picture": red.display().to_string()}))]);
        let mut node = ProviderImageNode::from_params("img", Arc::clone(&p), &image_params(None)).unwrap();

        p.fetch_once();
        render_until(&mut node, Color::rgb(255, 0, 0));
        assert_eq!(node.url(), Some(red.display().to_string().as_str()));

        p.fetch_once();
        node.tick();
        assert!(!node.loader.is_pending());
    }

    #[test]
    fn test_image_falls_back_on_error_and_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let gray = write_png(dir.path(), "gray.png", Size::new(2, 2), Color::rgb(80, 80, 80));
        let (source, p) = provider(vec![Ok(json!({"picture": "/no/such/file.png"}))]);
        let mut node = ProviderImageNode::from_params("img", Arc::clone(&p), &image_params(Some(gray))).unwrap();
        assert!(node.has_image());

        p.fetch_once();
        render_until(&mut node, Color::rgb(80, 80, 80));
        let deadline = Instant::now() + Duration::from_secs(5);
        while node.url().is_some() {
            assert!(Instant::now() < deadline, "failed load never reported");
            node.tick();
            std::thread::sleep(Duration::from_millis(5));
        }

        source.push(Err("down".into()));
        p.fetch_once();
        node.tick();
        assert_eq!(node.url(), None);
        assert_eq!(node.render(Size::new(4, 4)).unwrap().pixel(0, 0), Some(Color::rgb(80, 80, 80)));
    }
}
