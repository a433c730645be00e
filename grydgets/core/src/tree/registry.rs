//! Widget table
//!
//! The closed set of widget tags and the constructor for each. A
//! constructor gets the node's unique name, its [`WidgetSpec`] and the
//! shared [`BuildContext`], and returns a childless node; the tree builder
//! adds children and calls `finish` afterwards.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::WidgetSpec;
use crate::clock::{SharedClock, SystemClock};
use crate::error::BuildError;
use crate::fetch::{RestSource, RestSpec, SharedSource};
use crate::node::{
    frequency, BoxedNode, DateClockNode, DateClockParams, FlipNode, FlipParams, GridNode, GridParams, HttpFlipNode,
    HttpFlipParams, ImageNode, ImageOverlay, ImageParams, LabelNode, LabelParams, NotifiableNode,
    NotifiableTextParams, PillNode, PillParams, ProviderFlipNode, ProviderFlipParams, ProviderImageNode,
    ProviderImageParams, ProviderTextNode, ProviderTextParams, RestImageNode, RestImageParams, RestNode, RestParams,
    ScheduleFlipNode, ScheduleFlipParams, ScreenNode, ScreenParams, TextNode, TextOverlay, TextParams, ValueMap,
};
use crate::provider::{ProviderManager, SharedProvider};
use crate::surface::{BlockFont, SharedFont};

/// Builds one node from its spec
pub type Constructor = fn(&WidgetContext<'_>) -> Result<BoxedNode, BuildError>;

/// Every widget tag and its constructor
pub const WIDGETS: &[(&str, Constructor)] = &[
    ("screen", build_screen),
    ("grid", build_grid),
    ("label", build_label),
    ("pill", build_pill),
    ("text", build_text),
    ("image", build_image),
    ("dateclock", build_dateclock),
    ("rest", build_rest),
    ("restimage", build_restimage),
    ("flip", build_flip),
    ("scheduleflip", build_scheduleflip),
    ("httpflip", build_httpflip),
    ("providerflip", build_providerflip),
    ("provider", build_provider_text),
    ("providerimage", build_provider_image),
    ("notifiabletext", build_notifiable_text),
    ("notifiableimage", build_notifiable_image),
];

/// Constructor registered for `kind`
pub fn constructor(kind: &str) -> Option<Constructor> {
    WIDGETS.iter().find(|(tag, _)| *tag == kind).map(|(_, build)| *build)
}

/// Every known widget tag
pub fn widget_types() -> Vec<&'static str> {
    WIDGETS.iter().map(|(tag, _)| *tag).collect()
}

/// Shared resources handed to every constructor
#[derive(Clone)]
pub struct BuildContext<'a> {
    /// Time source for every time-driven node
    pub clock: SharedClock,
    /// Text renderer
    pub font: SharedFont,
    /// Providers that widgets may reference
    pub providers: &'a ProviderManager,
}

impl fmt::Debug for BuildContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("clock", &self.clock)
            .field("font", &self.font)
            .field("providers", &self.providers.names())
            .finish()
    }
}

impl<'a> BuildContext<'a> {
    /// System clock and the built-in block font
    pub fn new(providers: &'a ProviderManager) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            font: Arc::new(BlockFont::default()),
            providers,
        }
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the font
    #[must_use]
    pub fn with_font(mut self, font: SharedFont) -> Self {
        self.font = font;
        self
    }
}

/// What a constructor sees
#[derive(Debug)]
pub struct WidgetContext<'a> {
    /// Unique node name
    pub name: &'a str,
    /// The declaration being built
    pub spec: &'a WidgetSpec,
    /// Shared resources
    pub build: &'a BuildContext<'a>,
}

impl WidgetContext<'_> {
    /// Deserialize the widget's parameters
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, BuildError> {
        serde_json::from_value(Value::Object(self.spec.params.clone())).map_err(|e| BuildError::invalid(self.name, e))
    }

    /// The single provider this widget reads
    pub fn provider(&self) -> Result<SharedProvider, BuildError> {
        match self.spec.providers.as_slice() {
            [only] => self.build.providers.resolve(self.name, only),
            other => Err(BuildError::invalid(
                self.name,
                format!("expected exactly one provider, got {}", other.len()),
            )),
        }
    }

    fn clock(&self) -> SharedClock {
        Arc::clone(&self.build.clock)
    }

    fn font(&self) -> SharedFont {
        Arc::clone(&self.build.font)
    }

    fn rest_source(&self, spec: &RestSpec) -> Result<SharedSource, BuildError> {
        let source = RestSource::new(spec.clone()).map_err(|e| BuildError::invalid(self.name, e))?;
        Ok(Arc::new(source))
    }
}

// ============================================================================
// Constructors
// ============================================================================

fn build_screen(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: ScreenParams = ctx.params()?;
    Ok(Box::new(ScreenNode::from_params(ctx.name, &params)?))
}

fn build_grid(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: GridParams = ctx.params()?;
    Ok(Box::new(GridNode::new(ctx.name, params)?))
}

fn build_label(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: LabelParams = ctx.params()?;
    Ok(Box::new(LabelNode::new(ctx.name, &params, ctx.font())))
}

fn build_pill(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: PillParams = ctx.params()?;
    Ok(Box::new(PillNode::new(ctx.name, params)))
}

fn build_text(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: TextParams = ctx.params()?;
    Ok(Box::new(TextNode::new(ctx.name, params.text, params.style, ctx.font())))
}

fn build_image(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: ImageParams = ctx.params()?;
    Ok(Box::new(ImageNode::from_params(ctx.name, &params)?))
}

fn build_dateclock(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: DateClockParams = ctx.params()?;
    Ok(Box::new(DateClockNode::new(ctx.name, &params, ctx.clock(), ctx.font())))
}

fn build_rest(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: RestParams = ctx.params()?;
    let interval = frequency(ctx.name, params.update_frequency)?;
    Ok(Box::new(RestNode::new(
        ctx.name,
        ctx.rest_source(&params.request)?,
        params.format_string.clone(),
        interval,
        RestNode::style(&params),
        ctx.font(),
    )?))
}

fn build_restimage(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: RestImageParams = ctx.params()?;
    Ok(Box::new(RestImageNode::new(ctx.name, &params)?))
}

fn build_flip(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: FlipParams = ctx.params()?;
    Ok(Box::new(FlipNode::new(ctx.name, &params, ctx.clock())?))
}

fn build_scheduleflip(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: ScheduleFlipParams = ctx.params()?;
    Ok(Box::new(ScheduleFlipNode::new(ctx.name, &params, ctx.clock())?))
}

fn build_httpflip(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: HttpFlipParams = ctx.params()?;
    Ok(Box::new(HttpFlipNode::new(
        ctx.name,
        ctx.rest_source(&params.request)?,
        ValueMap::new(params.mapping, params.default_widget),
        params.update_frequency,
        params.transition,
        ctx.clock(),
    )?))
}

fn build_providerflip(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: ProviderFlipParams = ctx.params()?;
    Ok(Box::new(ProviderFlipNode::new(
        ctx.name,
        ctx.provider()?,
        params.extraction,
        ValueMap::new(params.mapping, params.default_widget),
        params.transition,
        ctx.clock(),
    )?))
}

fn build_provider_text(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: ProviderTextParams = ctx.params()?;
    Ok(Box::new(ProviderTextNode::from_params(ctx.name, ctx.provider()?, &params, ctx.font())?))
}

fn build_provider_image(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: ProviderImageParams = ctx.params()?;
    Ok(Box::new(ProviderImageNode::from_params(ctx.name, ctx.provider()?, &params)?))
}

fn build_notifiable_text(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    let params: NotifiableTextParams = ctx.params()?;
    let overlay = TextOverlay::new(ctx.name, params.style(), ctx.font());
    Ok(Box::new(NotifiableNode::new(ctx.name, overlay, ctx.clock())))
}

fn build_notifiable_image(ctx: &WidgetContext<'_>) -> Result<BoxedNode, BuildError> {
    Ok(Box::new(NotifiableNode::new(ctx.name, ImageOverlay::new(ctx.name), ctx.clock())))
}
