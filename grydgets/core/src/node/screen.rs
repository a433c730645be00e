//! Root background

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::image::load_image_file;
use super::{render_child, BoxedNode, Children, Node, RenderMemo};
use crate::error::{BuildError, RenderError, TopologyError};
use crate::surface::{scale_to_fit, Color, FitMode, Size, Surface};

fn black() -> Color {
    Color::BLACK
}

/// Parameters of a [`ScreenNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenParams {
    /// Background color
    #[serde(default = "black")]
    pub color: Color,
    /// Background image, cover-scaled; wins over `color`
    #[serde(default)]
    pub image_path: Option<PathBuf>,
}

impl Default for ScreenParams {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            image_path: None,
        }
    }
}

/// Paints a background and exactly one child over it
#[derive(Debug)]
pub struct ScreenNode {
    name: String,
    color: Color,
    image: Option<Surface>,
    scaled: RenderMemo,
    children: Children,
    dirty: bool,
    memo: RenderMemo,
}

impl ScreenNode {
    /// Screen with a solid background
    pub fn new(name: impl Into<String>, color: Color) -> Self {
        let name = name.into();
        Self {
            children: Children::exactly(name.clone(), 1),
            name,
            color,
            image: None,
            scaled: RenderMemo::default(),
            dirty: true,
            memo: RenderMemo::default(),
        }
    }

    /// Screen built from parameters, loading the background image
    pub fn from_params(name: impl Into<String>, params: &ScreenParams) -> Result<Self, BuildError> {
        let mut screen = Self::new(name, params.color);
        if let Some(path) = &params.image_path {
            screen.image = Some(load_image_file(&screen.name, path)?);
        }
        Ok(screen)
    }
}

impl Node for ScreenNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) {
        self.children.tick_all();
    }

    fn is_dirty(&self) -> bool {
        self.dirty || self.children.any_dirty()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        if !self.is_dirty() {
            if let Some(cached) = self.memo.get(size) {
                return Ok(cached);
            }
        }
        let mut out = Surface::filled(size, self.color);
        if let Some(image) = &self.image {
            let background = match self.scaled.get(size) {
                Some(scaled) => scaled,
                None => self.scaled.store(scale_to_fit(image, size, FitMode::Cover)),
            };
            out.blit(&background, (0, 0));
        }
        let child = self
            .children
            .get_mut(0)
            .ok_or_else(|| RenderError::EmptyChildren(self.name.clone()))?;
        let rendered = render_child(child.as_mut(), size);
        if let Some(surface) = &rendered {
            out.blit(surface, (0, 0));
        }
        self.dirty = rendered.is_none();
        Ok(self.memo.store(out))
    }

    fn add_child(&mut self, child: BoxedNode) -> Result<(), TopologyError> {
        self.children.push(child)
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
}
