//! Caption above or below a single child

use std::sync::Arc;

use serde::Deserialize;

use super::grid::layout;
use super::{render_child, Align, BoxedNode, Children, Node, RenderMemo, TextNode, TextStyle, VAlign};
use crate::error::{BuildError, RenderError, TopologyError};
use crate::surface::{Color, SharedFont, Size, Surface};

/// Where the caption goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPosition {
    /// Caption takes the top third
    #[default]
    Above,
    /// Caption takes the bottom third
    Below,
}

fn white() -> Color {
    Color::WHITE
}

/// Parameters of a [`LabelNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct LabelParams {
    /// Caption text
    pub text: String,
    /// Caption placement
    #[serde(default)]
    pub position: LabelPosition,
    /// Maximum caption pixel size
    #[serde(default)]
    pub text_size: Option<u32>,
    /// Caption color
    #[serde(default = "white")]
    pub text_color: Color,
}

/// Splits its box 1:2 between a caption and one child
#[derive(Debug)]
pub struct LabelNode {
    name: String,
    position: LabelPosition,
    caption: TextNode,
    children: Children,
    dirty: bool,
    memo: RenderMemo,
}

impl LabelNode {
    /// Label with the given caption
    pub fn new(name: impl Into<String>, params: &LabelParams, font: SharedFont) -> Self {
        let name = name.into();
        let style = TextStyle {
            color: params.text_color,
            align: Align::Center,
            vertical_align: match params.position {
                LabelPosition::Above => VAlign::Center,
                LabelPosition::Below => VAlign::Top,
            },
            padding: 0,
            text_size: params.text_size,
        };
        Self {
            caption: TextNode::new(format!("{name}_caption"), params.text.clone(), style, font),
            children: Children::exactly(name.clone(), 1),
            name,
            position: params.position,
            dirty: true,
            memo: RenderMemo::default(),
        }
    }

    /// Caption text
    pub fn text(&self) -> &str {
        self.caption.text()
    }
}

impl Node for LabelNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) {
        self.children.tick_all();
    }

    fn is_dirty(&self) -> bool {
        self.dirty || self.caption.is_dirty() || self.children.any_dirty()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        if !self.is_dirty() {
            if let Some(cached) = self.memo.get(size) {
                return Ok(cached);
            }
        }
        let (ratios, caption_row) = match self.position {
            LabelPosition::Above => ([1.0, 2.0], 0),
            LabelPosition::Below => ([2.0, 1.0], 1),
        };
        let rows = layout(size.height, &ratios);
        let (caption_y, caption_h) = rows[caption_row];
        let (child_y, child_h) = rows[1 - caption_row];

        let mut out = Surface::new(size);
        let caption = self.caption.render(Size::new(size.width, caption_h))?;
        out.blit(&caption, (0, caption_y as i32));
        let child = self
            .children
            .get_mut(0)
            .ok_or_else(|| RenderError::EmptyChildren(self.name.clone()))?;
        let rendered = render_child(child.as_mut(), Size::new(size.width, child_h));
        if let Some(surface) = &rendered {
            out.blit(surface, (0, child_y as i32));
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
