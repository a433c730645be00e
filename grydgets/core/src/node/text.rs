//! Text leaf, also the building block of every node that shows a string

use std::sync::Arc;

use serde::Deserialize;

use super::{Node, RenderMemo};
use crate::error::RenderError;
use crate::surface::{fit_text, Color, SharedFont, Size, Surface};

/// Horizontal alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    /// Flush left
    #[default]
    Left,
    /// Centered
    Center,
    /// Flush right
    Right,
}

/// Vertical alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    /// Top edge
    #[default]
    Top,
    /// Centered
    Center,
    /// Bottom edge
    Bottom,
}

fn white() -> Color {
    Color::WHITE
}

/// How a string is laid out inside its box
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextStyle {
    /// Glyph color
    #[serde(default = "white")]
    pub color: Color,
    /// Horizontal alignment
    #[serde(default)]
    pub align: Align,
    /// Vertical alignment
    #[serde(default)]
    pub vertical_align: VAlign,
    /// Inset on every side, in pixels
    #[serde(default)]
    pub padding: u32,
    /// Maximum pixel size; the text still shrinks to fit
    #[serde(default)]
    pub text_size: Option<u32>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            align: Align::Left,
            vertical_align: VAlign::Top,
            padding: 0,
            text_size: None,
        }
    }
}

impl TextStyle {
    /// White, centered both ways, with `padding`
    pub fn centered(padding: u32) -> Self {
        Self {
            align: Align::Center,
            vertical_align: VAlign::Center,
            padding,
            ..Self::default()
        }
    }
}

/// Parameters of a fixed-text node
#[derive(Debug, Clone, Deserialize)]
pub struct TextParams {
    /// The string to show
    #[serde(default)]
    pub text: String,
    /// Layout
    #[serde(flatten)]
    pub style: TextStyle,
}

impl Align {
    fn offset(self, free: u32) -> u32 {
        match self {
            Self::Left => 0,
            Self::Center => free / 2,
            Self::Right => free,
        }
    }
}

impl VAlign {
    fn offset(self, free: u32) -> u32 {
        match self {
            Self::Top => 0,
            Self::Center => free / 2,
            Self::Bottom => free,
        }
    }
}

/// A string fitted into the requested size
#[derive(Debug)]
pub struct TextNode {
    name: String,
    text: String,
    style: TextStyle,
    font: SharedFont,
    dirty: bool,
    memo: RenderMemo,
}

impl TextNode {
    /// Create a text node
    pub fn new(name: impl Into<String>, text: impl Into<String>, style: TextStyle, font: SharedFont) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            style,
            font,
            dirty: true,
            memo: RenderMemo::default(),
        }
    }

    /// Current text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Current style
    pub fn style(&self) -> &TextStyle {
        &self.style
    }

    /// Replace the text; marks dirty only if it changed
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.text {
            self.text = text;
            self.dirty = true;
        }
    }

    /// Replace the color; marks dirty only if it changed
    pub fn set_color(&mut self, color: Color) {
        if color != self.style.color {
            self.style.color = color;
            self.dirty = true;
        }
    }

    fn draw(&self, size: Size) -> Surface {
        let mut out = Surface::new(size);
        let inner = size.shrink(self.style.padding);
        if self.text.is_empty() || inner.is_empty() {
            return out;
        }
        let px = fit_text(self.font.as_ref(), &self.text, inner, self.style.text_size);
        let glyphs = self.font.render(&self.text, px, self.style.color);
        let drawn = glyphs.size();

        let x = self.style.padding + self.style.align.offset(inner.width.saturating_sub(drawn.width));
        let y = self.style.padding
            + self.style.vertical_align.offset(inner.height.saturating_sub(drawn.height));
        out.blit(&glyphs, (x as i32, y as i32));
        out
    }
}

impl Node for TextNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        if !self.dirty {
            if let Some(cached) = self.memo.get(size) {
                return Ok(cached);
            }
        }
        let surface = self.draw(size);
        self.dirty = false;
        Ok(self.memo.store(surface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::BlockFont;
    use pretty_assertions::assert_eq;

    fn node(text: &str, style: TextStyle) -> TextNode {
        TextNode::new("t", text, style, Arc::new(BlockFont::default()))
    }

    fn lit_columns(s: &Surface) -> (u32, u32) {
        let size = s.size();
        let lit: Vec<u32> = (0..size.width)
            .filter(|&x| (0..size.height).any(|y| s.pixel(x, y).is_some_and(|p| p.a > 0)))
            .collect();
        (lit[0], *lit.last().unwrap())
    }

    #[test]
    fn test_centered_text_is_centered() {
        let mut t = node("ab", TextStyle { text_size: Some(10), ..TextStyle::centered(0) });
        let s = t.render(Size::new(100, 20)).unwrap();

        let (first, last) = lit_columns(&s);
        let left_gap = first;
        let right_gap = 99 - last;
        assert!(left_gap.abs_diff(right_gap) <= 2, "{left_gap} vs {right_gap}");
    }

    #[test]
    fn test_padding_respected() {
        let mut t = node("x", TextStyle { padding: 5, ..TextStyle::default() });
        let s = t.render(Size::new(40, 20)).unwrap();

        let (first, _) = lit_columns(&s);
        assert!(first >= 5);
        assert_eq!(s.pixel(0, 0).map(|p| p.a), Some(0));
    }

    #[test]
    fn test_set_same_text_stays_clean() {
        let mut t = node("a", TextStyle::default());
        t.render(Size::new(10, 10)).unwrap();
        assert!(!t.is_dirty());

        t.set_text("a");
        assert!(!t.is_dirty());
        t.set_text("b");
        assert!(t.is_dirty());
        t.set_color(Color::rgb(1, 2, 3));
        assert_eq!(t.style().color, Color::rgb(1, 2, 3));
    }

    #[test]
    fn test_memoized_until_dirty_or_resized() {
        let mut t = node("memo", TextStyle::default());
        let a = t.render(Size::new(30, 10)).unwrap();
        let b = t.render(Size::new(30, 10)).unwrap();
        let c = t.render(Size::new(31, 10)).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&b, &c));
        assert_eq!(c.size(), Size::new(31, 10));
    }

    #[test]
    fn test_empty_text_renders_transparent() {
        let mut t = node("", TextStyle::default());
        let s = t.render(Size::new(5, 5)).unwrap();
        assert!(s.pixels().iter().all(|p| p.a == 0));
    }
}
