//! Text rendering
//!
//! Glyph shaping is not the core's business. Nodes talk to a
//! [`FontRenderer`] and the daemon decides which implementation to hand
//! them. [`BlockFont`] is the built-in renderer: every visible character is
//! a solid cell, which is legible enough for snapshots and exact enough for
//! layout tests.

use std::fmt;
use std::sync::Arc;

use super::{Color, Rect, Size, Surface};

/// Maps `(text, pixel size, color)` to a surface
pub trait FontRenderer: Send + Sync + fmt::Debug {
    /// Size `text` would occupy at `px`
    fn measure(&self, text: &str, px: u32) -> Size;

    /// Render `text` at `px` on a transparent background
    fn render(&self, text: &str, px: u32, color: Color) -> Surface;
}

/// Shared font handle passed down during tree construction
pub type SharedFont = Arc<dyn FontRenderer>;

/// Fixed-pitch renderer that draws each character as a filled cell
#[derive(Debug, Clone, Copy)]
pub struct BlockFont {
    /// Cell width as a fraction of the pixel size
    pub advance: f32,
}

impl Default for BlockFont {
    fn default() -> Self {
        Self { advance: 0.6 }
    }
}

impl BlockFont {
    fn cell_width(&self, px: u32) -> u32 {
        ((px as f32 * self.advance).round() as u32).max(1)
    }
}

impl FontRenderer for BlockFont {
    fn measure(&self, text: &str, px: u32) -> Size {
        if px == 0 || text.is_empty() {
            return Size::default();
        }
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        Size::new(self.cell_width(px).saturating_mul(chars), px)
    }

    fn render(&self, text: &str, px: u32, color: Color) -> Surface {
        let mut surface = Surface::new(self.measure(text, px));
        let cell = self.cell_width(px);
        let inset_x = cell / 6;
        let inset_y = px / 5;
        let mut x = 0u32;
        for ch in text.chars() {
            if !ch.is_whitespace() {
                let rect = Rect::new(
                    (x + inset_x) as i32,
                    inset_y as i32,
                    cell.saturating_sub(inset_x * 2),
                    px.saturating_sub(inset_y * 2),
                );
                surface.fill_rect(rect, color);
            }
            x = x.saturating_add(cell);
        }
        surface
    }
}

/// Largest pixel size at which `text` fits inside `bounds`
///
/// Starts from the bound height (or `max_px` if smaller) and shrinks until
/// the measured width fits. Never returns less than 1.
pub fn fit_text(font: &dyn FontRenderer, text: &str, bounds: Size, max_px: Option<u32>) -> u32 {
    let mut hi = bounds.height.min(max_px.unwrap_or(u32::MAX));
    if hi <= 1 {
        return 1;
    }
    if font.measure(text, hi).width <= bounds.width {
        return hi;
    }
    let mut lo = 1;
    // Invariant: lo fits (or is the floor), hi does not
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if font.measure(text, mid).width <= bounds.width {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}
