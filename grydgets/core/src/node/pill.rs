//! Base child with a pill-shaped overlay child on top
//!
//! ```text
//!   ┌──────────────────┐
//!   │      base        │   child 0, optionally masked to a circle
//!   │  ╭────────────╮  │
//!   │  │    pill    │  │   child 1, centered at (pill_position_x, pill_position_y)
//!   │  ╰────────────╯  │
//!   └──────────────────┘
//! ```

use std::sync::Arc;

use serde::Deserialize;

use super::{render_child, BoxedNode, Children, Node, RenderMemo};
use crate::error::{BuildError, RenderError, TopologyError};
use crate::surface::{Color, Rect, Size, Surface};

fn default_width() -> f64 {
    0.8
}

fn default_height() -> f64 {
    0.2
}

fn default_x() -> f64 {
    0.5
}

fn default_y() -> f64 {
    0.8
}

/// Parameters of a [`PillNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct PillParams {
    /// Clip the base child to the largest centered circle
    #[serde(default)]
    pub circular_mask: bool,
    /// Fill behind the masked base child
    #[serde(default)]
    pub widget_background_color: Option<Color>,
    /// Pill fill; transparent when absent
    #[serde(default)]
    pub pill_background_color: Option<Color>,
    /// Pill width as a fraction of the container
    #[serde(default = "default_width")]
    pub pill_width_percent: f64,
    /// Pill height as a fraction of the container
    #[serde(default = "default_height")]
    pub pill_height_percent: f64,
    /// Horizontal center of the pill, as a fraction
    #[serde(default = "default_x")]
    pub pill_position_x: f64,
    /// Vertical center of the pill, as a fraction
    #[serde(default = "default_y")]
    pub pill_position_y: f64,
    /// Corner radius; half the pill height when absent
    #[serde(default)]
    pub pill_corner_radius: Option<u32>,
    /// Size the pill against the circle diameter instead of the container
    #[serde(default)]
    pub pill_size_relative_to_circle: bool,
}

impl Default for PillParams {
    fn default() -> Self {
        Self {
            circular_mask: false,
            widget_background_color: None,
            pill_background_color: None,
            pill_width_percent: default_width(),
            pill_height_percent: default_height(),
            pill_position_x: default_x(),
            pill_position_y: default_y(),
            pill_corner_radius: None,
            pill_size_relative_to_circle: false,
        }
    }
}

/// Exactly two children: base and pill
#[derive(Debug)]
pub struct PillNode {
    name: String,
    params: PillParams,
    children: Children,
    dirty: bool,
    memo: RenderMemo,
}

impl PillNode {
    /// Pill container
    pub fn new(name: impl Into<String>, params: PillParams) -> Self {
        let name = name.into();
        Self {
            children: Children::exactly(name.clone(), 2),
            name,
            params,
            dirty: true,
            memo: RenderMemo::default(),
        }
    }

    /// Pill rectangle inside a container of `size`
    fn pill_rect(&self, size: Size) -> Rect {
        let p = &self.params;
        let (w, h) = (f64::from(size.width), f64::from(size.height));
        let (basis_w, basis_h) = if p.pill_size_relative_to_circle {
            let diameter = w.min(h);
            (diameter, diameter)
        } else {
            (w, h)
        };
        let pill_w = (basis_w * p.pill_width_percent) as u32;
        let pill_h = (basis_h * p.pill_height_percent) as u32;
        let x = (w * p.pill_position_x - f64::from(pill_w) / 2.0) as i32;
        let y = (h * p.pill_position_y - f64::from(pill_h) / 2.0) as i32;
        Rect::new(x, y, pill_w, pill_h)
    }

    /// Base layer, `None` if the base child was skipped
    fn render_base(&mut self, size: Size) -> Option<Arc<Surface>> {
        let circular = self.params.circular_mask;
        let background = self.params.widget_background_color;
        let base = self.children.get_mut(0)?;
        if !circular {
            return render_child(base.as_mut(), size);
        }

        let radius = size.width.min(size.height) / 2;
        let center = ((size.width / 2) as i32, (size.height / 2) as i32);
        let mut masked = Surface::filled(size, background.unwrap_or(Color::TRANSPARENT));
        if radius > 0 {
            let surface = render_child(base.as_mut(), Size::new(radius * 2, radius * 2))?;
            masked.blit(&surface, (center.0 - radius as i32, 0));
        }
        masked.mask_circle(center, radius);
        Some(Arc::new(masked))
    }
}

impl Node for PillNode {
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
        if self.children.len() != 2 {
            return Err(RenderError::EmptyChildren(self.name.clone()));
        }

        let mut out = Surface::new(size);
        let mut skipped = false;
        match self.render_base(size) {
            Some(base) => out.blit(&base, (0, 0)),
            None => skipped = true,
        }

        let rect = self.pill_rect(size);
        if rect.width > 0 && rect.height > 0 {
            let mut pill = Surface::new(rect.size());
            if let Some(fill) = self.params.pill_background_color {
                let radius = self.params.pill_corner_radius.unwrap_or(rect.height / 2);
                pill.fill_rounded_rect(Rect::from_size(rect.size()), radius, fill);
            }
            if let Some(content) = self.children.get_mut(1) {
                match render_child(content.as_mut(), rect.size()) {
                    Some(surface) => pill.blit(&surface, (0, 0)),
                    None => skipped = true,
                }
            }
            out.blit(&pill, (rect.x, rect.y));
        }

        self.dirty = skipped;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::MockNode;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    const RED: Color = Color::rgb(255, 0, 0);
    const BLUE: Color = Color::rgb(0, 0, 255);

    fn pill(params: PillParams) -> PillNode {
        let mut node = PillNode::new("pill", params);
        node.add_child(MockNode::boxed("base", RED).0).unwrap();
        node.add_child(MockNode::boxed("overlay", BLUE).0).unwrap();
        node.finish().unwrap();
        node
    }

    #[test]
    fn test_default_pill_geometry() {
        let node = pill(PillParams::default());
        assert_eq!(node.pill_rect(Size::new(100, 100)), Rect::new(10, 70, 80, 20));
    }

    #[test]
    fn test_pill_drawn_over_base() {
        let mut node = pill(PillParams::default());
        let s = node.render(Size::new(100, 100)).unwrap();

        assert_eq!(s.pixel(50, 10), Some(RED));
        assert_eq!(s.pixel(50, 80), Some(BLUE));
        assert_eq!(s.pixel(5, 80), Some(RED));
    }

    #[test]
    fn test_skipped_pill_content_keeps_node_dirty() {
        let mut node = PillNode::new("pill", PillParams::default());
        let (overlay, state) = MockNode::boxed("overlay", BLUE);
        state.wrong_size.store(true, Ordering::SeqCst);
        node.add_child(MockNode::boxed("base", RED).0).unwrap();
        node.add_child(overlay).unwrap();
        node.finish().unwrap();

        let s = node.render(Size::new(100, 100)).unwrap();
        assert_eq!(s.pixel(50, 80), Some(RED));
        assert!(node.is_dirty());

        state.wrong_size.store(false, Ordering::SeqCst);
        let s = node.render(Size::new(100, 100)).unwrap();
        assert_eq!(s.pixel(50, 80), Some(BLUE));
        assert!(!node.is_dirty());
    }

    #[test]
    fn test_circular_mask_clears_corners() {
        let params = PillParams {
            circular_mask: true,
            ..PillParams::default()
        };
        let mut node = pill(params);
        let s = node.render(Size::new(40, 40)).unwrap();

        assert_eq!(s.pixel(0, 0), Some(Color::TRANSPARENT));
        assert_eq!(s.pixel(20, 10), Some(RED));
    }

    #[test]
    fn test_size_relative_to_circle() {
        let params = PillParams {
            pill_size_relative_to_circle: true,
            ..PillParams::default()
        };
        let node = pill(params);
        let rect = node.pill_rect(Size::new(200, 100));
        assert_eq!(rect.size(), Size::new(80, 20));
    }

    #[test]
    fn test_exactly_two_children() {
        let mut node = PillNode::new("pill", PillParams::default());
        node.add_child(MockNode::boxed("a", RED).0).unwrap();
        assert!(node.finish().is_err());
        node.add_child(MockNode::boxed("b", RED).0).unwrap();
        assert!(node.add_child(MockNode::boxed("c", RED).0).is_err());
    }
}
