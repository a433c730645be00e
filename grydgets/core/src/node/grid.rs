//! Ratio-based grid container
//!
//! Children fill the grid column by column: child `i` lands in column
//! `i / rows`, row `i % rows`. Cells are laid out as
//!
//! ```text
//!   width * ratio[c] / sum(ratios)     (truncated)
//! ```
//!
//! and inset by `padding` on every side. The cell layer is kept between
//! frames so that only dirty children are re-rendered.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::image::load_image_file;
use super::{render_child, BoxedNode, Children, Node, RenderMemo};
use crate::error::{BuildError, RenderError, TopologyError};
use crate::surface::{scale_to_fit, Color, FitMode, Rect, Size, Surface};

/// Grid parameters
#[derive(Debug, Clone, Deserialize)]
pub struct GridParams {
    /// Number of rows
    pub rows: u32,
    /// Number of columns
    pub columns: u32,
    /// Relative row heights, one per row
    #[serde(default)]
    pub row_ratios: Option<Vec<f64>>,
    /// Relative column widths, one per column
    #[serde(default)]
    pub column_ratios: Option<Vec<f64>>,
    /// Inset of every cell, in pixels
    #[serde(default)]
    pub padding: u32,
    /// Background color behind the cells
    #[serde(default)]
    pub color: Option<Color>,
    /// Fill drawn under each child
    #[serde(default)]
    pub widget_color: Option<Color>,
    /// Rounding of the whole grid
    #[serde(default)]
    pub corner_radius: u32,
    /// Rounding of each cell fill
    #[serde(default)]
    pub widget_corner_radius: u32,
    /// Background image, cover-scaled
    #[serde(default)]
    pub image_path: Option<PathBuf>,
}

impl GridParams {
    /// Plain `rows x columns` grid with equal ratios
    pub fn new(rows: u32, columns: u32) -> Self {
        Self {
            rows,
            columns,
            row_ratios: None,
            column_ratios: None,
            padding: 0,
            color: None,
            widget_color: None,
            corner_radius: 0,
            widget_corner_radius: 0,
            image_path: None,
        }
    }

    fn check_ratios(name: &str, field: &str, ratios: Option<&Vec<f64>>, expected: u32) -> Result<(), BuildError> {
        let Some(ratios) = ratios else {
            return Ok(());
        };
        if ratios.len() != expected as usize {
            return Err(BuildError::invalid(
                name,
                format!("{field} has {} entries, expected {expected}", ratios.len()),
            ));
        }
        if ratios.iter().any(|r| !r.is_finite() || *r < 0.0) || ratios.iter().sum::<f64>() <= 0.0 {
            return Err(BuildError::invalid(name, format!("{field} must be non-negative with a positive sum")));
        }
        Ok(())
    }
}

/// Split `length` by `ratios` into `(start, len)` spans
pub(super) fn layout(length: u32, ratios: &[f64]) -> Vec<(u32, u32)> {
    let total: f64 = ratios.iter().sum();
    let mut start = 0;
    ratios
        .iter()
        .map(|r| {
            let len = (f64::from(length) * r / total) as u32;
            let span = (start, len);
            start += len;
            span
        })
        .collect()
}

/// Grid of up to `rows * columns` children
#[derive(Debug)]
pub struct GridNode {
    name: String,
    params: GridParams,
    row_ratios: Vec<f64>,
    column_ratios: Vec<f64>,
    children: Children,
    background: Option<Surface>,
    scaled_background: RenderMemo,
    cells: Option<Surface>,
    dirty: bool,
    memo: RenderMemo,
}

impl GridNode {
    /// Validate parameters and load the background image, if any
    pub fn new(name: impl Into<String>, params: GridParams) -> Result<Self, BuildError> {
        let name = name.into();
        if params.rows == 0 || params.columns == 0 {
            return Err(BuildError::invalid(&name, "rows and columns must be at least 1"));
        }
        GridParams::check_ratios(&name, "row_ratios", params.row_ratios.as_ref(), params.rows)?;
        GridParams::check_ratios(&name, "column_ratios", params.column_ratios.as_ref(), params.columns)?;

        let background = match &params.image_path {
            Some(path) => Some(load_image_file(&name, path)?),
            None => None,
        };
        let capacity = params.rows as usize * params.columns as usize;
        Ok(Self {
            row_ratios: params.row_ratios.clone().unwrap_or_else(|| vec![1.0; params.rows as usize]),
            column_ratios: params
                .column_ratios
                .clone()
                .unwrap_or_else(|| vec![1.0; params.columns as usize]),
            children: Children::new(name.clone(), 0, Some(capacity)),
            name,
            params,
            background,
            scaled_background: RenderMemo::default(),
            cells: None,
            dirty: true,
            memo: RenderMemo::default(),
        })
    }

    /// Parameters the grid was built with
    pub fn params(&self) -> &GridParams {
        &self.params
    }

    fn paint_background(&mut self, out: &mut Surface) {
        let size = out.size();
        if let Some(image) = &self.background {
            let scaled = match self.scaled_background.get(size) {
                Some(scaled) => scaled,
                None => self.scaled_background.store(scale_to_fit(image, size, FitMode::Cover)),
            };
            out.blit(&scaled, (0, 0));
        } else if let Some(color) = self.params.color {
            out.fill(color);
        }
    }

    /// Re-render the dirty cells (all of them when `full`) into `layer`;
    /// `true` if a child had to be skipped
    fn paint_cells(&mut self, layer: &mut Surface, full: bool) -> bool {
        let size = layer.size();
        let columns = layout(size.width, &self.column_ratios);
        let rows = layout(size.height, &self.row_ratios);
        let pad = self.params.padding;
        let mut skipped = false;

        for (i, child) in self.children.as_mut_slice().iter_mut().enumerate() {
            if !full && !child.is_dirty() {
                continue;
            }
            let (Some(&(x, w)), Some(&(y, h))) = (columns.get(i / rows.len()), rows.get(i % rows.len())) else {
                continue;
            };
            let cell = Rect::new((x + pad) as i32, (y + pad) as i32, w.saturating_sub(pad * 2), h.saturating_sub(pad * 2));
            layer.fill_rect(cell, Color::TRANSPARENT);
            if cell.width == 0 || cell.height == 0 {
                continue;
            }

            let mut framed = Surface::new(cell.size());
            if let Some(fill) = self.params.widget_color {
                framed.fill_rounded_rect(Rect::from_size(cell.size()), self.params.widget_corner_radius, fill);
            }
            match render_child(child.as_mut(), cell.size()) {
                Some(surface) => framed.blit(&surface, (0, 0)),
                None => skipped = true,
            }
            layer.blit(&framed, (cell.x, cell.y));
        }
        skipped
    }
}

impl Node for GridNode {
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
        let resized = !self.memo.holds(size);
        if !resized && !self.is_dirty() {
            if let Some(cached) = self.memo.get(size) {
                return Ok(cached);
            }
        }
        let full = resized || self.dirty;
        debug!(node = %self.name, full, "Rendering grid");

        let mut layer = match self.cells.take() {
            Some(layer) if !full && layer.size() == size => layer,
            _ => Surface::new(size),
        };
        let skipped = self.paint_cells(&mut layer, full);

        let mut out = Surface::new(size);
        self.paint_background(&mut out);
        out.blit(&layer, (0, 0));
        out.mask_rounded(self.params.corner_radius);

        self.cells = Some(layer);
        self.dirty = skipped;
        Ok(self.memo.store(out))
    }

    fn add_child(&mut self, child: BoxedNode) -> Result<(), TopologyError> {
        self.children.push(child)?;
        self.dirty = true;
        Ok(())
    }

    fn children(&self) -> &[BoxedNode] {
        self.children.as_slice()
    }

    fn children_mut(&mut self) -> &mut [BoxedNode] {
        self.children.as_mut_slice()
    }
}
