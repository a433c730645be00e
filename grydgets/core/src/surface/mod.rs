//! Drawing Primitives
//!
//! The core never opens a window. Nodes produce [`Surface`]s: plain RGBA
//! buffers that can be filled, composited onto each other at an offset and,
//! at the edge of the process, encoded to PNG or handed to a display.
//!
//! Compositing is source-over alpha blending with clipping, which is all
//! the node tree needs (slide transitions blit children at negative and
//! past-the-edge offsets).

mod font;
mod image;

pub use self::font::{fit_text, BlockFont, FontRenderer, SharedFont};
pub use self::image::{decode_image, scale, scale_to_fit, FitMode};

use std::fmt;

use serde::Deserialize;

// ============================================================================
// Geometry
// ============================================================================

/// Pixel size of a surface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Size {
    /// Create a size
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Shrink by `padding` on every side, saturating at zero
    #[must_use]
    pub fn shrink(&self, padding: u32) -> Self {
        Self {
            width: self.width.saturating_sub(padding * 2),
            height: self.height.saturating_sub(padding * 2),
        }
    }

    /// Number of pixels
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// A rectangle in surface coordinates (origin may be negative)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Rect {
    /// Create a rectangle
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole surface of `size`
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Size of the rectangle
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

// ============================================================================
// Color
// ============================================================================

/// RGBA color, 8 bits per channel, straight (non-premultiplied) alpha
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "ColorRepr")]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha (255 = opaque)
    pub a: u8,
}

impl Color {
    /// Fully transparent black
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    /// Opaque black
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    /// Opaque white
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    /// Opaque color
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Color with explicit alpha
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Source-over composite of `self` onto `dst`
    #[must_use]
    pub fn over(self, dst: Color) -> Color {
        match self.a {
            255 => self,
            0 => dst,
            sa => {
                let sa = u32::from(sa);
                let da = u32::from(dst.a);
                let inv = 255 - sa;
                // out_a in 0..=255*255 scale
                let out_a = sa * 255 + da * inv;
                if out_a == 0 {
                    return Color::TRANSPARENT;
                }
                let blend = |s: u8, d: u8| -> u8 {
                    let num = u32::from(s) * sa * 255 + u32::from(d) * da * inv;
                    u8::try_from(num / out_a).unwrap_or(u8::MAX)
                };
                Color {
                    r: blend(self.r, dst.r),
                    g: blend(self.g, dst.g),
                    b: blend(self.b, dst.b),
                    a: u8::try_from(out_a / 255).unwrap_or(u8::MAX),
                }
            }
        }
    }
}

/// Accepted spellings for colors in configuration and notification payloads
#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Rgb([u8; 3]),
    Rgba([u8; 4]),
    Hex(String),
}

impl TryFrom<ColorRepr> for Color {
    type Error = String;

    fn try_from(repr: ColorRepr) -> Result<Self, Self::Error> {
        match repr {
            ColorRepr::Rgb([r, g, b]) => Ok(Color::rgb(r, g, b)),
            ColorRepr::Rgba([r, g, b, a]) => Ok(Color::rgba(r, g, b, a)),
            ColorRepr::Hex(s) => parse_hex(&s).ok_or_else(|| format!("invalid color '{s}'")),
        }
    }
}

fn parse_hex(s: &str) -> Option<Color> {
    let hex = s.strip_prefix('#')?;
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
        8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

// ============================================================================
// Surface
// ============================================================================

/// Whether the center of pixel `(x, y)` lies inside `rect` with rounded corners
fn inside_rounded(rect: Rect, radius: u32, x: u32, y: u32) -> bool {
    let r = f64::from(radius);
    let left = f64::from(rect.x) + r;
    let right = f64::from(rect.x) + f64::from(rect.width) - r;
    let top = f64::from(rect.y) + r;
    let bottom = f64::from(rect.y) + f64::from(rect.height) - r;
    let px = f64::from(x) + 0.5;
    let py = f64::from(y) + 0.5;
    let cx = px.clamp(left, right);
    let cy = py.clamp(top, bottom);
    (px - cx).powi(2) + (py - cy).powi(2) <= r * r
}

/// An RGBA pixel buffer
#[derive(Clone, PartialEq, Eq)]
pub struct Surface {
    size: Size,
    pixels: Vec<Color>,
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface").field("size", &self.size).finish_non_exhaustive()
    }
}

impl Surface {
    /// Transparent surface of `size`
    pub fn new(size: Size) -> Self {
        Self::filled(size, Color::TRANSPARENT)
    }

    /// Surface of `size` filled with `color`
    pub fn filled(size: Size, color: Color) -> Self {
        Self {
            size,
            pixels: vec![color; size.area()],
        }
    }

    /// Build a surface from row-major pixels
    ///
    /// Returns `None` when `pixels.len()` does not match `size`.
    pub fn from_pixels(size: Size, pixels: Vec<Color>) -> Option<Self> {
        (pixels.len() == size.area()).then_some(Self { size, pixels })
    }

    /// Pixel size
    pub fn size(&self) -> Size {
        self.size
    }

    /// Row-major pixels
    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    /// Read one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.pixels.get(self.index(x, y)).copied()
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.size.width as usize + x as usize
    }

    /// Overwrite every pixel
    pub fn fill(&mut self, color: Color) {
        self.pixels.fill(color);
    }

    /// Overwrite the pixels inside `rect` (clipped)
    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        let Some((x0, y0, x1, y1)) = self.clip(rect) else {
            return;
        };
        for y in y0..y1 {
            let row = self.index(0, y);
            self.pixels[row + x0 as usize..row + x1 as usize].fill(color);
        }
    }

    /// Overwrite the pixels inside a rounded rectangle (clipped)
    pub fn fill_rounded_rect(&mut self, rect: Rect, radius: u32, color: Color) {
        let radius = radius.min(rect.width / 2).min(rect.height / 2);
        if radius == 0 {
            self.fill_rect(rect, color);
            return;
        }
        let Some((x0, y0, x1, y1)) = self.clip(rect) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                if inside_rounded(rect, radius, x, y) {
                    let idx = self.index(x, y);
                    self.pixels[idx] = color;
                }
            }
        }
    }

    /// Make every pixel outside a rounded rectangle covering the whole
    /// surface transparent
    pub fn mask_rounded(&mut self, radius: u32) {
        let rect = Rect::from_size(self.size);
        let radius = radius.min(rect.width / 2).min(rect.height / 2);
        if radius == 0 {
            return;
        }
        for y in 0..self.size.height {
            for x in 0..self.size.width {
                if !inside_rounded(rect, radius, x, y) {
                    let idx = self.index(x, y);
                    self.pixels[idx] = Color::TRANSPARENT;
                }
            }
        }
    }

    /// Make every pixel outside the circle transparent
    pub fn mask_circle(&mut self, center: (i32, i32), radius: u32) {
        let r2 = f64::from(radius).powi(2);
        for y in 0..self.size.height {
            for x in 0..self.size.width {
                let dx = f64::from(x) + 0.5 - f64::from(center.0);
                let dy = f64::from(y) + 0.5 - f64::from(center.1);
                if dx * dx + dy * dy > r2 {
                    let idx = self.index(x, y);
                    self.pixels[idx] = Color::TRANSPARENT;
                }
            }
        }
    }

    /// Composite `src` onto this surface with its top-left corner at `offset`
    ///
    /// Parts of `src` that fall outside this surface are clipped.
    pub fn blit(&mut self, src: &Surface, offset: (i32, i32)) {
        let rect = Rect::new(offset.0, offset.1, src.size.width, src.size.height);
        let Some((x0, y0, x1, y1)) = self.clip(rect) else {
            return;
        };
        for y in y0..y1 {
            let sy = (i64::from(y) - i64::from(offset.1)) as u32;
            for x in x0..x1 {
                let sx = (i64::from(x) - i64::from(offset.0)) as u32;
                let s = src.pixels[src.index(sx, sy)];
                if s.a == 0 {
                    continue;
                }
                let idx = self.index(x, y);
                self.pixels[idx] = s.over(self.pixels[idx]);
            }
        }
    }

    /// Intersect `rect` with the surface bounds, as pixel ranges
    fn clip(&self, rect: Rect) -> Option<(u32, u32, u32, u32)> {
        let x0 = i64::from(rect.x).max(0);
        let y0 = i64::from(rect.y).max(0);
        let x1 = (i64::from(rect.x) + i64::from(rect.width)).min(i64::from(self.size.width));
        let y1 = (i64::from(rect.y) + i64::from(rect.height)).min(i64::from(self.size.height));
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        // All four values are within 0..=u32::MAX after clamping to the surface
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }

    /// Encode as PNG at `path`
    pub fn save_png(&self, path: &std::path::Path) -> Result<(), crate::error::RenderError> {
        self.to_rgba_image()
            .save_with_format(path, ::image::ImageFormat::Png)
            .map_err(|e| crate::error::RenderError::Image(e.to_string()))
    }

    pub(crate) fn to_rgba_image(&self) -> ::image::RgbaImage {
        let raw: Vec<u8> = self
            .pixels
            .iter()
            .flat_map(|c| [c.r, c.g, c.b, c.a])
            .collect();
        // Buffer length always matches width * height * 4
        ::image::RgbaImage::from_raw(self.size.width, self.size.height, raw)
            .unwrap_or_else(|| ::image::RgbaImage::new(self.size.width, self.size.height))
    }

    pub(crate) fn from_rgba_image(img: &::image::RgbaImage) -> Self {
        let size = Size::new(img.width(), img.height());
        let pixels = img
            .pixels()
            .map(|p| Color::rgba(p.0[0], p.0[1], p.0[2], p.0[3]))
            .collect();
        Self { size, pixels }
    }
}
