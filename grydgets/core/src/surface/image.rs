//! Image decoding and scaling via the `image` crate

use ::image::imageops::{self, FilterType};

use super::{Size, Surface};
use crate::error::RenderError;

/// How an image is fitted into a target size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Stretch to exactly the target size
    Stretch,
    /// Preserve aspect ratio, centered, transparent letterbox
    #[default]
    Contain,
    /// Preserve aspect ratio, centered, cropped to fill
    Cover,
}

/// Decode PNG/JPEG/GIF/BMP bytes
pub fn decode_image(bytes: &[u8]) -> Result<Surface, RenderError> {
    let img = ::image::load_from_memory(bytes).map_err(|e| RenderError::Image(e.to_string()))?;
    Ok(Surface::from_rgba_image(&img.to_rgba8()))
}

/// Resample to exactly `size`
pub fn scale(surface: &Surface, size: Size) -> Surface {
    if surface.size() == size {
        return surface.clone();
    }
    if size.is_empty() || surface.size().is_empty() {
        return Surface::new(size);
    }
    let resized = imageops::resize(&surface.to_rgba_image(), size.width, size.height, FilterType::Triangle);
    Surface::from_rgba_image(&resized)
}

/// Fit into `bounds`, always returning a surface of exactly `bounds`
pub fn scale_to_fit(surface: &Surface, bounds: Size, mode: FitMode) -> Surface {
    match mode {
        FitMode::Stretch => scale(surface, bounds),
        FitMode::Contain | FitMode::Cover => {
            let src = surface.size();
            if src.is_empty() || bounds.is_empty() {
                return Surface::new(bounds);
            }
            let wr = f64::from(bounds.width) / f64::from(src.width);
            let hr = f64::from(bounds.height) / f64::from(src.height);
            let ratio = if mode == FitMode::Cover { wr.max(hr) } else { wr.min(hr) };
            let inner = Size::new(
                ((f64::from(src.width) * ratio).round() as u32).max(1),
                ((f64::from(src.height) * ratio).round() as u32).max(1),
            );
            let scaled = scale(surface, inner);
            let mut out = Surface::new(bounds);
            let x = (i64::from(bounds.width) - i64::from(inner.width)) / 2;
            let y = (i64::from(bounds.height) - i64::from(inner.height)) / 2;
            out.blit(&scaled, (x as i32, y as i32));
            out
        }
    }
}
