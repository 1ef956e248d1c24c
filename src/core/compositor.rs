//! Places an overlay (the QR code) in the bottom-right corner of a base image.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::error::{PipelineError, Result};

pub const DEFAULT_FIXED_SIZE: u32 = 100;
pub const DEFAULT_FIXED_MARGIN: u32 = 20;
pub const DEFAULT_WIDTH_FRACTION: f64 = 0.12;
pub const DEFAULT_MARGIN_FRACTION: f64 = 0.02;

/// Sizing policy for the overlay. Exactly one is active per call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Overlay drawn at `size` pixels wide (native width when `None`),
    /// `margin` pixels from the right and bottom edges.
    Fixed { size: Option<u32>, margin: u32 },
    /// Overlay width and margin are fractions of the base image width.
    Proportional {
        width_fraction: f64,
        margin_fraction: f64,
    },
}

impl Default for Placement {
    fn default() -> Self {
        Placement::Fixed {
            size: Some(DEFAULT_FIXED_SIZE),
            margin: DEFAULT_FIXED_MARGIN,
        }
    }
}

/// Where the overlay lands on the base image. The origin may be negative
/// when the overlay footprint is larger than the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl OverlayRect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        let (x, y) = (x as i64, y as i64);
        x >= self.x
            && y >= self.y
            && x < self.x + self.width as i64
            && y < self.y + self.height as i64
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.x + self.width as i64 <= width as i64
            && self.y + self.height as i64 <= height as i64
    }
}

impl Placement {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Placement::Fixed { size: Some(0), .. } => Err(PipelineError::InvalidParameter(
                "overlay size must be positive".to_string(),
            )),
            Placement::Fixed { .. } => Ok(()),
            Placement::Proportional {
                width_fraction,
                margin_fraction,
            } => {
                if !(width_fraction > 0.0 && width_fraction <= 1.0) {
                    return Err(PipelineError::InvalidParameter(format!(
                        "overlay width fraction must be in (0, 1], got {width_fraction}"
                    )));
                }
                if !(0.0..1.0).contains(&margin_fraction) {
                    return Err(PipelineError::InvalidParameter(format!(
                        "overlay margin fraction must be in [0, 1), got {margin_fraction}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Computes the overlay footprint for a base of `base` dimensions and an
    /// overlay of `overlay` dimensions. Aspect ratio is preserved whenever the
    /// overlay is resized.
    pub fn resolve(&self, base: (u32, u32), overlay: (u32, u32)) -> Result<OverlayRect> {
        self.validate()?;
        let (base_width, base_height) = base;
        let (overlay_width, overlay_height) = overlay;
        if overlay_width == 0 || overlay_height == 0 {
            return Err(PipelineError::InvalidParameter(
                "overlay image has no pixels".to_string(),
            ));
        }

        let (width, margin) = match *self {
            Placement::Fixed { size, margin } => (size.unwrap_or(overlay_width), margin),
            Placement::Proportional {
                width_fraction,
                margin_fraction,
            } => {
                let width = (base_width as f64 * width_fraction).round().max(1.0) as u32;
                let margin = (base_width as f64 * margin_fraction).round() as u32;
                (width, margin)
            }
        };
        let height = if width == overlay_width {
            overlay_height
        } else {
            ((width as f64 * overlay_height as f64 / overlay_width as f64).round() as u32).max(1)
        };

        Ok(OverlayRect {
            x: base_width as i64 - width as i64 - margin as i64,
            y: base_height as i64 - height as i64 - margin as i64,
            width,
            height,
        })
    }
}

/// Draws `base` onto a new canvas of the same size and the (resized) overlay
/// on top of it with source-over blending. Parts of the overlay falling
/// outside the canvas are clipped.
pub fn composite(
    base: &RgbaImage,
    overlay: &RgbaImage,
    placement: &Placement,
) -> Result<RgbaImage> {
    let rect = placement.resolve(base.dimensions(), overlay.dimensions())?;

    if !rect.fits_within(base.width(), base.height()) {
        tracing::warn!(
            "Overlay {}x{} at ({}, {}) does not fit base {}x{}, clipping",
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            base.width(),
            base.height()
        );
    }

    let overlay: Cow<'_, RgbaImage> = if overlay.dimensions() == (rect.width, rect.height) {
        Cow::Borrowed(overlay)
    } else {
        // Nearest keeps QR modules two-coloured.
        Cow::Owned(imageops::resize(overlay, rect.width, rect.height, FilterType::Nearest))
    };

    let mut canvas = base.clone();
    for (ox, oy, src) in overlay.enumerate_pixels() {
        let x = rect.x + ox as i64;
        let y = rect.y + oy as i64;
        if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
            continue;
        }
        let dst = canvas.get_pixel_mut(x as u32, y as u32);
        *dst = source_over(*src, *dst);
    }

    tracing::debug!(
        "Composited overlay {}x{} at ({}, {}) on {}x{}",
        rect.width,
        rect.height,
        rect.x,
        rect.y,
        canvas.width(),
        canvas.height()
    );

    Ok(canvas)
}

fn source_over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    match src[3] {
        255 => return src,
        0 => return dst,
        _ => {}
    }

    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let mut out = [0u8; 4];
    for c in 0..3 {
        let value = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        out[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([200, 30, 30, 255]);
    const BLUE: Rgba<u8> = Rgba([20, 40, 220, 255]);

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]))
    }

    #[test]
    fn proportional_placement_on_square_base() {
        let placement = Placement::Proportional {
            width_fraction: 0.12,
            margin_fraction: 0.02,
        };
        let rect = placement.resolve((1000, 1000), (200, 200)).unwrap();
        assert_eq!(rect, OverlayRect { x: 860, y: 860, width: 120, height: 120 });
    }

    #[test]
    fn proportional_placement_keeps_aspect_ratio() {
        let placement = Placement::Proportional {
            width_fraction: 0.1,
            margin_fraction: 0.0,
        };
        let rect = placement.resolve((1000, 500), (200, 100)).unwrap();
        assert_eq!(rect, OverlayRect { x: 900, y: 450, width: 100, height: 50 });
    }

    #[test]
    fn fixed_placement_with_explicit_size() {
        let placement = Placement::Fixed {
            size: Some(100),
            margin: 20,
        };
        let rect = placement.resolve((800, 600), (200, 200)).unwrap();
        assert_eq!(rect, OverlayRect { x: 680, y: 480, width: 100, height: 100 });
    }

    #[test]
    fn fixed_placement_at_native_size() {
        let placement = Placement::Fixed { size: None, margin: 50 };
        let rect = placement.resolve((1024, 1024), (200, 200)).unwrap();
        assert_eq!(rect, OverlayRect { x: 774, y: 774, width: 200, height: 200 });
    }

    #[test]
    fn composite_preserves_base_outside_overlay() {
        let base = gradient(800, 600);
        let overlay = RgbaImage::from_pixel(200, 200, RED);
        let placement = Placement::default();
        let rect = placement.resolve(base.dimensions(), overlay.dimensions()).unwrap();

        let out = composite(&base, &overlay, &placement).unwrap();
        assert_eq!(out.dimensions(), base.dimensions());
        for (x, y, pixel) in out.enumerate_pixels() {
            if rect.contains(x, y) {
                assert_eq!(*pixel, RED, "inside overlay at ({x}, {y})");
            } else {
                assert_eq!(pixel, base.get_pixel(x, y), "outside overlay at ({x}, {y})");
            }
        }
    }

    #[test]
    fn composite_is_repeatable() {
        let base = gradient(640, 480);
        let overlay = RgbaImage::from_fn(150, 150, |x, y| {
            if (x / 10 + y / 10) % 2 == 0 { RED } else { BLUE }
        });
        let placement = Placement::Proportional {
            width_fraction: 0.12,
            margin_fraction: 0.02,
        };
        let first = composite(&base, &overlay, &placement).unwrap();
        let second = composite(&base, &overlay, &placement).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_overlay_is_clipped() {
        let base = RgbaImage::from_pixel(100, 100, BLUE);
        let overlay = RgbaImage::from_pixel(200, 200, RED);
        let placement = Placement::Fixed { size: None, margin: 20 };

        let out = composite(&base, &overlay, &placement).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(*out.get_pixel(0, 0), RED);
        assert_eq!(*out.get_pixel(79, 79), RED);
        assert_eq!(*out.get_pixel(80, 80), BLUE);
        assert_eq!(*out.get_pixel(99, 10), BLUE);
    }

    #[test]
    fn transparent_overlay_pixels_leave_base_untouched() {
        let base = gradient(300, 300);
        let overlay = RgbaImage::from_pixel(50, 50, Rgba([255, 255, 255, 0]));
        let out = composite(&base, &overlay, &Placement::Fixed { size: None, margin: 10 }).unwrap();
        assert_eq!(out, base);
    }

    #[test]
    fn half_transparent_overlay_blends() {
        let base = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        let overlay = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 128]));
        let out = composite(&base, &overlay, &Placement::Fixed { size: None, margin: 0 }).unwrap();
        assert_eq!(*out.get_pixel(9, 9), Rgba([128, 128, 128, 255]));
        assert_eq!(*out.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn invalid_fractions_are_rejected() {
        let placement = Placement::Proportional {
            width_fraction: 1.5,
            margin_fraction: 0.02,
        };
        let err = placement.resolve((100, 100), (10, 10)).unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");

        let placement = Placement::Fixed { size: Some(0), margin: 0 };
        assert!(placement.validate().is_err());
    }
}
