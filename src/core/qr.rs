//! QR code rendering into RGBA rasters.
//!
//! The module grid is produced by the `qrcode` crate; this module only maps
//! it onto an exact `size` x `size` canvas with a quiet zone and a two colour
//! palette.

use std::str::FromStr;

use image::{Rgba, RgbaImage};
use poem_openapi::Enum;
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode};
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};

pub const DEFAULT_QR_SIZE: u32 = 200;
/// Quiet zone in modules.
pub const DEFAULT_QR_MARGIN: u32 = 4;

#[derive(Enum, Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[oai(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ErrorCorrection {
    Low,
    Medium,
    Quartile,
    #[default]
    High,
}

impl ErrorCorrection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::Quartile => "quartile",
            Self::High => "high",
        }
    }
}

impl From<ErrorCorrection> for EcLevel {
    fn from(level: ErrorCorrection) -> Self {
        match level {
            ErrorCorrection::Low => EcLevel::L,
            ErrorCorrection::Medium => EcLevel::M,
            ErrorCorrection::Quartile => EcLevel::Q,
            ErrorCorrection::High => EcLevel::H,
        }
    }
}

impl FromStr for ErrorCorrection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Self::Low),
            "m" | "medium" => Ok(Self::Medium),
            "q" | "quartile" => Ok(Self::Quartile),
            "h" | "high" => Ok(Self::High),
            other => Err(PipelineError::InvalidParameter(format!(
                "unsupported error correction level: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QrOptions {
    pub error_correction: ErrorCorrection,
    /// Output width and height in pixels.
    pub size: u32,
    /// Quiet zone thickness in modules.
    pub margin: u32,
    pub foreground: Rgba<u8>,
    pub background: Rgba<u8>,
}

impl Default for QrOptions {
    fn default() -> Self {
        Self {
            error_correction: ErrorCorrection::High,
            size: DEFAULT_QR_SIZE,
            margin: DEFAULT_QR_MARGIN,
            foreground: Rgba([0, 0, 0, 255]),
            background: Rgba([255, 255, 255, 255]),
        }
    }
}

/// Renders `text` as a square QR code of exactly `options.size` pixels.
///
/// Each output pixel samples the module grid (quiet zone included) at
/// `floor(pixel * modules / size)`, so modules are one or two pixels wider
/// than their neighbours when the size is not an exact multiple.
pub fn encode(text: &str, options: &QrOptions) -> Result<RgbaImage> {
    if text.is_empty() {
        return Err(PipelineError::InvalidParameter(
            "QR payload must not be empty".to_string(),
        ));
    }

    let level = options.error_correction.into();
    let code = QrCode::with_error_correction_level(text.as_bytes(), level).map_err(|e| match e {
        QrError::DataTooLong => PipelineError::EncodingCapacityExceeded {
            len: text.len(),
            level: options.error_correction.as_str().to_string(),
        },
        other => PipelineError::InvalidParameter(format!("QR encode error: {other}")),
    })?;

    let modules = code.width() as u64;
    let margin = options.margin as u64;
    let total = modules + 2 * margin;
    let size = options.size as u64;
    if size < total {
        return Err(PipelineError::InvalidParameter(format!(
            "QR size {size}px is smaller than its {total} modules"
        )));
    }

    let colors = code.to_colors();
    let grid = margin..margin + modules;
    let image = RgbaImage::from_fn(options.size, options.size, |x, y| {
        let mx = x as u64 * total / size;
        let my = y as u64 * total / size;
        let inside = grid.contains(&mx) && grid.contains(&my);
        if inside && colors[((my - margin) * modules + (mx - margin)) as usize] == Color::Dark {
            options.foreground
        } else {
            options.background
        }
    });

    tracing::debug!(
        "Encoded QR: {} bytes, {} modules, level={}, size={}px",
        text.len(),
        modules,
        options.error_correction.as_str(),
        options.size
    );

    Ok(image)
}

/// Parses `#rrggbb` or `#rrggbbaa`; the `#` is optional.
pub fn parse_hex_color(value: &str) -> Result<Rgba<u8>> {
    let hex = value.trim().trim_start_matches('#');
    let invalid = || PipelineError::InvalidParameter(format!("invalid color: {value}"));
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return Err(invalid());
    }

    let mut channels = [255u8; 4];
    for (i, channel) in channels.iter_mut().enumerate().take(hex.len() / 2) {
        *channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(Rgba(channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOI_URL: &str = "https://doi.org/10.1038/nature14539";

    /// Reads the module grid back by sampling the centre of every module.
    /// Needs at least two pixels per module.
    fn read_modules(image: &RgbaImage, modules: u32, margin: u32, dark: Rgba<u8>) -> Vec<Color> {
        let total = (modules + 2 * margin) as u64;
        let size = image.width() as u64;
        let mut out = Vec::with_capacity((modules * modules) as usize);
        for my in 0..modules {
            for mx in 0..modules {
                let cx = ((2 * (mx + margin) as u64 + 1) * size / (2 * total)) as u32;
                let cy = ((2 * (my + margin) as u64 + 1) * size / (2 * total)) as u32;
                let color = if *image.get_pixel(cx, cy) == dark {
                    Color::Dark
                } else {
                    Color::Light
                };
                out.push(color);
            }
        }
        out
    }

    fn assert_matches_reference(text: &str, options: &QrOptions) {
        let image = encode(text, options).unwrap();
        assert_eq!(image.dimensions(), (options.size, options.size), "{text:?}");

        let level = options.error_correction.into();
        let reference = QrCode::with_error_correction_level(text.as_bytes(), level).unwrap();
        let modules = reference.width() as u32;
        let sampled = read_modules(&image, modules, options.margin, options.foreground);
        assert_eq!(sampled, reference.to_colors(), "{text:?} margin={}", options.margin);
    }

    #[test]
    fn encodes_exact_size_and_matches_reference_grid() {
        assert_matches_reference(DOI_URL, &QrOptions::default());
    }

    #[test]
    fn grid_matches_reference_across_payloads_and_margins() {
        let payloads = [
            DOI_URL.to_string(),
            "https://doi.org/10.1000/zürich-β-γ".to_string(),
            "a".repeat(14),
            "a".repeat(15),
            "https://doi.org/10.1016/j.cell.2024.01.001".repeat(2),
        ];
        for text in &payloads {
            for margin in [0, 1, 4] {
                let options = QrOptions {
                    size: 600,
                    margin,
                    ..QrOptions::default()
                };
                assert_matches_reference(text, &options);
            }
        }
    }

    #[test]
    fn payload_growth_crosses_version_boundary() {
        // Byte mode at level H holds 14 bytes in version 2 (25 modules).
        let fits = QrCode::with_error_correction_level("a".repeat(14), EcLevel::H).unwrap();
        let grows = QrCode::with_error_correction_level("a".repeat(15), EcLevel::H).unwrap();
        assert_eq!(fits.width(), 25);
        assert_eq!(grows.width(), 29);

        for text in ["a".repeat(14), "a".repeat(15)] {
            let options = QrOptions {
                margin: 1,
                ..QrOptions::default()
            };
            assert_matches_reference(&text, &options);
        }
    }

    #[test]
    fn grid_matches_reference_at_every_level() {
        let levels = [
            ErrorCorrection::Low,
            ErrorCorrection::Medium,
            ErrorCorrection::Quartile,
            ErrorCorrection::High,
        ];
        for error_correction in levels {
            let options = QrOptions {
                error_correction,
                margin: 1,
                ..QrOptions::default()
            };
            assert_matches_reference(DOI_URL, &options);
        }
    }

    #[test]
    fn quiet_zone_uses_background() {
        let options = QrOptions {
            margin: 1,
            background: Rgba([10, 20, 30, 255]),
            ..QrOptions::default()
        };
        let image = encode(DOI_URL, &options).unwrap();
        assert_eq!(*image.get_pixel(0, 0), Rgba([10, 20, 30, 255]));
        assert_eq!(*image.get_pixel(199, 199), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn encoding_is_deterministic() {
        let options = QrOptions::default();
        assert_eq!(encode(DOI_URL, &options).unwrap(), encode(DOI_URL, &options).unwrap());
    }

    #[test]
    fn empty_text_is_invalid() {
        let err = encode("", &QrOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }

    #[test]
    fn oversized_text_exceeds_capacity() {
        let text = "x".repeat(4000);
        let err = encode(&text, &QrOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "encoding_capacity_exceeded");
    }

    #[test]
    fn size_below_module_count_is_invalid() {
        let options = QrOptions {
            size: 20,
            ..QrOptions::default()
        };
        let err = encode(DOI_URL, &options).unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }

    #[test]
    fn high_is_the_default_level() {
        assert_eq!(ErrorCorrection::default(), ErrorCorrection::High);
        assert_eq!(QrOptions::default().error_correction, ErrorCorrection::High);
    }

    #[test]
    fn error_correction_parsing() {
        assert_eq!("H".parse::<ErrorCorrection>().unwrap(), ErrorCorrection::High);
        assert_eq!("quartile".parse::<ErrorCorrection>().unwrap(), ErrorCorrection::Quartile);
        assert!("ultra".parse::<ErrorCorrection>().is_err());
    }

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_color("#000000").unwrap(), Rgba([0, 0, 0, 255]));
        assert_eq!(parse_hex_color("ff000080").unwrap(), Rgba([255, 0, 0, 128]));
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("#zzzzzz").is_err());
    }
}
