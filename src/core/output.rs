use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose};
use image::{ImageFormat, RgbaImage};
use poem_openapi::Enum;
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};

pub const PNG_MIME: &str = "image/png";

/// How the caller wants the final image handed back.
#[derive(Enum, Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[oai(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Raw `image/png` body.
    Binary,
    /// JSON with a bare base64 payload.
    #[default]
    Base64,
    /// JSON with a `data:image/png;base64,...` URL.
    DataUrl,
    /// PNG written to the configured output directory; JSON with its path.
    File,
}

/// Encoded result in the representation the caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedImage {
    Png(Vec<u8>),
    Base64(String),
    DataUrl(String),
    File(PathBuf),
}

/// PNG is lossless, so pixels round-trip bit for bit.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| PipelineError::internal(format!("PNG encode failed: {e}")))?;
    Ok(buf)
}

pub fn to_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn to_data_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, to_base64(bytes))
}

/// Converts PNG bytes into the requested representation. `File` writes into
/// `output_dir` under a name derived from `stem`.
pub async fn deliver(
    png: Vec<u8>,
    format: OutputFormat,
    output_dir: &Path,
    stem: &str,
) -> Result<EncodedImage> {
    match format {
        OutputFormat::Binary => Ok(EncodedImage::Png(png)),
        OutputFormat::Base64 => Ok(EncodedImage::Base64(to_base64(&png))),
        OutputFormat::DataUrl => Ok(EncodedImage::DataUrl(to_data_url(&png, PNG_MIME))),
        OutputFormat::File => write_file(&png, output_dir, stem).await.map(EncodedImage::File),
    }
}

async fn write_file(png: &[u8], output_dir: &Path, stem: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
        PipelineError::internal(format!("cannot create {}: {e}", output_dir.display()))
    })?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let path = output_dir.join(format!("{}-{}.png", sanitize(stem), nanos));

    tokio::fs::write(&path, png)
        .await
        .map_err(|e| PipelineError::internal(format!("cannot write {}: {e}", path.display())))?;
    tracing::info!("Wrote {} bytes to {}", png.len(), path.display());
    Ok(path)
}

fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .take(80)
        .collect();
    if cleaned.is_empty() {
        "visual-abstract".to_string()
    } else {
        cleaned
    }
}
