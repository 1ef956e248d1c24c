use std::path::PathBuf;

use base64::{Engine as _, engine::general_purpose};
use image::RgbaImage;
use url::Url;

use super::error::{PipelineError, Result};

/// Where a raster image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Remote `http(s)` location, fetched with the shared client.
    Url(String),
    /// Encoded image bytes (PNG, JPEG, ...).
    Bytes(Vec<u8>),
    /// Base64 payload, either bare or as a `data:` URL.
    Base64(String),
    /// Encoded image on the local filesystem.
    File(PathBuf),
    /// Undecoded RGBA8 pixels.
    Raw {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
}

impl ImageSource {
    /// Short description for logs; never includes payloads.
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Url(url) => format!("url {url}"),
            ImageSource::Bytes(bytes) => format!("{} bytes in memory", bytes.len()),
            ImageSource::Base64(data) => format!("{} base64 chars", data.len()),
            ImageSource::File(path) => format!("file {}", path.display()),
            ImageSource::Raw { width, height, .. } => format!("raw {width}x{height}"),
        }
    }

    /// Retrieves the source and decodes it to RGBA8. Decoding runs on the
    /// blocking pool.
    pub async fn load(self, http: &reqwest::Client) -> Result<RgbaImage> {
        tracing::debug!("Loading image from {}", self.describe());

        let bytes = match self {
            ImageSource::Raw {
                width,
                height,
                pixels,
            } => return from_raw(width, height, pixels),
            ImageSource::Url(url) => fetch(http, &url).await?,
            ImageSource::Bytes(bytes) => bytes,
            ImageSource::Base64(data) => decode_base64(&data)?,
            ImageSource::File(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| PipelineError::unreachable(path.display().to_string(), e))?,
        };

        tokio::task::spawn_blocking(move || decode(&bytes))
            .await
            .map_err(|e| PipelineError::internal(format!("decode task failed: {e}")))?
    }
}

async fn fetch(http: &reqwest::Client, location: &str) -> Result<Vec<u8>> {
    let url = Url::parse(location)
        .map_err(|e| {
            PipelineError::InvalidParameter(format!("invalid image URL {location}: {e}"))
        })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::InvalidParameter(format!(
            "unsupported image URL scheme: {}",
            url.scheme()
        )));
    }

    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| PipelineError::unreachable(location, e))?;
    if !resp.status().is_success() {
        return Err(PipelineError::unreachable(
            location,
            format!("HTTP {}", resp.status()),
        ));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| PipelineError::unreachable(location, e))?;
    tracing::debug!("Fetched {} bytes from {}", bytes.len(), location);
    Ok(bytes.to_vec())
}

/// Decodes an encoded raster into RGBA8.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage> {
    let image =
        image::load_from_memory(bytes).map_err(|e| PipelineError::ImageDecode(e.to_string()))?;
    Ok(image.to_rgba8())
}

/// Wraps raw RGBA8 pixels, rejecting buffers whose length disagrees with the
/// declared dimensions.
pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<RgbaImage> {
    let len = pixels.len();
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        PipelineError::ImageDecode(format!(
            "declared {width}x{height} RGBA image does not match {len} byte buffer"
        ))
    })
}

/// Accepts bare base64 or `data:<mime>;base64,<payload>`.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| PipelineError::ImageDecode("data URL without payload".to_string()))?;
            if !header.ends_with(";base64") {
                return Err(PipelineError::ImageDecode(format!(
                    "data URL is not base64 encoded: {header}"
                )));
            }
            payload
        }
        None => data,
    };

    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| PipelineError::ImageDecode(format!("invalid base64: {e}")))
}
