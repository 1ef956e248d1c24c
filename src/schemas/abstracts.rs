use poem_openapi::{
    ApiResponse, Enum, Object,
    payload::{Attachment, Json},
};
use serde::Deserialize;

use super::common::ErrorResponse;
use crate::core::compositor::{
    DEFAULT_FIXED_MARGIN, DEFAULT_MARGIN_FRACTION, DEFAULT_WIDTH_FRACTION, Placement,
};
use crate::core::error::PipelineError;
use crate::core::metadata::ArticleMetadata;
use crate::core::output::{EncodedImage, OutputFormat, PNG_MIME};
use crate::core::qr::{ErrorCorrection, QrOptions, parse_hex_color};

/// Message for bodies that never reach a handler: malformed JSON, missing
/// fields, or values outside the documented ranges.
pub const INVALID_REQUEST: &str = "Invalid request.";

#[derive(Object, Deserialize, Clone)]
pub struct MetadataRequest {
    /// Article DOI, bare or as a doi.org URL
    #[oai(validator(min_length = 1, max_length = 512))]
    pub doi: String,
}

#[derive(Object, Clone)]
pub struct MetadataResponse {
    pub title: String,
    pub abstract_text: String,
    pub citation: String,
}

impl From<ArticleMetadata> for MetadataResponse {
    fn from(meta: ArticleMetadata) -> Self {
        Self {
            title: meta.title,
            abstract_text: meta.abstract_text,
            citation: meta.citation,
        }
    }
}

#[derive(Object, Deserialize, Clone, Default)]
pub struct QrCodeOptions {
    /// Error correction level (default: high)
    pub error_correction: Option<ErrorCorrection>,

    /// Width and height in pixels
    #[oai(validator(minimum(value = "21"), maximum(value = "4000")))]
    pub size: Option<u32>,

    /// Quiet zone in modules
    #[oai(validator(maximum(value = "16")))]
    pub margin: Option<u32>,

    /// Dark module colour, `#rrggbb` or `#rrggbbaa`
    pub foreground: Option<String>,

    /// Light module colour, `#rrggbb` or `#rrggbbaa`
    pub background: Option<String>,
}

impl QrCodeOptions {
    pub fn resolve(&self, defaults: &QrOptions) -> Result<QrOptions, PipelineError> {
        Ok(QrOptions {
            error_correction: self.error_correction.unwrap_or(defaults.error_correction),
            size: self.size.unwrap_or(defaults.size),
            margin: self.margin.unwrap_or(defaults.margin),
            foreground: match &self.foreground {
                Some(color) => parse_hex_color(color)?,
                None => defaults.foreground,
            },
            background: match &self.background {
                Some(color) => parse_hex_color(color)?,
                None => defaults.background,
            },
        })
    }
}

#[derive(Enum, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[oai(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    Fixed,
    Proportional,
}

#[derive(Object, Deserialize, Clone)]
pub struct PlacementOptions {
    pub policy: PlacementPolicy,

    /// Fixed: overlay width in pixels (omit for the QR code's own size)
    #[oai(validator(minimum(value = "1"), maximum(value = "4000")))]
    pub size: Option<u32>,

    /// Fixed: distance from the right and bottom edges in pixels (default 20)
    #[oai(validator(maximum(value = "4000")))]
    pub margin: Option<u32>,

    /// Proportional: overlay width as a fraction of the base width (default 0.12)
    #[oai(validator(minimum(value = "0.01"), maximum(value = "1.0")))]
    pub width_fraction: Option<f64>,

    /// Proportional: margin as a fraction of the base width (default 0.02)
    #[oai(validator(minimum(value = "0.0"), maximum(value = "0.5")))]
    pub margin_fraction: Option<f64>,
}

impl PlacementOptions {
    pub fn to_placement(&self) -> Result<Placement, PipelineError> {
        let placement = match self.policy {
            PlacementPolicy::Fixed => Placement::Fixed {
                size: self.size,
                margin: self.margin.unwrap_or(DEFAULT_FIXED_MARGIN),
            },
            PlacementPolicy::Proportional => Placement::Proportional {
                width_fraction: self.width_fraction.unwrap_or(DEFAULT_WIDTH_FRACTION),
                margin_fraction: self.margin_fraction.unwrap_or(DEFAULT_MARGIN_FRACTION),
            },
        };
        placement.validate()?;
        Ok(placement)
    }
}

#[derive(Object, Deserialize, Clone, Default)]
pub struct GenerateOptions {
    /// Response representation (default: base64)
    pub output: Option<OutputFormat>,

    /// Overlay placement; the server default applies when omitted
    pub placement: Option<PlacementOptions>,

    /// QR code rendering options
    pub qr: Option<QrCodeOptions>,
}

#[derive(Object, Deserialize, Clone)]
pub struct GenerateRequest {
    /// Article DOI, bare or as a doi.org URL
    #[oai(validator(min_length = 1, max_length = 512))]
    pub doi: String,

    /// Abstract text; fetched from CrossRef when empty or omitted
    pub abstract_text: Option<String>,

    /// Citation line; taken from CrossRef when omitted
    pub citation: Option<String>,

    pub options: Option<GenerateOptions>,
}

#[derive(Object, Deserialize, Clone)]
pub struct QrCodeRequest {
    /// Text to encode
    #[oai(validator(min_length = 1))]
    pub text: String,

    /// Response representation (default: base64)
    pub output: Option<OutputFormat>,

    pub options: Option<QrCodeOptions>,
}

/// JSON image body. Exactly one of `image` and `path` is set.
#[derive(Object)]
pub struct ImageBody {
    /// Base64 payload or `data:` URL, depending on the requested output
    pub image: Option<String>,

    /// Location of the written PNG when the `file` output was requested
    pub path: Option<String>,

    /// MIME type of the image
    pub mime_type: String,

    /// Citation line of the article (visual abstracts only)
    pub citation: Option<String>,

    /// Whether the abstract was summarized before image generation
    /// (visual abstracts only)
    pub summarized: Option<bool>,
}

impl ImageBody {
    fn new(image: Option<String>, path: Option<String>) -> Self {
        Self {
            image,
            path,
            mime_type: PNG_MIME.to_string(),
            citation: None,
            summarized: None,
        }
    }
}

/// Image result. The `binary` output is the bare PNG; citation and
/// summary flag are only carried by the JSON representations.
#[derive(ApiResponse)]
#[oai(bad_request_handler = "image_bad_request")]
pub enum ImageResponse {
    #[oai(status = 200, content_type = "image/png")]
    Binary(Attachment<Vec<u8>>),

    #[oai(status = 200, content_type = "application/json")]
    Body(Json<ImageBody>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorResponse>),

    #[oai(status = 502)]
    BadGateway(Json<ErrorResponse>),

    #[oai(status = 504)]
    GatewayTimeout(Json<ErrorResponse>),

    #[oai(status = 500)]
    InternalServerError(Json<ErrorResponse>),
}

impl From<EncodedImage> for ImageResponse {
    fn from(image: EncodedImage) -> Self {
        match image {
            EncodedImage::Png(bytes) => ImageResponse::Binary(Attachment::new(bytes)),
            EncodedImage::Base64(image) | EncodedImage::DataUrl(image) => {
                ImageResponse::Body(Json(ImageBody::new(Some(image), None)))
            }
            EncodedImage::File(path) => {
                ImageResponse::Body(Json(ImageBody::new(None, Some(path.display().to_string()))))
            }
        }
    }
}

impl ImageResponse {
    pub fn error(body: ErrorResponse, err: &PipelineError) -> Self {
        match error_status(err) {
            ErrorStatus::BadRequest => ImageResponse::BadRequest(Json(body)),
            ErrorStatus::BadGateway => ImageResponse::BadGateway(Json(body)),
            ErrorStatus::GatewayTimeout => ImageResponse::GatewayTimeout(Json(body)),
            ErrorStatus::Internal => ImageResponse::InternalServerError(Json(body)),
        }
    }

    /// Attaches article details to a JSON body. Binary responses are left
    /// as they are.
    pub fn with_details(mut self, citation: String, summarized: bool) -> Self {
        if let ImageResponse::Body(Json(body)) = &mut self {
            body.citation = Some(citation);
            body.summarized = Some(summarized);
        }
        self
    }
}

fn image_bad_request(err: poem::Error) -> ImageResponse {
    let err = PipelineError::InvalidParameter(err.to_string());
    ImageResponse::BadRequest(Json(ErrorResponse::new(
        "schemas.abstracts",
        "image_bad_request",
        INVALID_REQUEST,
        &err,
    )))
}

#[derive(ApiResponse)]
#[oai(bad_request_handler = "metadata_bad_request")]
pub enum MetadataApiResponse {
    #[oai(status = 200, content_type = "application/json")]
    Ok(Json<MetadataResponse>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorResponse>),

    #[oai(status = 502)]
    BadGateway(Json<ErrorResponse>),

    #[oai(status = 504)]
    GatewayTimeout(Json<ErrorResponse>),

    #[oai(status = 500)]
    InternalServerError(Json<ErrorResponse>),
}

impl MetadataApiResponse {
    pub fn error(body: ErrorResponse, err: &PipelineError) -> Self {
        match error_status(err) {
            ErrorStatus::BadRequest => MetadataApiResponse::BadRequest(Json(body)),
            ErrorStatus::BadGateway => MetadataApiResponse::BadGateway(Json(body)),
            ErrorStatus::GatewayTimeout => MetadataApiResponse::GatewayTimeout(Json(body)),
            ErrorStatus::Internal => MetadataApiResponse::InternalServerError(Json(body)),
        }
    }
}

fn metadata_bad_request(err: poem::Error) -> MetadataApiResponse {
    let err = PipelineError::InvalidParameter(err.to_string());
    MetadataApiResponse::BadRequest(Json(ErrorResponse::new(
        "schemas.abstracts",
        "metadata_bad_request",
        INVALID_REQUEST,
        &err,
    )))
}

#[derive(Debug, PartialEq, Eq)]
enum ErrorStatus {
    BadRequest,
    BadGateway,
    GatewayTimeout,
    Internal,
}

fn error_status(err: &PipelineError) -> ErrorStatus {
    if err.is_client_error() {
        return ErrorStatus::BadRequest;
    }
    match err.root() {
        PipelineError::Timeout(_) => ErrorStatus::GatewayTimeout,
        PipelineError::Internal(_) => ErrorStatus::Internal,
        _ => ErrorStatus::BadGateway,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::error::Stage;

    #[test]
    fn status_follows_error_kind() {
        let cases = [
            (PipelineError::InvalidParameter("doi".into()), ErrorStatus::BadRequest),
            (PipelineError::upstream("openai", "HTTP 500"), ErrorStatus::BadGateway),
            (PipelineError::ImageDecode("bad png".into()), ErrorStatus::BadGateway),
            (PipelineError::Timeout(Duration::from_secs(1)), ErrorStatus::GatewayTimeout),
            (PipelineError::internal("task panicked"), ErrorStatus::Internal),
        ];
        for (err, expected) in cases {
            assert_eq!(error_status(&err.at(Stage::Compose)), expected);
        }
    }

    #[test]
    fn details_only_touch_json_bodies() {
        let body = ImageResponse::from(EncodedImage::Base64("AAAA".into()))
            .with_details("Cite me.".into(), true);
        let ImageResponse::Body(Json(body)) = body else {
            panic!("expected JSON body");
        };
        assert_eq!(body.citation.as_deref(), Some("Cite me."));
        assert_eq!(body.summarized, Some(true));

        let binary = ImageResponse::from(EncodedImage::Png(vec![1, 2, 3]))
            .with_details("Cite me.".into(), false);
        assert!(matches!(binary, ImageResponse::Binary(_)));
    }
}
