use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use poem::web::Data;
use poem_openapi::{OpenApi, Tags, payload::Json};

use crate::{
    AppState,
    core::{
        error::{PipelineError, Result},
        output, pipeline,
    },
    schemas::{
        abstracts::{
            GenerateRequest, ImageResponse, MetadataApiResponse, MetadataRequest, QrCodeRequest,
        },
        common::{ErrorResponse, HealthResponse},
    },
};

const METADATA_FAILED: &str = "Failed to retrieve article metadata.";
const GENERATE_FAILED: &str = "Failed to generate visual abstract.";
const QRCODE_FAILED: &str = "Failed to generate QR code.";

#[derive(Tags)]
enum ApiAbstractTags {
    Metadata,
    VisualAbstract,
    QrCode,
}

pub struct ApiAbstract;

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| PipelineError::Timeout(limit))?
}

#[OpenApi()]
impl ApiAbstract {
    /// Article metadata
    ///
    /// Look up an article on CrossRef and return its abstract and a
    /// citation line.
    #[oai(path = "/metadata", method = "post", tag = "ApiAbstractTags::Metadata")]
    async fn metadata(
        &self,
        Json(json): Json<MetadataRequest>,
        state: Data<&Arc<AppState>>,
    ) -> MetadataApiResponse {
        tracing::info!("Fetching metadata: doi={}", json.doi);

        let lookup = state.pipeline.fetch_metadata(&json.doi);
        match with_timeout(state.request_timeout, lookup).await {
            Ok(meta) => MetadataApiResponse::Ok(Json(meta.into())),
            Err(e) => {
                let body = ErrorResponse::new("route.abstracts", "metadata", METADATA_FAILED, &e);
                MetadataApiResponse::error(body, &e)
            }
        }
    }

    /// Generate visual abstract
    ///
    /// Summarize the abstract when it is long, generate an infographic for
    /// it and overlay a QR code linking to the DOI.
    ///
    /// # Example Request
    /// ```json
    /// {
    ///   "doi": "10.1038/nature14539",
    ///   "options": {
    ///     "output": "base64",
    ///     "placement": {
    ///       "policy": "proportional",
    ///       "width_fraction": 0.12,
    ///       "margin_fraction": 0.02
    ///     }
    ///   }
    /// }
    /// ```
    #[oai(path = "/generate", method = "post", tag = "ApiAbstractTags::VisualAbstract")]
    async fn generate(
        &self,
        Json(json): Json<GenerateRequest>,
        state: Data<&Arc<AppState>>,
    ) -> ImageResponse {
        tracing::info!("Generating visual abstract: doi={}", json.doi);

        let fail = |e: PipelineError| {
            let body = ErrorResponse::new("route.abstracts", "generate", GENERATE_FAILED, &e);
            ImageResponse::error(body, &e)
        };

        let options = json.options.unwrap_or_default();
        let output_format = options.output.unwrap_or_default();
        let placement = match options.placement.as_ref().map(|p| p.to_placement()).transpose() {
            Ok(placement) => placement,
            Err(e) => return fail(e),
        };
        let defaults = &state.pipeline.config().qr;
        let qr = match options.qr.as_ref().map(|q| q.resolve(defaults)).transpose() {
            Ok(qr) => qr,
            Err(e) => return fail(e),
        };

        let request = pipeline::GenerateRequest {
            doi: json.doi,
            abstract_text: json.abstract_text,
            citation: json.citation,
            qr,
            placement,
        };

        let pipeline = &state.pipeline;
        let result = with_timeout(state.request_timeout, async move {
            let visual = pipeline.generate(request).await?;
            let encoded = output::deliver(
                visual.png,
                output_format,
                &pipeline.config().output_dir,
                visual.doi.as_str(),
            )
            .await?;
            Ok::<_, PipelineError>((encoded, visual.citation, visual.summarized))
        })
        .await;

        match result {
            Ok((encoded, citation, summarized)) => {
                ImageResponse::from(encoded).with_details(citation, summarized)
            }
            Err(e) => fail(e),
        }
    }

    /// QR code
    ///
    /// Render arbitrary text as a QR code image.
    #[oai(path = "/qrcode", method = "post", tag = "ApiAbstractTags::QrCode")]
    async fn qrcode(
        &self,
        Json(json): Json<QrCodeRequest>,
        state: Data<&Arc<AppState>>,
    ) -> ImageResponse {
        let fail = |e: PipelineError| {
            let body = ErrorResponse::new("route.abstracts", "qrcode", QRCODE_FAILED, &e);
            ImageResponse::error(body, &e)
        };

        let defaults = &state.pipeline.config().qr;
        let options = match json.options.as_ref().map(|q| q.resolve(defaults)).transpose() {
            Ok(options) => options,
            Err(e) => return fail(e),
        };

        let pipeline = &state.pipeline;
        let result = with_timeout(state.request_timeout, async move {
            let png = pipeline.qr_png(json.text, options).await?;
            let format = json.output.unwrap_or_default();
            output::deliver(png, format, &pipeline.config().output_dir, "qrcode").await
        })
        .await;

        match result {
            Ok(encoded) => encoded.into(),
            Err(e) => fail(e),
        }
    }

    #[oai(path = "/health", method = "get")]
    async fn health(&self) -> Json<HealthResponse> {
        Json(HealthResponse::default())
    }
}
