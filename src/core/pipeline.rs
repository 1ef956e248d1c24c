use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;

use super::compositor::{self, Placement};
use super::doi::Doi;
use super::error::{PipelineError, Result, Stage};
use super::metadata::{ArticleMetadata, MetadataProvider};
use super::openai::{ImageGenerator, Summarizer};
use super::output::encode_png;
use super::qr::{self, QrOptions};
use super::source::ImageSource;

pub const DEFAULT_SUMMARIZE_THRESHOLD: usize = 800;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Abstracts longer than this many characters are summarized first.
    pub summarize_threshold: usize,
    pub image_size: String,
    pub qr: QrOptions,
    pub placement: Placement,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub doi: String,
    pub abstract_text: Option<String>,
    pub citation: Option<String>,
    /// Overrides of the configured defaults.
    pub qr: Option<QrOptions>,
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone)]
pub struct VisualAbstract {
    pub doi: Doi,
    pub citation: String,
    pub summarized: bool,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// DOI -> metadata -> summary -> generated image -> QR overlay -> PNG.
pub struct Pipeline {
    http: reqwest::Client,
    metadata: Arc<dyn MetadataProvider>,
    summarizer: Arc<dyn Summarizer>,
    generator: Arc<dyn ImageGenerator>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        http: reqwest::Client,
        metadata: Arc<dyn MetadataProvider>,
        summarizer: Arc<dyn Summarizer>,
        generator: Arc<dyn ImageGenerator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            http,
            metadata,
            summarizer,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn fetch_metadata(&self, doi: &str) -> Result<ArticleMetadata> {
        let doi = Doi::parse(doi).map_err(|e| e.at(Stage::Metadata))?;
        self.metadata.fetch(&doi).await.map_err(|e| e.at(Stage::Metadata))
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<VisualAbstract> {
        let doi = Doi::parse(&request.doi).map_err(|e| e.at(Stage::Generate))?;
        let placement = request.placement.unwrap_or(self.config.placement);
        placement.validate().map_err(|e| e.at(Stage::Compose))?;
        let qr_options = request.qr.unwrap_or_else(|| self.config.qr.clone());

        let supplied = request.abstract_text.filter(|a| !a.trim().is_empty());
        let supplied_citation = request.citation.filter(|c| !c.trim().is_empty());
        let (abstract_text, citation) = match supplied {
            Some(text) => (text, supplied_citation.unwrap_or_default()),
            None => {
                let meta = self.metadata.fetch(&doi).await.map_err(|e| e.at(Stage::Metadata))?;
                (meta.abstract_text, supplied_citation.unwrap_or(meta.citation))
            }
        };

        let summarized = abstract_text.chars().count() > self.config.summarize_threshold;
        let abstract_text = if summarized {
            self.summarizer
                .summarize(&abstract_text, self.config.summarize_threshold)
                .await
                .map_err(|e| e.at(Stage::Summarize))?
        } else {
            abstract_text
        };

        let prompt = build_prompt(&abstract_text);
        tracing::info!(
            "Generating visual abstract: doi={}, summarized={}, prompt={} chars",
            doi,
            summarized,
            prompt.chars().count()
        );
        let base = self
            .generator
            .generate(&prompt, &self.config.image_size)
            .await
            .map_err(|e| e.at(Stage::Generate))?;

        let composed = self
            .compose(base, doi.resolver_url(), qr_options, placement)
            .await
            .map_err(|e| e.at(Stage::Compose))?;
        let (width, height) = composed.dimensions();
        let png = tokio::task::spawn_blocking(move || encode_png(&composed))
            .await
            .map_err(|e| {
                PipelineError::internal(format!("encode task failed: {e}")).at(Stage::Compose)
            })?
            .map_err(|e| e.at(Stage::Compose))?;

        tracing::info!(
            "Visual abstract ready: doi={}, {}x{}, {} bytes",
            doi,
            width,
            height,
            png.len()
        );

        Ok(VisualAbstract {
            doi,
            citation,
            summarized,
            width,
            height,
            png,
        })
    }

    /// Loads the base image and renders the QR code concurrently, then draws
    /// the code onto the base.
    pub async fn compose(
        &self,
        base: ImageSource,
        payload: String,
        qr_options: QrOptions,
        placement: Placement,
    ) -> Result<RgbaImage> {
        let overlay = async {
            tokio::task::spawn_blocking(move || qr::encode(&payload, &qr_options))
                .await
                .map_err(|e| PipelineError::internal(format!("QR task failed: {e}")))?
        };
        let (base, overlay) = tokio::try_join!(base.load(&self.http), overlay)?;

        tokio::task::spawn_blocking(move || compositor::composite(&base, &overlay, &placement))
            .await
            .map_err(|e| PipelineError::internal(format!("composite task failed: {e}")))?
    }

    /// Renders a standalone QR code as PNG.
    pub async fn qr_png(&self, text: String, options: Option<QrOptions>) -> Result<Vec<u8>> {
        let options = options.unwrap_or_else(|| self.config.qr.clone());
        tokio::task::spawn_blocking(move || {
            let image = qr::encode(&text, &options)?;
            encode_png(&image)
        })
        .await
        .map_err(|e| PipelineError::internal(format!("QR task failed: {e}")))?
    }
}

pub fn build_prompt(abstract_text: &str) -> String {
    format!(
        "Create a clean, minimal infographic representing the following study:\n\
         {abstract_text}\n\n\
         Use icons, arrows, simple shapes.\n\
         No fake text, no hallucinated letters.\n\
         Minimalistic, social-media ready style."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::Rgba;
    use std::sync::Mutex;

    struct FixedMetadata;

    #[async_trait]
    impl MetadataProvider for FixedMetadata {
        async fn fetch(&self, _doi: &Doi) -> Result<ArticleMetadata> {
            Ok(ArticleMetadata {
                title: "Paper".to_string(),
                abstract_text: "a".repeat(900),
                citation: "Paper. Journal 2024.".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSummarizer {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Summarizer for RecordingSummarizer {
        async fn summarize(&self, _text: &str, _max_chars: usize) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok("short".to_string())
        }
    }

    struct SolidGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageGenerator for SolidGenerator {
        async fn generate(&self, prompt: &str, _size: &str) -> Result<ImageSource> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let png = encode_png(&RgbaImage::from_pixel(400, 300, Rgba([0, 128, 255, 255])))?;
            Ok(ImageSource::Bytes(png))
        }
    }

    fn pipeline(summarizer: Arc<RecordingSummarizer>, generator: Arc<SolidGenerator>) -> Pipeline {
        Pipeline::new(
            reqwest::Client::new(),
            Arc::new(FixedMetadata),
            summarizer,
            generator,
            PipelineConfig {
                summarize_threshold: DEFAULT_SUMMARIZE_THRESHOLD,
                image_size: "1024x1024".to_string(),
                qr: QrOptions::default(),
                placement: Placement::default(),
                output_dir: std::env::temp_dir(),
            },
        )
    }

    fn generator() -> Arc<SolidGenerator> {
        Arc::new(SolidGenerator {
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn fetches_and_summarizes_missing_abstract() {
        let summarizer = Arc::new(RecordingSummarizer::default());
        let generator = generator();
        let pipeline = pipeline(summarizer.clone(), generator.clone());

        let result = pipeline
            .generate(GenerateRequest {
                doi: "https://doi.org/10.1000/xyz".to_string(),
                ..GenerateRequest::default()
            })
            .await
            .unwrap();

        assert!(result.summarized);
        assert_eq!(*summarizer.calls.lock().unwrap(), 1);
        assert_eq!(result.citation, "Paper. Journal 2024.");
        assert_eq!((result.width, result.height), (400, 300));
        assert!(generator.prompts.lock().unwrap()[0].contains("short"));

        let decoded = crate::core::source::decode(&result.png).unwrap();
        assert_eq!(decoded.dimensions(), (400, 300));
        assert_eq!(*decoded.get_pixel(0, 0), Rgba([0, 128, 255, 255]));
        // Quiet zone of the QR code, inside the 100px overlay at (280, 180).
        assert_eq!(*decoded.get_pixel(281, 181), Rgba([255, 255, 255, 255]));
    }

    #[tokio::test]
    async fn short_supplied_abstract_skips_summary_and_metadata() {
        let summarizer = Arc::new(RecordingSummarizer::default());
        let generator = generator();
        let pipeline = pipeline(summarizer.clone(), generator.clone());

        let result = pipeline
            .generate(GenerateRequest {
                doi: "10.1000/xyz".to_string(),
                abstract_text: Some("A compact abstract.".to_string()),
                citation: Some("Cite me.".to_string()),
                ..GenerateRequest::default()
            })
            .await
            .unwrap();

        assert!(!result.summarized);
        assert_eq!(*summarizer.calls.lock().unwrap(), 0);
        assert_eq!(result.citation, "Cite me.");
        assert!(generator.prompts.lock().unwrap()[0].contains("A compact abstract."));
    }

    #[tokio::test]
    async fn invalid_doi_fails_before_any_call() {
        let generator = generator();
        let pipeline = pipeline(Arc::new(RecordingSummarizer::default()), generator.clone());

        let err = pipeline
            .generate(GenerateRequest {
                doi: "not-a-doi".to_string(),
                ..GenerateRequest::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "invalid_parameter");
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_base_image_is_decode_error_at_compose() {
        let pipeline = pipeline(Arc::new(RecordingSummarizer::default()), generator());
        let err = pipeline
            .compose(
                ImageSource::Bytes(vec![0, 1, 2, 3]),
                "https://doi.org/10.1000/xyz".to_string(),
                QrOptions::default(),
                Placement::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "image_decode_error");
    }

    #[test]
    fn prompt_embeds_abstract() {
        let prompt = build_prompt("Cells divide.");
        assert!(prompt.starts_with("Create a clean, minimal infographic"));
        assert!(prompt.contains("Cells divide.\n\nUse icons"));
    }
}
