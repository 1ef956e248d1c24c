use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};
use super::source::ImageSource;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o";
pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

const SUMMARY_MAX_TOKENS: u32 = 400;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Shortens `text` to at most roughly `max_chars` characters.
    async fn summarize(&self, text: &str, max_chars: usize) -> Result<String>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns where the generated image can be loaded from.
    async fn generate(&self, prompt: &str, size: &str) -> Result<ImageSource>;
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub summary_model: String,
    pub image_model: String,
}

/// Client for an OpenAI-compatible API. Built once at startup and shared
/// through `AppState`.
pub struct OpenAiClient {
    http: reqwest::Client,
    settings: OpenAiSettings,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, settings: OpenAiSettings) -> Self {
        Self { http, settings }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::unreachable(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let detail: String = resp.text().await.unwrap_or_default().chars().take(300).collect();
            return Err(PipelineError::upstream(
                "openai",
                format!("HTTP {status} from {path}: {detail}"),
            ));
        }

        resp.json::<R>().await.map_err(|e| {
            PipelineError::upstream("openai", format!("unexpected {path} response: {e}"))
        })
    }
}

fn summary_instruction(max_chars: usize) -> String {
    format!(
        "You are an expert scientific writer. Summarize research abstracts into \
         <= {max_chars} characters while keeping key ideas clear and accurate."
    )
}

#[async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(&self, text: &str, max_chars: usize) -> Result<String> {
        let instruction = summary_instruction(max_chars);
        let request = ChatRequest {
            model: &self.settings.summary_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &instruction,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: SUMMARY_MAX_TOKENS,
        };

        let resp: ChatResponse = self.post("chat/completions", &request).await?;
        let summary = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PipelineError::upstream("openai", "summary response had no content"))?;

        tracing::info!(
            "Summarized abstract: {} -> {} chars",
            text.chars().count(),
            summary.chars().count()
        );
        Ok(summary)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str, size: &str) -> Result<ImageSource> {
        let request = ImageRequest {
            model: &self.settings.image_model,
            prompt,
            n: 1,
            size,
        };

        let resp: ImageResponse = self.post("images/generations", &request).await?;
        let datum = resp
            .data
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::upstream("openai", "image response had no data"))?;

        match (datum.b64_json, datum.url) {
            (Some(b64), _) if !b64.is_empty() => Ok(ImageSource::Base64(b64)),
            (_, Some(url)) if !url.is_empty() => Ok(ImageSource::Url(url)),
            _ => Err(PipelineError::upstream("openai", "no image payload received")),
        }
    }
}
