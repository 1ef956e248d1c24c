use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::doi::Doi;
use super::error::{PipelineError, Result};

pub const CROSSREF_API_BASE: &str = "https://api.crossref.org";

const UNTITLED: &str = "Untitled";
const NO_ABSTRACT: &str = "No abstract available.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleMetadata {
    pub title: String,
    pub abstract_text: String,
    pub citation: String,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch(&self, doi: &Doi) -> Result<ArticleMetadata>;
}

pub struct CrossRefClient {
    http: reqwest::Client,
    base_url: String,
}

impl CrossRefClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetadataProvider for CrossRefClient {
    async fn fetch(&self, doi: &Doi) -> Result<ArticleMetadata> {
        let url = format!("{}/works/{}", self.base_url, doi);
        tracing::info!("Fetching CrossRef metadata: doi={}", doi);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::unreachable(&url, e))?;
        if !resp.status().is_success() {
            return Err(PipelineError::upstream(
                "crossref",
                format!("HTTP {} for {}", resp.status(), doi),
            ));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| PipelineError::upstream("crossref", e))?;
        let work = body
            .get("message")
            .filter(|m| m.is_object())
            .ok_or_else(|| PipelineError::upstream("crossref", "response has no message object"))?;

        Ok(work_to_metadata(work))
    }
}

fn work_to_metadata(work: &Value) -> ArticleMetadata {
    let title = first_str(&work["title"])
        .map(strip_markup)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let abstract_text = work["abstract"]
        .as_str()
        .map(strip_markup)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| NO_ABSTRACT.to_string());

    let container = first_str(&work["container-title"]).map(strip_markup);
    let year = work["issued"]["date-parts"][0][0].as_u64().map(|y| y.to_string());
    let venue = [container, year]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let citation = if venue.is_empty() {
        format!("{title}.")
    } else {
        format!("{title}. {venue}.")
    };

    ArticleMetadata {
        title,
        abstract_text,
        citation,
    }
}

fn first_str(value: &Value) -> Option<&str> {
    value.as_array().and_then(|a| a.first()).and_then(Value::as_str)
}

/// Drops JATS/HTML tags and collapses whitespace.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
