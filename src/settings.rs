use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::Level;

use crate::core::compositor::{
    DEFAULT_FIXED_MARGIN, DEFAULT_FIXED_SIZE, DEFAULT_MARGIN_FRACTION, DEFAULT_WIDTH_FRACTION,
    Placement,
};
use crate::core::error::PipelineError;
use crate::core::metadata::CROSSREF_API_BASE;
use crate::core::openai::{
    DEFAULT_IMAGE_MODEL, DEFAULT_IMAGE_SIZE, DEFAULT_SUMMARY_MODEL, OPENAI_API_BASE, OpenAiSettings,
};
use crate::core::pipeline::{DEFAULT_SUMMARIZE_THRESHOLD, PipelineConfig};
use crate::core::qr::{
    DEFAULT_QR_MARGIN, DEFAULT_QR_SIZE, ErrorCorrection, QrOptions, parse_hex_color,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_env")]
    pub env: String, // file / server
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub prefix: Option<String>,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_image_size")]
    pub image_size: String,
    #[serde(default = "default_crossref_base_url")]
    pub crossref_base_url: String,

    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// `fixed` or `proportional`
    #[serde(default = "default_placement")]
    pub placement: String,
    /// Fixed policy overlay width in pixels; 0 keeps the QR code's own size.
    #[serde(default = "default_overlay_size")]
    pub overlay_size: u32,
    #[serde(default = "default_overlay_margin")]
    pub overlay_margin: u32,
    #[serde(default = "default_overlay_width_fraction")]
    pub overlay_width_fraction: f64,
    #[serde(default = "default_overlay_margin_fraction")]
    pub overlay_margin_fraction: f64,

    #[serde(default = "default_qr_error_correction")]
    pub qr_error_correction: String,
    #[serde(default = "default_qr_size")]
    pub qr_size: u32,
    #[serde(default = "default_qr_margin")]
    pub qr_margin: u32,
    #[serde(default = "default_qr_foreground")]
    pub qr_foreground: String,
    #[serde(default = "default_qr_background")]
    pub qr_background: String,
}

fn default_env() -> String {
    "file".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_log_dir() -> String {
    "./logs".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_openai_base_url() -> String {
    OPENAI_API_BASE.to_string()
}
fn default_summary_model() -> String {
    DEFAULT_SUMMARY_MODEL.to_string()
}
fn default_image_model() -> String {
    DEFAULT_IMAGE_MODEL.to_string()
}
fn default_image_size() -> String {
    DEFAULT_IMAGE_SIZE.to_string()
}
fn default_crossref_base_url() -> String {
    CROSSREF_API_BASE.to_string()
}
fn default_summarize_threshold() -> usize {
    DEFAULT_SUMMARIZE_THRESHOLD
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_http_timeout_secs() -> u64 {
    60
}
fn default_output_dir() -> String {
    env::temp_dir().join("visual-abstract").display().to_string()
}
fn default_placement() -> String {
    "fixed".to_string()
}
fn default_overlay_size() -> u32 {
    DEFAULT_FIXED_SIZE
}
fn default_overlay_margin() -> u32 {
    DEFAULT_FIXED_MARGIN
}
fn default_overlay_width_fraction() -> f64 {
    DEFAULT_WIDTH_FRACTION
}
fn default_overlay_margin_fraction() -> f64 {
    DEFAULT_MARGIN_FRACTION
}
fn default_qr_error_correction() -> String {
    "high".to_string()
}
fn default_qr_size() -> u32 {
    DEFAULT_QR_SIZE
}
fn default_qr_margin() -> u32 {
    DEFAULT_QR_MARGIN
}
fn default_qr_foreground() -> String {
    "#000000".to_string()
}
fn default_qr_background() -> String {
    "#ffffff".to_string()
}

impl Config {
    /// Builds a config from `(name, value)` pairs, applying defaults for
    /// everything missing.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Config = envy::from_iter(vars).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.placement().context("invalid overlay placement")?;
        self.qr_options().context("invalid QR options")?;
        Level::from_str(&self.log_level)
            .map_err(|_| anyhow::anyhow!("invalid log level: {}", self.log_level))?;
        Ok(())
    }

    /// Where the values were read from. Config is loaded before logging is
    /// set up, so the binary reports this once the subscriber exists.
    pub fn source(&self) -> &'static str {
        if self.env == "file" {
            ".env file"
        } else {
            "server environment"
        }
    }

    pub fn log_level(&self) -> Level {
        Level::from_str(&self.log_level).unwrap_or(Level::INFO)
    }

    pub fn placement(&self) -> Result<Placement, PipelineError> {
        let placement = match self.placement.trim().to_ascii_lowercase().as_str() {
            "fixed" => Placement::Fixed {
                size: (self.overlay_size > 0).then_some(self.overlay_size),
                margin: self.overlay_margin,
            },
            "proportional" => Placement::Proportional {
                width_fraction: self.overlay_width_fraction,
                margin_fraction: self.overlay_margin_fraction,
            },
            other => {
                return Err(PipelineError::InvalidParameter(format!(
                    "unknown placement policy: {other}"
                )));
            }
        };
        placement.validate()?;
        Ok(placement)
    }

    pub fn qr_options(&self) -> Result<QrOptions, PipelineError> {
        Ok(QrOptions {
            error_correction: ErrorCorrection::from_str(&self.qr_error_correction)?,
            size: self.qr_size,
            margin: self.qr_margin,
            foreground: parse_hex_color(&self.qr_foreground)?,
            background: parse_hex_color(&self.qr_background)?,
        })
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        Ok(PipelineConfig {
            summarize_threshold: self.summarize_threshold,
            image_size: self.image_size.clone(),
            qr: self.qr_options()?,
            placement: self.placement()?,
            output_dir: PathBuf::from(&self.output_dir),
        })
    }

    pub fn openai_settings(&self) -> OpenAiSettings {
        OpenAiSettings {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            summary_model: self.summary_model.clone(),
            image_model: self.image_model.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

pub fn get_config() -> Result<Config> {
    let env_var = env::var("ENV").unwrap_or("file".to_string());
    if env_var == "file" {
        let _ = dotenvy::dotenv();
    }
    let mut config = Config::from_vars(env::vars())?;
    config.env = env_var;
    Ok(config)
}
