use poem_openapi::Object;

use crate::core::error::PipelineError;

#[derive(Object, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error body returned to clients. Carries a stable `kind` and a generic
/// per-stage message; the underlying cause only goes to the log.
#[derive(Object, Debug)]
pub struct ErrorResponse {
    pub kind: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(filepath: &str, function: &str, message: &str, err: &PipelineError) -> Self {
        let stage = err.stage().map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        tracing::error!(
            "error: on {}::{} stage: {} kind: {} error: {}",
            filepath,
            function,
            stage,
            err.kind(),
            err
        );
        Self {
            kind: err.kind().to_string(),
            message: message.to_string(),
        }
    }
}
