use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Pipeline stage a failure happened in. Used by the routes to pick the
/// user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Metadata,
    Summarize,
    Generate,
    Compose,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Metadata => "metadata",
            Stage::Summarize => "summarize",
            Stage::Generate => "generate",
            Stage::Compose => "compose",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("payload of {len} bytes exceeds QR capacity at error correction level {level}")]
    EncodingCapacityExceeded { len: usize, level: String },

    #[error("image decode error: {0}")]
    ImageDecode(String),

    #[error("unreachable source {location}: {reason}")]
    UnreachableSource { location: String, reason: String },

    #[error("upstream service {service} error: {reason}")]
    UpstreamService { service: &'static str, reason: String },

    #[error("request did not finish within {0:?}")]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{stage} stage failed: {source}")]
    AtStage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn unreachable(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::UnreachableSource {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn upstream(service: &'static str, reason: impl fmt::Display) -> Self {
        Self::UpstreamService {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn internal(reason: impl fmt::Display) -> Self {
        Self::Internal(reason.to_string())
    }

    /// Tags the error with the stage it escaped from. Already tagged errors
    /// keep their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            tagged @ Self::AtStage { .. } => tagged,
            other => Self::AtStage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::AtStage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Innermost error with the stage tag removed.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::AtStage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable machine-readable kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::EncodingCapacityExceeded { .. } => "encoding_capacity_exceeded",
            Self::ImageDecode(_) => "image_decode_error",
            Self::UnreachableSource { .. } => "unreachable_source",
            Self::UpstreamService { .. } => "upstream_service_error",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
            Self::AtStage { .. } => unreachable!("root() strips stage tags"),
        }
    }

    /// True when the caller supplied something unusable, as opposed to a
    /// failure of a collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidParameter(_) | Self::EncodingCapacityExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
