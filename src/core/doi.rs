use std::fmt;

use super::error::{PipelineError, Result};

const RESOLVER: &str = "https://doi.org/";

/// A DOI stripped of resolver and scheme prefixes, e.g. `10.1038/nature14539`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doi(String);

impl Doi {
    pub fn parse(input: &str) -> Result<Self> {
        let mut rest = input.trim();
        for scheme in ["https://", "http://"] {
            if let Some(s) = rest.strip_prefix(scheme) {
                rest = s;
            }
        }
        for host in ["dx.doi.org/", "doi.org/"] {
            if let Some(s) = rest.strip_prefix(host) {
                rest = s;
            }
        }
        for prefix in ["doi:", "DOI:"] {
            if let Some(s) = rest.strip_prefix(prefix) {
                rest = s.trim_start();
            }
        }

        let invalid = || PipelineError::InvalidParameter(format!("invalid DOI: {input:?}"));
        if !rest.starts_with("10.") {
            return Err(invalid());
        }
        let (_, suffix) = rest.split_once('/').ok_or_else(invalid)?;
        if suffix.is_empty() || rest.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self(rest.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `https://doi.org/<doi>`, the payload of the QR code.
    pub fn resolver_url(&self) -> String {
        format!("{RESOLVER}{}", self.0)
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
