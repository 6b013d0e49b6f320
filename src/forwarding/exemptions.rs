//! Static "always local" path rules.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Error compiling an exemption rule.
#[derive(Debug, thiserror::Error)]
pub enum ExemptionError {
    #[error("invalid exemption pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("exemption path '{0}' must start with '/'")]
    NotAbsolute(String),
}

/// Configuration form of an exemption, e.g. `{ exact = "/-/health" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemptionConfig {
    /// The canonical path equals this value.
    Exact(String),
    /// The canonical path is this value or lies below it.
    Prefix(String),
    /// The canonical path fully matches this regex.
    Pattern(String),
}

/// Health probes and content-addressed LFS object reads.
pub fn default_exemptions() -> Vec<ExemptionConfig> {
    vec![
        ExemptionConfig::Exact("/-/health".to_string()),
        ExemptionConfig::Exact("/-/readiness".to_string()),
        ExemptionConfig::Exact("/-/liveness".to_string()),
        ExemptionConfig::Pattern(r".+\.git/gitlab-lfs/objects/[0-9a-f]{64}".to_string()),
    ]
}

/// A compiled predicate over canonical paths.
#[derive(Debug, Clone)]
pub enum ExemptionRule {
    Exact(String),
    Prefix(String),
    Pattern(Regex),
}

impl ExemptionRule {
    pub fn exact(path: impl Into<String>) -> Result<Self, ExemptionError> {
        Ok(Self::Exact(absolute(path.into())?))
    }

    pub fn prefix(path: impl Into<String>) -> Result<Self, ExemptionError> {
        Ok(Self::Prefix(absolute(path.into())?))
    }

    /// Compile an anchored pattern.
    pub fn pattern(pattern: &str) -> Result<Self, ExemptionError> {
        Regex::new(&format!(r"\A(?:{})\z", pattern))
            .map(Self::Pattern)
            .map_err(|source| ExemptionError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn matches(&self, canonical_path: &str) -> bool {
        match self {
            Self::Exact(path) => canonical_path == path,
            Self::Prefix(prefix) if prefix.ends_with('/') => canonical_path.starts_with(prefix.as_str()),
            Self::Prefix(prefix) => {
                canonical_path == prefix
                    || canonical_path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            Self::Pattern(regex) => regex.is_match(canonical_path),
        }
    }
}

impl TryFrom<&ExemptionConfig> for ExemptionRule {
    type Error = ExemptionError;

    fn try_from(config: &ExemptionConfig) -> Result<Self, Self::Error> {
        match config {
            ExemptionConfig::Exact(path) => Self::exact(path.clone()),
            ExemptionConfig::Prefix(path) => Self::prefix(path.clone()),
            ExemptionConfig::Pattern(pattern) => Self::pattern(pattern),
        }
    }
}

/// Compile a list of configured exemptions, failing on the first bad one.
pub fn compile(configs: &[ExemptionConfig]) -> Result<Vec<ExemptionRule>, ExemptionError> {
    configs.iter().map(ExemptionRule::try_from).collect()
}

fn absolute(path: String) -> Result<String, ExemptionError> {
    if path.starts_with('/') {
        Ok(path)
    } else {
        Err(ExemptionError::NotAbsolute(path))
    }
}
