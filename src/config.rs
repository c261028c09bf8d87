//! Runtime configuration loaded from TOML

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::template::catalog::MATCH_THRESHOLD;

/// Errors that can occur when loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Settings for template matching and the command line tool
///
/// ```toml
/// match_threshold = 100
/// fallback_template = "{{ .Prompt }}"
/// log_filter = "chat_template=debug"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Catalog matches must have an edit distance strictly below this
    pub match_threshold: usize,
    /// Template used when no catalog entry matches
    pub fallback_template: String,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            match_threshold: MATCH_THRESHOLD,
            fallback_template: "{{ .Prompt }}".to_string(),
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string. Missing keys take their defaults.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_match_threshold(mut self, threshold: usize) -> Self {
        self.match_threshold = threshold;
        self
    }

    pub fn with_fallback_template(mut self, template: impl Into<String>) -> Self {
        self.fallback_template = template.into();
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}
