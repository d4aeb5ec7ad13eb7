//! CTIX Configuration Management
//!
//! Handles configuration from environment variables, config files,
//! and command-line arguments with sensible defaults for local runs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Entity matching rules
    pub matching: MatchingConfig,

    /// Batch input/output layout
    pub batch: BatchConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Batch layout
        if let Ok(dir) = std::env::var("CTIX_RESULTS_DIR") {
            config.batch.results_dir = dir.into();
        }
        if let Ok(dir) = std::env::var("CTIX_RELATIONSHIP_DIR") {
            config.batch.relationship_dir = dir.into();
        }
        if let Ok(dir) = std::env::var("CTIX_OUTPUT_DIR") {
            config.batch.output_dir = dir.into();
        }
        if let Ok(n) = std::env::var("CTIX_CONCURRENCY") {
            config.batch.concurrency = parse_var("CTIX_CONCURRENCY", n)?;
        }

        // Matching
        if let Ok(n) = std::env::var("CTIX_MIN_SHARED_TOKENS") {
            config.matching.min_shared_tokens = parse_var("CTIX_MIN_SHARED_TOKENS", n)?;
        }
        if let Ok(n) = std::env::var("CTIX_MIN_CONTAINMENT_LEN") {
            config.matching.min_containment_len = parse_var("CTIX_MIN_CONTAINMENT_LEN", n)?;
        }

        // Logging
        if let Ok(level) = std::env::var("CTIX_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = std::env::var("CTIX_LOG_JSON") {
            config.logging.json_format = parse_var("CTIX_LOG_JSON", json)?;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let batch_default = BatchConfig::default();
        let matching_default = MatchingConfig::default();

        // Only override if env values differ from defaults
        if env_config.batch.results_dir != batch_default.results_dir {
            self.batch.results_dir = env_config.batch.results_dir;
        }
        if env_config.batch.relationship_dir != batch_default.relationship_dir {
            self.batch.relationship_dir = env_config.batch.relationship_dir;
        }
        if env_config.batch.output_dir != batch_default.output_dir {
            self.batch.output_dir = env_config.batch.output_dir;
        }
        if env_config.batch.concurrency != batch_default.concurrency {
            self.batch.concurrency = env_config.batch.concurrency;
        }
        if env_config.matching.min_shared_tokens != matching_default.min_shared_tokens {
            self.matching.min_shared_tokens = env_config.matching.min_shared_tokens;
        }
        if env_config.matching.min_containment_len != matching_default.min_containment_len {
            self.matching.min_containment_len = env_config.matching.min_containment_len;
        }
        if env_config.logging.level != LoggingConfig::default().level {
            self.logging.level = env_config.logging.level;
        }
        if env_config.logging.json_format {
            self.logging.json_format = true;
        }

        Ok(self)
    }

    /// Check values that would make a run meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matching.min_shared_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "matching.min_shared_tokens".to_string(),
                value: "0".to_string(),
            });
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch.concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Entity matching configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Significant tokens a relation side must share with an entity key
    pub min_shared_tokens: usize,

    /// Shortest string (in chars) accepted as a containment match
    pub min_containment_len: usize,

    /// Allow the substring fallback after token overlap fails
    pub enable_containment: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_shared_tokens: 1,
            min_containment_len: 3,
            enable_containment: true,
        }
    }
}

/// Batch layout configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Root of the entity extraction results (contains `merged/`, `ioc/`, `kb/`, ...)
    pub results_dir: PathBuf,

    /// Directory holding `<base>_results.json` relation extraction files
    pub relationship_dir: PathBuf,

    /// Directory merged output is written to
    pub output_dir: PathBuf,

    /// Documents loaded and merged at once
    pub concurrency: usize,

    /// Pretty-print output JSON
    pub pretty_output: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("./results"),
            relationship_dir: PathBuf::from("./relationship"),
            output_dir: PathBuf::from("./merged_final"),
            concurrency: 8,
            pretty_output: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
