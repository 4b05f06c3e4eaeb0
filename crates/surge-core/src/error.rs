use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a scenario.
///
/// Every variant is fatal at startup: a run never begins with a
/// configuration that failed to produce one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading a scenario file
    #[error("Failed to read scenario file {path:?}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("Failed to parse scenario TOML{}: {source}", display_path(.path))]
    TomlError {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },

    /// Duration string that humantime could not parse
    #[error("Invalid duration `{value}` for {field}: {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    /// Threshold expression that does not follow `aggregation op number`
    #[error("Invalid threshold `{expression}` on {metric}: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    /// Environment variable holding a value of the wrong shape
    #[error("Invalid value `{value}` in environment variable {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// Unknown preset name
    #[error("Unknown preset `{0}` (available: staged-demo, amplified, baseline)")]
    UnknownPreset(String),

    /// Validation error
    #[error("Scenario validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Creates a `ValidationError` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

/// Convenient result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
