use std::path::PathBuf;
use surge_core::ConfigError;
use thiserror::Error;

/// Errors that stop a run before it starts or while writing its results.
///
/// Individual request failures never surface here; they are recorded as
/// data in the run statistics.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Report or metrics file could not be written
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("metrics encoding error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Convenient result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
