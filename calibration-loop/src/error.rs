//! Error type for the ops loop.

use contextor::ContextorError;
use rag_store::RagError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    /// Reading or appending a log/state file failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or unsupported configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Rejected operator input (e.g. out-of-range rating).
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Engine(#[from] ContextorError),

    #[error(transparent)]
    Store(#[from] RagError),
}

impl CalibrationError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        CalibrationError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
