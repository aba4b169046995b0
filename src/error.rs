use thiserror::Error;

use crate::client::ModelError;

/// Custom error type for pipeline and graph operations.
#[derive(Debug, Error)]
pub enum StationsError {
    /// The model client gave up on a request.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Requested entity was not found.
    #[error("Not found: {entity_type} with id '{id}'")]
    NotFound { entity_type: String, id: String },

    /// Input validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An entity references another entity that does not exist in the graph.
    #[error("Graph inconsistency: {entity_type} '{entity_id}' references missing character '{missing}'")]
    GraphInconsistency {
        entity_type: String,
        entity_id: String,
        missing: String,
    },

    /// A stage's domain logic failed. Caught at the stage runner boundary.
    #[error("Stage {stage} failed: {message}")]
    StageExecution { stage: String, message: String },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// (De)serialization failed.
    #[error("JSON error: {0}")]
    Json(String),
}

impl StationsError {
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        StationsError::StageExecution {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StationsError {
    fn from(err: serde_json::Error) -> Self {
        StationsError::Json(err.to_string())
    }
}

impl From<std::io::Error> for StationsError {
    fn from(err: std::io::Error) -> Self {
        StationsError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for StationsError {
    fn from(err: toml::de::Error) -> Self {
        StationsError::Config(format!("TOML parse error: {}", err))
    }
}
