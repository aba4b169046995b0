//! Error types for the model client.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`ModelClient`](super::ModelClient) and its backends.
///
/// Rate-limit waits never show up here: the limiter suspends the caller instead
/// of failing.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Model name is not on the allow-list. Fatal, no attempt is made.
    #[error("invalid model: {model} (allowed: {allowed})")]
    InvalidModel { model: String, allowed: String },

    /// Prompt was empty or whitespace.
    #[error("prompt must not be empty")]
    EmptyPrompt,

    /// A single attempt exceeded the configured timeout. Retryable.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The response text did not pass the request's validator. Retryable.
    #[error("response failed validation: {0}")]
    ValidationFailure(String),

    /// The backend reported an error.
    #[error("backend error: {message}")]
    Backend {
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The primary model used up all of its attempts.
    #[error("{model} exhausted {attempts} attempt(s): {source}")]
    ExhaustedRetries {
        model: String,
        attempts: u32,
        #[source]
        source: Box<ModelError>,
    },

    /// Primary and fallback models both failed. Carries the last underlying error.
    #[error("all models failed ({models}): {source}")]
    AllModelsFailed {
        models: String,
        #[source]
        source: Box<ModelError>,
    },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Client misconfiguration (missing API key, bad base URL, ...).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ModelError {
    pub fn backend(message: impl Into<String>, retryable: bool) -> Self {
        Self::Backend {
            message: message.into(),
            status: None,
            retryable,
        }
    }

    pub fn backend_with_status(message: impl Into<String>, status: u16) -> Self {
        Self::Backend {
            message: message.into(),
            status: Some(status),
            retryable: status == 429 || status >= 500,
        }
    }

    /// Whether another attempt against the same model may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::ValidationFailure(_) => true,
            Self::Backend { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::InvalidModel { .. }
            | Self::EmptyPrompt
            | Self::ExhaustedRetries { .. }
            | Self::AllModelsFailed { .. }
            | Self::Cancelled
            | Self::Config(_) => false,
        }
    }

    /// Errors that end the request outright without trying another model.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidModel { .. }
                | Self::EmptyPrompt
                | Self::AllModelsFailed { .. }
                | Self::Cancelled
                | Self::Config(_)
        )
    }

    /// Short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidModel { .. } => "invalid_model",
            Self::EmptyPrompt => "empty_prompt",
            Self::Timeout(_) => "timeout",
            Self::ValidationFailure(_) => "validation_failure",
            Self::Backend { .. } => "backend_error",
            Self::Http(_) => "http_error",
            Self::ExhaustedRetries { .. } => "exhausted_retries",
            Self::AllModelsFailed { .. } => "all_models_failed",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config_error",
        }
    }
}
