//! Errors from the completion client

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP 429; the provider asked us to wait
    #[error("Rate limited by provider, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Non-success HTTP status other than 429
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The body decoded but did not mean anything usable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The body was not a Chat Completions response at all
    #[error("Malformed response body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Server-side or transport trouble that another attempt may fix
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::ApiError { status, .. } => *status == 408 || *status >= 500,
            LlmError::Network(_) => true,
            _ => false,
        }
    }

    /// How long the provider asked us to back off, if it did
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
