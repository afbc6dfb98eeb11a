//! LLM client error types.

use thiserror::Error;

/// Errors from the patch-generation collaborator.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not found in config or environment")]
    MissingApiKey,

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}
