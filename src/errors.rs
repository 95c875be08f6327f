// src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewardError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API request failed with status {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RewardError {
    /// Whether a retry is expected to help: connection failures, request
    /// timeouts, rate limiting (429) and provider-side 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            RewardError::Request(e) => e.is_connect() || e.is_timeout(),
            RewardError::ApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RewardError>;
