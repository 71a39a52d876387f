use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider does not support {0}")]
    Unsupported(&'static str),

    #[error("Empty response from provider")]
    EmptyResponse,
}

impl LlmError {
    /// Transport and 5xx failures are worth another attempt; bad requests are not.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Status { status, .. } => *status >= 500 || *status == 429,
            LlmError::Timeout(_) => true,
            _ => false,
        }
    }
}
