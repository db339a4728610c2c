//! DriveWise error types.

use thiserror::Error;

/// Errors raised by DriveWise components.
///
/// Branch-level failures inside the router are absorbed and never reach the
/// caller as this type; it is the currency between the router and its
/// external collaborators.
#[derive(Debug, Error)]
pub enum DriveWiseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("API key missing for provider: {0}")]
    ApiKeyMissing(String),

    #[error("Rate limited by {0}")]
    RateLimited(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rejected by content policy: {0}")]
    ContentPolicy(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DriveWiseError {
    /// Whether retrying the same call may succeed.
    ///
    /// Connection errors, rate limits and timeouts are transient. Everything
    /// else (bad keys, policy rejections, malformed responses) is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriveWiseError::Http(_) | DriveWiseError::RateLimited(_) | DriveWiseError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DriveWiseError>;
