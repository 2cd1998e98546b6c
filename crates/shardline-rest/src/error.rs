//! REST errors

use std::time::Duration;
use thiserror::Error;

/// Errors delivered through a request's [`PendingResponse`](crate::PendingResponse)
#[derive(Debug, Error)]
pub enum RestError {
    // =========================================================================
    // Server responses
    // =========================================================================
    #[error("Unauthorized: the bot token was rejected")]
    Unauthorized,

    #[error("Rate limited for {retry_after:?} (global: {global}) after exhausting retries")]
    RateLimited { retry_after: Duration, global: bool },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // =========================================================================
    // Local failures
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Request canceled: rate limiter shut down")]
    Canceled,
}

impl RestError {
    /// Repeating the request cannot succeed without operator action
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// The same request may succeed if sent again later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status, when the server answered
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// REST result type
pub type RestResult<T> = Result<T, RestError>;
