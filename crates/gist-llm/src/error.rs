use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("completion timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("service error: {0}")]
    Service(String),
}

impl LlmError {
    /// Retry-after hint supplied by the service, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether a later attempt could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout | Self::Service(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
