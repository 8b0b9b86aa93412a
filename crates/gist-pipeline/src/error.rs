//! Error taxonomy shared across the pipeline stages.

use gist_document::ExtractionError;
use gist_llm::LlmError;

/// Download failures, classified for the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection reset")]
    ConnReset,
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("document exceeded {limit} bytes")]
    TooLarge { limit: u64 },
}

impl FetchError {
    /// Whether the fetch is worth retrying. 429 and 5xx are; other HTTP
    /// statuses and oversized documents are terminal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnReset => true,
            Self::HttpStatus(code) => *code == 429 || *code >= 500,
            Self::TooLarge { .. } => false,
        }
    }
}

/// Terminal fetch failure carrying the number of tries it consumed.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct FetchFailure {
    pub error: FetchError,
    pub attempts: u32,
}

/// The stage a document was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Extract,
    Summarize,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Summarize => "summarize",
        }
    }
}

/// A stage failure after local retries are exhausted. Stays attached to the
/// document; never aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractionError),
    #[error("summarization failed: {0}")]
    Llm(#[from] LlmError),
}

impl StageError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch(_) => Stage::Fetch,
            Self::Extract(_) => Stage::Extract,
            Self::Llm(_) => Stage::Summarize,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("write failed: {0}")]
    WriteFailed(String),
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::WriteFailed(e.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::WriteFailed(e.to_string())
    }
}

/// Errors that abort the whole run. Everything else stays per-document.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    /// `attempts` is the LLM call count the document had consumed when the
    /// credentials were rejected.
    #[error("LLM rejected the configured credentials")]
    Unauthorized { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::ConnReset.is_transient());
        assert!(FetchError::HttpStatus(429).is_transient());
        assert!(FetchError::HttpStatus(500).is_transient());
        assert!(FetchError::HttpStatus(503).is_transient());
        assert!(!FetchError::HttpStatus(404).is_transient());
        assert!(!FetchError::HttpStatus(403).is_transient());
        assert!(!FetchError::TooLarge { limit: 1024 }.is_transient());
    }

    #[test]
    fn stage_error_reports_origin() {
        let e = StageError::from(FetchError::Timeout);
        assert_eq!(e.stage(), Stage::Fetch);
        let e = StageError::from(LlmError::Timeout);
        assert_eq!(e.stage(), Stage::Summarize);
        assert_eq!(e.stage().as_str(), "summarize");
    }
}
