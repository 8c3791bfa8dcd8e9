use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreviewError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Too many redirects (limit {limit})")]
    TooManyRedirects { limit: usize },

    #[error("Response exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: u64 },

    #[error("HTTP error {status}")]
    HttpError { status: u16 },

    #[error("Failed to extract preview: {reason}")]
    ExtractionFailure { reason: String },

    #[error("Blocked target: {0}")]
    Blocked(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl PreviewError {
    pub fn extraction(reason: impl Into<String>) -> Self {
        PreviewError::ExtractionFailure {
            reason: reason.into(),
        }
    }

    /// Short, stable label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PreviewError::InvalidUrl(_) => "invalid_url",
            PreviewError::Timeout(_) => "timeout",
            PreviewError::TooManyRedirects { .. } => "too_many_redirects",
            PreviewError::TooLarge { .. } => "too_large",
            PreviewError::HttpError { .. } => "http_error",
            PreviewError::ExtractionFailure { .. } => "extraction_failure",
            PreviewError::Blocked(_) => "blocked",
            PreviewError::UnsupportedContentType(_) => "unsupported_content_type",
            PreviewError::Network(_) => "network",
        }
    }

    pub fn log(&self) {
        match self {
            PreviewError::InvalidUrl(e) => {
                warn!(error = %e, "URL rejected before matching");
            }
            PreviewError::Timeout(e) => {
                warn!(error = %e, "Request timed out");
            }
            PreviewError::TooManyRedirects { limit } => {
                warn!(limit, "Redirect limit exceeded");
            }
            PreviewError::TooLarge { max_bytes } => {
                warn!(max_bytes, "Response body exceeded size cap");
            }
            PreviewError::HttpError { status } => {
                warn!(status, "Remote returned non-success status");
            }
            PreviewError::ExtractionFailure { reason } => {
                warn!(reason = %reason, "Metadata extraction failed");
            }
            PreviewError::Blocked(target) => {
                warn!(host = %target, "Refused to fetch internal address");
            }
            PreviewError::UnsupportedContentType(ct) => {
                warn!(content_type = %ct, "Invalid content type received");
            }
            PreviewError::Network(e) => {
                warn!(error = %e, "Content fetch failed");
            }
        }
    }
}

impl From<url::ParseError> for PreviewError {
    fn from(e: url::ParseError) -> Self {
        PreviewError::InvalidUrl(e.to_string())
    }
}
