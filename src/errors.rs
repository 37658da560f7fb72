use hyper::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnnotationError {
    /// Malformed or undetectable notation, or a notation the remote service rejected.
    #[error("Invalid variant format: {0}")]
    InvalidFormat(String),
    /// Still rate limited after the permitted retries.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("Upstream service error: {0}")]
    UpstreamService(String),
    #[error("No annotation found: {0}")]
    NotFound(String),
    #[error("Request cancelled: {0}")]
    Cancelled(String),
}

impl AnnotationError {
    /// Whether a caller may reasonably try the same call again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded(_) | Self::UpstreamService(_) | Self::Cancelled(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded(_) | Self::UpstreamService(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Cancelled(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<serde_json::Error> for AnnotationError {
    fn from(err: serde_json::Error) -> Self {
        Self::UpstreamService(format!("malformed annotation payload: {}", err))
    }
}

impl warp::reject::Reject for AnnotationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(AnnotationError::RateLimitExceeded("429".to_string()).is_retryable());
        assert!(AnnotationError::UpstreamService("502".to_string()).is_retryable());
        assert!(!AnnotationError::InvalidFormat("bad".to_string()).is_retryable());
        assert!(!AnnotationError::NotFound("rs0".to_string()).is_retryable());
    }

    #[test]
    fn test_malformed_json_becomes_upstream_error() {
        let err: AnnotationError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, AnnotationError::UpstreamService(_)));
    }
}
