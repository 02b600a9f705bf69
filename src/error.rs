//! Structured error taxonomy.
//!
//! Every failure that crosses a component boundary is a [`RagError`]. Each
//! variant maps to a stable, machine-readable code ([`RagError::kind`]) and
//! an HTTP status ([`RagError::status`]) so that the server can surface it
//! as `{ "error": { "code": ..., "message": ... } }` without string matching.

use axum::http::StatusCode;

/// Errors produced by ingestion, retrieval, generation, and configuration.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// A source file could not be parsed. Aborts only that file's ingestion.
    #[error("failed to load '{file_name}': {message}")]
    Load { file_name: String, message: String },

    /// The embedding endpoint failed (network, rate limit, malformed response).
    #[error("embedding request failed: {0}")]
    Embedding(String),

    /// The completion endpoint failed.
    #[error("generation request failed: {0}")]
    Generation(String),

    /// A delete/insert/upsert sequence against the index failed.
    #[error("index write failed: {0}")]
    IndexWrite(String),

    /// The index could not be read.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Missing or invalid settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

impl RagError {
    /// Stable wire code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Load { .. } => "load_error",
            RagError::Embedding(_) => "embedding_error",
            RagError::Generation(_) => "generation_error",
            RagError::IndexWrite(_) => "index_write_error",
            RagError::Retrieval(_) => "retrieval_error",
            RagError::Configuration(_) => "configuration_error",
            RagError::NotFound(_) => "not_found",
            RagError::InvalidInput(_) => "bad_request",
            RagError::Timeout(_) => "timeout",
        }
    }

    /// HTTP status used when this error reaches the server boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            RagError::Load { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RagError::Embedding(_) | RagError::Generation(_) => StatusCode::BAD_GATEWAY,
            RagError::Retrieval(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::IndexWrite(_) | RagError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RagError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Upstream model failures and timeouts may succeed if the caller retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Embedding(_)
                | RagError::Generation(_)
                | RagError::Retrieval(_)
                | RagError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let errors = [
            RagError::Load {
                file_name: "a.pdf".into(),
                message: "bad".into(),
            },
            RagError::Embedding("x".into()),
            RagError::Generation("x".into()),
            RagError::IndexWrite("x".into()),
            RagError::Retrieval("x".into()),
            RagError::Configuration("x".into()),
            RagError::NotFound("x".into()),
            RagError::InvalidInput("x".into()),
            RagError::Timeout(5),
        ];
        let mut kinds: Vec<&str> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_upstream_failures_are_retryable_and_not_success() {
        let e = RagError::Generation("rate limited".into());
        assert!(e.is_retryable());
        assert_eq!(e.status(), StatusCode::BAD_GATEWAY);
        assert!(!RagError::Configuration("missing key".into()).is_retryable());
    }

    #[test]
    fn test_load_error_message_names_file() {
        let e = RagError::Load {
            file_name: "report.pdf".into(),
            message: "truncated xref".into(),
        };
        assert!(e.to_string().contains("report.pdf"));
    }
}
