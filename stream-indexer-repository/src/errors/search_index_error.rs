//! Search index error types.
//!
//! This module defines the unified error type for all search index operations,
//! along with the classification of failures into retryable and permanent.

use thiserror::Error;

/// Unified errors from search index operations.
///
/// Used by the `SearchIndexProvider` trait for whole-request failures. Failures
/// of individual documents inside a bulk request are reported through
/// [`BulkItemStatus`](crate::types::BulkItemStatus) instead.
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Validation error (e.g., invalid configuration values).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to reach the search index backend.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The backend asked us to slow down (HTTP 429).
    #[error("Throttled by search index: {0}")]
    Throttled(String),

    /// The backend failed while handling the request (HTTP 5xx).
    #[error("Server error (status {status}): {body}")]
    ServerError { status: u16, body: String },

    /// The backend refused the request as a whole (HTTP 4xx other than 429).
    #[error("Request rejected (status {status}): {body}")]
    RequestRejected { status: u16, body: String },

    /// Failed to create the search index or its template.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// Failed to parse response from search index backend.
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl SearchIndexError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create an index creation error.
    pub fn index_creation(msg: impl Into<String>) -> Self {
        Self::IndexCreationError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Map a non-success HTTP status of a whole request to an error.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => Self::Throttled(body),
            500..=599 => Self::ServerError { status, body },
            _ => Self::RequestRejected { status, body },
        }
    }

    /// Whether re-sending the same request may succeed.
    ///
    /// Transport failures, throttling and server errors are transient. A
    /// response we could not parse is also treated as transient since the
    /// documents may or may not have been written, and rewriting them with
    /// the same ids is harmless.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError(_)
                | Self::Throttled(_)
                | Self::ServerError { .. }
                | Self::ParseError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            SearchIndexError::from_status(429, "slow down"),
            SearchIndexError::Throttled(_)
        ));
        assert!(matches!(
            SearchIndexError::from_status(503, "unavailable"),
            SearchIndexError::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            SearchIndexError::from_status(401, "unauthorized"),
            SearchIndexError::RequestRejected { status: 401, .. }
        ));
    }

    #[test]
    fn test_is_retryable() {
        assert!(SearchIndexError::connection("refused").is_retryable());
        assert!(SearchIndexError::from_status(429, "").is_retryable());
        assert!(SearchIndexError::from_status(502, "").is_retryable());
        assert!(SearchIndexError::parse("truncated body").is_retryable());

        assert!(!SearchIndexError::from_status(400, "").is_retryable());
        assert!(!SearchIndexError::from_status(403, "").is_retryable());
        assert!(!SearchIndexError::validation("bad").is_retryable());
        assert!(!SearchIndexError::index_creation("bad mapping").is_retryable());
    }
}
