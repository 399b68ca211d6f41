// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the studyrag core.
//!
//! This module provides strongly-typed errors for the two halves of the crate,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error
//! propagation at the application boundary.

use thiserror::Error;

/// Errors that can occur during LLM provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("A request is already in flight")]
    RequestInFlight,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Response parsing error: {0}")]
    Parse(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),
}

impl ProviderError {
    /// Create an API error with status code.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Errors that can occur while building or querying an index.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding backend unconfigured")]
    ConfigurationMissing,

    #[error("No recognizable text in document")]
    ExtractionEmpty,

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("A build is already running for document {0}")]
    BuildInProgress(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Index store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build cancelled")]
    Cancelled,
}

impl RagError {
    /// Whether this error terminates a build without leaving artifacts.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_retryable() {
        assert!(ProviderError::Network("timeout".to_string()).is_retryable());
        assert!(ProviderError::Timeout(60).is_retryable());
        assert!(!ProviderError::NotConfigured("no key".to_string()).is_retryable());
        assert!(!ProviderError::api(401, "unauthorized").is_retryable());
    }

    #[test]
    fn test_provider_error_api() {
        let err = ProviderError::api(429, "rate limited");
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limited");
            }
            _ => panic!("Expected Api error"),
        }
    }

    #[test]
    fn test_rag_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let rag_err: RagError = io_err.into();
        assert!(matches!(rag_err, RagError::Io(_)));
    }

    #[test]
    fn test_cancellation_flag() {
        assert!(RagError::Cancelled.is_cancellation());
        assert!(!RagError::ExtractionEmpty.is_cancellation());
    }
}
