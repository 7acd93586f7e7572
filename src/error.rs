//! Error types for yosegi.
//!
//! Most failures inside one (virtual document × plugin) unit are contained
//! where they happen and only logged. The variants here are what still needs
//! a name: generator failures reported by the virtual tree, malformed
//! requests that propagate to the editor, and configuration problems.

use std::sync::PoisonError;
use thiserror::Error;

/// Crate level error type.
#[derive(Debug, Error)]
pub enum YosegiError {
    /// A host slice could not be decomposed into a virtual document
    #[error("Failed to generate virtual document for block {block}: {message}")]
    ParseFailure { block: String, message: String },

    /// Document not found in the registry
    #[error("Document not found: {uri}")]
    DocumentNotFound { uri: String },

    /// The request itself is malformed (unknown origin envelope, bad URI, ...)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type YosegiResult<T> = Result<T, YosegiError>;

/// Failure of one plugin handler invocation.
///
/// Never surfaced to the editor; the dispatch engine logs it and moves on.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error("request was cancelled")]
    Cancelled,

    /// The plugin declined this document or argument
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        PluginError::Failed(message.into())
    }
}

/// Sidecar transport and protocol errors.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// No server reachable for this project
    #[error("sidecar unavailable: {0}")]
    Unavailable(String),

    #[error("sidecar request {seq} timed out")]
    Timeout { seq: u64 },

    #[error("sidecar protocol error: {0}")]
    Protocol(String),

    #[error("sidecar IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sidecar connection closed")]
    Closed,
}

impl From<serde_json::Error> for SidecarError {
    fn from(e: serde_json::Error) -> Self {
        SidecarError::Protocol(e.to_string())
    }
}

/// Helper trait to convert PoisonError into a recovered guard.
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging which operation hit it.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "yosegi::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

impl YosegiError {
    pub fn parse_failure(block: impl Into<String>, message: impl Into<String>) -> Self {
        YosegiError::ParseFailure {
            block: block.into(),
            message: message.into(),
        }
    }

    pub fn document_not_found(uri: impl Into<String>) -> Self {
        YosegiError::DocumentNotFound { uri: uri.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        YosegiError::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        YosegiError::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        YosegiError::Internal(message.into())
    }
}
