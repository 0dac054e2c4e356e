//! Error types and error handling utilities
//!
//! The taxonomy distinguishes the failure kinds the service reacts to
//! differently: auth failures propagate as 401/403, rate limits as 429,
//! transient remote errors are retried, parse/schema errors fall back,
//! and everything else is internal.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Core result type used throughout the application
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error types for Prism
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum CoreError {
    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// Authentication / authorization failures
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Transient remote errors (network, 5xx) — retryable
    #[error("Transient remote error: {service} - {message}")]
    TransientRemote { service: String, message: String },

    /// Permanent remote errors (non-auth 4xx)
    #[error("Permanent remote error: {service} - {message}")]
    PermanentRemote { service: String, message: String },

    /// Malformed payloads from LLM responses or webhooks
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn auth<S: Into<String>>(message: S) -> Self {
        CoreError::AuthFailure(message.into())
    }

    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        CoreError::RateLimited(message.into())
    }

    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::TransientRemote {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn permanent(service: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::PermanentRemote {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        CoreError::Parse(message.into())
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        CoreError::Configuration(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        CoreError::Internal(message.into())
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Validation(_) => ErrorCategory::Validation,
            CoreError::NotFound { .. } => ErrorCategory::NotFound,
            CoreError::AuthFailure(_) => ErrorCategory::Auth,
            CoreError::RateLimited(_) => ErrorCategory::RateLimit,
            CoreError::TransientRemote { .. } => ErrorCategory::TransientRemote,
            CoreError::PermanentRemote { .. } => ErrorCategory::PermanentRemote,
            CoreError::Parse(_) => ErrorCategory::Parse,
            CoreError::Serialization(_) => ErrorCategory::Serialization,
            CoreError::Configuration(_) => ErrorCategory::Configuration,
            CoreError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientRemote { .. } | CoreError::RateLimited(_)
        )
    }

    /// Check if the error should be logged at error level
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            CoreError::Internal(_) | CoreError::Configuration(_)
        )
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Auth,
    RateLimit,
    TransientRemote,
    PermanentRemote,
    Parse,
    Serialization,
    Configuration,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Auth => write!(f, "auth"),
            ErrorCategory::RateLimit => write!(f, "rate_limit"),
            ErrorCategory::TransientRemote => write!(f, "transient_remote"),
            ErrorCategory::PermanentRemote => write!(f, "permanent_remote"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Serialization => write!(f, "serialization"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Convert from anyhow::Error for internal errors
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = CoreError::validation("Invalid input");
        assert_eq!(error.category(), ErrorCategory::Validation);
        assert!(!error.is_retryable());
        assert!(!error.is_critical());
    }

    #[test]
    fn test_not_found_error() {
        let error = CoreError::not_found("Message", "123");
        assert_eq!(error.category(), ErrorCategory::NotFound);

        match error {
            CoreError::NotFound { entity_type, id } => {
                assert_eq!(entity_type, "Message");
                assert_eq!(id, "123");
            }
            _ => panic!("Expected NotFound error"),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(CoreError::transient("slack", "connection reset").is_retryable());
        assert!(CoreError::rate_limited("too many requests").is_retryable());
        assert!(!CoreError::permanent("gmail", "invalid thread").is_retryable());
        assert!(!CoreError::validation("bad label").is_retryable());
    }

    #[test]
    fn test_critical_errors() {
        assert!(CoreError::internal("corrupt state").is_critical());
        assert!(CoreError::configuration("missing key").is_critical());
        assert!(!CoreError::auth("expired token").is_critical());
    }

    #[test]
    fn test_error_serialization() {
        let error = CoreError::validation("Test error");
        let json = serde_json::to_string(&error).unwrap();
        let deserialized: CoreError = serde_json::from_str(&json).unwrap();

        assert_eq!(error.to_string(), deserialized.to_string());
    }
}
