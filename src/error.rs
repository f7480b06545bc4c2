//! Error types for Campuswall
//!
//! Every fallible core operation returns `AppError`. Client-facing
//! variants (not found, forbidden, conflict, muted, validation) carry
//! enough context for an outer surface to render a message; the rest
//! are faults of the store or of an external collaborator.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Referenced post/comment/user/request does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Actor is neither the owner nor otherwise authorized
    #[error("Access denied")]
    Forbidden,

    /// Duplicate like, pending request, already friends
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Acting user is muted until the given time
    #[error("User is muted until {until}")]
    RateRestricted { until: DateTime<Utc> },

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Text generation or storage collaborator failure
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Stable label used for the `errors_total` metric.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::RateRestricted { .. } => "rate_restricted",
            AppError::Validation(_) => "validation",
            AppError::Database(_) => "database",
            AppError::HttpClient(_) => "http_client",
            AppError::ExternalService(_) => "external_service",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether the error was caused by the caller rather than a fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_)
                | AppError::Forbidden
                | AppError::Conflict(_)
                | AppError::RateRestricted { .. }
                | AppError::Validation(_)
        )
    }

    /// Record this error in the metrics registry under `origin`.
    pub fn record(&self, origin: &str) {
        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[self.error_type(), origin])
            .inc();
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_distinguished_from_faults() {
        assert!(AppError::NotFound("post").is_client_error());
        assert!(AppError::Conflict("already friends".to_string()).is_client_error());
        assert!(
            AppError::RateRestricted {
                until: Utc::now()
            }
            .is_client_error()
        );
        assert!(!AppError::ExternalService("timeout".to_string()).is_client_error());
        assert!(!AppError::Config("bad".to_string()).is_client_error());
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(AppError::NotFound("comment").to_string(), "comment not found");
        assert_eq!(AppError::NotFound("comment").error_type(), "not_found");
    }
}
