//! Resume error types
//!
//! Four outcomes matter to an orchestrator reading the checkpoint log:
//! validation and not-found are expected conditions it branches on, while
//! corruption and backend failures abort the resume attempt.

use thiserror::Error;

use crate::db::DbError;

/// Error category for structured logging and behavior mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A record or argument is missing a mandatory value or breaks an invariant
    Validation,
    /// Nothing is stored for the requested frame
    NotFound,
    /// A parent chain is cyclic or dangling, or a stored row cannot be decoded
    Corruption,
    /// SQLite or connection pool failure
    Backend,
    /// `resume.toml` or env misconfigured
    Config,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Corruption => "CORRUPTION",
            Self::Backend => "BACKEND_ERROR",
            Self::Config => "CONFIG_ERROR",
        }
    }

    /// Whether the orchestrator can treat this as a normal outcome
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation | Self::NotFound)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resume error with category and context
#[derive(Debug, Error)]
pub enum ResumeError {
    /// A mandatory field is empty. `index` locates the record inside a batch.
    #[error("{field} is required{}", .index.map(|i| format!(" (record {i})")).unwrap_or_default())]
    MissingField {
        field: &'static str,
        index: Option<usize>,
    },

    #[error("invalid checkpoint: {message}")]
    Invalid { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("corrupt checkpoint data: {message}")]
    Corruption { message: String },

    #[error("backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ResumeError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingField { .. } | Self::Invalid { .. } => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Corruption { .. } => ErrorCategory::Corruption,
            Self::Backend { .. } => ErrorCategory::Backend,
            Self::Config { .. } => ErrorCategory::Config,
        }
    }

    /// Create a required-field error for an operation argument
    pub fn required(field: &'static str) -> Self {
        Self::MissingField { field, index: None }
    }

    /// Create a required-field error for one record of a batch
    pub fn required_in_batch(field: &'static str, index: usize) -> Self {
        Self::MissingField {
            field,
            index: Some(index),
        }
    }

    /// Create an invariant violation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a backend error with source
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error is a not-found condition
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

impl From<DbError> for ResumeError {
    fn from(err: DbError) -> Self {
        Self::backend_with_source("storage operation failed", err)
    }
}

impl From<rusqlite::Error> for ResumeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::backend_with_source("sqlite query failed", err)
    }
}

impl From<r2d2::Error> for ResumeError {
    fn from(err: r2d2::Error) -> Self {
        Self::backend_with_source("failed to check out pooled connection", err)
    }
}

/// Result type for resume operations
pub type Result<T> = std::result::Result<T, ResumeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_names_field() {
        let err = ResumeError::required("chat_id");
        assert_eq!(err.to_string(), "chat_id is required");

        let err = ResumeError::required_in_batch("status", 2);
        assert_eq!(err.to_string(), "status is required (record 2)");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_category_recoverability() {
        assert!(ErrorCategory::Validation.is_recoverable());
        assert!(ErrorCategory::NotFound.is_recoverable());
        assert!(!ErrorCategory::Corruption.is_recoverable());
        assert!(!ErrorCategory::Backend.is_recoverable());
        assert!(!ErrorCategory::Config.is_recoverable());
    }

    #[test]
    fn test_sqlite_error_maps_to_backend() {
        let err: ResumeError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.category(), ErrorCategory::Backend);
        assert_eq!(err.category().as_str(), "BACKEND_ERROR");
        assert!(std::error::Error::source(&err).is_some());
    }
}
