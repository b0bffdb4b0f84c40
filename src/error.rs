//! Error types for livestore.
//!
//! All errors are strongly typed using thiserror so callers can pattern
//! match on the exact failure. Single-item operations that fail leave the
//! store untouched.

use thiserror::Error;

use crate::value::Value;

/// Errors caused by bad input: configuration, entity shape, or patch shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid store configuration: {reason}")]
    Config {
        reason: String,
    },

    #[error("Entity is missing primary key field '{field}'")]
    MissingKey {
        field: String,
    },

    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        reason: String,
    },
}

impl ValidationError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Errors raised while executing an operation against the store state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Duplicate key: {key}")]
    DuplicateKey {
        key: Value,
    },

    #[error("No index declared for field '{field}'")]
    UnknownIndex {
        field: String,
    },

    #[error("Store has been destroyed")]
    Destroyed,
}

/// Top-level error type for livestore.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl StoreError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if the store rejected the call because it was destroyed.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Destroyed))
    }

    /// Returns true if the call collided with an existing primary key.
    #[must_use]
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::DuplicateKey { .. }))
    }

    /// Returns true if the entity lacked its primary key.
    #[must_use]
    pub const fn is_missing_key(&self) -> bool {
        matches!(self, Self::Validation(ValidationError::MissingKey { .. }))
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type returned by subscriber callbacks.
pub type SubscriberError = Box<dyn std::error::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::MissingKey {
            field: "id".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("primary key"));
        assert!(msg.contains("'id'"));

        let err = ValidationError::config("primary key field cannot be empty");
        assert!(format!("{err}").contains("configuration"));
    }

    #[test]
    fn test_execution_error_messages() {
        let err = ExecutionError::DuplicateKey {
            key: Value::from(7),
        };
        assert!(format!("{err}").contains('7'));

        let err = ExecutionError::UnknownIndex {
            field: "age".to_string(),
        };
        assert!(format!("{err}").contains("'age'"));
    }

    #[test]
    fn test_store_error_classification() {
        let err: StoreError = ExecutionError::Destroyed.into();
        assert!(err.is_execution());
        assert!(err.is_destroyed());
        assert!(!err.is_validation());

        let err: StoreError = ValidationError::MissingKey {
            field: "id".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(err.is_missing_key());
        assert!(!err.is_duplicate_key());
    }
}
