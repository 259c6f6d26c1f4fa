//! Application-level error type returned by the binary entry points.
//!
//! `AppError` is serialized to `{ kind, message }` JSON payloads so a front
//! end driving the engine can pattern-match on a stable `kind` string.

use crate::controller::FormError;
use crate::form::ConfigError;
use crate::persist::StorageError;
use crate::store::StoreError;

/// Top-level error.
///
/// Serialized with serde's adjacently-tagged representation:
/// `{ "kind": "<variant>", "message": "<human-readable text>" }`
#[derive(Debug, thiserror::Error, serde::Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum AppError {
    /// The form definition or the settings file is invalid.
    #[error("{0}")]
    Configuration(String),

    /// Saved progress could not be read or written.
    #[error("{0}")]
    Storage(String),

    /// The submit handler rejected the record.
    #[error("{0}")]
    Submission(String),

    /// The operation is not allowed in the form's current state.
    #[error("{0}")]
    InvalidState(String),

    /// A command referred to data that does not exist or has the wrong shape.
    #[error("{0}")]
    InvalidInput(String),

    /// A generic I/O error; the inner [`std::io::Error`] is converted to a
    /// string at the system boundary so it remains serializable.
    #[error("{0}")]
    Io(String),
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

impl From<FormError> for AppError {
    fn from(e: FormError) -> Self {
        match e {
            FormError::NotEditable { .. } | FormError::NotComplete { .. } => {
                Self::InvalidState(e.to_string())
            }
            FormError::Store(inner) => Self::from(inner),
            FormError::Submission(inner) => Self::Submission(inner.message),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
