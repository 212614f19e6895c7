//! Error types.
//!
//! Application plumbing (configuration, file IO, the CLI) uses `anyhow` through the `Result`
//! alias. The pipeline components report the typed errors defined here so that callers can decide
//! what a failure means: skip a row, fail one partition, retry an upload or abort the run.

use crate::model::PartitionKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// A raw row could not be turned into a `Record`. Row numbers are 1-based data rows, i.e. the
/// first row after the header is row 1.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ValidationError {
    #[error("The required column '{column}' is not present in the header")]
    MissingColumn { column: String },

    #[error("Row {row}: the date field is empty")]
    MissingDate { row: usize },

    #[error("Row {row}: unable to parse '{value}' as a date")]
    InvalidDate { row: usize, value: String },

    #[error("Row {row}: the amount field is empty")]
    MissingAmount { row: usize },

    #[error("Row {row}: unable to parse '{value}' as an amount")]
    InvalidAmount { row: usize, value: String },

    #[error("Row {row}: field {column} is not valid UTF-8")]
    InvalidEncoding { row: usize, column: usize },

    #[error("Row {row}: found {found} fields but the header only has {expected}")]
    RowLength {
        row: usize,
        expected: usize,
        found: usize,
    },
}

impl ValidationError {
    /// The data row that failed, if the error is about a row rather than the header.
    pub fn row(&self) -> Option<usize> {
        match self {
            ValidationError::MissingColumn { .. } => None,
            ValidationError::MissingDate { row }
            | ValidationError::InvalidDate { row, .. }
            | ValidationError::MissingAmount { row }
            | ValidationError::InvalidAmount { row, .. }
            | ValidationError::InvalidEncoding { row, .. }
            | ValidationError::RowLength { row, .. } => Some(*row),
        }
    }
}

/// A partition could not be encoded into an artifact.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("Unable to serialize partition {key}: {message}")]
pub struct SerializationError {
    key: PartitionKey,
    message: String,
}

impl SerializationError {
    pub fn new(key: PartitionKey, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
        }
    }

    pub fn key(&self) -> PartitionKey {
        self.key
    }
}

/// Whether retrying the same remote call could succeed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Throttling, server errors, dropped connections and timeouts.
    Transient,
    /// Permission denied, not found, bad requests.
    Permanent,
}

serde_plain::derive_display_from_serialize!(RemoteErrorKind);

/// A call to the remote store failed.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("{kind} remote error: {message}")]
pub struct RemoteError {
    kind: RemoteErrorKind,
    message: String,
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> RemoteErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

impl Serialize for RemoteError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Credentials are missing, invalid, or could not be refreshed. Fatal at the start of a run.
///
/// A refresh that failed because the token endpoint could not be reached (or answered with a
/// server error) is transient; everything else is permanent.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("Authentication failed: {message}")]
pub struct AuthError {
    message: String,
    transient: bool,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl From<AuthError> for RemoteError {
    fn from(e: AuthError) -> Self {
        if e.is_transient() {
            RemoteError::transient(e.to_string())
        } else {
            RemoteError::permanent(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_row() {
        let e = ValidationError::InvalidAmount {
            row: 7,
            value: "abc".to_string(),
        };
        assert_eq!(e.row(), Some(7));
        assert_eq!(e.to_string(), "Row 7: unable to parse 'abc' as an amount");

        let e = ValidationError::MissingColumn {
            column: "日付".to_string(),
        };
        assert_eq!(e.row(), None);
    }

    #[test]
    fn test_auth_error_into_remote_error() {
        let e: RemoteError = AuthError::transient("connection refused").into();
        assert!(e.is_transient());
        assert_eq!(
            e.message(),
            "Authentication failed: connection refused"
        );

        let e: RemoteError = AuthError::new("invalid_grant").into();
        assert_eq!(e.kind(), RemoteErrorKind::Permanent);
    }

    #[test]
    fn test_remote_error_display() {
        let e = RemoteError::transient("HTTP 503");
        assert!(e.is_transient());
        assert_eq!(e.to_string(), "transient remote error: HTTP 503");

        let e = RemoteError::permanent("HTTP 403");
        assert!(!e.is_transient());
        assert_eq!(serde_json::to_string(&e).unwrap(), "\"permanent remote error: HTTP 403\"");
    }
}
