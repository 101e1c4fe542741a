//! Error types for the client engine.

use ovsdb_protocol::{CodecError, TransactionError};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client engine.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A value did not fit the schema.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A model field binding does not match the schema.
    #[error("field mismatch on {table}.{column}: {message}")]
    FieldMismatch {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// What did not match.
        message: String,
    },

    /// An update touches a column the schema declares immutable.
    #[error("column {table}.{column} is immutable")]
    ImmutableColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The same row identity was inserted twice in one transaction.
    #[error("identity {uuid} is already inserted in this transaction")]
    IdentityConflict {
        /// UUID or named-UUID used twice.
        uuid: String,
    },

    /// The request refers to something the schema or model set does not cover.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// No cached row matched.
    #[error("no row in {table} matching {key}")]
    NotFound {
        /// Table name.
        table: String,
        /// Lookup key.
        key: String,
    },

    /// The transaction reply reported failures.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with a JSON-RPC error.
    #[error("server error: {0}")]
    Server(String),

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl ClientError {
    /// Creates a field mismatch error.
    pub fn field_mismatch(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::FieldMismatch {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::NotConnected => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport_retryable("connection lost").is_retryable());
        assert!(!ClientError::transport_fatal("bad certificate").is_retryable());
        assert!(ClientError::NotConnected.is_retryable());
        assert!(!ClientError::Unsupported("x".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ClientError::ImmutableColumn {
            table: "Bridge".into(),
            column: "name".into(),
        };
        assert_eq!(err.to_string(), "column Bridge.name is immutable");

        let err: ClientError = CodecError::type_mismatch("integer", "string").into();
        assert!(matches!(err, ClientError::Codec(_)));
        assert!(err.to_string().contains("integer"));
    }
}
