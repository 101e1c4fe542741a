//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while converting between wire JSON, tagged values and rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A value's kind does not match the kind declared by the schema.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Kind required by the column.
        expected: String,
        /// Kind actually supplied.
        found: String,
    },

    /// A set or map has a number of elements outside the column's bounds.
    #[error("cardinality violation on column {column}: {actual} elements, allowed {min}..={max}")]
    CardinalityViolation {
        /// Column name.
        column: String,
        /// Declared minimum.
        min: usize,
        /// Declared maximum (`usize::MAX` for unlimited).
        max: usize,
        /// Number of elements supplied.
        actual: usize,
    },

    /// A column is not declared by the table schema.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A table is not declared by the database schema.
    #[error("unknown table {table}")]
    UnknownTable {
        /// Table name.
        table: String,
    },

    /// The JSON does not follow the protocol notation.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// The construct is valid JSON but not supported by this implementation.
    #[error("unsupported: {message}")]
    Unsupported {
        /// What was not supported.
        message: String,
    },
}

impl CodecError {
    /// Create a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an unsupported error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an unknown column error.
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_structure(err.to_string())
    }
}
