//! Classification of `transact` replies.

use crate::operation::{Operation, OperationResult};
use thiserror::Error;

/// Failure of a single operation, as reported by the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// A unique index or other schema constraint was violated.
    #[error("constraint violation: {details}")]
    ConstraintViolation {
        /// Server details.
        details: String,
    },

    /// The operation would leave a dangling strong reference.
    #[error("referential integrity violation: {details}")]
    ReferentialIntegrity {
        /// Server details.
        details: String,
    },

    /// The `where` clause matched no row although one was required.
    #[error("no row matched: {details}")]
    NotFound {
        /// Description of the operation.
        details: String,
    },

    /// The transaction was aborted or a `wait` precondition failed.
    #[error("aborted: {details}")]
    Aborted {
        /// Server details.
        details: String,
    },

    /// A named-UUID or caller-chosen UUID was used twice.
    #[error("identity conflict: {details}")]
    IdentityConflict {
        /// Server details.
        details: String,
    },

    /// A value was outside the column's domain or range.
    #[error("domain error: {details}")]
    DomainError {
        /// Server details.
        details: String,
    },

    /// The server does not support the operation.
    #[error("not supported: {details}")]
    Unsupported {
        /// Server details.
        details: String,
    },

    /// Any other error category.
    #[error("{error}: {details}")]
    Other {
        /// Error category as sent by the server.
        error: String,
        /// Server details.
        details: String,
    },
}

impl OperationError {
    /// Maps a server error category to its kind.
    pub fn classify(error: &str, details: impl Into<String>) -> Self {
        let details = details.into();
        match error {
            "constraint violation" => Self::ConstraintViolation { details },
            "referential integrity violation" => Self::ReferentialIntegrity { details },
            "aborted" | "timed out" | "not owner" => Self::Aborted { details },
            "duplicate uuid-name" | "duplicate uuid" => Self::IdentityConflict { details },
            "domain error" | "range error" | "syntax error" | "resources exhausted" => {
                Self::DomainError { details }
            }
            "not supported" | "unknown database" => Self::Unsupported { details },
            other => Self::Other {
                error: other.to_string(),
                details,
            },
        }
    }

    /// Returns the server's details text.
    pub fn details(&self) -> &str {
        match self {
            Self::ConstraintViolation { details }
            | Self::ReferentialIntegrity { details }
            | Self::NotFound { details }
            | Self::Aborted { details }
            | Self::IdentityConflict { details }
            | Self::DomainError { details }
            | Self::Unsupported { details }
            | Self::Other { details, .. } => details,
        }
    }
}

/// Failure of a whole transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// The reply's results do not line up with the operations sent.
    #[error("protocol mismatch: expected {expected} results, got {actual}")]
    ProtocolMismatch {
        /// Number of operations sent.
        expected: usize,
        /// Number of results received.
        actual: usize,
    },

    /// At least one operation, or the commit itself, failed.
    #[error("transaction failed: {}", summarize(errors, commit))]
    Failed {
        /// Per-operation outcome, in operation order.
        errors: Vec<Option<OperationError>>,
        /// Failure reported after the last operation.
        commit: Option<OperationError>,
    },
}

fn summarize(errors: &[Option<OperationError>], commit: &Option<OperationError>) -> String {
    let mut parts: Vec<String> = errors
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.as_ref().map(|e| format!("operation {i}: {e}")))
        .collect();
    if let Some(commit) = commit {
        parts.push(format!("commit: {commit}"));
    }
    parts.join("; ")
}

impl TransactionError {
    /// Per-operation errors, empty for a protocol mismatch.
    pub fn operation_errors(&self) -> &[Option<OperationError>] {
        match self {
            Self::Failed { errors, .. } => errors,
            Self::ProtocolMismatch { .. } => &[],
        }
    }

    /// Returns the first error, of an operation or of the commit.
    pub fn first(&self) -> Option<&OperationError> {
        match self {
            Self::Failed { errors, commit } => errors.iter().flatten().next().or(commit.as_ref()),
            Self::ProtocolMismatch { .. } => None,
        }
    }
}

/// Matches a reply against the operations that produced it.
///
/// Succeeds when no result carries an error and every operation that
/// requires a match counted at least one row. Otherwise returns
/// [`TransactionError::Failed`] with one entry per operation. A single
/// error result past the last operation is the commit's; any other surplus
/// is a [`TransactionError::ProtocolMismatch`].
pub fn check_operation_results(
    results: &[OperationResult],
    operations: &[Operation],
) -> Result<(), TransactionError> {
    let surplus = &results[results.len().min(operations.len())..];
    let malformed_surplus = match surplus {
        [] => false,
        [commit] => !commit.is_error(),
        _ => true,
    };
    if results.len() < operations.len() || malformed_surplus {
        return Err(TransactionError::ProtocolMismatch {
            expected: operations.len(),
            actual: results.len(),
        });
    }

    let mut errors = vec![None; operations.len()];
    let mut commit = None;
    for (i, result) in results.iter().enumerate() {
        let error = match (&result.error, operations.get(i)) {
            (Some(error), _) => Some(OperationError::classify(
                error,
                result.details.clone().unwrap_or_default(),
            )),
            (None, Some(op)) if op.require_match && result.count == Some(0) => {
                Some(OperationError::NotFound {
                    details: format!(
                        "{} on {} matched no row",
                        op.kind,
                        op.table.as_deref().unwrap_or_default()
                    ),
                })
            }
            (None, _) => None,
        };
        match errors.get_mut(i) {
            Some(slot) => *slot = error,
            None => commit = error,
        }
    }

    if errors.iter().any(Option::is_some) || commit.is_some() {
        return Err(TransactionError::Failed { errors, commit });
    }
    Ok(())
}
