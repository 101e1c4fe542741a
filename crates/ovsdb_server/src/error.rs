//! Error types for the server.

use ovsdb_protocol::CodecError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that fail a whole request.
///
/// Failures of single operations inside a transaction are not
/// `ServerError`s; they travel as error entries of the transact reply.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The request names a database this server does not host.
    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    /// Invalid request format or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No monitor with this id exists on the session.
    #[error("unknown monitor: {0}")]
    UnknownMonitor(String),

    /// A monitor with this id already exists on the session.
    #[error("duplicate monitor: {0}")]
    DuplicateMonitor(String),

    /// A parameter failed to decode against the schema.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the `error` string of the JSON-RPC error object.
    pub fn error_tag(&self) -> &'static str {
        match self {
            ServerError::UnknownDatabase(_) => "unknown database",
            ServerError::InvalidRequest(_) => "invalid request",
            ServerError::UnknownMonitor(_) => "unknown monitor",
            ServerError::DuplicateMonitor(_) => "duplicate monitor",
            ServerError::Codec(CodecError::Unsupported { .. }) => "not supported",
            ServerError::Codec(_) => "syntax error",
            ServerError::Internal(_) => "internal error",
        }
    }

    /// Returns true if the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::UnknownDatabase(_)
                | ServerError::InvalidRequest(_)
                | ServerError::UnknownMonitor(_)
                | ServerError::DuplicateMonitor(_)
                | ServerError::Codec(_)
        )
    }

    /// Returns true if the server failed to serve a valid request.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ServerError::UnknownDatabase("nope".into());
        assert_eq!(err.to_string(), "unknown database: nope");

        let err = ServerError::DuplicateMonitor("m1".into());
        assert!(err.to_string().contains("m1"));
    }

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("x".into()).is_client_error());
        assert!(ServerError::UnknownMonitor("m".into()).is_client_error());
        assert!(!ServerError::UnknownMonitor("m".into()).is_server_error());
        assert!(ServerError::Internal("x".into()).is_server_error());
        assert!(!ServerError::Internal("x".into()).is_client_error());
    }

    #[test]
    fn codec_errors_map_to_wire_tags() {
        let err: ServerError = CodecError::unsupported("conditional monitor clauses").into();
        assert_eq!(err.error_tag(), "not supported");

        let err: ServerError = CodecError::invalid_structure("bad").into();
        assert_eq!(err.error_tag(), "syntax error");
        assert!(err.is_client_error());
    }
}
