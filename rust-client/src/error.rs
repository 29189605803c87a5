//! Error types for every layer of the client.
//!
//! Each layer has its own enum, and the outer ones embed the inner ones via
//! `#[from]`. All of them classify into a coarse [`ErrorKind`] so callers can
//! decide what to do without matching every variant.

/// Coarse classification shared by all error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No servers configured, missing host, missing queue name.
    Configuration,
    /// Every candidate unreachable, or the transport itself failed.
    Connectivity,
    /// The operation needs a connection or channel that is not open.
    State,
    /// Invalid envelope fields, error codes or path conflicts.
    Validation,
    /// A payload could not be decoded into an envelope.
    Malformed,
}

/// Errors from [`PathMap`](crate::pathmap::PathMap) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("path segment is not a map: {0}")]
    PathConflict(String),
}

impl PathError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// Errors from building, mutating and decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("message type is required")]
    InvalidType,

    #[error("message id is required")]
    InvalidId,

    #[error("message version must be positive")]
    InvalidVersion,

    #[error("error code must be positive, got {0}")]
    InvalidErrorCode(i64),

    #[error("error message is required")]
    MissingErrorMessage,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid header name: {0:?}")]
    InvalidHeader(String),

    #[error("expected a {expected} message, got type {actual:?}")]
    WrongType {
        expected: &'static str,
        actual: String,
    },

    #[error("message is invalid")]
    Invalid,

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl EnvelopeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnvelopeError::Malformed(_) => ErrorKind::Malformed,
            _ => ErrorKind::Validation,
        }
    }
}

/// Errors from building a broker URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("server configuration is missing a host")]
    MissingHost,

    #[error("credentials cannot be encoded into a URI")]
    InvalidCredentials,
}

impl UriError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

/// Errors reported by a [`BrokerTransport`](crate::transport::BrokerTransport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Connectivity
    }
}

/// Errors from [`ServerConnectionManager`](crate::manager::ServerConnectionManager).
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("no servers configured")]
    NoServersConfigured,

    #[error("queue name is required")]
    MissingQueueName,

    #[error("unable to connect to any of {attempted} server(s)")]
    NoReachableServer { attempted: usize },

    #[error("no connection established")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to release {failed} broker resource(s) on close")]
    ReleaseFailed {
        failed: usize,
        #[source]
        last: TransportError,
    },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::NoServersConfigured | ConnectionError::MissingQueueName => {
                ErrorKind::Configuration
            }
            ConnectionError::NoReachableServer { .. }
            | ConnectionError::Transport(_)
            | ConnectionError::ReleaseFailed { .. } => ErrorKind::Connectivity,
            ConnectionError::NotConnected => ErrorKind::State,
            ConnectionError::Envelope(e) => e.kind(),
        }
    }
}

pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_kinds() {
        assert_eq!(
            ConnectionError::NoServersConfigured.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ConnectionError::NoReachableServer { attempted: 2 }.kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(ConnectionError::NotConnected.kind(), ErrorKind::State);
        assert_eq!(
            ConnectionError::from(EnvelopeError::Malformed("x".into())).kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            ConnectionError::from(EnvelopeError::InvalidType).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_error_messages() {
        let err = ConnectionError::NoReachableServer { attempted: 3 };
        assert_eq!(err.to_string(), "unable to connect to any of 3 server(s)");

        let err = EnvelopeError::InvalidErrorCode(0);
        assert_eq!(err.to_string(), "error code must be positive, got 0");
    }
}
