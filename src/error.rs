//! Error types for pgkeeper

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the transport
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration or DSN
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed or unexpected protocol traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication was rejected or could not be performed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Server reported an error for a statement
    #[error("sql error: {0}")]
    Sql(String),

    /// TLS setup or handshake failure
    #[error("tls error: {0}")]
    Tls(String),

    /// The server closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// No connection is currently established
    #[error("connection is not established")]
    NotConnected,

    /// Opening the connection did not finish in time
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// Operation is not valid in the current state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Writing certificate material failed
    #[error("failed to provision {}: {source}", path.display())]
    Provisioning {
        /// Target file or directory
        path: PathBuf,
        /// Underlying filesystem error
        #[source]
        source: io::Error,
    },

    /// Isolation level code outside 0..=7, or not supported by the driver
    #[error("unsupported transaction isolation level: {0}")]
    UnsupportedIsolation(String),

    /// The supervisor was stopped or gave up
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Whether this error means the underlying connection is unusable.
    ///
    /// Statement-level failures (`Sql`) leave the session intact.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::NotConnected
                | Error::ConnectTimeout(_)
                | Error::Protocol(_)
                | Error::Tls(_)
        )
    }

    /// Short category label used for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Protocol(_) => "protocol",
            Error::Authentication(_) => "authentication",
            Error::Sql(_) => "sql",
            Error::Tls(_) => "tls",
            Error::ConnectionClosed => "connection_closed",
            Error::NotConnected => "not_connected",
            Error::ConnectTimeout(_) => "connect_timeout",
            Error::InvalidState { .. } => "invalid_state",
            Error::Provisioning { .. } => "provisioning",
            Error::UnsupportedIsolation(_) => "unsupported_isolation",
            Error::Cancelled(_) => "cancelled",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::NotConnected.is_connection_error());
        assert!(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_connection_error());
        assert!(!Error::Sql("duplicate key".into()).is_connection_error());
        assert!(!Error::UnsupportedIsolation("9".into()).is_connection_error());
    }

    #[test]
    fn test_provisioning_display_includes_path() {
        let err = Error::Provisioning {
            path: PathBuf::from("ssl/db-ca-cert.pem"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("ssl/db-ca-cert.pem"));
        assert!(msg.contains("denied"));
        assert_eq!(err.category(), "provisioning");
    }
}
