//! Error types for rexsh.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for rexsh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or contradictory connection settings, or no connection yet.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The shared connection could not be established.
    #[error("Connection to {host}:{port} failed ({kind}): {source}")]
    Connection {
        host: String,
        port: u16,
        kind: ConnectionErrorKind,
        #[source]
        source: TransportError,
    },

    /// SSH transport-level errors on an established connection
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A session's channel failed while the session was running.
    #[error("Stream error on session '{session_id}': {message}")]
    Stream { session_id: String, message: String },

    /// Session lookup and lifecycle errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Malformed caller input.
    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },
}

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_params(message: impl Into<String>) -> Self {
        Error::InvalidParams {
            message: message.into(),
        }
    }

    /// Wrap a transport error raised while connecting, classifying its cause.
    pub(crate) fn connection(host: &str, port: u16, source: TransportError) -> Self {
        Error::Connection {
            host: host.to_string(),
            port,
            kind: ConnectionErrorKind::classify(&source),
            source,
        }
    }
}

/// Cause category of a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Nothing listening on the port.
    Refused,
    /// Credentials were rejected or the key could not be used.
    AuthenticationFailed,
    /// TCP connect or SSH handshake did not finish in time.
    TimedOut,
    /// Anything else.
    Unknown,
}

impl ConnectionErrorKind {
    /// Derive the cause category from a transport error.
    pub fn classify(err: &TransportError) -> Self {
        match err {
            TransportError::ConnectionFailed { source, .. } | TransportError::Io(source) => {
                match source.kind() {
                    io::ErrorKind::ConnectionRefused => Self::Refused,
                    io::ErrorKind::TimedOut => Self::TimedOut,
                    _ => Self::Unknown,
                }
            }
            TransportError::AuthenticationFailed { .. } | TransportError::Key(_) => {
                Self::AuthenticationFailed
            }
            TransportError::Timeout(_) => Self::TimedOut,
            TransportError::Ssh(russh::Error::ConnectionTimeout)
            | TransportError::Ssh(russh::Error::InactivityTimeout) => Self::TimedOut,
            TransportError::Ssh(russh::Error::IO(source)) => match source.kind() {
                io::ErrorKind::ConnectionRefused => Self::Refused,
                io::ErrorKind::TimedOut => Self::TimedOut,
                _ => Self::Unknown,
            },
            TransportError::Ssh(russh::Error::NotAuthenticated) => Self::AuthenticationFailed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Refused => "refused",
            Self::AuthenticationFailed => "authentication failed",
            Self::TimedOut => "timed out",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Transport layer errors (SSH connection, authentication, channels).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host key not present in known_hosts (strict verification)
    #[error("Host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// A channel failed before the remote side closed it
    #[error("Channel failed: {0}")]
    Channel(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Session lookup and lifecycle errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session with this id is registered.
    #[error("Session '{id}' not found")]
    NotFound { id: String },

    /// The session has already closed.
    #[error("Session '{id}' is closed")]
    Closed { id: String },
}

/// Output sink delivery errors. Never surfaced to session callers.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The viewer could not be reached.
    #[error("Viewer request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The viewer answered with a non-success status.
    #[error("Viewer returned HTTP {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },
}

/// Result type alias using rexsh's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_classification() {
        let err = TransportError::ConnectionFailed {
            host: "localhost".into(),
            port: 2222,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(
            ConnectionErrorKind::classify(&err),
            ConnectionErrorKind::Refused
        );
    }

    #[test]
    fn test_auth_and_timeout_classification() {
        let auth = TransportError::AuthenticationFailed {
            user: "root".into(),
        };
        assert_eq!(
            ConnectionErrorKind::classify(&auth),
            ConnectionErrorKind::AuthenticationFailed
        );

        let timeout = TransportError::Timeout(Duration::from_secs(5));
        assert_eq!(
            ConnectionErrorKind::classify(&timeout),
            ConnectionErrorKind::TimedOut
        );

        assert_eq!(
            ConnectionErrorKind::classify(&TransportError::Disconnected),
            ConnectionErrorKind::Unknown
        );
    }

    #[test]
    fn test_connection_error_display() {
        let err = Error::connection(
            "kali",
            22,
            TransportError::Timeout(Duration::from_secs(1)),
        );
        let text = err.to_string();
        assert!(text.contains("kali:22"));
        assert!(text.contains("timed out"));
    }
}
