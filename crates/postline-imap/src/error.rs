//! Error types for the IMAP engine.

use std::fmt;

use thiserror::Error;

use crate::parser::TextCode;

/// Which tagged response type produced a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Tagged `NO`.
    No,
    /// Tagged `BAD`.
    Bad,
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => f.write_str("NO"),
            Self::Bad => f.write_str("BAD"),
        }
    }
}

/// Which timer expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSource {
    /// The whole connect and login sequence took too long.
    Connect,
    /// The server did not answer the credential exchange in time.
    Auth,
    /// The socket was inactive for longer than the configured limit.
    Socket,
}

impl fmt::Display for TimeoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connecting to server"),
            Self::Auth => f.write_str("authenticating with server"),
            Self::Socket => f.write_str("waiting for socket activity"),
        }
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// The server rejected a command.
    Protocol,
    /// The transport failed or closed.
    Socket,
    /// A timer expired.
    Timeout,
    /// The server lacks a required capability.
    Capability,
    /// Caller-supplied arguments were malformed.
    Validation,
    /// Connection setup failed without a server rejection.
    Negotiation,
}

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Server answered a command with `NO` or `BAD`.
    #[error("Server returned {kind}: {text}")]
    Protocol {
        /// Response type.
        kind: ProtocolErrorKind,
        /// Response text code, if any.
        code: Option<TextCode>,
        /// Human-readable server text.
        text: String,
    },

    /// Server sent BYE and closed the connection.
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Connection closed before the command completed.
    #[error("Connection closed")]
    Closed,

    /// A timer expired.
    #[error("Timed out while {0}")]
    Timeout(TimeoutSource),

    /// Server does not advertise a capability the operation needs.
    #[error("Server does not support {0}")]
    Capability(String),

    /// Caller-supplied arguments were rejected before sending anything.
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// Connection setup failed.
    #[error("{0}")]
    Negotiation(String),

    /// Response grammar error.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },
}

impl Error {
    /// Returns the coarse source of this error.
    #[must_use]
    pub const fn source_kind(&self) -> ErrorSource {
        match self {
            Self::Protocol { .. } => ErrorSource::Protocol,
            Self::Io(_) | Self::Tls(_) | Self::Bye(_) | Self::Closed => ErrorSource::Socket,
            Self::Timeout(_) => ErrorSource::Timeout,
            Self::Capability(_) => ErrorSource::Capability,
            Self::Validation(_) | Self::Parse { .. } => ErrorSource::Validation,
            Self::InvalidDnsName(_) | Self::Negotiation(_) => ErrorSource::Negotiation,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn capability(name: impl Into<String>) -> Self {
        Self::Capability(name.into())
    }

    /// Copies the error so one failure can reject several waiters.
    ///
    /// I/O errors keep their kind and message; DNS name errors become
    /// negotiation errors with the same text.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Io(err) => Self::Io(std::io::Error::new(err.kind(), err.to_string())),
            Self::Tls(err) => Self::Tls(err.clone()),
            Self::InvalidDnsName(err) => Self::Negotiation(err.to_string()),
            Self::Protocol { kind, code, text } => Self::Protocol {
                kind: *kind,
                code: code.clone(),
                text: text.clone(),
            },
            Self::Bye(text) => Self::Bye(text.clone()),
            Self::Closed => Self::Closed,
            Self::Timeout(source) => Self::Timeout(*source),
            Self::Capability(name) => Self::Capability(name.clone()),
            Self::Validation(message) => Self::Validation(message.clone()),
            Self::Negotiation(message) => Self::Negotiation(message.clone()),
            Self::Parse { position, message } => Self::Parse {
                position: *position,
                message: message.clone(),
            },
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
