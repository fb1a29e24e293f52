//! Error types for the SSH gate

use thiserror::Error;

/// Main error type for the SSH gate
#[derive(Debug, Error)]
pub enum SshGateError {
    /// The listening socket could not be created
    #[error("Unable to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A single accept call failed
    #[error("Unable to accept: {0}")]
    Accept(#[source] std::io::Error),

    /// Remote closed the connection before negotiation completed
    #[error("Connection closed by remote host")]
    HandshakeEof,

    /// Negotiation or authentication failed
    #[error("Unable to negotiate SSH: {0}")]
    Handshake(String),

    /// Negotiation did not finish in time
    #[error("Handshake timeout after {0}ms")]
    HandshakeTimeout(u64),

    /// An authenticated session ended with an engine error
    #[error("SSH session failed: {0}")]
    Session(String),

    /// Presented key is not authorized
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Authorized keys input stopped at a malformed record
    #[error("Invalid authorized key on line {line} ({added} key(s) added before it): {reason}")]
    AuthorizedKey {
        line: usize,
        added: usize,
        reason: String,
    },

    /// Host key material could not be decoded
    #[error("Invalid host key: {0}")]
    HostKey(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown was requested while waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SshGateError
pub type Result<T> = std::result::Result<T, SshGateError>;

impl SshGateError {
    /// Create a handshake error from a string
    pub fn handshake(msg: impl Into<String>) -> Self {
        SshGateError::Handshake(msg.into())
    }

    /// Create an authentication rejected error from a string
    pub fn auth_rejected(msg: impl Into<String>) -> Self {
        SshGateError::AuthenticationRejected(msg.into())
    }

    /// Create a host key error from a string
    pub fn host_key(msg: impl Into<String>) -> Self {
        SshGateError::HostKey(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        SshGateError::Config(msg.into())
    }
}
