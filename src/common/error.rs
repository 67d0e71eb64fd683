//! Error types for replset-bootstrap

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Engine / Shell Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Malformed reply from {target}: {reason}")]
    MalformedReply { target: String, reason: String },

    #[error("Command {command} rejected: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("Database engine exited: {0}")]
    EngineExited(String),

    // === Membership Errors ===
    #[error("Local node not found in peer list (hostname {0})")]
    UnknownServiceAddress(String),

    #[error("Primary {primary} rejected membership of {host}: {reason}")]
    MembershipRejected {
        primary: String,
        host: String,
        reason: String,
    },

    // === Credential Errors ===
    #[error("Credentials file corrupted: {0}")]
    CredentialsCorrupted(String),

    // === TLS Errors ===
    #[error("TLS provisioning failed: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Interrupted by termination signal")]
    Terminated,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    ///
    /// Retryable errors are transient external state: the engine is not up
    /// yet, a peer is unreachable, or a poll ran out of attempts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::MalformedReply { .. }
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConnectionFailed("node-1".into()).is_retryable());
        assert!(Error::Timeout("ping".into()).is_retryable());
        assert!(!Error::Terminated.is_retryable());
        assert!(!Error::MembershipRejected {
            primary: "node-0".into(),
            host: "node-1:27017".into(),
            reason: "bad config".into(),
        }
        .is_retryable());
    }
}
