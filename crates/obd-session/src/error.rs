//! Session Error Types

use obd_link::{LinkError, SessionState};
use obd_protocol::PipelineError;
use thiserror::Error;

/// Configuration problems; never retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Enumeration returned no bonded peers
    #[error("No bonded peer available")]
    NoPeerAvailable,

    /// Configuration sources could not be read or parsed
    #[error("Configuration error: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// Errors surfaced by [`DiagnosticSession`](crate::DiagnosticSession)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Link could not be brought up
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// An initialisation command failed; the link has been released
    #[error("Handshake command {command:?} failed: {source}")]
    Handshake {
        command: String,
        source: PipelineError,
    },

    /// A sensor query failed at the transport level; the session is Failed
    #[error("Command {command:?} failed: {source}")]
    Command {
        command: String,
        source: PipelineError,
    },

    /// Polling requested before the handshake completed
    #[error("Session is {0}, not ready")]
    NotReady(SessionState),
}
