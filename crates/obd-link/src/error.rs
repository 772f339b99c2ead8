//! Link Error Types

use crate::session::{ConnectPhase, SessionState};
use thiserror::Error;

/// Errors raised while bringing up or tearing down the adapter link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Channel could not be created for the peer address
    #[error("Channel creation failed: {0}")]
    ChannelCreate(String),

    /// Channel exists but the peer did not accept the connection
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Connected channel did not yield a byte stream
    #[error("Could not open stream: {0}")]
    Stream(String),

    /// Attempt cap reached in one of the retry phases
    #[error("Gave up after {attempts} {phase} attempts")]
    RetriesExhausted { phase: ConnectPhase, attempts: u32 },

    /// An attempt cap of zero would never try the peer
    #[error("Attempt cap must be at least 1")]
    ZeroAttemptCap,

    /// State change that would move the session backwards
    #[error("Invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}
