//! OBD-II Error Types

use crate::reply::AdapterReply;
use thiserror::Error;

/// Errors raised while moving bytes to or from the adapter stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Stream reached end-of-data before the `>` prompt
    #[error("Stream ended before prompt ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    /// Underlying stream error
    #[error("Stream I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err.to_string())
    }
}

/// Errors raised while turning a complete frame into a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Adapter answered with one of its status replies instead of data
    #[error("Adapter replied: {0}")]
    Adapter(AdapterReply),

    /// Frame carried no data lines
    #[error("Empty response")]
    Empty,

    /// Frame contained characters that are not hex digits
    #[error("Non-hex response: {0:?}")]
    NotHex(String),

    /// Response header did not match the request
    #[error("Unexpected response header: expected 41 {expected:02X}, got {found}")]
    UnexpectedHeader { expected: u8, found: String },

    /// Fewer data bytes than the PID formula needs
    #[error("PID {pid:02X} needs {needed} data bytes, got {got}")]
    ShortPayload { pid: u8, needed: usize, got: usize },
}

/// Errors from a single command exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// No complete frame before the command deadline
    #[error("Timeout waiting for response to {command:?} after {after_ms}ms")]
    Timeout { command: String, after_ms: u64 },

    /// Frame arrived but could not be decoded
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Stream fault while writing the request or scanning the reply
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// An earlier timeout or stream fault left the byte position unknown
    #[error("Pipeline desynchronized by an earlier failure")]
    Desynchronized,
}

impl PipelineError {
    /// Whether the session must be torn down after this error.
    ///
    /// Decode failures describe one bad reply; everything else means the
    /// two ends may disagree about where the next frame starts.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Decode(_))
    }
}
