//! ELM327 Wire Framing
//!
//! Requests go out as `text\r`; replies are read byte by byte until the
//! adapter's `>` prompt.

use crate::error::FrameError;
use std::fmt;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Byte appended to every request
pub const REQUEST_TERMINATOR: u8 = b'\r';

/// Prompt byte the adapter sends once a reply is complete
pub const PROMPT: u8 = b'>';

/// One complete reply, without the trailing prompt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lossy text view; the protocol is ASCII so this rarely substitutes
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Frame(bytes.to_vec())
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame(text.as_bytes().to_vec())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Serialize a command for the wire.
pub fn encode(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.as_bytes());
    bytes.push(REQUEST_TERMINATOR);
    bytes
}

/// Read one reply from `reader`.
///
/// Consumes bytes one at a time so nothing past the prompt is taken from
/// the stream. End-of-data before the prompt is [`FrameError::Truncated`].
pub async fn scan_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    loop {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(FrameError::Truncated {
                    buffered: buf.len(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if byte == PROMPT {
            trace!("Frame complete: {} bytes", buf.len());
            return Ok(Frame(buf));
        }
        buf.push(byte);
    }
}
