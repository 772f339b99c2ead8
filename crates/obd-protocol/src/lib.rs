//! OBD-II Protocol Implementation
//!
//! Text framing and command sequencing for ELM327-compatible adapters.
//! Requests are ASCII lines terminated by a carriage return; every reply
//! ends with the adapter's `>` prompt. The [`CommandPipeline`] owns the
//! adapter stream and keeps exactly one exchange in flight.

mod command;
mod error;
mod framer;
mod pid;
mod pipeline;
mod protocol;
mod reply;

#[cfg(any(test, feature = "mock"))]
pub mod testing;

pub use command::{Command, Reply};
pub use error::{DecodeError, FrameError, PipelineError};
pub use framer::{encode, scan_frame, Frame, PROMPT, REQUEST_TERMINATOR};
pub use pid::{SensorKind, SensorReading};
pub use pipeline::CommandPipeline;
pub use protocol::ObdProtocol;
pub use reply::AdapterReply;

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Positive response offset added to the request mode
    pub const RESPONSE_OFFSET: u8 = 0x40;
}
