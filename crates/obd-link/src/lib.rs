//! OBD-II Adapter Link
//!
//! Selects a bonded adapter and brings up the byte stream to it. The
//! [`TransportSession`] retries channel creation and connection with a
//! fixed backoff until the adapter answers, then hands the stream to the
//! command pipeline.

mod backoff;
mod error;
mod peer;
mod serial;
mod session;
mod tcp;
mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod testing;

pub use backoff::{BackoffPolicy, FixedBackoff, DEFAULT_RETRY_INTERVAL};
pub use error::LinkError;
pub use peer::{Peer, PeerEnumerator, PeerRecord, PeerSelector, StaticPeers, SERIAL_PORT_SERVICE};
pub use serial::{SerialChannel, SerialTransport, DEFAULT_BAUD_RATE};
pub use session::{ConnectPhase, ConnectStats, LinkEvent, SessionState, TransportSession};
pub use tcp::{TcpChannel, TcpTransport};
pub use transport::{Channel, StreamOf, Transport};
