//! Transport Boundary
//!
//! The link session only needs four operations from the underlying
//! transport: create a channel, connect it, take its byte stream, close it.

use crate::error::LinkError;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Factory for channels to a peer address
#[async_trait]
pub trait Transport: Send {
    type Channel: Channel;

    /// Create a channel bound to `address` and the peer's service id
    async fn create_channel(
        &mut self,
        address: &str,
        service_id: Uuid,
    ) -> Result<Self::Channel, LinkError>;
}

/// One point-to-point channel to the adapter
#[async_trait]
pub trait Channel: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Blocking connect to the peer
    async fn connect(&mut self) -> Result<(), LinkError>;

    /// Take the duplex byte stream of a connected channel
    fn open_stream(&mut self) -> Result<Self::Stream, LinkError>;

    /// Release the channel; safe to call more than once
    async fn close(&mut self);
}

/// Stream type produced by a transport's channels
pub type StreamOf<T> = <<T as Transport>::Channel as Channel>::Stream;
