//! TCP Transport
//!
//! For Wi-Fi adapters and serial-to-socket bridges; the peer address is a
//! `host:port` pair.

use crate::error::LinkError;
use crate::transport::{Channel, Transport};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

/// Default limit for one connect call
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Opens TCP channels to `host:port` addresses
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Channel = TcpChannel;

    async fn create_channel(
        &mut self,
        address: &str,
        service_id: Uuid,
    ) -> Result<TcpChannel, LinkError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
            .await
            .map_err(|e| LinkError::ChannelCreate(format!("{address}: {e}")))?
            .collect();

        if addrs.is_empty() {
            return Err(LinkError::ChannelCreate(format!(
                "{address}: no addresses resolved"
            )));
        }

        // Sockets have no service records; the id only identifies the session
        debug!("Resolved {} to {:?} (service {})", address, addrs, service_id);
        Ok(TcpChannel {
            addrs,
            connect_timeout: self.connect_timeout,
            stream: None,
        })
    }
}

/// A resolved TCP endpoint, connected on demand
#[derive(Debug)]
pub struct TcpChannel {
    addrs: Vec<SocketAddr>,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

#[async_trait]
impl Channel for TcpChannel {
    type Stream = TcpStream;

    async fn connect(&mut self) -> Result<(), LinkError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addrs[..]))
            .await
            .map_err(|_| {
                LinkError::Connect(format!("timed out after {:?}", self.connect_timeout))
            })?
            .map_err(|e| LinkError::Connect(e.to_string()))?;

        stream
            .set_nodelay(true)
            .map_err(|e| LinkError::Connect(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn open_stream(&mut self) -> Result<TcpStream, LinkError> {
        self.stream
            .take()
            .ok_or_else(|| LinkError::Stream("channel is not connected".into()))
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}
