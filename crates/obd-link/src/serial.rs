//! Serial Transport
//!
//! For wired adapters and bound RFCOMM devices; the peer address is a
//! device path such as `/dev/rfcomm0` or `COM5`.

use crate::error::LinkError;
use crate::transport::{Channel, Transport};
use async_trait::async_trait;
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;
use uuid::Uuid;

/// Default ELM327 serial speed
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Opens serial ports at a fixed baud rate
#[derive(Debug, Clone)]
pub struct SerialTransport {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialTransport {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE, Duration::from_secs(2))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    type Channel = SerialChannel;

    async fn create_channel(
        &mut self,
        address: &str,
        service_id: Uuid,
    ) -> Result<SerialChannel, LinkError> {
        if address.is_empty() {
            return Err(LinkError::ChannelCreate("empty device path".into()));
        }

        // The device node appears only once the RFCOMM binding exists
        if cfg!(unix) {
            tokio::fs::metadata(address)
                .await
                .map_err(|e| LinkError::ChannelCreate(format!("{address}: {e}")))?;
        }

        debug!(
            "Serial channel {} at {} baud (service {})",
            address, self.baud_rate, service_id
        );
        Ok(SerialChannel {
            path: address.to_string(),
            baud_rate: self.baud_rate,
            timeout: self.timeout,
            port: None,
        })
    }
}

/// A serial device path, opened on connect
#[derive(Debug)]
pub struct SerialChannel {
    path: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<SerialStream>,
}

#[async_trait]
impl Channel for SerialChannel {
    type Stream = SerialStream;

    async fn connect(&mut self) -> Result<(), LinkError> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| LinkError::Connect(format!("{}: {}", self.path, e)))?;
        self.port = Some(port);
        Ok(())
    }

    fn open_stream(&mut self) -> Result<SerialStream, LinkError> {
        self.port
            .take()
            .ok_or_else(|| LinkError::Stream("port is not open".into()))
    }

    async fn close(&mut self) {
        self.port.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_device_fails_channel_creation() {
        let mut transport = SerialTransport::default();
        let err = transport
            .create_channel("", crate::SERIAL_PORT_SERVICE)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ChannelCreate(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_device_creates_channel() {
        let mut transport = SerialTransport::new(9600, Duration::from_millis(100));
        let channel = transport
            .create_channel("/dev/null", crate::SERIAL_PORT_SERVICE)
            .await
            .unwrap();
        let debug = format!("{channel:?}");
        assert!(debug.contains("/dev/null"));
        assert!(debug.contains("9600"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonexistent_path() {
        let mut transport = SerialTransport::default();
        let err = transport
            .create_channel("/dev/does-not-exist-obd", crate::SERIAL_PORT_SERVICE)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ChannelCreate(_)));
    }
}
