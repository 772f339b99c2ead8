//! In-memory transport for tests
//!
//! [`MockTransport`] fails channel creation and connect a configurable
//! number of times before succeeding, then hands out a [`ScriptedStream`].

use crate::error::LinkError;
use crate::transport::{Channel, Transport};
use async_trait::async_trait;
use obd_protocol::testing::ScriptedStream;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MockState {
    channel_failures: u32,
    connect_failures: u32,
    stream: Option<ScriptedStream>,
    channels_created: Vec<(String, Uuid)>,
    connect_calls: u32,
    closes: u32,
}

fn lock(state: &Arc<Mutex<MockState>>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport whose failures are injected up front
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Transport that succeeds immediately and serves `stream`
    pub fn new(stream: ScriptedStream) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                stream: Some(stream),
                ..Default::default()
            })),
        }
    }

    /// Fail the first `n` channel creations
    pub fn failing_channels(self, n: u32) -> Self {
        lock(&self.state).channel_failures = n;
        self
    }

    /// Fail the first `n` connect calls
    pub fn failing_connects(self, n: u32) -> Self {
        lock(&self.state).connect_failures = n;
        self
    }

    /// `(address, service id)` of every successfully created channel
    pub fn channels_created(&self) -> Vec<(String, Uuid)> {
        lock(&self.state).channels_created.clone()
    }

    pub fn connect_calls(&self) -> u32 {
        lock(&self.state).connect_calls
    }

    pub fn closes(&self) -> u32 {
        lock(&self.state).closes
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Channel = MockChannel;

    async fn create_channel(
        &mut self,
        address: &str,
        service_id: Uuid,
    ) -> Result<MockChannel, LinkError> {
        let mut state = lock(&self.state);
        if state.channel_failures > 0 {
            state.channel_failures -= 1;
            return Err(LinkError::ChannelCreate("injected failure".into()));
        }
        state.channels_created.push((address.to_string(), service_id));
        Ok(MockChannel {
            state: Arc::clone(&self.state),
            connected: false,
        })
    }
}

/// Channel handed out by [`MockTransport`]
#[derive(Debug)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
    connected: bool,
}

#[async_trait]
impl Channel for MockChannel {
    type Stream = ScriptedStream;

    async fn connect(&mut self) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        state.connect_calls += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(LinkError::Connect("injected failure".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn open_stream(&mut self) -> Result<ScriptedStream, LinkError> {
        if !self.connected {
            return Err(LinkError::Stream("channel is not connected".into()));
        }
        lock(&self.state)
            .stream
            .take()
            .ok_or_else(|| LinkError::Stream("stream already taken".into()))
    }

    async fn close(&mut self) {
        if self.connected {
            self.connected = false;
            lock(&self.state).closes += 1;
        }
    }
}
