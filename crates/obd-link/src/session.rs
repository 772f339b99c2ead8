//! Transport Session
//!
//! Two-phase connect state machine: create a channel, then connect it,
//! each phase retrying with the same backoff. The session owns the channel
//! for the lifetime of the connection.

use crate::backoff::{BackoffPolicy, FixedBackoff};
use crate::error::LinkError;
use crate::peer::Peer;
use crate::transport::{Channel, StreamOf, Transport};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle of one logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Disconnected,
    AwaitingChannel,
    AwaitingHandshake,
    Ready,
    Closed,
    Failed,
}

impl SessionState {
    /// States only advance; Closed is reachable from anywhere and final.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (*self, next) {
            (_, Closed) => true,
            (Closed, _) => false,
            (_, Failed) => true,
            (Disconnected, AwaitingChannel)
            | (AwaitingChannel, AwaitingHandshake)
            | (AwaitingHandshake, Ready) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Retry phase of [`TransportSession::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectPhase {
    Channel,
    Connect,
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectPhase::Channel => f.write_str("channel creation"),
            ConnectPhase::Connect => f.write_str("connect"),
        }
    }
}

/// Progress reported while the link comes up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    StateChanged { from: SessionState, to: SessionState },
    ChannelAttempt { attempt: u32 },
    ChannelFailed { attempt: u32, error: String },
    ConnectAttempt { attempt: u32 },
    ConnectFailed { attempt: u32, error: String },
    Connected { peer: Peer },
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::StateChanged { from, to } => write!(f, "State {from} -> {to}"),
            LinkEvent::ChannelAttempt { attempt } => {
                write!(f, "Attempting channel creation ({attempt})")
            }
            LinkEvent::ChannelFailed { attempt, error } => {
                write!(f, "Channel creation {attempt} failed: {error}")
            }
            LinkEvent::ConnectAttempt { attempt } => write!(f, "Attempting connect ({attempt})"),
            LinkEvent::ConnectFailed { attempt, error } => {
                write!(f, "Connect {attempt} failed: {error}")
            }
            LinkEvent::Connected { peer } => write!(f, "Connected to {peer}"),
        }
    }
}

/// Attempt counters for the last `connect`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectStats {
    pub channel_attempts: u32,
    pub channel_failures: u32,
    pub connect_attempts: u32,
    pub connect_failures: u32,
    /// Total time spent waiting between attempts
    pub backoff: Duration,
}

/// Owns the connect/retry state machine and the open channel
pub struct TransportSession<T: Transport> {
    transport: T,
    channel: Option<T::Channel>,
    peer: Option<Peer>,
    state: SessionState,
    backoff: Box<dyn BackoffPolicy>,
    stats: ConnectStats,
    events: Option<mpsc::UnboundedSender<LinkEvent>>,
}

impl<T: Transport> TransportSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            channel: None,
            peer: None,
            state: SessionState::Disconnected,
            backoff: Box::new(FixedBackoff::default()),
            stats: ConnectStats::default(),
            events: None,
        }
    }

    /// Replace the default 2 s fixed backoff
    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    /// Report progress on `events` in addition to logging it
    pub fn with_events(mut self, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> ConnectStats {
        self.stats
    }

    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    /// Bring the link up and return the adapter stream.
    ///
    /// Retries each phase until it succeeds, or until `max_attempts`
    /// attempts of that phase have failed. `Some(0)` is rejected before
    /// any attempt is made.
    pub async fn connect(
        &mut self,
        peer: Peer,
        max_attempts: Option<u32>,
    ) -> Result<StreamOf<T>, LinkError> {
        if self.state != SessionState::Disconnected {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                to: SessionState::AwaitingChannel,
            });
        }

        if max_attempts == Some(0) {
            return Err(LinkError::ZeroAttemptCap);
        }

        info!("Connecting to {} (service {})", peer, peer.security_id);
        self.stats = ConnectStats::default();
        self.peer = Some(peer.clone());
        self.transition(SessionState::AwaitingChannel)?;

        let mut channel = self.open_channel(&peer, max_attempts).await?;

        if let Err(e) = self.connect_channel(&mut channel, max_attempts).await {
            channel.close().await;
            return Err(e);
        }

        self.transition(SessionState::AwaitingHandshake)?;

        let stream = match channel.open_stream() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Connected channel has no stream: {}", e);
                channel.close().await;
                self.fail();
                return Err(e);
            }
        };

        self.channel = Some(channel);
        info!("Connected to {}", peer);
        self.emit(LinkEvent::Connected { peer });
        Ok(stream)
    }

    async fn open_channel(
        &mut self,
        peer: &Peer,
        max_attempts: Option<u32>,
    ) -> Result<T::Channel, LinkError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.stats.channel_attempts = attempt;
            info!("Attempting channel creation ({})", attempt);
            self.emit(LinkEvent::ChannelAttempt { attempt });

            match self
                .transport
                .create_channel(&peer.address, peer.security_id)
                .await
            {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    self.stats.channel_failures += 1;
                    warn!("Channel creation attempt {} failed: {}", attempt, e);
                    self.emit(LinkEvent::ChannelFailed {
                        attempt,
                        error: e.to_string(),
                    });
                    self.retry_or_give_up(ConnectPhase::Channel, attempt, max_attempts)
                        .await?;
                }
            }
        }
    }

    async fn connect_channel(
        &mut self,
        channel: &mut T::Channel,
        max_attempts: Option<u32>,
    ) -> Result<(), LinkError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.stats.connect_attempts = attempt;
            info!("Attempting connect ({})", attempt);
            self.emit(LinkEvent::ConnectAttempt { attempt });

            match channel.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.stats.connect_failures += 1;
                    warn!("Connect attempt {} failed: {}", attempt, e);
                    self.emit(LinkEvent::ConnectFailed {
                        attempt,
                        error: e.to_string(),
                    });
                    self.retry_or_give_up(ConnectPhase::Connect, attempt, max_attempts)
                        .await?;
                }
            }
        }
    }

    async fn retry_or_give_up(
        &mut self,
        phase: ConnectPhase,
        attempt: u32,
        max_attempts: Option<u32>,
    ) -> Result<(), LinkError> {
        if max_attempts.is_some_and(|max| attempt >= max) {
            warn!("Giving up on {} after {} attempts", phase, attempt);
            self.fail();
            return Err(LinkError::RetriesExhausted {
                phase,
                attempts: attempt,
            });
        }

        let delay = self.backoff.delay(attempt);
        self.stats.backoff += delay;
        debug!("Retrying {} in {:?}", phase, delay);
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Handshake finished; commands may now be issued
    pub fn mark_ready(&mut self) -> Result<(), LinkError> {
        self.transition(SessionState::Ready)
    }

    /// Record an unrecoverable fault and release the channel.
    ///
    /// The session stays observable as Failed until [`close`](Self::close).
    pub async fn abort(&mut self) {
        self.fail();
        if let Some(mut channel) = self.channel.take() {
            debug!("Releasing channel after failure");
            channel.close().await;
        }
    }

    /// Release the channel. Idempotent and valid from any state.
    pub async fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            debug!("Closing channel");
            channel.close().await;
        }
        if self.state != SessionState::Closed {
            // Closed is reachable from every state
            let _ = self.transition(SessionState::Closed);
            info!("Session closed");
        }
    }

    fn fail(&mut self) {
        if self.state.can_transition_to(SessionState::Failed) && self.state != SessionState::Failed {
            let _ = self.transition(SessionState::Failed);
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<(), LinkError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(LinkError::InvalidTransition { from, to });
        }
        debug!("Session state {} -> {}", from, to);
        self.state = to;
        self.emit(LinkEvent::StateChanged { from, to });
        Ok(())
    }

    fn emit(&self, event: LinkEvent) {
        if let Some(tx) = &self.events {
            // Receiver may have gone away; logging already covers the event
            let _ = tx.send(event);
        }
    }
}
