//! Diagnostic Session
//!
//! Drives the link session and command pipeline: connect, initialise the
//! adapter, then poll RPM, speed and fuel level in a fixed order.

use crate::error::{ConfigError, SessionError};
use crate::settings::SessionConfig;
use obd_link::{
    FixedBackoff, Peer, PeerEnumerator, PeerSelector, SessionState, StreamOf, Transport,
    TransportSession,
};
use obd_protocol::{Command, CommandPipeline, PipelineError, SensorKind, SensorReading};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// One adapter connection from handshake to close
pub struct DiagnosticSession<T: Transport> {
    link: TransportSession<T>,
    pipeline: Option<CommandPipeline<StreamOf<T>>>,
    config: SessionConfig,
    init: Vec<Command<String>>,
    sensors: Vec<(SensorKind, Command<f64>)>,
    rounds: u64,
}

impl<T: Transport> DiagnosticSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let link =
            TransportSession::new(transport).with_backoff(FixedBackoff::new(config.retry_interval()));
        Self::with_link(link, config)
    }

    /// Use a pre-configured link session (custom backoff, event channel)
    pub fn with_link(link: TransportSession<T>, config: SessionConfig) -> Self {
        let init = vec![
            Command::echo_off(config.init_timeout()),
            Command::linefeed_off(config.init_timeout()),
            Command::adapter_timeout(config.adapter_timeout, config.init_timeout()),
            Command::select_protocol(config.protocol, config.init_timeout()),
        ];
        let sensors = SensorKind::ALL
            .iter()
            .map(|&kind| (kind, Command::sensor(kind, config.command_timeout())))
            .collect();

        Self {
            link,
            pipeline: None,
            config,
            init,
            sensors,
            rounds: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.link.state()
    }

    pub fn link(&self) -> &TransportSession<T> {
        &self.link
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Completed poll rounds
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Select a bonded peer and start the session with it
    pub async fn run<E>(&mut self, enumerator: &E) -> Result<(), SessionError>
    where
        E: PeerEnumerator + ?Sized,
    {
        let peer = PeerSelector::default()
            .select_from(enumerator)
            .ok_or(ConfigError::NoPeerAvailable)?;
        self.start(peer).await
    }

    /// Connect to `peer` and run the initialisation sequence.
    ///
    /// Every init command must complete at the transport level; their
    /// acknowledgements are not interpreted. On failure the link is
    /// released and the session is left Failed.
    pub async fn start(&mut self, peer: Peer) -> Result<(), SessionError> {
        let stream = self.link.connect(peer, self.config.max_attempts).await?;
        let mut pipeline = CommandPipeline::new(stream);

        for command in &self.init {
            match pipeline.transact(command).await {
                Ok(reply) => match reply.value {
                    Ok(ack) => debug!("{} acknowledged: {}", command.request(), ack),
                    Err(e) => debug!("{} reply ignored: {}", command.request(), e),
                },
                Err(e) => {
                    error!("Initialisation failed at {}: {}", command.request(), e);
                    let command = command.request().to_string();
                    pipeline.shutdown().await;
                    self.link.abort().await;
                    return Err(SessionError::Handshake { command, source: e });
                }
            }
        }

        self.link.mark_ready()?;
        self.pipeline = Some(pipeline);
        info!("Adapter initialised ({})", self.config.protocol);
        Ok(())
    }

    /// Query every sensor once, in order.
    ///
    /// A reply that fails to decode still yields a reading with no value.
    /// A timeout or stream fault fails the session and skips the remaining
    /// sensors.
    pub async fn poll_round(&mut self) -> Result<Vec<SensorReading>, SessionError> {
        let mut readings = Vec::with_capacity(self.sensors.len());
        self.poll_round_into(&mut readings).await?;
        Ok(readings)
    }

    /// Like [`poll_round`](Self::poll_round), appending to `readings` as
    /// each frame completes. Readings taken before a failing query stay in
    /// `readings` when an error is returned.
    pub async fn poll_round_into(
        &mut self,
        readings: &mut Vec<SensorReading>,
    ) -> Result<(), SessionError> {
        let state = self.link.state();
        let pipeline = match self.pipeline.as_mut() {
            Some(pipeline) if state == SessionState::Ready => pipeline,
            _ => return Err(SessionError::NotReady(state)),
        };

        match query_sensors(pipeline, &self.sensors, readings).await {
            Ok(()) => {
                self.rounds += 1;
                Ok(())
            }
            Err((command, source)) => {
                self.teardown().await;
                Err(SessionError::Command { command, source })
            }
        }
    }

    /// Poll until `shutdown` turns true, sending every reading on `readings`.
    ///
    /// Cancellation is checked between rounds only; an in-flight query is
    /// bounded by its own timeout. The link is closed on a clean stop.
    /// Returns the number of completed rounds.
    pub async fn poll_forever(
        &mut self,
        readings: mpsc::Sender<SensorReading>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<u64, SessionError> {
        info!("Starting sensor polling");

        loop {
            if *shutdown.borrow() {
                info!("Polling cancelled");
                break;
            }

            let mut round = Vec::with_capacity(self.sensors.len());
            let outcome = self.poll_round_into(&mut round).await;

            // Readings from complete frames go out even if the round failed
            let mut receiver_gone = false;
            for reading in round {
                if readings.send(reading).await.is_err() {
                    receiver_gone = true;
                    break;
                }
            }
            outcome?;
            if receiver_gone {
                warn!("Reading receiver dropped, stopping");
                break;
            }

            if self.config.single_round {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown sender dropped, stopping");
                        break;
                    }
                }
            }
        }

        self.close().await;
        info!("Sensor polling stopped after {} rounds", self.rounds);
        Ok(self.rounds)
    }

    /// Shut down the stream and close the link
    pub async fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown().await;
        }
        self.link.close().await;
    }

    async fn teardown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown().await;
        }
        self.link.abort().await;
    }
}

async fn query_sensors<S>(
    pipeline: &mut CommandPipeline<S>,
    sensors: &[(SensorKind, Command<f64>)],
    readings: &mut Vec<SensorReading>,
) -> Result<(), (String, PipelineError)>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    for (kind, command) in sensors {
        let reply = match pipeline.transact(command).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("{} query failed: {}", kind, e);
                return Err((command.request().to_string(), e));
            }
        };

        if let Err(e) = &reply.value {
            warn!("{} reply {:?} not decoded: {}", kind, reply.raw(), e);
        }

        let reading = SensorReading::from_reply(*kind, reply);
        info!("{}", reading);
        readings.push(reading);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_link::testing::MockTransport;
    use obd_link::{PeerRecord, StaticPeers, SERIAL_PORT_SERVICE};
    use obd_protocol::testing::{ScriptBuilder, ScriptHandle, ScriptedStream};
    use obd_protocol::FrameError;

    fn peer() -> Peer {
        Peer {
            name: "OBDII".into(),
            address: "AA:BB:CC:DD:EE:FF".into(),
            security_id: SERIAL_PORT_SERVICE,
        }
    }

    fn initialised() -> ScriptBuilder {
        ScriptedStream::builder()
            .reply("ATE0", "ATE0\rOK\r\r>")
            .reply("ATL0", "OK\r\r>")
            .reply("ATST0A", "OK\r\r>")
            .reply("ATSP0", "OK\r\r>")
    }

    fn with_round(builder: ScriptBuilder) -> ScriptBuilder {
        builder
            .reply("010C", "41 0C 1A F8\r\r>")
            .reply("010D", "41 0D 32\r\r>")
            .reply("012F", "41 2F 50\r\r>")
    }

    fn session(
        builder: ScriptBuilder,
        config: SessionConfig,
    ) -> (DiagnosticSession<MockTransport>, MockTransport, ScriptHandle) {
        let (stream, handle) = builder.build();
        let transport = MockTransport::new(stream);
        (
            DiagnosticSession::new(transport.clone(), config),
            transport,
            handle,
        )
    }

    #[tokio::test]
    async fn test_end_to_end_round() {
        let (mut session, _transport, handle) =
            session(with_round(initialised()), SessionConfig::default());

        session.start(peer()).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let readings = session.poll_round().await.unwrap();
        let kinds: Vec<_> = readings.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![SensorKind::Rpm, SensorKind::Speed, SensorKind::FuelLevel]
        );
        assert!((readings[0].value.unwrap() - 1726.0).abs() < 0.01);
        assert!((readings[1].value.unwrap() - 50.0).abs() < 0.01);
        assert!((readings[2].value.unwrap() - 31.37).abs() < 0.01);
        assert_eq!(readings[1].raw, "41 0D 32");

        assert_eq!(
            handle.requests(),
            vec!["ATE0", "ATL0", "ATST0A", "ATSP0", "010C", "010D", "012F"]
        );
        assert_eq!(handle.violations(), 0);
        assert!(handle.mismatches().is_empty());
        assert_eq!(session.rounds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_session_and_skips_remaining() {
        let builder = initialised()
            .reply("010C", "41 0C 1A F8\r\r>")
            .silent("010D")
            .reply("012F", "41 2F 50\r\r>");
        let (mut session, transport, handle) = session(builder, SessionConfig::default());

        session.start(peer()).await.unwrap();
        let err = session.poll_round().await.unwrap_err();

        assert_eq!(
            err,
            SessionError::Command {
                command: "010D".into(),
                source: PipelineError::Timeout {
                    command: "010D".into(),
                    after_ms: 2000
                }
            }
        );
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!handle.requests().contains(&"012F".to_string()));
        assert!(handle.is_shut_down());
        assert_eq!(transport.closes(), 1);

        // No partial resume on a failed session
        assert_eq!(
            session.poll_round().await.unwrap_err(),
            SessionError::NotReady(SessionState::Failed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_round_still_emits_completed_readings() {
        let builder = initialised()
            .reply("010C", "41 0C 1A F8\r\r>")
            .silent("010D");
        let (mut session, _transport, handle) = session(builder, SessionConfig::default());
        session.start(peer()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (_cancel, shutdown) = watch::channel(false);
        let err = session.poll_forever(tx, shutdown).await.unwrap_err();

        assert!(matches!(err, SessionError::Command { ref command, .. } if command == "010D"));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(handle.requests().last().map(String::as_str), Some("010D"));

        let rpm = rx.recv().await.unwrap();
        assert_eq!(rpm.kind, SensorKind::Rpm);
        assert_eq!(rpm.to_string(), "RPM: 1726 rpm");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_round_into_keeps_partial_readings() {
        let builder = initialised()
            .reply("010C", "41 0C 1A F8\r\r>")
            .silent("010D");
        let (mut session, _transport, _handle) = session(builder, SessionConfig::default());
        session.start(peer()).await.unwrap();

        let mut readings = Vec::new();
        assert!(session.poll_round_into(&mut readings).await.is_err());
        assert_eq!(readings.len(), 1);
        assert!((readings[0].value.unwrap() - 1726.0).abs() < 0.01);
        assert_eq!(session.rounds(), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_stop_polling() {
        let builder = initialised()
            .reply("010C", "41 0C 1A F8\r\r>")
            .reply("010D", "NO DATA\r\r>")
            .reply("012F", "41 2F 50\r\r>");
        let (mut session, _transport, _handle) = session(with_round(builder), SessionConfig::default());

        session.start(peer()).await.unwrap();
        let first = session.poll_round().await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[1].value, None);
        assert_eq!(first[1].raw, "NO DATA");
        assert_eq!(first[1].to_string(), "Speed: no data");
        assert_eq!(session.state(), SessionState::Ready);

        let second = session.poll_round().await.unwrap();
        assert!((second[1].value.unwrap() - 50.0).abs() < 0.01);
        assert_eq!(session.rounds(), 2);
    }

    #[tokio::test]
    async fn test_handshake_failure_releases_link() {
        let builder = ScriptedStream::builder()
            .reply("ATE0", "OK\r\r>")
            .hangup("ATL0", "O");
        let (mut session, transport, handle) = session(builder, SessionConfig::default());

        let err = session.start(peer()).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Handshake {
                command: "ATL0".into(),
                source: PipelineError::Frame(FrameError::Truncated { buffered: 1 })
            }
        );
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(handle.requests(), vec!["ATE0", "ATL0"]);
        assert_eq!(transport.closes(), 1);
    }

    #[tokio::test]
    async fn test_unacknowledged_init_still_counts() {
        // Acknowledgement text is not interpreted, only the exchange
        let builder = ScriptedStream::builder()
            .reply("ATE0", "?\r\r>")
            .reply("ATL0", "OK\r\r>")
            .reply("ATST0A", "OK\r\r>")
            .reply("ATSP0", "OK\r\r>");
        let (mut session, _transport, _handle) = session(builder, SessionConfig::default());

        session.start(peer()).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_poll_before_start() {
        let (mut session, _transport, _handle) = session(initialised(), SessionConfig::default());
        assert_eq!(
            session.poll_round().await.unwrap_err(),
            SessionError::NotReady(SessionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_no_bonded_peer() {
        let (mut session, transport, _handle) = session(initialised(), SessionConfig::default());
        let err = session.run(&StaticPeers::default()).await.unwrap_err();
        assert_eq!(err, SessionError::Config(ConfigError::NoPeerAvailable));
        assert!(transport.channels_created().is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_run_uses_selected_peer() {
        let (mut session, transport, _handle) = session(initialised(), SessionConfig::default());
        let peers = StaticPeers(vec![
            PeerRecord {
                name: "Phone".into(),
                address: "11:22:33:44:55:66".into(),
                service_ids: vec![],
            },
            PeerRecord {
                name: "OBDII".into(),
                address: "AA:BB:CC:DD:EE:FF".into(),
                service_ids: vec![],
            },
        ]);

        session.run(&peers).await.unwrap();
        assert_eq!(
            transport.channels_created(),
            vec![("AA:BB:CC:DD:EE:FF".to_string(), SERIAL_PORT_SERVICE)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_forever_stops_between_rounds() {
        let config = SessionConfig {
            poll_interval_ms: 1000,
            ..Default::default()
        };
        let (mut session, _transport, handle) = session(with_round(initialised()), config);
        session.start(peer()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (cancel, shutdown) = watch::channel(false);

        let consumer = async {
            let mut received = Vec::new();
            for _ in 0..3 {
                received.push(rx.recv().await.unwrap());
            }
            cancel.send(true).unwrap();
            received
        };

        let (result, received) = tokio::join!(session.poll_forever(tx, shutdown), consumer);

        assert_eq!(result.unwrap(), 1);
        assert_eq!(received.len(), 3);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(handle.remaining(), 0);
        assert_eq!(handle.requests().len(), 7);
    }

    #[tokio::test]
    async fn test_single_round_mode() {
        let config = SessionConfig {
            single_round: true,
            ..Default::default()
        };
        let (mut session, transport, _handle) = session(with_round(initialised()), config);
        session.start(peer()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (_cancel, shutdown) = watch::channel(false);
        let rounds = session.poll_forever(tx, shutdown).await.unwrap();

        assert_eq!(rounds, 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(transport.closes(), 1);

        let mut readings = Vec::new();
        while let Ok(reading) = rx.try_recv() {
            readings.push(reading.to_string());
        }
        assert_eq!(
            readings,
            vec!["RPM: 1726 rpm", "Speed: 50.0 km/h", "Fuel: 31.4 %"]
        );
    }
}
