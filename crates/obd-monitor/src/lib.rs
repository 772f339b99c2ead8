//! OBD Monitor
//!
//! Wires configuration, logging, a concrete transport and the diagnostic
//! session together, printing status lines and one line per reading.

use anyhow::Context;
use obd_link::{
    FixedBackoff, PeerRecord, SerialTransport, StaticPeers, TcpTransport, Transport,
    TransportSession, DEFAULT_BAUD_RATE,
};
use obd_protocol::SensorReading;
use obd_session::{DiagnosticSession, SessionConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How the adapter is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `host:port` socket, e.g. a Wi-Fi adapter or serial bridge
    #[default]
    Tcp,
    /// Serial device path, e.g. `/dev/rfcomm0`
    Serial,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON log lines
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub session: SessionConfig,
    pub transport: TransportKind,
    /// Serial speed when `transport = "serial"`
    pub baud_rate: u32,
    /// Limit for one TCP connect call (milliseconds)
    pub connect_timeout_ms: u64,
    /// Print readings as JSON lines instead of text
    pub json_output: bool,
    pub log: LogConfig,
    /// Bonded peers, in enumeration order
    pub peers: Vec<PeerRecord>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            transport: TransportKind::Tcp,
            baud_rate: DEFAULT_BAUD_RATE,
            connect_timeout_ms: 5000,
            json_output: false,
            log: LogConfig::default(),
            peers: Vec::new(),
        }
    }
}

/// Initialize logging
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log filter {:?}", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("failed to set tracing subscriber")?;

    Ok(())
}

/// Run the monitor until polling ends or Ctrl-C is pressed
pub async fn run_monitor(config: MonitorConfig) -> anyhow::Result<()> {
    let peers = StaticPeers(config.peers.clone());

    match config.transport {
        TransportKind::Tcp => {
            let transport = TcpTransport::new(Duration::from_millis(config.connect_timeout_ms));
            run_with(transport, &config, &peers).await
        }
        TransportKind::Serial => {
            let transport = SerialTransport::new(config.baud_rate, config.session.command_timeout());
            run_with(transport, &config, &peers).await
        }
    }
}

async fn run_with<T: Transport>(
    transport: T,
    config: &MonitorConfig,
    peers: &StaticPeers,
) -> anyhow::Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let link = TransportSession::new(transport)
        .with_backoff(FixedBackoff::new(config.session.retry_interval()))
        .with_events(events_tx);
    let mut session = DiagnosticSession::with_link(link, config.session.clone());

    let status = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            println!("{event}");
        }
    });

    if let Err(e) = session.run(peers).await {
        error!("Session did not start: {}", e);
        session.close().await;
        drop(session);
        let _ = status.await;
        return Err(e).context("starting diagnostic session");
    }

    let (readings_tx, mut readings_rx) = mpsc::channel::<SensorReading>(32);
    let (cancel, shutdown) = watch::channel(false);

    let json_output = config.json_output;
    let printer = tokio::spawn(async move {
        while let Some(reading) = readings_rx.recv().await {
            if json_output {
                match serde_json::to_string(&reading) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("Could not serialize reading: {}", e),
                }
            } else {
                println!("{reading}");
            }
        }
    });

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after this round");
            let _ = cancel.send(true);
        }
    });

    let result = session.poll_forever(readings_tx, shutdown).await;
    ctrl_c.abort();
    session.close().await;
    drop(session);

    let _ = printer.await;
    let _ = status.await;

    let rounds = result.context("polling sensors")?;
    info!("Finished after {} rounds", rounds);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal ELM327 stand-in answering one request per line
    async fn fake_adapter(listener: TcpListener) -> Vec<String> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match socket.read(&mut byte).await {
                Ok(0) | Err(_) => break,
                Ok(_) if byte[0] == b'\r' => {
                    let request = String::from_utf8_lossy(&line).into_owned();
                    line.clear();
                    let reply = match request.as_str() {
                        "010C" => "41 0C 1A F8\r\r>",
                        "010D" => "41 0D 32\r\r>",
                        "012F" => "41 2F 50\r\r>",
                        _ => "OK\r\r>",
                    };
                    seen.push(request);
                    if socket.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(_) => line.push(byte[0]),
            }
        }
        seen
    }

    #[test]
    fn test_config_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.session.retry_interval_ms, 2000);
        assert!(config.peers.is_empty());
    }

    #[tokio::test]
    async fn test_single_round_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let adapter = tokio::spawn(fake_adapter(listener));

        let config = MonitorConfig {
            session: SessionConfig {
                single_round: true,
                max_attempts: Some(3),
                ..Default::default()
            },
            peers: vec![PeerRecord {
                name: "ELM327".into(),
                address,
                service_ids: vec![],
            }],
            ..Default::default()
        };

        run_monitor(config).await.unwrap();
        let seen = adapter.await.unwrap();
        assert_eq!(
            seen,
            vec!["ATE0", "ATL0", "ATST0A", "ATSP0", "010C", "010D", "012F"]
        );
    }

    #[tokio::test]
    async fn test_no_peers_is_reported() {
        let err = run_monitor(MonitorConfig::default()).await.unwrap_err();
        assert!(format!("{err:#}").contains("No bonded peer available"));
    }
}
