//! OBD Monitor - Main Entry Point

use obd_monitor::{init_logging, run_monitor, MonitorConfig};
use obd_session::load_config;
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config: MonitorConfig = load_config(path.as_deref(), "OBD")?;
    init_logging(&config.log)?;

    info!("=== OBD Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    run_monitor(config).await
}
