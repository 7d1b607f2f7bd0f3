//! OBD-II Monitor - Main Entry Point

use obd_monitor::{init_logging, run, MonitorConfig};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional TOML file as the only argument
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = MonitorConfig::load(path.as_deref())?;
    init_logging(config.level()?, config.log_json)?;

    info!("=== OBD-II Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    run(config).await?;

    Ok(())
}
