//! Fleet runner entry point

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use ocpp_loadsim::config::SimulatorConfig;
use ocpp_loadsim::Fleet;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ocpp-loadsim",
    about = "OCPP 1.6J charging station load simulator",
    version
)]
struct Cli {
    /// Simulator configuration file
    #[arg(short, long, default_value = "loadsim.json")]
    config: PathBuf,

    /// Log filter, e.g. "info" or "ocpp_station=debug"
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log)?)
        .init();

    let config = SimulatorConfig::from_file(&cli.config)?;
    let fleet = Fleet::build(&config);
    info!(
        stations = fleet.stations().len(),
        supervision_url = %config.supervision_url,
        "fleet built"
    );

    fleet.start().await;
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    fleet.stop().await;
    Ok(())
}
