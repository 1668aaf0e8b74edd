use std::path::PathBuf;
use std::process;

use clap::Parser;

use omnicore_meter_bridge::config::Config;
use omnicore_meter_bridge::monitor;

/// Polls an IEC 62056-21 electricity meter and republishes OBIS readings
/// to MQTT.
#[derive(Parser)]
#[command(name = "omnicore-meter-bridge", version)]
struct Args {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            process::exit(2);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(config.logging.level.to_level_filter())
        .init();

    if let Err(err) = monitor::run(config).await {
        log::error!("monitor failed: {err}");
        process::exit(1);
    }
}
