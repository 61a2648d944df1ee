//! pedals - turn foot pedals and auxiliary keypads into command launchers.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pedals::config::{Config, DEV_INPUT_BY_ID};
use pedals::listing;
use pedals::supervisor::Supervisor;

/// Launch external commands from raw input device key events
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the device configuration file
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List attached device symlinks and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.list_devices {
        return listing::print_devices(Path::new(DEV_INPUT_BY_ID));
    }

    let Some(config_path) = args.config else {
        eprintln!("usage: pedals <config.json>");
        let _ = listing::print_devices(Path::new(DEV_INPUT_BY_ID));
        std::process::exit(1);
    };

    let config = Config::load(&config_path).await?;
    info!(
        config = %config_path.display(),
        devices = config.devices.len(),
        "configuration loaded"
    );

    let supervisor = Supervisor::new(config);
    tokio::select! {
        result = supervisor.run() => result,
        _ = shutdown_signal() => {
            info!("shutdown complete");
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("shutdown signal received");
}
