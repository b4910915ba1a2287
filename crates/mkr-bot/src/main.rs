//! Passive market-making bot - entry point.

use anyhow::Result;
use clap::Parser;
use mkr_bot::{AppConfig, Application, ManagerHandle};
use tracing::{info, warn};

/// Passive market-making bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MKR_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    mkr_telemetry::init_logging()?;

    info!("Starting mkr-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > MKR_CONFIG env var > default
    let (config_path, config) = AppConfig::load(args.config)?;
    info!(config_path = %config_path, "Configuration loaded");

    let app = Application::new(config)?;
    spawn_signal_handlers(app.handle());

    app.run().await?;

    info!("mkr-bot stopped");
    Ok(())
}

/// Ctrl-C shuts down; on Unix SIGUSR1 resets the risk halt.
fn spawn_signal_handlers(handle: ManagerHandle) {
    let shutdown = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                shutdown.shutdown();
            }
            Err(e) => warn!(?e, "Failed to listen for Ctrl-C"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(?e, "Failed to listen for SIGUSR1");
                return;
            }
        };
        while usr1.recv().await.is_some() {
            info!("SIGUSR1 received, resetting risk halt");
            if handle.reset_risk().await.is_err() {
                break;
            }
        }
    });
}
