//! tcpmux server daemon.

mod app;
mod config;
mod handlers;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tcpmux-daemon", version, about = "tcpmux server daemon")]
struct Args {
    /// Configuration file (defaults to ./tcpmux.toml when present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listening port.
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting tcpmux daemon");

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    tracing::info!(bind = %config.bind, port = config.port, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("daemon shut down cleanly");
    Ok(())
}
