//! Interactive tcpmux client.

mod console;

use clap::Parser;
use tcpmux_client::{Client, ClientConfig, CloseReason};
use tcpmux_protocol::constants::DEFAULT_PORT;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tcpmux-cli", version, about = "Interactive tcpmux client")]
struct Args {
    /// Server address.
    #[arg(short, long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    addr: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(args));
    // Stdin is read on a blocking thread that cannot be interrupted.
    rt.shutdown_background();
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    let client = Client::new(ClientConfig {
        addr: args.addr,
        ..ClientConfig::default()
    });
    client.on_receive(console::print_message);
    client.on_close(|reason| match reason {
        CloseReason::PeerClosed => tracing::info!("server closed the connection"),
        CloseReason::LocalClosed => tracing::info!("connection closed"),
        CloseReason::Error(e) => tracing::warn!("connection lost: {e}"),
    });

    let handle = client.start().await?;
    console::run(&client, BufReader::new(tokio::io::stdin())).await?;
    handle.wait().await;
    Ok(())
}
