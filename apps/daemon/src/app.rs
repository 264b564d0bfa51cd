//! Wires the server, routes and signal handling together.

use std::sync::Arc;

use tcpmux_server::{CloseReason, Connection, Server};
use tracing::{info, warn};

use crate::config::Config;
use crate::handlers;

/// Runs the server until it shuts down.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = Server::new(config.server_config());
    server.on_receive(handlers::router(config.shutdown_delay()));
    server.on_close(log_close);

    let handle = server.start().await?;

    let signal_server = server.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_server.shutdown();
    });

    info!("server ready");
    handle.wait().await;
    Ok(())
}

fn log_close(conn: &Arc<Connection>, reason: CloseReason) {
    let conn_id = conn.id();
    let peer_addr = conn.peer_addr();
    match reason {
        CloseReason::PeerClosed => info!(conn_id, %peer_addr, "client disconnected"),
        CloseReason::LocalClosed => info!(conn_id, %peer_addr, "server closed connection"),
        CloseReason::Error(e) => warn!(conn_id, %peer_addr, "connection lost: {e}"),
    }
}

/// Completes on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
