//! Daemon routes.

use std::time::Duration;

use tcpmux_protocol::Message;
use tcpmux_protocol::constants::ACT_SHUTDOWN;
use tcpmux_protocol::messages::{ShutdownNotice, ShutdownRequest};
use tcpmux_server::{Context, Router};
use tracing::{error, info};

/// Builds the daemon's router.
pub fn router(shutdown_delay: Duration) -> Router {
    Router::new(default_handler).route(ACT_SHUTDOWN, move |ctx, msg, req: ShutdownRequest| {
        shutdown_handler(ctx, msg, req, shutdown_delay)
    })
}

async fn default_handler(ctx: Context, msg: Message) {
    info!(
        conn_id = ctx.conn().id(),
        act = msg.act,
        payload = %msg.payload_lossy(),
        "message received"
    );
}

/// Tells every client the server is going down, then stops it after `delay`.
async fn shutdown_handler(ctx: Context, mut msg: Message, req: ShutdownRequest, delay: Duration) {
    let trigger = ctx.conn().remote_ip();
    info!(conn_id = ctx.conn().id(), %trigger, msg = %req.msg, "shutdown requested");

    let notice = ShutdownNotice {
        reason: format!("server will shutdown! trigger by {trigger}"),
    };
    // The notice goes out on the request's own action code.
    match msg.set_payload(&notice) {
        Ok(()) => match ctx.server().broadcast(&msg) {
            Ok(delivered) => info!(delivered, "shutdown notice broadcast"),
            Err(e) => error!("failed to broadcast shutdown notice: {e}"),
        },
        Err(e) => error!("failed to encode shutdown notice: {e}"),
    }

    ctx.server().shutdown_after(delay);
}
