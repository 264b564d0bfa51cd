//! The three per-connection tasks.

mod dispatch;
mod read;
mod send;

pub(crate) use dispatch::dispatch_pump;
pub(crate) use read::read_pump;
pub(crate) use send::send_pump;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;

use crate::connection::{CloseReason, Connection};
use crate::handler::Handler;

/// Item on a connection's inbound queue.
#[derive(Debug)]
pub(crate) enum Inbound {
    Chunk(Bytes),
    /// The read side ended; reported once every earlier chunk is dispatched.
    End(CloseReason),
}

/// Fires the close signal and, if this call won, runs the close callback.
fn close_with<H: Handler>(conn: &Arc<Connection>, handler: &H, reason: CloseReason) {
    if !conn.fire_close() {
        return;
    }

    tracing::info!(conn_id = conn.id(), peer_addr = %conn.peer_addr(), %reason, "connection closed");
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler.on_close(conn, reason)));
    if result.is_err() {
        tracing::error!(conn_id = conn.id(), "close callback panicked");
    }
}
