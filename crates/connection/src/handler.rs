//! Handler trait for processing connection events.
//!
//! Implementors provide routing and bookkeeping while the connection tasks
//! handle socket I/O, framing, and the close signal.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tcpmux_protocol::Message;

use crate::connection::{CloseReason, Connection};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Receives decoded messages and the close notification of a connection.
///
/// `on_message` is awaited by the dispatcher task before the next frame is
/// decoded, so messages of one connection are handled strictly in order.
pub trait Handler: Send + Sync + 'static {
    /// Called for every decoded frame.
    fn on_message(&self, conn: &Arc<Connection>, msg: Message) -> HandlerFuture<'_>;

    /// Called exactly once, by whichever task observed the close first.
    fn on_close(&self, conn: &Arc<Connection>, reason: CloseReason) {
        let _ = (conn, reason);
    }
}
