//! Connection lifecycle for tcpmux.
//!
//! Each accepted (or dialed) socket becomes a [`Connection`] driven by three
//! tasks: a reader that fills the inbound queue, a sender that drains the
//! outbound queue, and a dispatcher that decodes frames and hands them to a
//! [`Handler`]. The tasks share nothing but the two queues and a one-shot
//! close signal.
//!
//! The [`ShutdownCoordinator`] owns the running/stopping/stopped phase that
//! both the accept loop and every sender consult.

mod connection;
mod handler;
mod pumps;
mod shutdown;

pub use connection::{CloseError, CloseReason, ConnId, Connection, Spawner};
pub use handler::{Handler, HandlerFuture};
pub use shutdown::{Phase, ShutdownCoordinator};

use tcpmux_protocol::ProtocolError;

/// Errors returned when queueing outbound data.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(ConnId),

    #[error("encode error: {0}")]
    Encode(#[from] ProtocolError),
}
