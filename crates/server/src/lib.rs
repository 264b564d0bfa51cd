//! Multiplexing TCP server for tcpmux.
//!
//! Accepts any number of connections, runs the reader/sender/dispatcher
//! triad for each, and routes decoded messages by action code through a
//! [`Router`]. Handlers get a [`Context`] with the [`Server`] handle so they
//! can reply, broadcast, or shut the server down.

mod registry;
mod router;
mod server;

pub use registry::Registry;
pub use router::{Context, Receive, ReceiveFn, RouteError, Router, receive_fn};
pub use server::{CloseCallback, Server, ServerConfig, ServerHandle};

pub use tcpmux_connection::{CloseError, CloseReason, ConnId, Connection, Phase};

/// Errors produced by the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server already running")]
    AlreadyRunning,

    #[error("connection {0} not found")]
    UnknownConnection(ConnId),

    #[error("send failed: {0}")]
    Send(#[from] tcpmux_connection::SendError),

    #[error("encode error: {0}")]
    Encode(#[from] tcpmux_protocol::ProtocolError),
}
