//! Single-connection tcpmux client.
//!
//! Dials a server and drives the same reader/sender/dispatcher triad the
//! server uses for each accepted socket. Incoming messages and the close
//! notification are delivered through single-slot callbacks.

mod client;

pub use client::{Client, ClientConfig, ClientHandle};

pub use tcpmux_connection::{CloseError, CloseReason};

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("client already started")]
    AlreadyStarted,

    #[error("client is closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(#[from] tcpmux_connection::SendError),
}
