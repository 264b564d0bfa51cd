//! Connection state: identity, outbound queue, and the close signal.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tcpmux_protocol::constants::READ_BUFFER_SIZE;
use tcpmux_protocol::{Message, encode_frame};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;

use crate::SendError;
use crate::handler::Handler;
use crate::pumps;
use crate::shutdown::ShutdownCoordinator;

/// Connection identifier, unique for the lifetime of a server.
pub type ConnId = u32;

/// Why a connection closed.
///
/// Exactly one reason is reported per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote end closed the stream.
    PeerClosed,
    /// This side closed the socket (explicit close or shutdown).
    ///
    /// On a server this is "closed by server".
    LocalClosed,
    /// The connection died on an error.
    Error(CloseError),
}

impl CloseReason {
    pub fn closed_by_peer(self) -> bool {
        self == CloseReason::PeerClosed
    }

    pub fn closed_locally(self) -> bool {
        self == CloseReason::LocalClosed
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::LocalClosed => f.write_str("closed locally"),
            CloseReason::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Error that terminated a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseError {
    /// Socket read or write failed.
    Io(std::io::ErrorKind),
    /// The inbound byte stream could not be framed.
    Frame,
    /// A handler panicked while processing a message.
    HandlerPanic,
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseError::Io(kind) => write!(f, "I/O error ({kind})"),
            CloseError::Frame => f.write_str("invalid frame"),
            CloseError::HandlerPanic => f.write_str("handler panicked"),
        }
    }
}

/// One live socket.
///
/// Cheap to share behind an `Arc`; all mutation goes through the outbound
/// queue or the cancellation tokens.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
    close_requested: CancellationToken,
    finish_requested: CancellationToken,
    closed: CancellationToken,
    fired: AtomicBool,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns the peer IP as text.
    pub fn remote_ip(&self) -> String {
        self.peer_addr.ip().to_string()
    }

    /// Queues a raw frame for the sender task.
    ///
    /// Never blocks. Fails once the close signal has fired.
    pub fn send(&self, frame: Bytes) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed(self.id));
        }
        self.outbound
            .send(frame)
            .map_err(|_| SendError::Closed(self.id))
    }

    /// Encodes `msg` and queues it.
    pub fn send_msg(&self, msg: &Message) -> Result<(), SendError> {
        self.send(encode_frame(msg)?)
    }

    /// Asks the reader to close the socket.
    ///
    /// The close callback then reports [`CloseReason::LocalClosed`].
    pub fn close(&self) {
        self.close_requested.cancel();
    }

    /// Writes every frame queued so far, then closes the socket.
    ///
    /// Frames queued afterwards are rejected. The close callback reports
    /// [`CloseReason::LocalClosed`] unless the connection died first.
    pub fn finish(&self) {
        self.finish_requested.cancel();
    }

    /// Returns `true` once the close signal has fired.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Completes when the close signal fires.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub(crate) fn close_requested(&self) -> WaitForCancellationFuture<'_> {
        self.close_requested.cancelled()
    }

    pub(crate) fn finish_requested(&self) -> WaitForCancellationFuture<'_> {
        self.finish_requested.cancelled()
    }

    /// Fires the close signal. Returns `true` only for the first caller.
    pub(crate) fn fire_close(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        true
    }
}

/// Spawns connection task triads onto a shared task tracker.
///
/// Servers and clients each own one; every task it spawns is tracked so the
/// owner can wait for all of them after shutdown.
#[derive(Debug, Clone)]
pub struct Spawner {
    tracker: TaskTracker,
    coordinator: Arc<ShutdownCoordinator>,
    read_buffer_size: usize,
}

impl Spawner {
    pub fn new(tracker: TaskTracker, coordinator: Arc<ShutdownCoordinator>) -> Self {
        Self {
            tracker,
            coordinator,
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }

    /// Overrides the per-read buffer size.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    /// Splits a TCP stream and spawns its tasks.
    pub fn spawn_tcp<H: Handler>(
        &self,
        id: ConnId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        handler: Arc<H>,
    ) -> Arc<Connection> {
        let (reader, writer) = stream.into_split();
        self.spawn(id, peer_addr, reader, writer, handler)
    }

    /// Creates a connection over arbitrary stream halves and spawns the
    /// reader, sender and dispatcher tasks.
    pub fn spawn<R, W, H>(
        &self,
        id: ConnId,
        peer_addr: SocketAddr,
        reader: R,
        writer: W,
        handler: Arc<H>,
    ) -> Arc<Connection>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        H: Handler,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<pumps::Inbound>();

        let conn = Arc::new(Connection {
            id,
            peer_addr,
            outbound: outbound_tx,
            close_requested: self.coordinator.stop_token().child_token(),
            finish_requested: CancellationToken::new(),
            closed: CancellationToken::new(),
            fired: AtomicBool::new(false),
        });

        self.tracker.spawn(pumps::read_pump(
            Arc::clone(&conn),
            reader,
            inbound_tx,
            Arc::clone(&handler),
            self.read_buffer_size,
        ));
        self.tracker.spawn(pumps::send_pump(
            Arc::clone(&conn),
            writer,
            outbound_rx,
            Arc::clone(&self.coordinator),
            Arc::clone(&handler),
        ));
        self.tracker.spawn(pumps::dispatch_pump(
            Arc::clone(&conn),
            inbound_rx,
            handler,
        ));

        tracing::debug!(conn_id = id, %peer_addr, "connection tasks started");
        conn
    }
}
