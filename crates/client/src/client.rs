//! Client facade.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use bytes::Bytes;
use tcpmux_connection::{
    CloseReason, Connection, Handler, HandlerFuture, ShutdownCoordinator, Spawner,
};
use tcpmux_protocol::Message;
use tcpmux_protocol::constants::{DEFAULT_PORT, READ_BUFFER_SIZE};
use tokio::net::TcpStream;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::ClientError;

/// Callback for push messages from the server.
type ReceiveCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Callback for the close notification.
type CloseCallback = Arc<dyn Fn(CloseReason) + Send + Sync>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address as `host:port`.
    pub addr: String,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

/// Waits for the connection tasks to finish.
#[derive(Debug)]
pub struct ClientHandle {
    tracker: TaskTracker,
}

impl ClientHandle {
    pub async fn wait(self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Client connected to a single server.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    spawner: Spawner,
    started: AtomicBool,
    closing: AtomicBool,
    conn: OnceLock<Arc<Connection>>,
    on_receive: RwLock<Option<ReceiveCallback>>,
    on_close: RwLock<Option<CloseCallback>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let spawner = Spawner::new(TaskTracker::new(), Arc::new(ShutdownCoordinator::new()))
            .with_read_buffer_size(config.read_buffer_size);
        Self {
            inner: Arc::new(Inner {
                config,
                spawner,
                started: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                conn: OnceLock::new(),
                on_receive: RwLock::new(None),
                on_close: RwLock::new(None),
            }),
        }
    }

    /// Dials the server and starts the connection tasks.
    pub async fn start(&self) -> Result<ClientHandle, ClientError> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }

        let addr = self.inner.config.addr.clone();
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(source) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(ClientError::Connect { addr, source });
            }
        };
        let peer_addr = stream.peer_addr()?;

        let events = Arc::new(Events(self.clone()));
        let conn = self.inner.spawner.spawn_tcp(1, stream, peer_addr, events);
        let _ = self.inner.conn.set(conn);
        info!(%peer_addr, "connected");

        Ok(ClientHandle {
            tracker: self.inner.spawner.tracker().clone(),
        })
    }

    /// Queues `msg` for the server.
    pub fn send(&self, msg: &Message) -> Result<(), ClientError> {
        self.conn()?.send_msg(msg)?;
        Ok(())
    }

    /// Queues an already encoded frame.
    pub fn send_raw(&self, frame: Bytes) -> Result<(), ClientError> {
        self.conn()?.send(frame)?;
        Ok(())
    }

    /// Closes the connection. Idempotent.
    ///
    /// Frames queued before the call are still written; the socket closes
    /// once they are out.
    pub fn close(&self) -> bool {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return false;
        }
        match self.inner.conn.get() {
            Some(conn) => conn.finish(),
            // Not connected yet: make a pending or later `start` fail.
            None => {
                self.inner.spawner.coordinator().shutdown(|| {});
            }
        }
        debug!("client closing");
        true
    }

    /// Returns `true` once the connection is gone or the client was closed.
    pub fn is_closed(&self) -> bool {
        match self.inner.conn.get() {
            Some(conn) => conn.is_closed(),
            None => !self.inner.spawner.coordinator().is_running(),
        }
    }

    /// Completes when the connection has closed.
    pub async fn closed(&self) {
        match self.inner.conn.get() {
            Some(conn) => conn.closed().await,
            None => self.inner.spawner.coordinator().stop_token().cancelled().await,
        }
    }

    /// Sets the receive callback. Last registration wins.
    pub fn on_receive<F>(&self, f: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let callback: ReceiveCallback = Arc::new(f);
        *self
            .inner
            .on_receive
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Sets the close callback. Last registration wins.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(CloseReason) + Send + Sync + 'static,
    {
        let callback: CloseCallback = Arc::new(f);
        *self
            .inner
            .on_close
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Returns the server address once connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.conn.get().map(|conn| conn.peer_addr())
    }

    fn conn(&self) -> Result<&Arc<Connection>, ClientError> {
        self.inner.conn.get().ok_or(ClientError::NotConnected)
    }
}

struct Events(Client);

impl Handler for Events {
    fn on_message(&self, _conn: &Arc<Connection>, msg: Message) -> HandlerFuture<'_> {
        let callback = self
            .0
            .inner
            .on_receive
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move {
            match callback {
                Some(callback) => callback(msg),
                None => debug!(act = msg.act, "no receive callback, dropping message"),
            }
        })
    }

    fn on_close(&self, _conn: &Arc<Connection>, reason: CloseReason) {
        let callback = self
            .0
            .inner
            .on_close
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(reason);
        }
    }
}
