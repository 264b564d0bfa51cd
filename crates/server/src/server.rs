//! Server facade and accept loop.
//!
//! Listens on a TCP port, registers every accepted socket, and runs its
//! task triad until shutdown.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tcpmux_connection::{
    CloseReason, ConnId, Connection, Handler, HandlerFuture, Phase, ShutdownCoordinator, Spawner,
};
use tcpmux_protocol::constants::{DEFAULT_PORT, READ_BUFFER_SIZE};
use tcpmux_protocol::{Message, encode_frame};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::ServerError;
use crate::registry::Registry;
use crate::router::{Context, Receive};

/// Close callback: runs once per connection with the close reason.
pub type CloseCallback = Arc<dyn Fn(&Arc<Connection>, CloseReason) + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

/// Waits for every server task to finish.
///
/// Returned by [`Server::start`]; completes once the accept loop and every
/// connection task have exited, normally after [`Server::shutdown`].
#[derive(Debug)]
pub struct ServerHandle {
    tracker: TaskTracker,
}

impl ServerHandle {
    pub async fn wait(self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// The tcpmux server.
///
/// Cheap to clone; every clone drives the same listener, registry and
/// callback slots. Handlers receive one through their [`Context`].
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    registry: Registry,
    spawner: Spawner,
    started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
    on_receive: RwLock<Option<Arc<dyn Receive>>>,
    on_close: RwLock<Option<CloseCallback>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let spawner = Spawner::new(TaskTracker::new(), Arc::new(ShutdownCoordinator::new()))
            .with_read_buffer_size(config.read_buffer_size);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Registry::new(),
                spawner,
                started: AtomicBool::new(false),
                local_addr: OnceLock::new(),
                on_receive: RwLock::new(None),
                on_close: RwLock::new(None),
            }),
        }
    }

    /// Binds the listener and spawns the accept loop.
    ///
    /// Only the bind error is reported here; everything after that is
    /// handled and logged by the server tasks.
    pub async fn start(&self) -> Result<ServerHandle, ServerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = self.inner.config.addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(ServerError::Bind { addr, source });
            }
        };

        let local_addr = listener.local_addr()?;
        let _ = self.inner.local_addr.set(local_addr);
        info!(%local_addr, "server listening");

        Ok(self.serve(listener))
    }

    fn serve<L: Accept>(&self, listener: L) -> ServerHandle {
        let server = self.clone();
        let tracker = self.inner.spawner.tracker().clone();
        tracker.spawn(async move { server.accept_loop(listener).await });
        ServerHandle { tracker }
    }

    /// Stops accepting and closes every connection.
    ///
    /// Idempotent; returns `true` only for the call that performed the
    /// shutdown. Close callbacks fire from the connection tasks afterwards.
    pub fn shutdown(&self) -> bool {
        let registry = &self.inner.registry;
        let done = self.inner.spawner.coordinator().shutdown(|| {
            registry.for_each(|conn| {
                debug!(conn_id = conn.id(), "closing connection");
                conn.close();
            });
        });
        if done {
            info!(connections = registry.len(), "server shutdown");
        }
        done
    }

    /// Calls [`shutdown`](Self::shutdown) after `delay`.
    ///
    /// Abandoned if the server shuts down some other way first.
    pub fn shutdown_after(&self, delay: Duration) {
        let server = self.clone();
        let stop = self.inner.spawner.coordinator().stop_token().clone();
        self.inner.spawner.tracker().spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    server.shutdown();
                }
            }
        });
    }

    /// Queues `msg` for delivery to `conn`.
    pub fn send(&self, conn: &Connection, msg: &Message) -> Result<(), ServerError> {
        conn.send_msg(msg)?;
        Ok(())
    }

    /// Queues an already encoded frame for delivery to `conn`.
    pub fn send_raw(&self, conn: &Connection, frame: Bytes) -> Result<(), ServerError> {
        conn.send(frame)?;
        Ok(())
    }

    /// Queues `msg` for the connection with the given id.
    pub fn send_to(&self, id: ConnId, msg: &Message) -> Result<(), ServerError> {
        let Some(conn) = self.inner.registry.get(id) else {
            error!(conn_id = id, "connection not found");
            return Err(ServerError::UnknownConnection(id));
        };
        self.send(&conn, msg)
    }

    /// Queues `msg` for every registered connection.
    ///
    /// Returns how many connections accepted it; connections that closed
    /// in the meantime are skipped.
    pub fn broadcast(&self, msg: &Message) -> Result<usize, ServerError> {
        let frame = encode_frame(msg)?;
        Ok(self.broadcast_raw(frame))
    }

    /// Queues an encoded frame for every registered connection.
    pub fn broadcast_raw(&self, frame: Bytes) -> usize {
        let mut delivered = 0;
        self.inner.registry.for_each(|conn| match conn.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => debug!(conn_id = conn.id(), "broadcast skipped: {e}"),
        });
        delivered
    }

    /// Sets the receiver for decoded messages. Last registration wins.
    pub fn on_receive(&self, receiver: impl Receive) {
        let receiver: Arc<dyn Receive> = Arc::new(receiver);
        *self
            .inner
            .on_receive
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(receiver);
    }

    /// Sets the close callback. Last registration wins.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&Arc<Connection>, CloseReason) + Send + Sync + 'static,
    {
        let callback: CloseCallback = Arc::new(f);
        *self
            .inner
            .on_close
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn connection(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.inner.registry.get(id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns the bound address. Only available after [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    pub fn phase(&self) -> Phase {
        self.inner.spawner.coordinator().phase()
    }

    async fn accept_loop<L: Accept>(self, listener: L) {
        let events = Arc::new(Events(self.clone()));
        let coordinator = Arc::clone(self.inner.spawner.coordinator());
        let stop = coordinator.stop_token().clone();

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = stop.cancelled() => {
                    info!("server shutdown, listener closed");
                    break;
                }
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        // Live connections keep running; only accepting stops.
                        error!("accept error, no longer accepting: {e}");
                        break;
                    }
                },
            };

            // Registration happens under the coordinator lock so a
            // concurrent shutdown either sees this connection or rejects it.
            let registered = coordinator.if_running(|| {
                let id = self.inner.registry.allocate();
                let conn =
                    self.inner
                        .spawner
                        .spawn_tcp(id, stream, peer_addr, Arc::clone(&events));
                self.inner.registry.insert(Arc::clone(&conn));
                conn
            });

            match registered {
                Some(conn) => {
                    info!(conn_id = conn.id(), %peer_addr, "connection accepted");
                    // It may have closed before it was inserted.
                    if conn.is_closed() {
                        self.inner.registry.remove(conn.id());
                    }
                }
                None => info!(%peer_addr, "server is stopping, connection rejected"),
            }
        }
    }

    fn receiver(&self) -> Option<Arc<dyn Receive>> {
        self.inner
            .on_receive
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn close_callback(&self) -> Option<CloseCallback> {
        self.inner
            .on_close
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Source of inbound sockets for the accept loop.
trait Accept: Send + 'static {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Bridges connection events to the server's callback slots.
struct Events(Server);

impl Handler for Events {
    fn on_message(&self, conn: &Arc<Connection>, msg: Message) -> HandlerFuture<'_> {
        let receiver = self.0.receiver();
        let ctx = Context::new(self.0.clone(), Arc::clone(conn));
        Box::pin(async move {
            match receiver {
                Some(receiver) => receiver.receive(ctx, msg).await,
                None => debug!(act = msg.act, "no receiver registered, dropping message"),
            }
        })
    }

    fn on_close(&self, conn: &Arc<Connection>, reason: CloseReason) {
        if let Some(callback) = self.0.close_callback() {
            callback(conn, reason);
        }
        self.0.inner.registry.remove(conn.id());
    }
}
