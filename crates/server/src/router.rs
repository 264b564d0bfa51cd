//! Action-code routing.
//!
//! A [`Router`] maps action codes to handlers. Typed routes declare the
//! request type their payload is decoded into; raw routes receive the
//! message untouched. Unknown actions fall back to the default route,
//! which every router has from construction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use tcpmux_connection::{Connection, HandlerFuture};
use tcpmux_protocol::Message;
use tcpmux_protocol::constants::ACT_DEFAULT;
use tracing::{trace, warn};

use crate::ServerError;
use crate::server::Server;

/// What a handler gets to work with besides the message.
#[derive(Clone)]
pub struct Context {
    server: Server,
    conn: Arc<Connection>,
}

impl Context {
    pub fn new(server: Server, conn: Arc<Connection>) -> Self {
        Self { server, conn }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn conn(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Sends `msg` back to the connection that triggered the handler.
    pub fn reply(&self, msg: &Message) -> Result<(), ServerError> {
        self.server.send(&self.conn, msg)
    }
}

/// Errors raised while preparing a route invocation.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("failed to decode payload for action {act}: {source}")]
    Decode {
        act: u16,
        #[source]
        source: serde_json::Error,
    },
}

/// Receives every decoded message of every connection.
///
/// Registered on a server with [`Server::on_receive`]. [`Router`] is the
/// usual implementation; [`receive_fn`] adapts a plain closure.
pub trait Receive: Send + Sync + 'static {
    fn receive(&self, ctx: Context, msg: Message) -> HandlerFuture<'_>;
}

/// Adapter returned by [`receive_fn`].
pub struct ReceiveFn<F>(F);

/// Wraps a closure as a [`Receive`] implementation.
pub fn receive_fn<F, Fut>(f: F) -> ReceiveFn<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    ReceiveFn(f)
}

impl<F, Fut> Receive for ReceiveFn<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn receive(&self, ctx: Context, msg: Message) -> HandlerFuture<'_> {
        Box::pin((self.0)(ctx, msg))
    }
}

type BoxedRoute =
    Box<dyn Fn(Context, Message) -> Result<HandlerFuture<'static>, RouteError> + Send + Sync>;

/// Static action-code dispatch table.
///
/// Built once before the server starts; lookups never mutate it.
pub struct Router {
    default: BoxedRoute,
    routes: HashMap<u16, BoxedRoute>,
}

impl Router {
    /// Creates a router whose default route (action 0) is `default`.
    pub fn new<F, Fut>(default: F) -> Self
    where
        F: Fn(Context, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            default: raw(default),
            routes: HashMap::new(),
        }
    }

    /// Registers a handler whose payload is decoded into `T` first.
    ///
    /// Messages whose payload does not decode are logged and dropped
    /// without reaching the handler.
    pub fn route<T, F, Fut>(mut self, act: u16, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Context, Message, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let route: BoxedRoute = Box::new(move |ctx: Context, msg: Message| {
            let req: T = msg
                .parse_payload()
                .map_err(|source| RouteError::Decode { act: msg.act, source })?;
            let fut: HandlerFuture<'static> = Box::pin(handler(ctx, msg, req));
            Ok(fut)
        });
        self.insert(act, route);
        self
    }

    /// Registers a handler that receives the message as-is.
    pub fn raw_route<F, Fut>(mut self, act: u16, handler: F) -> Self
    where
        F: Fn(Context, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(act, raw(handler));
        self
    }

    /// Routes one message to its handler and awaits it.
    pub async fn dispatch(&self, ctx: Context, msg: Message) {
        let act = msg.act;
        let route = match self.routes.get(&act) {
            Some(route) => route,
            None => {
                if !msg.is_default() {
                    warn!(act, conn_id = ctx.conn().id(), "no route for action, using default");
                }
                &self.default
            }
        };

        let fut = match route(ctx, msg) {
            Ok(fut) => fut,
            Err(e) => {
                warn!("{e}");
                return;
            }
        };

        let started = Instant::now();
        trace!(act, "handler in");
        fut.await;
        trace!(act, elapsed_ns = started.elapsed().as_nanos() as u64, "handler out");
    }

    fn insert(&mut self, act: u16, route: BoxedRoute) {
        if act == ACT_DEFAULT {
            self.default = route;
        } else {
            self.routes.insert(act, route);
        }
    }
}

impl Receive for Router {
    fn receive(&self, ctx: Context, msg: Message) -> HandlerFuture<'_> {
        Box::pin(self.dispatch(ctx, msg))
    }
}

fn raw<F, Fut>(handler: F) -> BoxedRoute
where
    F: Fn(Context, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |ctx: Context, msg: Message| {
        let fut: HandlerFuture<'static> = Box::pin(handler(ctx, msg));
        Ok(fut)
    })
}
