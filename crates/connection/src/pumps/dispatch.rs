//! Dispatch pump: reassembles frames and hands them to the handler.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::FutureExt;
use tcpmux_protocol::MessageCodec;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::{debug, error, warn};

use super::Inbound;
use crate::connection::{CloseError, CloseReason, Connection};
use crate::handler::Handler;

/// Consumes the inbound queue until the close signal fires.
///
/// Each complete frame is awaited through the handler before the next one
/// is decoded. A panicking handler is contained here and closes only this
/// connection. When the reader reports the end of the stream, that close
/// fires here, after every frame read before it.
pub(crate) async fn dispatch_pump<H: Handler>(
    conn: Arc<Connection>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    handler: Arc<H>,
) {
    let mut codec = MessageCodec::new();
    let mut buf = BytesMut::new();

    loop {
        tokio::select! {
            biased;

            _ = conn.closed() => break,

            item = inbound.recv() => match item {
                Some(Inbound::Chunk(chunk)) => {
                    buf.extend_from_slice(&chunk);

                    if let Err(reason) = drain_frames(&conn, &*handler, &mut codec, &mut buf).await {
                        super::close_with(&conn, &*handler, reason);
                        break;
                    }
                }
                Some(Inbound::End(reason)) => {
                    if !buf.is_empty() {
                        debug!(conn_id = conn.id(), bytes = buf.len(), "discarding incomplete frame");
                    }
                    super::close_with(&conn, &*handler, reason);
                    break;
                }
                None => break,
            },
        }
    }
}

/// Dispatches every complete frame currently buffered.
async fn drain_frames<H: Handler>(
    conn: &Arc<Connection>,
    handler: &H,
    codec: &mut MessageCodec,
    buf: &mut BytesMut,
) -> Result<(), CloseReason> {
    loop {
        if conn.is_closed() {
            return Ok(());
        }

        let msg = match codec.decode(buf) {
            Ok(Some(msg)) => msg,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(conn_id = conn.id(), "frame error: {e}");
                return Err(CloseReason::Error(CloseError::Frame));
            }
        };

        let act = msg.act;
        let outcome = AssertUnwindSafe(async { handler.on_message(conn, msg).await })
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!(conn_id = conn.id(), act, "handler panicked");
            return Err(CloseReason::Error(CloseError::HandlerPanic));
        }
    }
}
