//! Read pump: moves socket bytes into the inbound queue.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{error, trace};

use super::Inbound;
use crate::connection::{CloseError, CloseReason, Connection};
use crate::handler::Handler;

/// Reads the socket until it closes.
///
/// This task only ever produces into `inbound`. It classifies the close:
/// end of stream is the peer, a close request is local, anything else is
/// an I/O error. A local close fires right away; the other two are queued
/// behind the data already read so the dispatcher handles those frames
/// first.
pub(crate) async fn read_pump<R, H>(
    conn: Arc<Connection>,
    mut reader: R,
    inbound: mpsc::UnboundedSender<Inbound>,
    handler: Arc<H>,
    buffer_size: usize,
) where
    R: AsyncRead + Unpin + Send,
    H: Handler,
{
    let mut buf = vec![0u8; buffer_size];

    let ended = loop {
        tokio::select! {
            biased;

            _ = conn.closed() => return,

            _ = conn.close_requested() => {
                super::close_with(&conn, &*handler, CloseReason::LocalClosed);
                return;
            }

            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => break CloseReason::PeerClosed,
                    Ok(n) => {
                        trace!(conn_id = conn.id(), bytes = n, "read");
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if inbound.send(Inbound::Chunk(chunk)).is_err() {
                            // Dispatcher already gone; it fired the close itself.
                            return;
                        }
                    }
                    Err(e) => {
                        error!(conn_id = conn.id(), "read error: {e}");
                        break CloseReason::Error(CloseError::Io(e.kind()));
                    }
                }
            }
        }
    };

    if inbound.send(Inbound::End(ended)).is_err() {
        super::close_with(&conn, &*handler, ended);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tcpmux_protocol::Message;
    use tokio_util::task::TaskTracker;

    use super::*;
    use crate::connection::Spawner;
    use crate::handler::HandlerFuture;
    use crate::shutdown::ShutdownCoordinator;

    #[derive(Default)]
    struct CloseLog(Mutex<Vec<CloseReason>>);

    impl Handler for CloseLog {
        fn on_message(&self, _conn: &Arc<Connection>, _msg: Message) -> HandlerFuture<'_> {
            Box::pin(async {})
        }

        fn on_close(&self, _conn: &Arc<Connection>, reason: CloseReason) {
            self.0.lock().unwrap().push(reason);
        }
    }

    async fn run_with_reader<R>(reader: R) -> Vec<CloseReason>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let spawner = Spawner::new(TaskTracker::new(), Arc::new(ShutdownCoordinator::new()));
        let log = Arc::new(CloseLog::default());
        let writer = tokio_test::io::Builder::new().build();

        let conn = spawner.spawn(
            1,
            "127.0.0.1:1".parse().unwrap(),
            reader,
            writer,
            Arc::clone(&log),
        );
        conn.closed().await;

        spawner.tracker().close();
        tokio::time::timeout(Duration::from_secs(2), spawner.tracker().wait())
            .await
            .expect("tasks should exit");

        let reasons = log.0.lock().unwrap().clone();
        reasons
    }

    #[tokio::test]
    async fn eof_is_peer_close() {
        // An incomplete frame header followed by end of stream.
        let reader = tokio_test::io::Builder::new().read(&[0, 1, 0]).build();
        let reasons = run_with_reader(reader).await;
        assert_eq!(reasons, vec![CloseReason::PeerClosed]);
    }

    #[tokio::test]
    async fn read_error_is_reported_with_kind() {
        let reader = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))
            .build();
        let reasons = run_with_reader(reader).await;
        assert_eq!(
            reasons,
            vec![CloseReason::Error(CloseError::Io(
                std::io::ErrorKind::ConnectionReset
            ))]
        );
    }
}
