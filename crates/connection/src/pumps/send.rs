//! Send pump: drains the outbound queue onto the socket.

use std::io::ErrorKind;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::connection::{CloseError, CloseReason, Connection};
use crate::handler::Handler;
use crate::shutdown::ShutdownCoordinator;

/// Writes queued frames in FIFO order until the close signal fires.
///
/// Frames dequeued after shutdown started are dropped. A finish request
/// stops new frames from being queued, writes the ones already queued, and
/// then closes the connection. There is no write timeout: a peer that stops
/// reading stalls this task.
pub(crate) async fn send_pump<W, H>(
    conn: Arc<Connection>,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    coordinator: Arc<ShutdownCoordinator>,
    handler: Arc<H>,
) where
    W: AsyncWrite + Unpin + Send,
    H: Handler,
{
    let mut finishing = false;

    loop {
        tokio::select! {
            biased;

            _ = conn.closed() => break,

            _ = conn.finish_requested(), if !finishing => {
                debug!(conn_id = conn.id(), "flushing outbound queue");
                finishing = true;
                outbound.close();
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };

                if !coordinator.is_running() {
                    debug!(conn_id = conn.id(), "shutting down, dropping outbound frame");
                    continue;
                }

                match writer.write_all(&frame).await {
                    Ok(()) => trace!(conn_id = conn.id(), bytes = frame.len(), "wrote frame"),
                    Err(e) if is_fatal(e.kind()) => {
                        error!(conn_id = conn.id(), "write error: {e}");
                        super::close_with(&conn, &*handler, CloseReason::Error(CloseError::Io(e.kind())));
                        break;
                    }
                    Err(e) => warn!(conn_id = conn.id(), "write error: {e}"),
                }
            }
        }
    }

    // Best-effort FIN.
    let _ = writer.shutdown().await;

    if finishing {
        conn.close();
    }
}

/// Errors after which the socket cannot be written again.
fn is_fatal(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::WriteZero
            | ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tcpmux_protocol::Message;

    use super::*;
    use crate::handler::HandlerFuture;

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

    #[test]
    fn fatal_kinds() {
        assert!(is_fatal(ErrorKind::BrokenPipe));
        assert!(is_fatal(ErrorKind::ConnectionReset));
        assert!(!is_fatal(ErrorKind::Interrupted));
        assert!(!is_fatal(ErrorKind::Other));
    }

    #[tokio::test]
    async fn broken_pipe_fires_close() {
        use tokio_util::task::TaskTracker;

        use crate::connection::Spawner;

        let spawner = Spawner::new(TaskTracker::new(), Arc::new(ShutdownCoordinator::new()));
        let log = Arc::new(CloseLog::default());

        // Keep the remote end open so only the sender can close.
        let (local, _remote) = tokio::io::duplex(64);
        let (reader, _unused_writer) = tokio::io::split(local);
        let writer = tokio_test::io::Builder::new()
            .write(b"ok")
            .write_error(std::io::Error::new(ErrorKind::BrokenPipe, "gone"))
            .build();

        let conn = spawner.spawn(
            1,
            "127.0.0.1:1".parse().unwrap(),
            reader,
            writer,
            Arc::clone(&log),
        );
        conn.send(Bytes::from_static(b"ok")).unwrap();
        conn.send(Bytes::from_static(b"fails")).unwrap();

        tokio::time::timeout(Duration::from_secs(2), conn.closed())
            .await
            .expect("sender should fire the close signal");

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![CloseReason::Error(CloseError::Io(ErrorKind::BrokenPipe))]
        );
        assert!(conn.send(Bytes::from_static(b"after")).is_err());
    }

    #[tokio::test]
    async fn finish_flushes_queue_before_closing() {
        use tokio::io::AsyncReadExt;
        use tokio_util::task::TaskTracker;

        use crate::connection::Spawner;

        let spawner = Spawner::new(TaskTracker::new(), Arc::new(ShutdownCoordinator::new()));
        let log = Arc::new(CloseLog::default());

        let (local, mut remote) = tokio::io::duplex(16);
        let (reader, writer) = tokio::io::split(local);
        let conn = spawner.spawn(
            1,
            "127.0.0.1:1".parse().unwrap(),
            reader,
            writer,
            Arc::clone(&log),
        );

        // More than the duplex buffer holds, so the sender is mid-write.
        let chunks: [&[u8]; 3] = [b"first-frame-", b"second-frame-", b"third-frame"];
        for chunk in chunks {
            conn.send(Bytes::copy_from_slice(chunk)).unwrap();
        }
        conn.finish();

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), remote.read_to_end(&mut received))
            .await
            .expect("sender should shut down the write half")
            .unwrap();
        assert_eq!(received, b"first-frame-second-frame-third-frame");

        conn.closed().await;
        assert_eq!(*log.0.lock().unwrap(), vec![CloseReason::LocalClosed]);
        assert!(conn.send(Bytes::from_static(b"late")).is_err());

        spawner.tracker().close();
        spawner.tracker().wait().await;
    }
}
