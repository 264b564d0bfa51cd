use std::time::Duration;

/// Action code of the fallback route.
///
/// Any message whose action has no registered route is dispatched here.
pub const ACT_DEFAULT: u16 = 0;

/// Action code of the maintenance shutdown request.
pub const ACT_SHUTDOWN: u16 = 100;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 989;

/// Size of the buffer each connection reader fills per socket read.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Frame header length: 2 bytes action + 4 bytes payload length.
pub const FRAME_HEADER_LEN: usize = 6;

/// Maximum payload size accepted by the codec (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Delay between the shutdown notice broadcast and the actual shutdown.
pub const SHUTDOWN_DELAY: Duration = Duration::from_secs(1);
