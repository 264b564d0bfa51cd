use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks the server to broadcast a notice and stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(rename = "Msg", alias = "msg")]
    pub msg: String,
}

// ---------------------------------------------------------------------------
// Response / event payloads
// ---------------------------------------------------------------------------

/// Broadcast to every connection before a maintenance shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownNotice {
    #[serde(rename = "Reason")]
    pub reason: String,
}
