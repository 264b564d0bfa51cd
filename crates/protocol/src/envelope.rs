use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::ACT_DEFAULT;

/// Envelope for all tcpmux communication.
///
/// The payload is kept as raw bytes to defer deserialization until a route
/// declares which request type it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Action code used to select a route.
    pub act: u16,
    /// Opaque payload (JSON text by convention, possibly empty).
    pub payload: Bytes,
}

impl Message {
    /// Creates a new message with the given action and JSON payload.
    pub fn new<T: Serialize>(act: u16, payload: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(payload)?;
        Ok(Self {
            act,
            payload: Bytes::from(json),
        })
    }

    /// Creates a message carrying `payload` verbatim.
    pub fn raw(act: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            act,
            payload: payload.into(),
        }
    }

    /// Creates a message for the default route with no payload.
    pub fn empty(act: u16) -> Self {
        Self::raw(act, Bytes::new())
    }

    /// Returns `true` if this message targets the fallback route.
    pub fn is_default(&self) -> bool {
        self.act == ACT_DEFAULT
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Replaces the payload with `payload`, keeping the action code.
    ///
    /// Handlers use this to answer on the same action they were invoked for.
    pub fn set_payload<T: Serialize>(&mut self, payload: &T) -> Result<(), serde_json::Error> {
        self.payload = Bytes::from(serde_json::to_vec(payload)?);
        Ok(())
    }

    /// Returns the payload as UTF-8 text, replacing invalid sequences.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ShutdownNotice, ShutdownRequest};

    #[test]
    fn message_new_with_payload() {
        let payload = serde_json::json!({"key": "value"});
        let msg = Message::new(7, &payload).unwrap();
        assert_eq!(msg.act, 7);
        assert_eq!(&msg.payload[..], br#"{"key":"value"}"#);
    }

    #[test]
    fn message_empty() {
        let msg = Message::empty(0);
        assert!(msg.payload.is_empty());
        assert!(msg.is_default());
    }

    #[test]
    fn message_parse_payload() {
        let req = ShutdownRequest {
            msg: "maintenance".into(),
        };
        let msg = Message::new(100, &req).unwrap();
        let parsed: ShutdownRequest = msg.parse_payload().unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn parse_payload_rejects_wrong_shape() {
        let msg = Message::raw(100, r#"{"other": 1}"#);
        let parsed: Result<ShutdownRequest, _> = msg.parse_payload();
        assert!(parsed.is_err());
    }

    #[test]
    fn parse_empty_payload_fails() {
        let msg = Message::empty(100);
        assert!(msg.parse_payload::<ShutdownRequest>().is_err());
    }

    #[test]
    fn set_payload_keeps_act() {
        let mut msg = Message::raw(100, r#"{"Msg":"bye"}"#);
        msg.set_payload(&ShutdownNotice {
            reason: "closing".into(),
        })
        .unwrap();
        assert_eq!(msg.act, 100);
        let notice: ShutdownNotice = msg.parse_payload().unwrap();
        assert_eq!(notice.reason, "closing");
    }
}
