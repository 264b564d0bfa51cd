//! Frame codec for messages on a byte stream.
//!
//! # Wire format
//!
//! ```text
//! PER FRAME:
//!   [2 bytes BE: act]
//!   [4 bytes BE: payload_len]
//!   [payload_len bytes: payload]
//! ```
//!
//! The reader side of a connection hands over arbitrary chunks of the
//! stream; the decoder keeps partial frames buffered until complete.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::{FRAME_HEADER_LEN, MAX_PAYLOAD_SIZE};
use crate::envelope::Message;
use crate::error::ProtocolError;

/// Length-prefixed codec for [`Message`] frames.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_payload: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    /// Creates a codec with a custom payload limit.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let act = u16::from_be_bytes([src[0], src[1]]);
        let len = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;
        if len > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: self.max_payload,
            });
        }

        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Message { act, payload }))
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = msg.payload.len();
        if len > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: self.max_payload,
            });
        }

        dst.reserve(FRAME_HEADER_LEN + len);
        dst.put_u16(msg.act);
        dst.put_u32(len as u32);
        dst.extend_from_slice(&msg.payload);
        Ok(())
    }
}

/// Encodes a single message into a standalone frame.
pub fn encode_frame(msg: &Message) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    MessageCodec::new().encode(msg, &mut buf)?;
    Ok(buf.freeze())
}
