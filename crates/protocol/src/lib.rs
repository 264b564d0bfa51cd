//! Wire protocol for tcpmux.
//!
//! Every frame carries an action code and an opaque payload. Payloads are
//! JSON by convention and are only decoded when a route asks for a typed
//! request.
//!
//! # Wire format
//!
//! See [`codec`] for the frame layout.

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod messages;

// Re-export primary types for convenience.
pub use codec::{MessageCodec, encode_frame};
pub use envelope::Message;
pub use error::ProtocolError;
