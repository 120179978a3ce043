//! parley-protocol: Shared wire definitions for client-server communication
//!
//! This crate defines the chat message type and the framing codec used for
//! communication between the parley client and server over TCP. The format
//! is explicit field encoding (no runtime serializer) so it is reproducible
//! from any language: a big-endian i32 sender id, one kind tag byte, then a
//! big-endian u32 length prefix and the UTF-8 payload.

pub mod codec;
pub mod messages;

// Re-export main types at crate root
pub use codec::{CodecError, MessageCodec};
pub use messages::{Message, MessageKind};

/// Sender id reserved for server-originated (system) messages
pub const SYSTEM_SENDER_ID: i32 = 0;
