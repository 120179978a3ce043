//! Message codec for TCP framing
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! +-----------+------+-------------+-----------------+
//! | sender_id | kind | payload_len | payload (UTF-8) |
//! |  i32 (4)  | u8   |   u32 (4)   |  payload_len    |
//! +-----------+------+-------------+-----------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{Message, MessageKind};

/// Fixed bytes before the payload: sender id + kind tag + payload length
const HEADER_SIZE: usize = 4 + 1 + 4;

/// Maximum payload size (64 KB) — messages are short chat text
const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown message kind tag: {0}")]
    UnknownKind(u8),

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Codec for [`Message`], used by both client and server
///
/// Encodes and decodes the same frame type in both directions.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the full header before anything can be validated
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the payload length without consuming the header
        let len = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;

        if len > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        // Check if we have the full frame
        if src.len() < HEADER_SIZE + len {
            // Reserve space for the rest of the frame
            src.reserve(HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        let sender_id = src.get_i32();
        let tag = src.get_u8();
        let kind = MessageKind::from_tag(tag).ok_or(CodecError::UnknownKind(tag))?;
        src.advance(4); // payload length, already read above

        let payload = String::from_utf8(src.split_to(len).to_vec())?;

        Ok(Some(Message {
            sender_id,
            kind,
            payload,
        }))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.payload.as_bytes();

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_i32(item.sender_id);
        dst.put_u8(item.kind.tag());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }
}
