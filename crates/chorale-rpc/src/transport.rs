//! Length-prefixed transport codec for JSON-RPC messages.
//!
//! Frame format:
//! ```text
//! +----------------+------------------+
//! |  4 bytes       |  N bytes         |
//! |  (length BE)   |  (JSON payload)  |
//! +----------------+------------------+
//! ```
//!
//! The same framing is used on the Unix socket and the TCP listener.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::Message;

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for length-prefixed JSON-RPC messages
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for JsonRpcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = src.get(..LENGTH_PREFIX_SIZE) else {
            return Ok(None);
        };
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(header);
        let length = u32::from_be_bytes(prefix) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(length));
        }

        let frame_len = LENGTH_PREFIX_SIZE + length;
        if src.len() < frame_len {
            // Wait for the rest of the frame; the header stays in the buffer
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length);
        let json = std::str::from_utf8(&payload)?;
        Ok(Some(serde_json::from_str(json)?))
    }
}

impl Encoder<Message> for JsonRpcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;
        let length = u32::try_from(json.len())
            .ok()
            .filter(|&len| len as usize <= MAX_MESSAGE_SIZE)
            .ok_or(CodecError::MessageTooLarge(json.len()))?;

        dst.reserve(LENGTH_PREFIX_SIZE + json.len());
        dst.put_u32(length);
        dst.put_slice(&json);
        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),
}
