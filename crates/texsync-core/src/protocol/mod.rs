//! Wire protocol between editor clients and the server.
//!
//! Every frame is one UTF-8 JSON object, `{"type", "target", "body"}`, with
//! no other framing. Decoding never closes the channel: a malformed frame is
//! answered with an `error` message and otherwise dropped.

pub mod envelope;

pub use envelope::{AckBody, ContentBody, ErrorBody, Message};

use thiserror::Error;

/// Maximum frame size (50MB) to prevent memory exhaustion from malicious clients.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode one inbound frame, enforcing `max_size`.
pub fn decode(data: &[u8], max_size: usize) -> Result<Message, ProtocolError> {
    if data.len() > max_size {
        return Err(ProtocolError::TooLarge {
            size: data.len(),
            max: max_size,
        });
    }

    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_oversized_frames() {
        let frame = br#"{"type":"fetch","target":"a.tex"}"#;
        assert!(matches!(
            decode(frame, 8),
            Err(ProtocolError::TooLarge { max: 8, .. })
        ));
        assert!(decode(frame, MAX_MESSAGE_SIZE).is_ok());
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(matches!(
            decode(&[0xff, 0xfe, 0x00], MAX_MESSAGE_SIZE),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type_and_garbage() {
        assert!(matches!(
            decode(br#"{"type":"explode","target":"a.tex"}"#, MAX_MESSAGE_SIZE),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode(b"not json at all", MAX_MESSAGE_SIZE),
            Err(ProtocolError::Json(_))
        ));
    }
}
