//! Codec for encoding and decoding pagefeed messages.
//!
//! Browsers talk JSON over text frames. Clients that opt in can use
//! MessagePack over binary frames instead.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::messages::{ClientEvent, ServerMessage};

/// Maximum encoded message size (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Wire encoding chosen by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text frames.
    #[default]
    Json,
    /// MessagePack binary frames.
    MessagePack,
}

impl Encoding {
    /// Parse an encoding name as given in a connection query string.
    ///
    /// Unknown names fall back to JSON.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "msgpack" | "messagepack" => Encoding::MessagePack,
            _ => Encoding::Json,
        }
    }
}

/// An encoded message, ready to be written to a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
}

impl Encoded {
    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Whether the encoded message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode any serializable value using the given encoding.
///
/// # Errors
///
/// Returns an error if the value is too large or encoding fails.
pub fn encode_value<T: Serialize>(value: &T, encoding: Encoding) -> Result<Encoded, ProtocolError> {
    let encoded = match encoding {
        Encoding::Json => Encoded::Text(serde_json::to_string(value)?),
        Encoding::MessagePack => Encoded::Binary(Bytes::from(rmp_serde::to_vec_named(value)?)),
    };

    if encoded.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(encoded.len()));
    }

    Ok(encoded)
}

/// Decode any deserializable value using the given encoding.
///
/// # Errors
///
/// Returns an error if the data is too large or invalid.
pub fn decode_value<T: DeserializeOwned>(
    data: &[u8],
    encoding: Encoding,
) -> Result<T, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    let value = match encoding {
        Encoding::Json => serde_json::from_slice(data)?,
        Encoding::MessagePack => rmp_serde::from_slice(data)?,
    };
    Ok(value)
}

/// Encode a server message.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &ServerMessage, encoding: Encoding) -> Result<Encoded, ProtocolError> {
    encode_value(message, encoding)
}

/// Decode a client event.
///
/// # Errors
///
/// Returns an error if the data is not a known client event.
pub fn decode_event(data: &[u8], encoding: Encoding) -> Result<ClientEvent, ProtocolError> {
    decode_value(data, encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::QueryResult;
    use serde_json::json;

    #[test]
    fn test_json_encoding_is_text() {
        let msg = ServerMessage::static_query_result(QueryResult::new("h1", json!({"a": 1})));
        match encode(&msg, Encoding::Json).unwrap() {
            Encoded::Text(text) => {
                assert!(text.contains(r#""type":"staticQueryResult""#));
            }
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let msg = ServerMessage::overlay_error("e1", Some("Cannot query field".into()));
        let encoded = encode(&msg, Encoding::MessagePack).unwrap();

        let Encoded::Binary(data) = encoded else {
            panic!("Expected binary frame");
        };
        let decoded: ServerMessage = decode_value(&data, Encoding::MessagePack).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_event_msgpack() {
        let event = ClientEvent::UnregisterPath("/docs/".into());
        let Encoded::Binary(data) = encode_value(&event, Encoding::MessagePack).unwrap() else {
            panic!("Expected binary frame");
        };

        assert_eq!(decode_event(&data, Encoding::MessagePack).unwrap(), event);
    }

    #[test]
    fn test_decode_invalid_event() {
        match decode_event(b"not json", Encoding::Json) {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_message_too_large() {
        let big = "x".repeat(MAX_MESSAGE_SIZE + 1);
        let msg = ServerMessage::static_query_result(QueryResult::new("h", json!(big)));

        match encode(&msg, Encoding::Json) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_encoding_from_name() {
        assert_eq!(Encoding::from_name("msgpack"), Encoding::MessagePack);
        assert_eq!(Encoding::from_name("MessagePack"), Encoding::MessagePack);
        assert_eq!(Encoding::from_name("json"), Encoding::Json);
        assert_eq!(Encoding::from_name("xml"), Encoding::Json);
    }
}
