//! Codec for encoding and decoding Tapline messages.
//!
//! Text frames carry JSON and binary frames carry MessagePack. Both encodings
//! share one schema, so a client may pick whichever its platform prefers.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::messages::{kind, ClientMessage, ServerMessage};

/// Maximum inbound message size (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Wire encoding of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// UTF-8 JSON in a text frame.
    #[default]
    Json,
    /// MessagePack in a binary frame.
    MessagePack,
}

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {1}")]
    MessageTooLarge(usize, usize),

    /// Payload could not be parsed at all.
    #[error("Bad payload: {0}")]
    BadPayload(String),

    /// Payload parsed but its `type` is not one the server accepts.
    #[error("Unknown message type: {0:?}")]
    UnknownMessage(Option<String>),

    /// A `hello` without a string `who`.
    #[error("Malformed handshake")]
    MalformedHandshake,

    /// JSON encoding error.
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("MessagePack encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

impl ProtocolError {
    /// Short notice sent back to the client in an `error` message.
    #[must_use]
    pub fn notice(&self) -> &'static str {
        match self {
            ProtocolError::UnknownMessage(_) => "unknown message",
            ProtocolError::MalformedHandshake => "malformed handshake",
            ProtocolError::MessageTooLarge(..) | ProtocolError::BadPayload(_) => "bad payload",
            ProtocolError::Json(_) | ProtocolError::Encode(_) => "internal error",
        }
    }
}

/// Encode a server message as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text(message: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Encode a server message as MessagePack.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_binary(message: &ServerMessage) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(rmp_serde::to_vec_named(message)?))
}

/// Encode a server message with the given encoding.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ServerMessage, encoding: Encoding) -> Result<Bytes, ProtocolError> {
    match encoding {
        Encoding::Json => Ok(Bytes::from(encode_text(message)?)),
        Encoding::MessagePack => encode_binary(message),
    }
}

/// Decode a client message.
///
/// Decoding goes through a generic value first so that an unknown `type`
/// can be told apart from a payload that is not a message at all.
///
/// # Errors
///
/// - [`ProtocolError::BadPayload`] if the bytes are not a valid document
/// - [`ProtocolError::UnknownMessage`] if the `type` is missing or unknown
/// - [`ProtocolError::MalformedHandshake`] if a `hello` lacks a string `who`
pub fn decode(data: &[u8], encoding: Encoding) -> Result<ClientMessage, ProtocolError> {
    decode_with_limit(data, encoding, MAX_MESSAGE_SIZE)
}

/// Decode a client message, rejecting anything larger than `limit` bytes.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_with_limit(
    data: &[u8],
    encoding: Encoding,
    limit: usize,
) -> Result<ClientMessage, ProtocolError> {
    if data.len() > limit {
        return Err(ProtocolError::MessageTooLarge(data.len(), limit));
    }

    let value: Value = match encoding {
        Encoding::Json => {
            serde_json::from_slice(data).map_err(|e| ProtocolError::BadPayload(e.to_string()))?
        }
        Encoding::MessagePack => {
            rmp_serde::from_slice(data).map_err(|e| ProtocolError::BadPayload(e.to_string()))?
        }
    };

    classify(&value)
}

fn classify(value: &Value) -> Result<ClientMessage, ProtocolError> {
    let message_type = value.get("type").and_then(Value::as_str);

    match message_type {
        Some(kind::HELLO) => match value.get("who").and_then(Value::as_str) {
            Some(who) => Ok(ClientMessage::hello(who)),
            None => Err(ProtocolError::MalformedHandshake),
        },
        other => Err(ProtocolError::UnknownMessage(other.map(str::to_string))),
    }
}

/// Codec bound to one connection's current encoding.
///
/// The encoding follows the most recent inbound message, so replies and
/// relayed events reach the client in the format it last spoke.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    encoding: Encoding,
    max_message_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self {
            encoding: Encoding::default(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl MessageCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom inbound size limit.
    #[must_use]
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            ..Self::default()
        }
    }

    /// The encoding used for outbound messages.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Decode an inbound message and adopt its encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails. The encoding is adopted even
    /// then, so the error notice is readable by the client.
    pub fn decode(&mut self, data: &[u8], encoding: Encoding) -> Result<ClientMessage, ProtocolError> {
        self.encoding = encoding;
        decode_with_limit(data, encoding, self.max_message_size)
    }

    /// Encode an outbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, message: &ServerMessage) -> Result<Bytes, ProtocolError> {
        encode(message, self.encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::TapEvent;

    #[test]
    fn test_decode_hello() {
        let msg = decode(br#"{"type":"hello","who":"gf"}"#, Encoding::Json).unwrap();
        assert_eq!(msg, ClientMessage::hello("gf"));
    }

    #[test]
    fn test_decode_unknown_type() {
        match decode(br#"{"type":"ping"}"#, Encoding::Json) {
            Err(e @ ProtocolError::UnknownMessage(Some(_))) => {
                assert_eq!(e.notice(), "unknown message");
            }
            other => panic!("Expected UnknownMessage error, got {:?}", other),
        }

        assert!(matches!(
            decode(b"[1, 2, 3]", Encoding::Json),
            Err(ProtocolError::UnknownMessage(None))
        ));
    }

    #[test]
    fn test_decode_bad_json() {
        let err = decode(b"{not json", Encoding::Json).unwrap_err();
        assert!(matches!(err, ProtocolError::BadPayload(_)));
        assert_eq!(err.notice(), "bad payload");
    }

    #[test]
    fn test_decode_malformed_hello() {
        assert!(matches!(
            decode(br#"{"type":"hello"}"#, Encoding::Json),
            Err(ProtocolError::MalformedHandshake)
        ));
        assert!(matches!(
            decode(br#"{"type":"hello","who":42}"#, Encoding::Json),
            Err(ProtocolError::MalformedHandshake)
        ));
    }

    #[test]
    fn test_decode_too_large() {
        let data = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode(&data, Encoding::Json),
            Err(ProtocolError::MessageTooLarge(..))
        ));
    }

    #[test]
    fn test_codec_size_limit() {
        let mut codec = MessageCodec::with_max_message_size(16);
        let err = codec
            .decode(br#"{"type":"hello","who":"someone-long"}"#, Encoding::Json)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge(_, 16)));
        assert_eq!(err.notice(), "bad payload");
    }

    #[test]
    fn test_messagepack_hello() {
        let data = rmp_serde::to_vec_named(&ClientMessage::hello("me")).unwrap();
        let msg = decode(&data, Encoding::MessagePack).unwrap();
        assert_eq!(msg, ClientMessage::hello("me"));
    }

    #[test]
    fn test_messagepack_tap_decodes_as_json_value() {
        let msg = ServerMessage::Tap(TapEvent {
            from: "me".into(),
            to: "gf".into(),
            x: 0.25,
            y: 1.0,
            ts: 42,
        });

        let encoded = encode(&msg, Encoding::MessagePack).unwrap();
        let value: Value = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(value["type"], "tap");
        assert_eq!(value["to"], "gf");
        assert_eq!(value["ts"], 42);
    }

    #[test]
    fn test_codec_follows_last_encoding() {
        let mut codec = MessageCodec::new();
        assert_eq!(codec.encoding(), Encoding::Json);

        let data = rmp_serde::to_vec_named(&ClientMessage::hello("me")).unwrap();
        codec.decode(&data, Encoding::MessagePack).unwrap();
        assert_eq!(codec.encoding(), Encoding::MessagePack);

        let _ = codec.decode(b"garbage", Encoding::Json);
        assert_eq!(codec.encoding(), Encoding::Json);
        let text = codec.encode(&ServerMessage::error("bad payload")).unwrap();
        assert_eq!(&text[..], br#"{"type":"error","message":"bad payload"}"#);
    }
}
