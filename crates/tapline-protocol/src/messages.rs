//! Message types for the Tapline realtime channel.
//!
//! Every message is a map with a `type` discriminator. Clients open a
//! connection with `hello`; the server answers with `hello_ok` or `error`
//! and later pushes `tap` events to bound connections.

use serde::{Deserialize, Serialize};

/// Message type identifiers.
pub mod kind {
    pub const HELLO: &str = "hello";
    pub const HELLO_OK: &str = "hello_ok";
    pub const ERROR: &str = "error";
    pub const TAP: &str = "tap";
}

/// A message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Handshake binding the connection to a participant.
    #[serde(rename = "hello")]
    Hello {
        /// Participant identifier claimed by the client.
        who: String,
    },
}

impl ClientMessage {
    /// Create a new Hello message.
    #[must_use]
    pub fn hello(who: impl Into<String>) -> Self {
        ClientMessage::Hello { who: who.into() }
    }
}

/// A tap relayed from one participant to its counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapEvent {
    /// Sender.
    pub from: String,
    /// Recipient, always the sender's counterpart.
    pub to: String,
    /// Normalized horizontal coordinate in `[0, 1]`.
    pub x: f64,
    /// Normalized vertical coordinate in `[0, 1]`.
    pub y: f64,
    /// Relay receipt time in milliseconds since the Unix epoch.
    pub ts: i64,
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake accepted.
    #[serde(rename = "hello_ok")]
    HelloOk {
        /// The identity the connection is now bound to.
        who: String,
    },

    /// In-band error notice. The connection stays open.
    #[serde(rename = "error")]
    Error {
        /// Human-readable reason.
        message: String,
    },

    /// A relayed tap.
    #[serde(rename = "tap")]
    Tap(TapEvent),
}

impl ServerMessage {
    /// Create a new HelloOk message.
    #[must_use]
    pub fn hello_ok(who: impl Into<String>) -> Self {
        ServerMessage::HelloOk { who: who.into() }
    }

    /// Create a new Error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// The `type` discriminator of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::HelloOk { .. } => kind::HELLO_OK,
            ServerMessage::Error { .. } => kind::ERROR,
            ServerMessage::Tap(_) => kind::TAP,
        }
    }
}

impl From<TapEvent> for ServerMessage {
    fn from(event: TapEvent) -> Self {
        ServerMessage::Tap(event)
    }
}
