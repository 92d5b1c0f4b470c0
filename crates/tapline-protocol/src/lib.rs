//! # tapline-protocol
//!
//! Wire protocol definitions for the Tapline realtime channel.
//!
//! ## Message Types
//!
//! - `hello` - Client handshake binding a connection to a participant
//! - `hello_ok` / `error` - Handshake acknowledgment and in-band errors
//! - `tap` - A relayed tap event
//!
//! ## Example
//!
//! ```rust
//! use tapline_protocol::{codec, ClientMessage, Encoding, ServerMessage};
//!
//! let hello = codec::decode(br#"{"type":"hello","who":"me"}"#, Encoding::Json).unwrap();
//! assert_eq!(hello, ClientMessage::hello("me"));
//!
//! let reply = codec::encode_text(&ServerMessage::hello_ok("me")).unwrap();
//! assert_eq!(reply, r#"{"type":"hello_ok","who":"me"}"#);
//! ```

pub mod codec;
pub mod messages;

pub use codec::{decode, decode_with_limit, encode, Encoding, MessageCodec, ProtocolError};
pub use messages::{ClientMessage, ServerMessage, TapEvent};
