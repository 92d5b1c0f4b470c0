//! # tapline-core
//!
//! Pairing, presence tracking, and tap relay for Tapline.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Identity** - Participant ids and the pair directory
//! - **Presence** - How to reach each participant (live connection, push token)
//! - **Relay** - Deliver a tap to the sender's counterpart
//! - **Session** - Per-connection handshake state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│  Presence   │◀────│    Relay    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                  │       │
//!        │            ┌─────────────┐       │       ▼
//!        └───────────▶│  Directory  │◀──────┘  ┌──────────────┐
//!                     └─────────────┘          │ Push gateway │
//!                                              └──────────────┘
//! ```

pub mod identity;
pub mod presence;
pub mod relay;
pub mod session;

pub use identity::{IdentityError, PairDirectory, PairId, PairRecord, ParticipantId};
pub use presence::{
    ConnectionHandle, ConnectionId, PresenceEntry, PresenceRegistry, PresenceStatus,
};
pub use relay::{
    EventRelay, NotificationTemplate, PushAttempt, PushStatus, RealtimeAttempt, RelayConfig,
    RelayError, RelayOutcome,
};
pub use session::{Session, SessionState};
