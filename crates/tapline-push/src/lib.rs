//! # tapline-push
//!
//! Push gateway abstraction for the Tapline relay.
//!
//! When the recipient of a tap has no live connection, the relay falls back
//! to a push notification. This crate provides the interface for that
//! collaborator and its implementations:
//!
//! - **Expo** - The Expo push service, used by the mobile clients
//! - **Disabled** - Drops everything, for deployments without push
//!
//! ```rust,ignore
//! use tapline_push::{PushGateway, PushNotification};
//!
//! async fn notify(gateway: &dyn PushGateway, token: &str) {
//!     let n = PushNotification::new(token, "💖", "me is missing you", serde_json::json!({}));
//!     if let Err(e) = gateway.send(&n).await {
//!         tracing::warn!(error = %e, "push failed");
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "expo")]
pub mod expo;

pub use traits::{DisabledGateway, PushError, PushGateway, PushNotification};

#[cfg(feature = "expo")]
pub use expo::{ExpoConfig, ExpoPushGateway, EXPO_PUSH_ENDPOINT};
