//! Push gateway abstraction traits for Tapline.
//!
//! A push gateway delivers a notification to an opaque destination token.
//! The relay never retries; it only logs what the gateway reports.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// A notification addressed to one push destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushNotification {
    /// Opaque destination token, as registered by the device.
    #[serde(rename = "to")]
    pub destination: String,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Structured payload delivered alongside the notification.
    pub data: serde_json::Value,
}

impl PushNotification {
    /// Create a new notification.
    #[must_use]
    pub fn new(
        destination: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            destination: destination.into(),
            title: title.into(),
            body: body.into(),
            data,
        }
    }
}

/// Push delivery errors.
#[derive(Debug, Error)]
pub enum PushError {
    /// The gateway answered with a non-success status.
    #[error("Push rejected with status {0}")]
    Rejected(u16),

    /// The gateway did not answer in time.
    #[error("Push timed out")]
    Timeout,

    /// The request could not be sent.
    #[error("Push request failed: {0}")]
    Request(String),

    /// Push delivery is turned off.
    #[error("Push delivery disabled")]
    Disabled,
}

/// A capability that sends push notifications.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Send a notification.
    ///
    /// `Ok(())` means the gateway accepted it for delivery.
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError>;

    /// Get the gateway name (e.g., "expo", "disabled").
    fn name(&self) -> &'static str;
}

/// A gateway that drops every notification.
///
/// Used when push delivery is turned off in configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGateway;

#[async_trait]
impl PushGateway for DisabledGateway {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError> {
        tracing::debug!(title = %notification.title, "Push disabled, dropping notification");
        Err(PushError::Disabled)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_wire_shape() {
        let n = PushNotification::new("ExpoToken123", "hi", "body", json!({"type": "tap"}));
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["to"], "ExpoToken123");
        assert_eq!(value["data"]["type"], "tap");
    }

    #[tokio::test]
    async fn test_disabled_gateway() {
        let gateway = DisabledGateway;
        let n = PushNotification::new("token", "t", "b", json!({}));
        assert!(matches!(gateway.send(&n).await, Err(PushError::Disabled)));
        assert_eq!(gateway.name(), "disabled");
    }
}
