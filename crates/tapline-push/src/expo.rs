//! Expo push service gateway.
//!
//! This module posts notifications to the Expo push API using reqwest.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::traits::{PushError, PushGateway, PushNotification};

/// Default Expo push endpoint.
pub const EXPO_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

/// Expo gateway configuration.
#[derive(Debug, Clone)]
pub struct ExpoConfig {
    /// Push API endpoint.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ExpoConfig {
    fn default() -> Self {
        Self {
            endpoint: EXPO_PUSH_ENDPOINT.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Request body accepted by the Expo push API.
#[derive(Debug, Serialize)]
struct ExpoMessage<'a> {
    #[serde(flatten)]
    notification: &'a PushNotification,
    sound: &'static str,
    priority: &'static str,
}

/// Push gateway backed by the Expo push service.
#[derive(Debug, Clone)]
pub struct ExpoPushGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl ExpoPushGateway {
    /// Create a new Expo gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ExpoConfig) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PushError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
        })
    }

    /// The endpoint notifications are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PushGateway for ExpoPushGateway {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError> {
        let body = ExpoMessage {
            notification,
            sound: "default",
            priority: "high",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout
                } else {
                    PushError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Expo accepted push");
            Ok(())
        } else {
            warn!(status = status.as_u16(), "Expo rejected push");
            Err(PushError::Rejected(status.as_u16()))
        }
    }

    fn name(&self) -> &'static str {
        "expo"
    }
}
