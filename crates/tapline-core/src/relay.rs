//! Tap relay for Tapline.
//!
//! The relay resolves a sender's counterpart, builds the tap event, and
//! delivers it over the recipient's live connection when there is one.
//! Otherwise it hands the event to the push gateway in a background task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tapline_protocol::{ServerMessage, TapEvent};
use tapline_push::{PushGateway, PushNotification};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::identity::{IdentityError, PairDirectory, ParticipantId};
use crate::presence::PresenceRegistry;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Sender is not a known participant.
    #[error("Invalid sender: {0}")]
    InvalidSender(String),

    /// Coordinates are not finite values in `[0, 1]`.
    #[error("Coordinates must be normalized in [0..1], got x={x}, y={y}")]
    InvalidCoordinates {
        /// Submitted horizontal coordinate.
        x: f64,
        /// Submitted vertical coordinate.
        y: f64,
    },

    /// Sender has no counterpart yet.
    #[error("Participant {0} is not paired")]
    NotPaired(ParticipantId),
}

/// Title and body used for push notifications.
#[derive(Debug, Clone)]
pub struct NotificationTemplate {
    /// Notification title.
    pub title: String,
    /// Notification body; `{from}` is replaced by the sender's display name.
    pub body: String,
    /// Display names by participant id. Unlisted senders use their id.
    pub display_names: HashMap<String, String>,
}

impl Default for NotificationTemplate {
    fn default() -> Self {
        Self {
            title: "💖".to_string(),
            body: "{from} is missing you".to_string(),
            display_names: HashMap::new(),
        }
    }
}

impl NotificationTemplate {
    /// Render the title and body for an event.
    #[must_use]
    pub fn render(&self, event: &TapEvent) -> (String, String) {
        let name = self
            .display_names
            .get(&event.from)
            .map_or(event.from.as_str(), String::as_str);

        (self.title.clone(), self.body.replace("{from}", name))
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Fall back to push when the live connection is found closed at
    /// hand-off time.
    pub push_on_realtime_failure: bool,
    /// Upper bound on a single push gateway call.
    pub push_timeout: Duration,
    /// Notification text.
    pub notification: NotificationTemplate,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            push_on_realtime_failure: true,
            push_timeout: Duration::from_secs(10),
            notification: NotificationTemplate::default(),
        }
    }
}

/// What happened on the realtime path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeAttempt {
    /// The recipient had no live connection.
    NotConnected,
    /// The event was queued on the recipient's connection.
    Delivered,
    /// The connection had closed before the event could be queued.
    Failed,
}

/// Final state of a push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    /// The gateway accepted the notification.
    Delivered,
    /// The gateway reported an error.
    Failed(String),
    /// The gateway did not answer within the timeout.
    TimedOut,
}

impl PushStatus {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            PushStatus::Delivered => "delivered",
            PushStatus::Failed(_) => "failed",
            PushStatus::TimedOut => "timeout",
        }
    }
}

/// What happened on the push path.
#[derive(Debug)]
pub enum PushAttempt {
    /// Push was not needed.
    Skipped,
    /// Push was needed but the recipient has no destination registered.
    NoDestination,
    /// A push task is running.
    Dispatched(JoinHandle<PushStatus>),
}

/// Result of relaying one tap.
#[derive(Debug)]
pub struct RelayOutcome {
    /// The event as built by the relay.
    pub event: TapEvent,
    /// Realtime path result.
    pub realtime: RealtimeAttempt,
    /// Push path result.
    pub push: PushAttempt,
}

impl RelayOutcome {
    /// Check if the event reached a live connection.
    #[must_use]
    pub fn delivered_realtime(&self) -> bool {
        self.realtime == RealtimeAttempt::Delivered
    }

    /// Check if a push task was started.
    #[must_use]
    pub fn push_dispatched(&self) -> bool {
        matches!(self.push, PushAttempt::Dispatched(_))
    }

    /// Label for the path the tap took, for logs and metrics.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match (&self.realtime, &self.push) {
            (RealtimeAttempt::Delivered, _) => "realtime",
            (_, PushAttempt::Dispatched(_)) => "push",
            _ => "undelivered",
        }
    }
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn is_normalized(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// The tap relay.
pub struct EventRelay {
    directory: Arc<PairDirectory>,
    presence: Arc<PresenceRegistry>,
    gateway: Arc<dyn PushGateway>,
    config: RelayConfig,
}

impl EventRelay {
    /// Create a new relay.
    #[must_use]
    pub fn new(
        directory: Arc<PairDirectory>,
        presence: Arc<PresenceRegistry>,
        gateway: Arc<dyn PushGateway>,
        config: RelayConfig,
    ) -> Self {
        Self {
            directory,
            presence,
            gateway,
            config,
        }
    }

    /// Get the relay configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay a tap from `from` to its counterpart.
    ///
    /// Validation happens before any registry access. Once validated, the
    /// call succeeds whether or not the recipient is reachable. A push
    /// attempt runs as a spawned task, so this must be called from within
    /// a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the sender is unknown, the coordinates are
    /// out of range, or the sender is not paired yet.
    pub fn relay_tap(&self, from: &str, x: f64, y: f64) -> Result<RelayOutcome, RelayError> {
        let from = self.directory.resolve(from).map_err(|e| match e {
            IdentityError::UnknownParticipant(raw) => RelayError::InvalidSender(raw),
            other => RelayError::InvalidSender(other.to_string()),
        })?;

        if !is_normalized(x) || !is_normalized(y) {
            return Err(RelayError::InvalidCoordinates { x, y });
        }

        let to = self
            .directory
            .counterpart(&from)
            .map_err(|_| RelayError::NotPaired(from.clone()))?;

        let event = TapEvent {
            from: from.to_string(),
            to: to.to_string(),
            x,
            y,
            ts: now_millis(),
        };

        let entry = self.presence.lookup(&to);

        let realtime = match &entry.live_connection {
            Some(handle) if handle.deliver(ServerMessage::Tap(event.clone())) => {
                trace!(from = %from, to = %to, connection = %handle.id(), "Tap queued on live connection");
                RealtimeAttempt::Delivered
            }
            Some(handle) => {
                debug!(from = %from, to = %to, connection = %handle.id(), "Live connection closed before hand-off");
                RealtimeAttempt::Failed
            }
            None => RealtimeAttempt::NotConnected,
        };

        let wants_push = match realtime {
            RealtimeAttempt::NotConnected => true,
            RealtimeAttempt::Failed => self.config.push_on_realtime_failure,
            RealtimeAttempt::Delivered => false,
        };

        let push = match (wants_push, entry.push_destination) {
            (false, _) => PushAttempt::Skipped,
            (true, None) => {
                debug!(from = %from, to = %to, "Recipient unreachable, tap dropped");
                PushAttempt::NoDestination
            }
            (true, Some(destination)) => PushAttempt::Dispatched(self.dispatch_push(destination, &event)),
        };

        Ok(RelayOutcome {
            event,
            realtime,
            push,
        })
    }

    /// Send a tap that was queued on a live connection but never written
    /// to the socket through the push path instead.
    ///
    /// Honors `push_on_realtime_failure`; the recipient's current push
    /// destination is used.
    pub fn fallback_to_push(&self, event: &TapEvent) -> PushAttempt {
        if !self.config.push_on_realtime_failure {
            debug!(from = %event.from, to = %event.to, "Unsent tap dropped, push fallback disabled");
            return PushAttempt::Skipped;
        }

        let destination = ParticipantId::parse(event.to.as_str())
            .ok()
            .and_then(|to| self.presence.lookup(&to).push_destination);

        match destination {
            Some(destination) => {
                debug!(from = %event.from, to = %event.to, "Unsent tap falling back to push");
                PushAttempt::Dispatched(self.dispatch_push(destination, event))
            }
            None => {
                debug!(from = %event.from, to = %event.to, "Unsent tap dropped, no push destination");
                PushAttempt::NoDestination
            }
        }
    }

    fn dispatch_push(&self, destination: String, event: &TapEvent) -> JoinHandle<PushStatus> {
        let (title, body) = self.config.notification.render(event);
        let data = serde_json::to_value(ServerMessage::Tap(event.clone())).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize tap for push data");
            serde_json::Value::Null
        });

        let notification = PushNotification::new(destination, title, body, data);
        let gateway = Arc::clone(&self.gateway);
        let timeout = self.config.push_timeout;
        let to = event.to.clone();

        tokio::spawn(async move {
            let status = match tokio::time::timeout(timeout, gateway.send(&notification)).await {
                Ok(Ok(())) => PushStatus::Delivered,
                Ok(Err(e)) => PushStatus::Failed(e.to_string()),
                Err(_) => PushStatus::TimedOut,
            };

            match &status {
                PushStatus::Delivered => {
                    debug!(to = %to, gateway = gateway.name(), "Push delivered");
                }
                PushStatus::Failed(reason) => {
                    warn!(to = %to, gateway = gateway.name(), error = %reason, "Push delivery failed");
                }
                PushStatus::TimedOut => {
                    warn!(to = %to, gateway = gateway.name(), timeout = ?timeout, "Push delivery timed out");
                }
            }

            status
        })
    }
}
