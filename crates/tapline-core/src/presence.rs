//! Presence tracking for Tapline.
//!
//! The registry records, per participant, how to reach them: a live realtime
//! connection and/or a push destination token. Connections are owned by
//! their socket task; the registry only keeps a sending handle.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tapline_protocol::ServerMessage;
use tokio::sync::mpsc;
use tracing::debug;

use crate::identity::ParticipantId;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Sending side of a realtime connection.
///
/// Cloning a handle does not keep the connection alive: once the socket
/// task drops its receiver, every clone reports closed.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle for a new connection.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: ConnectionId::generate(),
            outbound,
        }
    }

    /// Create a handle together with the receiver its socket task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for the connection.
    ///
    /// Returns `false` if the connection has already gone away.
    pub fn deliver(&self, message: ServerMessage) -> bool {
        self.outbound.send(message).is_ok()
    }

    /// Check if the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// How to reach one participant.
#[derive(Debug, Clone, Default)]
pub struct PresenceEntry {
    /// Push destination token.
    pub push_destination: Option<String>,
    /// Live realtime connection.
    pub live_connection: Option<ConnectionHandle>,
}

/// Reachability booleans for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PresenceStatus {
    /// A push destination is registered.
    pub push: bool,
    /// A live connection is bound.
    pub live: bool,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    /// Number of participants with an entry.
    pub entries: usize,
    /// Number of connections in the handle table.
    pub bound_connections: usize,
}

/// Process-wide presence registry.
///
/// Every method is a synchronous map update, so no update interleaves
/// with I/O.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Entries indexed by participant.
    entries: DashMap<ParticipantId, PresenceEntry>,
    /// Handle table: connection -> bound participant.
    bindings: DashMap<ConnectionId, ParticipantId>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a participant's push destination, replacing any previous one.
    ///
    /// Returns the replaced token.
    pub fn register_push_destination(
        &self,
        id: &ParticipantId,
        token: impl Into<String>,
    ) -> Option<String> {
        let mut entry = self.entries.entry(id.clone()).or_default();
        let previous = entry.push_destination.replace(token.into());
        debug!(participant = %id, replaced = previous.is_some(), "Push destination registered");
        previous
    }

    /// Bind a connection to a participant. Last handshake wins.
    ///
    /// If the connection was bound to a different participant, that binding
    /// is released first. Returns the connection this one superseded, which
    /// is left open.
    pub fn bind_connection(
        &self,
        id: &ParticipantId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let connection = handle.id();

        if let Some(previous) = self.bindings.insert(connection, id.clone()) {
            if &previous != id {
                self.clear_if_current(&previous, connection);
            }
        }

        let superseded = self
            .entries
            .entry(id.clone())
            .or_default()
            .live_connection
            .replace(handle)
            .filter(|old| old.id() != connection);

        debug!(
            participant = %id,
            connection = %connection,
            superseded = ?superseded.as_ref().map(ConnectionHandle::id),
            "Connection bound"
        );

        superseded
    }

    /// Release a closed connection.
    ///
    /// The participant's live connection is cleared only if it still refers
    /// to this connection, so a late close never clears a newer binding.
    /// Returns the participant whose live connection was cleared.
    pub fn unbind_connection(&self, connection: ConnectionId) -> Option<ParticipantId> {
        let (_, id) = self.bindings.remove(&connection)?;

        if self.clear_if_current(&id, connection) {
            debug!(participant = %id, connection = %connection, "Connection unbound");
            Some(id)
        } else {
            debug!(participant = %id, connection = %connection, "Stale connection closed");
            None
        }
    }

    /// Get a snapshot of a participant's entry.
    #[must_use]
    pub fn lookup(&self, id: &ParticipantId) -> PresenceEntry {
        self.entries
            .get(id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Get a participant's reachability booleans.
    #[must_use]
    pub fn status(&self, id: &ParticipantId) -> PresenceStatus {
        self.entries
            .get(id)
            .map(|entry| PresenceStatus {
                push: entry.push_destination.is_some(),
                live: entry
                    .live_connection
                    .as_ref()
                    .is_some_and(ConnectionHandle::is_open),
            })
            .unwrap_or_default()
    }

    /// Get the participant a connection is bound to.
    #[must_use]
    pub fn bound_identity(&self, connection: ConnectionId) -> Option<ParticipantId> {
        self.bindings.get(&connection).map(|id| id.clone())
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            entries: self.entries.len(),
            bound_connections: self.bindings.len(),
        }
    }

    fn clear_if_current(&self, id: &ParticipantId, connection: ConnectionId) -> bool {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };

        let is_current = entry
            .live_connection
            .as_ref()
            .is_some_and(|handle| handle.id() == connection);
        if is_current {
            entry.live_connection = None;
        }
        is_current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    #[test]
    fn test_register_push_destination_overwrites() {
        let registry = PresenceRegistry::new();
        let gf = pid("gf");

        assert_eq!(registry.register_push_destination(&gf, "tokenA"), None);
        assert_eq!(
            registry.register_push_destination(&gf, "tokenB"),
            Some("tokenA".to_string())
        );

        assert_eq!(
            registry.lookup(&gf).push_destination.as_deref(),
            Some("tokenB")
        );
    }

    #[test]
    fn test_lookup_unknown_is_empty() {
        let registry = PresenceRegistry::new();
        let entry = registry.lookup(&pid("me"));
        assert!(entry.push_destination.is_none());
        assert!(entry.live_connection.is_none());
        assert_eq!(registry.stats().entries, 0);
    }

    #[test]
    fn test_bind_and_unbind() {
        let registry = PresenceRegistry::new();
        let me = pid("me");
        let (handle, _rx) = ConnectionHandle::channel();
        let connection = handle.id();

        assert!(registry.bind_connection(&me, handle).is_none());
        assert!(registry.status(&me).live);
        assert_eq!(registry.bound_identity(connection), Some(me.clone()));

        assert_eq!(registry.unbind_connection(connection), Some(me.clone()));
        assert!(!registry.status(&me).live);
        assert_eq!(registry.stats().bound_connections, 0);

        // Only one cleanup per connection.
        assert_eq!(registry.unbind_connection(connection), None);
    }

    #[test]
    fn test_stale_close_keeps_newer_connection() {
        let registry = PresenceRegistry::new();
        let me = pid("me");
        let (c1, _rx1) = ConnectionHandle::channel();
        let (c2, _rx2) = ConnectionHandle::channel();
        let (c1_id, c2_id) = (c1.id(), c2.id());

        registry.bind_connection(&me, c1);
        let superseded = registry.bind_connection(&me, c2);
        assert_eq!(superseded.map(|h| h.id()), Some(c1_id));

        assert_eq!(registry.unbind_connection(c1_id), None);

        let live = registry.lookup(&me).live_connection.unwrap();
        assert_eq!(live.id(), c2_id);
    }

    #[test]
    fn test_rebind_to_other_identity_releases_old() {
        let registry = PresenceRegistry::new();
        let (me, gf) = (pid("me"), pid("gf"));
        let (handle, _rx) = ConnectionHandle::channel();
        let connection = handle.id();

        registry.bind_connection(&me, handle.clone());
        registry.bind_connection(&gf, handle);

        assert!(!registry.status(&me).live);
        assert!(registry.status(&gf).live);
        assert_eq!(registry.unbind_connection(connection), Some(gf));
    }

    #[test]
    fn test_status_reports_closed_handle_as_not_live() {
        let registry = PresenceRegistry::new();
        let me = pid("me");
        let (handle, rx) = ConnectionHandle::channel();

        registry.bind_connection(&me, handle);
        registry.register_push_destination(&me, "token");
        drop(rx);

        assert_eq!(
            registry.status(&me),
            PresenceStatus {
                push: true,
                live: false
            }
        );
    }

    #[test]
    fn test_handle_deliver() {
        let (handle, mut rx) = ConnectionHandle::channel();
        assert!(handle.is_open());
        assert!(handle.deliver(ServerMessage::hello_ok("me")));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::hello_ok("me"));

        drop(rx);
        assert!(!handle.deliver(ServerMessage::hello_ok("me")));
        assert!(!handle.is_open());
    }

    #[test]
    fn test_connection_ids_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn_"));
    }
}
