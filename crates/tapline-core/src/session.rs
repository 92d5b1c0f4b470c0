//! Realtime connection sessions.
//!
//! A session walks one connection through `Unbound -> Bound -> Closed`.
//! The transport layer feeds it decoded messages and writes back whatever
//! reply it returns; the session keeps the presence registry in step.

use std::sync::Arc;
use tapline_protocol::{ClientMessage, ProtocolError, ServerMessage};
use tracing::{debug, info};

use crate::identity::{PairDirectory, ParticipantId};
use crate::presence::{ConnectionHandle, ConnectionId, PresenceRegistry};

/// Notice sent when a handshake names an unknown participant.
pub const INVALID_IDENTITY: &str = "invalid identity";

/// Notice sent for messages arriving after close.
pub const CONNECTION_CLOSED: &str = "connection closed";

/// Session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no identity yet.
    Unbound,
    /// Bound to a participant by a handshake.
    Bound(ParticipantId),
    /// Closed; the registry has been cleaned up.
    Closed,
}

/// Per-connection session.
///
/// Dropping a session closes it, so the registry cleanup runs exactly once
/// however the socket task ends.
pub struct Session {
    handle: ConnectionHandle,
    state: SessionState,
    directory: Arc<PairDirectory>,
    presence: Arc<PresenceRegistry>,
}

impl Session {
    /// Create an unbound session for a connection.
    #[must_use]
    pub fn new(
        handle: ConnectionHandle,
        directory: Arc<PairDirectory>,
        presence: Arc<PresenceRegistry>,
    ) -> Self {
        debug!(connection = %handle.id(), "Session opened");
        Self {
            handle,
            state: SessionState::Unbound,
            directory,
            presence,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Get the bound identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&ParticipantId> {
        match &self.state {
            SessionState::Bound(id) => Some(id),
            _ => None,
        }
    }

    /// Handle one inbound message and return the reply.
    ///
    /// Errors never close the session; they come back as `error` notices.
    pub fn handle_message(
        &mut self,
        message: Result<ClientMessage, ProtocolError>,
    ) -> ServerMessage {
        if self.state == SessionState::Closed {
            return ServerMessage::error(CONNECTION_CLOSED);
        }

        match message {
            Ok(ClientMessage::Hello { who }) => self.handshake(&who),
            Err(e) => {
                debug!(connection = %self.id(), error = %e, "Rejected message");
                ServerMessage::error(e.notice())
            }
        }
    }

    fn handshake(&mut self, who: &str) -> ServerMessage {
        let id = match self.directory.resolve(who) {
            Ok(id) => id,
            Err(e) => {
                debug!(connection = %self.id(), error = %e, "Handshake rejected");
                return ServerMessage::error(INVALID_IDENTITY);
            }
        };

        if let Some(superseded) = self.presence.bind_connection(&id, self.handle.clone()) {
            debug!(
                participant = %id,
                superseded = %superseded.id(),
                "Earlier connection superseded"
            );
        }

        info!(connection = %self.id(), participant = %id, "Handshake complete");
        self.state = SessionState::Bound(id.clone());
        ServerMessage::hello_ok(id.as_str())
    }

    /// Close the session and release its registry binding.
    ///
    /// Idempotent. Returns the identity the session was bound to.
    pub fn close(&mut self) -> Option<ParticipantId> {
        if self.state == SessionState::Closed {
            return None;
        }

        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        self.presence.unbind_connection(self.handle.id());
        debug!(connection = %self.id(), "Session closed");

        match previous {
            SessionState::Bound(id) => Some(id),
            _ => None,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PairId;
    use tapline_protocol::{codec, Encoding};

    fn pid(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    fn setup() -> (Arc<PairDirectory>, Arc<PresenceRegistry>) {
        let directory = Arc::new(PairDirectory::new());
        directory
            .seed_pair(PairId::new("default"), pid("me"), pid("gf"))
            .unwrap();
        (directory, Arc::new(PresenceRegistry::new()))
    }

    fn open(
        directory: &Arc<PairDirectory>,
        presence: &Arc<PresenceRegistry>,
    ) -> Session {
        let (handle, _rx) = ConnectionHandle::channel();
        Session::new(handle, Arc::clone(directory), Arc::clone(presence))
    }

    fn json(session: &mut Session, text: &str) -> ServerMessage {
        session.handle_message(codec::decode(text.as_bytes(), Encoding::Json))
    }

    #[test]
    fn test_unknown_message_before_handshake() {
        let (directory, presence) = setup();
        let mut session = open(&directory, &presence);

        let reply = json(&mut session, r#"{"type":"ping"}"#);
        assert_eq!(reply, ServerMessage::error("unknown message"));
        assert_eq!(session.state(), &SessionState::Unbound);
        assert_eq!(presence.stats().bound_connections, 0);
    }

    #[test]
    fn test_bad_payload_keeps_session_open() {
        let (directory, presence) = setup();
        let mut session = open(&directory, &presence);

        assert_eq!(
            json(&mut session, "not json"),
            ServerMessage::error("bad payload")
        );
        assert_eq!(
            json(&mut session, r#"{"type":"hello"}"#),
            ServerMessage::error("malformed handshake")
        );
        assert_eq!(session.state(), &SessionState::Unbound);

        // Retrying the handshake still works.
        assert_eq!(
            json(&mut session, r#"{"type":"hello","who":"me"}"#),
            ServerMessage::hello_ok("me")
        );
    }

    #[test]
    fn test_handshake_binds() {
        let (directory, presence) = setup();
        let mut session = open(&directory, &presence);

        let reply = json(&mut session, r#"{"type":"hello","who":"gf"}"#);
        assert_eq!(reply, ServerMessage::hello_ok("gf"));
        assert_eq!(session.identity(), Some(&pid("gf")));
        assert_eq!(presence.bound_identity(session.id()), Some(pid("gf")));
    }

    #[test]
    fn test_handshake_rejects_stranger() {
        let (directory, presence) = setup();
        let mut session = open(&directory, &presence);

        let reply = json(&mut session, r#"{"type":"hello","who":"stranger"}"#);
        assert_eq!(reply, ServerMessage::error(INVALID_IDENTITY));
        assert_eq!(session.state(), &SessionState::Unbound);
    }

    #[test]
    fn test_second_handshake_rebinds() {
        let (directory, presence) = setup();
        let (handle, _rx) = ConnectionHandle::channel();
        let mut session = Session::new(handle, Arc::clone(&directory), Arc::clone(&presence));

        json(&mut session, r#"{"type":"hello","who":"me"}"#);
        json(&mut session, r#"{"type":"hello","who":"gf"}"#);

        assert_eq!(session.identity(), Some(&pid("gf")));
        assert!(!presence.status(&pid("me")).live);
        assert!(presence.status(&pid("gf")).live);
    }

    #[test]
    fn test_stale_close_after_reconnect() {
        let (directory, presence) = setup();
        let (h1, _rx1) = ConnectionHandle::channel();
        let (h2, _rx2) = ConnectionHandle::channel();
        let mut first = Session::new(h1, Arc::clone(&directory), Arc::clone(&presence));
        let mut second = Session::new(h2, Arc::clone(&directory), Arc::clone(&presence));

        json(&mut first, r#"{"type":"hello","who":"me"}"#);
        json(&mut second, r#"{"type":"hello","who":"me"}"#);
        drop(first);

        let live = presence.lookup(&pid("me")).live_connection.unwrap();
        assert_eq!(live.id(), second.id());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (directory, presence) = setup();
        let mut session = open(&directory, &presence);
        json(&mut session, r#"{"type":"hello","who":"me"}"#);

        assert_eq!(session.close(), Some(pid("me")));
        assert_eq!(session.close(), None);
        assert_eq!(session.state(), &SessionState::Closed);
        assert!(!presence.status(&pid("me")).live);

        assert_eq!(
            json(&mut session, r#"{"type":"hello","who":"me"}"#),
            ServerMessage::error(CONNECTION_CLOSED)
        );
    }

    #[test]
    fn test_drop_unbinds() {
        let (directory, presence) = setup();
        let (handle, _rx) = ConnectionHandle::channel();
        {
            let mut session = Session::new(handle, Arc::clone(&directory), Arc::clone(&presence));
            json(&mut session, r#"{"type":"hello","who":"gf"}"#);
            assert!(presence.status(&pid("gf")).live);
        }
        assert_eq!(presence.stats().bound_connections, 0);
        assert!(presence.lookup(&pid("gf")).live_connection.is_none());
    }
}
