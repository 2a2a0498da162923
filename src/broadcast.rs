//! Fan-out of server messages to every session in a match
//!
//! Delivery is best effort. A failed send is logged, the dead stream is
//! detached, and the player id is handed back to the caller; the
//! coordinator turns it into a `SessionFailed` and removes the player the
//! same way as a leave. Sessions without a live stream are skipped.

use crate::protocol::ServerMessage;
use crate::session::{Connection, ConnectionId, SendError, Session};
use crate::types::PlayerId;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Broadcaster {
    sessions: HashMap<PlayerId, Session>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&mut self, session: Session) {
        self.sessions.insert(session.player_id().clone(), session);
    }

    pub fn remove_session(&mut self, player_id: &str) -> Option<Session> {
        self.sessions.remove(player_id)
    }

    /// Attach a live stream to an existing session.
    /// Returns false if the player has no session.
    pub fn attach(&mut self, player_id: &str, stream: Connection) -> bool {
        match self.sessions.get_mut(player_id) {
            Some(session) => {
                session.attach(stream);
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, player_id: &str) -> bool {
        self.sessions
            .get(player_id)
            .is_some_and(|session| session.is_live())
    }

    /// Socket currently attached for the player
    pub fn connection_id(&self, player_id: &str) -> Option<&ConnectionId> {
        self.sessions.get(player_id)?.connection_id()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Send to a single player
    pub fn send_to(&self, player_id: &str, msg: &ServerMessage) -> Result<(), SendError> {
        match self.sessions.get(player_id) {
            Some(session) => session.send(msg),
            None => Err(SendError::NoStream),
        }
    }

    /// Send to every session. Returns the players whose send failed.
    pub fn broadcast(&mut self, msg: &ServerMessage) -> Vec<PlayerId> {
        let mut failed = Vec::new();

        for (player_id, session) in self.sessions.iter_mut() {
            match session.send(msg) {
                Ok(()) => {}
                Err(SendError::NoStream) => {
                    tracing::debug!("Skipping {} (no live stream)", player_id);
                }
                Err(e) => {
                    tracing::warn!("Failed to send to {}: {}", player_id, e);
                    session.detach();
                    failed.push(player_id.clone());
                }
            }
        }

        failed
    }

    /// Drop every outbound stream so the writer tasks wind down
    pub fn close_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.detach();
        }
    }
}
