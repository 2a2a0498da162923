//! Per-client network session
//!
//! A `Session` is the coordinator-side view of one player's connection: an
//! optional outbound stream plus the player id it belongs to. The outbound
//! half is an unbounded channel drained by the socket writer task, so
//! `send` never blocks the coordinator.
//!
//! The inbound half is `run_receive_loop`, which runs in the connection's
//! own task and turns wire messages into coordinator commands.

use crate::coordinator::{Ack, Command, MatchHandle};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::{PlayerId, RoundResult};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

/// Outbound half of a live connection
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Identifies one socket; a player may reconnect on a new one
pub type ConnectionId = String;

/// An outbound stream tagged with the socket it belongs to
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub outbound: Outbound,
}

impl Connection {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            outbound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Session has no live stream")]
    NoStream,
    #[error("Stream closed")]
    Closed,
}

/// Why a receive loop stopped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Stream ended")]
    Eof,
}

#[derive(Debug)]
pub struct Session {
    player_id: PlayerId,
    stream: Option<Connection>,
}

impl Session {
    pub fn new(player_id: PlayerId, stream: Option<Connection>) -> Self {
        Self { player_id, stream }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// A player without a live stream stays in the roster but cannot ack
    pub fn is_live(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|conn| !conn.outbound.is_closed())
    }

    /// Socket currently attached, if any
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.stream.as_ref().map(|conn| &conn.id)
    }

    /// Replace the attached stream. The previous socket's writer sees its
    /// channel close once its own sender goes away.
    pub fn attach(&mut self, stream: Connection) {
        self.stream = Some(stream);
    }

    /// Drop the outbound stream. The writer task sees its channel close.
    pub fn detach(&mut self) -> Option<Connection> {
        self.stream.take()
    }

    pub fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let conn = self.stream.as_ref().ok_or(SendError::NoStream)?;
        conn.outbound
            .send(msg.clone())
            .map_err(|_| SendError::Closed)
    }
}

/// Translate an inbound wire message into a coordinator command.
///
/// Acks are classified here, once; the coordinator never re-inspects the
/// payload. `Join` is handled by the socket layer before a session exists,
/// so it yields nothing here.
pub fn translate(player_id: &PlayerId, msg: ClientMessage) -> Option<Command> {
    match msg {
        ClientMessage::RoundLoaded => Some(Command::Ack(Ack::Load {
            player_id: player_id.clone(),
        })),
        ClientMessage::RoundSubmission { won, command } => Some(Command::Ack(Ack::Submission {
            player_id: player_id.clone(),
            result: RoundResult { won, command },
        })),
        ClientMessage::Leave => Some(Command::Leave {
            player_id: player_id.clone(),
        }),
        ClientMessage::Join { .. } => None,
    }
}

/// Pump inbound messages into the coordinator until the stream ends.
///
/// Ends with a `Disconnected` command for `connection` unless the client
/// left voluntarily. Returns the reason the loop stopped.
pub async fn run_receive_loop<S>(
    player_id: PlayerId,
    connection: ConnectionId,
    mut inbound: S,
    handle: MatchHandle,
) -> SessionError
where
    S: Stream<Item = Result<ClientMessage, SessionError>> + Unpin,
{
    let cause = loop {
        match inbound.next().await {
            Some(Ok(msg)) => {
                let Some(cmd) = translate(&player_id, msg) else {
                    tracing::debug!("Ignoring join from already joined player {}", player_id);
                    continue;
                };
                let leaving = matches!(cmd, Command::Leave { .. });
                if handle.post(cmd).is_err() {
                    tracing::debug!("Match closed, stopping receive loop for {}", player_id);
                    return SessionError::Eof;
                }
                if leaving {
                    return SessionError::Eof;
                }
            }
            Some(Err(e)) => break e,
            None => break SessionError::Eof,
        }
    };

    tracing::info!("Session for {} ended: {}", player_id, cause);
    let _ = handle.post(Command::Disconnected {
        player_id,
        connection,
        cause: cause.to_string(),
    });
    cause
}
