use crate::error::MatchError;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol version announced in `Welcome`
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Take a seat in the match (only valid in the lobby)
    Join { display_name: String },
    /// The client finished loading the current round's content
    RoundLoaded,
    /// The client's result for the round that just ended
    RoundSubmission {
        won: bool,
        #[serde(default)]
        command: Option<String>,
    },
    /// Voluntarily leave the match
    Leave,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        match_state: MatchSnapshot,
        server_now: String,
    },
    /// Direct reply to a successful join
    Joined {
        player: PlayerInfo,
    },
    PlayerJoined {
        player_id: PlayerId,
        display_name: String,
    },
    PlayerLeft {
        player_id: PlayerId,
        display_name: String,
    },
    LoadRound {
        round: RoundNo,
        content: Challenge,
    },
    CountingDown {
        round: RoundNo,
        starts_at: DateTime<Utc>,
    },
    RoundStarted {
        round: RoundNo,
        ends_at: DateTime<Utc>,
    },
    SubmitScoreRequest {
        round: RoundNo,
    },
    /// Final standings once every round has been played
    GameOver {
        players: Vec<PlayerInfo>,
    },
    GameTerminated,
    Error {
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn error(err: &MatchError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            msg: err.to_string(),
        }
    }

    /// Nothing is sent on a session after a final message
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ServerMessage::GameOver { .. } | ServerMessage::GameTerminated
        )
    }
}
