use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Opaque ID types for readability
pub type MatchId = String;
pub type PlayerId = String;
pub type RoundNo = u32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPhase {
    Lobby,
    Loading,
    CountingDown,
    Playing,
    Submitting,
    Done,
    Terminated,
}

impl MatchPhase {
    /// `Done` and `Terminated` end the match; nothing leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchPhase::Done | MatchPhase::Terminated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchConfig {
    pub max_players: usize,
    pub total_rounds: RoundNo,
    pub round_seconds: u64,
    pub countdown_seconds: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_players: 2,
            total_rounds: 3,
            round_seconds: 60,
            countdown_seconds: 3,
        }
    }
}

impl MatchConfig {
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_seconds)
    }

    pub fn countdown_duration(&self) -> Duration {
        Duration::from_secs(self.countdown_seconds)
    }
}

/// What a player reports at the end of a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoundResult {
    pub won: bool,
    /// The command the player solved the challenge with, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Content of a single round, handed to every client in `LoadRound`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Challenge {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub scores_by_round: BTreeMap<RoundNo, RoundResult>,
}

impl Player {
    pub fn new(id: PlayerId, display_name: String) -> Self {
        Self {
            id,
            display_name,
            scores_by_round: BTreeMap::new(),
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            scores: self.scores_by_round.clone(),
        }
    }

    pub fn wins(&self) -> usize {
        self.scores_by_round.values().filter(|r| r.won).count()
    }
}

/// Public view of a player (sent to clients)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub display_name: String,
    pub scores: BTreeMap<RoundNo, RoundResult>,
}

/// Point-in-time view of a match, produced by the coordinator on request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchSnapshot {
    pub id: MatchId,
    pub phase: MatchPhase,
    pub current_round: RoundNo,
    pub config: MatchConfig,
    pub players: Vec<PlayerInfo>,
}
