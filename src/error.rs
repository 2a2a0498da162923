use crate::types::{MatchPhase, PlayerId};

/// Result type for coordinator operations
pub type MatchResult<T> = Result<T, MatchError>;

/// Errors returned by the match coordinator.
///
/// Join validation errors are reported to the joining client only. Protocol
/// errors (`UnknownPlayer`, `WrongPhase`) are logged and dropped by the
/// coordinator when they come from a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("Match is full")]
    GameFull,

    #[error("Display name {0:?} is already taken")]
    DuplicateName(String),

    #[error("Match has already started")]
    JoinAfterStart,

    #[error("Player {0} is not in this match")]
    UnknownPlayer(PlayerId),

    #[error("Expected phase {expected:?}, match is in {actual:?}")]
    WrongPhase {
        expected: MatchPhase,
        actual: MatchPhase,
    },

    #[error("No rounds left to advance to")]
    NoRoundsLeft,

    #[error("Identity {0} is not known")]
    UnknownIdentity(PlayerId),

    #[error("Player {0} has already joined")]
    DuplicatePlayer(PlayerId),

    #[error("Display name must not be empty")]
    InvalidName,

    #[error("Match is no longer running")]
    MatchClosed,
}

impl MatchError {
    /// Stable error code sent to clients in `ServerMessage::Error`
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::GameFull => "GAME_FULL",
            MatchError::DuplicateName(_) => "DUPLICATE_NAME",
            MatchError::JoinAfterStart => "JOIN_AFTER_START",
            MatchError::UnknownPlayer(_) => "UNKNOWN_PLAYER",
            MatchError::WrongPhase { .. } => "WRONG_PHASE",
            MatchError::NoRoundsLeft => "NO_ROUNDS_LEFT",
            MatchError::UnknownIdentity(_) => "UNKNOWN_IDENTITY",
            MatchError::DuplicatePlayer(_) => "DUPLICATE_PLAYER",
            MatchError::InvalidName => "INVALID_NAME",
            MatchError::MatchClosed => "MATCH_CLOSED",
        }
    }
}
