//! Round content lookup
//!
//! The coordinator only needs `RoundContent`; where challenges come from is
//! up to the implementation. `ChallengePlan` is a fixed list, either read
//! from a JSON file or generated as placeholders.

use crate::types::{Challenge, RoundNo};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("No content for round {0}")]
    NotFound(RoundNo),

    #[error("Failed to read challenge file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid challenge file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Challenge plan has {found} challenges but the match needs {needed}")]
    TooFew { found: usize, needed: usize },
}

/// Source of per-round content. Rounds are numbered from 1.
pub trait RoundContent: Send + Sync {
    fn round_content(&self, round: RoundNo) -> Result<Challenge, ContentError>;
}

/// One challenge per round, in order
#[derive(Debug, Clone, Default)]
pub struct ChallengePlan {
    challenges: Vec<Challenge>,
}

impl ChallengePlan {
    pub fn new(challenges: Vec<Challenge>) -> Self {
        Self { challenges }
    }

    /// Filler plan used when no challenge file is configured
    pub fn placeholder(rounds: RoundNo) -> Self {
        let challenges = (1..=rounds)
            .map(|round| Challenge {
                question: format!("Round {}: turn input.txt into output.txt", round),
                input_file: Some("input.txt".to_string()),
                output_file: Some("output.txt".to_string()),
            })
            .collect();
        Self { challenges }
    }

    /// Load a JSON array of challenges
    pub fn from_file(path: &Path) -> Result<Self, ContentError> {
        let raw = std::fs::read_to_string(path)?;
        let challenges: Vec<Challenge> = serde_json::from_str(&raw)?;
        tracing::info!(
            "Loaded {} challenges from {}",
            challenges.len(),
            path.display()
        );
        Ok(Self { challenges })
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    /// Fail early if a match with `rounds` rounds would run out of content
    pub fn ensure_covers(&self, rounds: RoundNo) -> Result<(), ContentError> {
        let needed = rounds as usize;
        if self.challenges.len() < needed {
            return Err(ContentError::TooFew {
                found: self.challenges.len(),
                needed,
            });
        }
        Ok(())
    }
}

impl RoundContent for ChallengePlan {
    fn round_content(&self, round: RoundNo) -> Result<Challenge, ContentError> {
        let index = (round as usize)
            .checked_sub(1)
            .ok_or(ContentError::NotFound(round))?;
        self.challenges
            .get(index)
            .cloned()
            .ok_or(ContentError::NotFound(round))
    }
}
