//! Per-round acknowledgment bookkeeping
//!
//! The tracker has no locking of its own. It is owned by the coordinator
//! task, which is the only place acks are recorded or purged.

use crate::types::{PlayerId, RoundNo};
use std::collections::BTreeSet;
use std::fmt;

/// Set of player ids. Membership is all that matters; iteration order is
/// sorted only so logs are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerSet(BTreeSet<PlayerId>);

impl PlayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already present
    pub fn insert(&mut self, id: PlayerId) -> bool {
        self.0.insert(id)
    }

    /// Returns false if the id was not present
    pub fn remove(&mut self, id: &str) -> bool {
        self.0.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerId> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    Load,
    Submission,
}

impl fmt::Display for AckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckKind::Load => write!(f, "load"),
            AckKind::Submission => write!(f, "submission"),
        }
    }
}

/// Who has acknowledged what in the current round
#[derive(Debug, Clone, Default)]
pub struct AckTracker {
    round: RoundNo,
    loaded_by: PlayerSet,
    submitted_by: PlayerSet,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Round the recorded acks belong to
    pub fn round(&self) -> RoundNo {
        self.round
    }

    /// Record an ack. Returns false for a repeat ack from the same player.
    pub fn record_ack(&mut self, kind: AckKind, player_id: PlayerId) -> bool {
        self.set_mut(kind).insert(player_id)
    }

    pub fn has_acked(&self, kind: AckKind, player_id: &str) -> bool {
        self.set(kind).contains(player_id)
    }

    pub fn count(&self, kind: AckKind) -> usize {
        self.set(kind).len()
    }

    /// Forget every ack and start tracking `round`
    pub fn reset(&mut self, round: RoundNo) {
        self.round = round;
        self.loaded_by.clear();
        self.submitted_by.clear();
    }

    /// Drop a departed player from both ack sets
    pub fn purge(&mut self, player_id: &str) {
        let loaded = self.loaded_by.remove(player_id);
        let submitted = self.submitted_by.remove(player_id);
        if loaded || submitted {
            tracing::debug!(
                "Purged acks for {} (load: {}, submission: {})",
                player_id,
                loaded,
                submitted
            );
        }
    }

    fn set(&self, kind: AckKind) -> &PlayerSet {
        match kind {
            AckKind::Load => &self.loaded_by,
            AckKind::Submission => &self.submitted_by,
        }
    }

    fn set_mut(&mut self, kind: AckKind) -> &mut PlayerSet {
        match kind {
            AckKind::Load => &mut self.loaded_by,
            AckKind::Submission => &mut self.submitted_by,
        }
    }
}
