use crate::ack::AckKind;
use crate::types::MatchPhase;

/// Check if a phase transition is part of the match graph
pub fn is_valid_transition(from: MatchPhase, to: MatchPhase) -> bool {
    use MatchPhase::*;

    match (from, to) {
        // Normal forward flow
        (Lobby, Loading) => true,
        (Loading, CountingDown) => true,
        (CountingDown, Playing) => true,
        (Playing, Submitting) => true,

        // Submission quorum: next round or game over
        (Submitting, Loading) => true,
        (Submitting, Done) => true,

        // Everyone left before the first round ever started
        (CountingDown, Lobby) => true,

        // Nothing leaves a terminal phase
        (Done, _) | (Terminated, _) => false,

        // Abandonment from any live phase
        (_, Terminated) => true,

        _ => false,
    }
}

/// Phase in which an ack of `kind` is accepted
pub fn accepting_phase(kind: AckKind) -> MatchPhase {
    match kind {
        AckKind::Load => MatchPhase::Loading,
        AckKind::Submission => MatchPhase::Submitting,
    }
}
