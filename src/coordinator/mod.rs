//! Match coordinator
//!
//! One coordinator task owns all mutable state of a match: phase, round
//! number, roster, acks, sessions and timers. Sessions and timers never
//! touch that state; they post `Command`s into the coordinator's mailbox and
//! the task applies them one at a time, in arrival order.
//!
//! Phase flow:
//!
//! ```text
//! Lobby -> Loading -> CountingDown -> Playing -> Submitting -> Loading ... -> Done
//!            \______________ any live phase, roster empty ______________/-> Terminated
//! ```
//!
//! Quorum for an ack kind is "every player currently in the roster has
//! acked", recomputed after every join, leave and ack. A departure can
//! therefore complete a quorum that was only waiting on the departed player.

mod handle;
mod phase;
mod roster;

pub use handle::{Ack, Command, Mailbox, MatchHandle, Reply};
pub use phase::{accepting_phase, is_valid_transition};
pub use roster::Roster;

use crate::ack::{AckKind, AckTracker};
use crate::broadcast::Broadcaster;
use crate::content::RoundContent;
use crate::error::{MatchError, MatchResult};
use crate::identity::IdentityCheck;
use crate::protocol::ServerMessage;
use crate::scheduler::{RoundScheduler, TimerFired, TimerKind};
use crate::session::{Connection, ConnectionId, SendError, Session};
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Spawn a coordinator task for a new match.
///
/// The task runs until the match reaches `Done` or `Terminated` and returns
/// the final phase.
pub fn spawn(
    config: MatchConfig,
    content: Arc<dyn RoundContent>,
    identity: Arc<dyn IdentityCheck>,
) -> (MatchHandle, JoinHandle<MatchPhase>) {
    let (coordinator, handle) = MatchCoordinator::new(config, content, identity);
    let span = tracing::info_span!("match", id = %handle.id());
    let task = tokio::spawn(coordinator.run().instrument(span));
    (handle, task)
}

pub struct MatchCoordinator {
    id: MatchId,
    config: MatchConfig,
    phase: MatchPhase,
    current_round: RoundNo,
    roster: Roster,
    acks: AckTracker,
    broadcaster: Broadcaster,
    scheduler: RoundScheduler,
    content: Arc<dyn RoundContent>,
    identity: Arc<dyn IdentityCheck>,
    mailbox: mpsc::UnboundedReceiver<Command>,
    /// Players whose session failed during the current command
    failed: VecDeque<PlayerId>,
}

impl MatchCoordinator {
    pub fn new(
        config: MatchConfig,
        content: Arc<dyn RoundContent>,
        identity: Arc<dyn IdentityCheck>,
    ) -> (Self, MatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ulid::Ulid::new().to_string();

        let coordinator = Self {
            id: id.clone(),
            config,
            phase: MatchPhase::Lobby,
            current_round: 0,
            roster: Roster::new(),
            acks: AckTracker::new(),
            broadcaster: Broadcaster::new(),
            scheduler: RoundScheduler::new(&tx),
            content,
            identity,
            mailbox: rx,
            failed: VecDeque::new(),
        };

        (coordinator, MatchHandle::new(id, tx))
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn current_round(&self) -> RoundNo {
        self.current_round
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    /// Process the mailbox until the match ends
    pub async fn run(mut self) -> MatchPhase {
        tracing::info!(
            "Match {} open: {} players, {} rounds",
            self.id,
            self.config.max_players,
            self.config.total_rounds
        );

        while !self.phase.is_terminal() {
            match self.mailbox.recv().await {
                Some(cmd) => self.handle(cmd),
                None => break,
            }
        }

        self.teardown();
        self.phase
    }

    /// Apply one command, then any session failures it caused
    pub fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Join {
                player_id,
                display_name,
                stream,
                reply,
            } => {
                let result = self.join(player_id, display_name, stream);
                if let Err(e) = &result {
                    tracing::info!("Join rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::AttachStream {
                player_id,
                stream,
                reply,
            } => {
                let _ = reply.send(self.attach_stream(&player_id, stream));
            }
            Command::Leave { player_id } => self.remove_player(&player_id, "left"),
            Command::SessionFailed { player_id } => self.remove_player(&player_id, "send failed"),
            Command::Disconnected {
                player_id,
                connection,
                cause,
            } => self.disconnected(&player_id, &connection, &cause),
            Command::Ack(ack) => {
                if let Err(e) = self.record_ack(ack) {
                    // Protocol errors are never fatal and never reach other clients
                    tracing::debug!("Dropped ack: {}", e);
                }
            }
            Command::TimerFired(fired) => self.timer_fired(fired),
            Command::AdvanceRound { reply } => {
                let _ = reply.send(self.advance_round());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
        }

        while let Some(player_id) = self.failed.pop_front() {
            self.handle(Command::SessionFailed { player_id });
        }
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            id: self.id.clone(),
            phase: self.phase,
            current_round: self.current_round,
            config: self.config.clone(),
            players: self.roster.infos(),
        }
    }

    fn join(
        &mut self,
        player_id: PlayerId,
        display_name: String,
        stream: Option<Connection>,
    ) -> MatchResult<PlayerInfo> {
        let display_name = display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(MatchError::InvalidName);
        }
        if !self.identity.is_known(&player_id) {
            return Err(MatchError::UnknownIdentity(player_id));
        }
        if self.roster.len() >= self.config.max_players {
            return Err(MatchError::GameFull);
        }
        if self.phase != MatchPhase::Lobby {
            return Err(MatchError::JoinAfterStart);
        }

        let player = Player::new(player_id.clone(), display_name.clone());
        let info = player.info();
        self.roster.insert(player)?;
        self.broadcaster
            .add_session(Session::new(player_id.clone(), stream));

        tracing::info!(
            "{} joined as {:?} ({}/{})",
            player_id,
            display_name,
            self.roster.len(),
            self.config.max_players
        );

        // The joiner hears about its own seat before anything else
        self.send_to(&player_id, ServerMessage::Joined { player: info.clone() });
        self.emit(ServerMessage::PlayerJoined {
            player_id,
            display_name,
        });

        if self.roster.len() == self.config.max_players {
            tracing::info!("Match is full, loading first round");
            // A failed content lookup terminates the match; the join itself stands
            let _ = self.load_round(1);
        }

        Ok(info)
    }

    fn attach_stream(&mut self, player_id: &str, stream: Connection) -> MatchResult<()> {
        if !self.roster.contains(player_id) {
            return Err(MatchError::UnknownPlayer(player_id.to_string()));
        }
        tracing::info!("Attached connection {} for {}", stream.id, player_id);
        self.broadcaster.attach(player_id, stream);
        Ok(())
    }

    /// A socket's receive loop ended. Only the player's current socket
    /// counts; a socket replaced by a reconnect is ignored.
    fn disconnected(&mut self, player_id: &str, connection: &ConnectionId, cause: &str) {
        if self.broadcaster.connection_id(player_id) != Some(connection) {
            tracing::debug!(
                "Ignoring disconnect of stale connection {} for {}: {}",
                connection,
                player_id,
                cause
            );
            return;
        }
        tracing::debug!("{} disconnected: {}", player_id, cause);
        self.remove_player(player_id, "disconnected");
    }

    /// Roster removal shared by leave, disconnect and send failure.
    /// Unknown ids are a no-op, which makes leaving idempotent.
    fn remove_player(&mut self, player_id: &str, reason: &str) {
        if self.phase.is_terminal() {
            return;
        }
        let Some(player) = self.roster.remove(player_id) else {
            tracing::debug!("Ignoring removal of unknown player {} ({})", player_id, reason);
            return;
        };

        self.acks.purge(player_id);
        self.broadcaster.remove_session(player_id);
        tracing::info!(
            "{} ({:?}) {}, {} players remain",
            player.id,
            player.display_name,
            reason,
            self.roster.len()
        );

        self.emit(ServerMessage::PlayerLeft {
            player_id: player.id,
            display_name: player.display_name,
        });

        if self.roster.is_empty() {
            self.abandon();
        } else {
            self.check_quorum();
        }
    }

    fn record_ack(&mut self, ack: Ack) -> MatchResult<()> {
        let kind = match &ack {
            Ack::Load { .. } => AckKind::Load,
            Ack::Submission { .. } => AckKind::Submission,
        };
        let player_id = ack.player_id().clone();

        if !self.roster.contains(&player_id) {
            return Err(MatchError::UnknownPlayer(player_id));
        }
        let expected = accepting_phase(kind);
        if self.phase != expected {
            return Err(MatchError::WrongPhase {
                expected,
                actual: self.phase,
            });
        }
        if !self.broadcaster.is_live(&player_id) {
            tracing::debug!("Ignoring {} ack from {} without a live stream", kind, player_id);
            return Ok(());
        }
        if !self.acks.record_ack(kind, player_id.clone()) {
            tracing::debug!("Duplicate {} ack from {}", kind, player_id);
            return Ok(());
        }

        if let Ack::Submission { result, .. } = ack {
            if let Some(player) = self.roster.get_mut(&player_id) {
                player.scores_by_round.insert(self.current_round, result);
            }
        }

        tracing::info!(
            "{} ack from {} ({}/{})",
            kind,
            player_id,
            self.acks.count(kind),
            self.roster.len()
        );
        self.check_quorum();
        Ok(())
    }

    fn timer_fired(&mut self, fired: TimerFired) {
        if !self.scheduler.accept(fired) {
            tracing::debug!(
                "Discarding stale {:?} timer #{}",
                fired.kind,
                fired.generation
            );
            return;
        }

        match (fired.kind, self.phase) {
            (TimerKind::Countdown, MatchPhase::CountingDown) => {
                self.set_phase(MatchPhase::Playing);
                let duration = self.config.round_duration();
                self.scheduler.start_round(duration);
                self.emit(ServerMessage::RoundStarted {
                    round: self.current_round,
                    ends_at: deadline(duration),
                });
            }
            (TimerKind::Round, MatchPhase::Playing) => {
                self.set_phase(MatchPhase::Submitting);
                self.emit(ServerMessage::SubmitScoreRequest {
                    round: self.current_round,
                });
            }
            (kind, phase) => {
                tracing::warn!("{:?} timer expired during {:?}, ignoring", kind, phase);
            }
        }
    }

    /// Operator request to stop waiting for submissions
    fn advance_round(&mut self) -> MatchResult<RoundNo> {
        if self.phase != MatchPhase::Submitting {
            return Err(MatchError::WrongPhase {
                expected: MatchPhase::Submitting,
                actual: self.phase,
            });
        }
        if self.current_round >= self.config.total_rounds {
            return Err(MatchError::NoRoundsLeft);
        }
        let next = self.current_round + 1;
        self.load_round(next)?;
        Ok(next)
    }

    /// Re-run the quorum guard for whichever ack the current phase waits on
    fn check_quorum(&mut self) {
        let kind = match self.phase {
            MatchPhase::Loading => AckKind::Load,
            MatchPhase::Submitting => AckKind::Submission,
            _ => return,
        };
        if self.roster.is_empty() || self.acks.count(kind) < self.roster.len() {
            return;
        }

        tracing::info!("Every player has sent a {} ack for round {}", kind, self.current_round);
        match kind {
            AckKind::Load => self.start_countdown(),
            AckKind::Submission => self.finish_round(),
        }
    }

    fn start_countdown(&mut self) {
        self.set_phase(MatchPhase::CountingDown);
        let duration = self.config.countdown_duration();
        self.scheduler.start_countdown(duration);
        self.emit(ServerMessage::CountingDown {
            round: self.current_round,
            starts_at: deadline(duration),
        });
    }

    fn finish_round(&mut self) {
        if self.current_round >= self.config.total_rounds {
            self.set_phase(MatchPhase::Done);
            self.emit(ServerMessage::GameOver {
                players: self.roster.infos(),
            });
            return;
        }
        let next = self.current_round + 1;
        let _ = self.load_round(next);
    }

    /// Enter `Loading` for `round` with a fresh ack record.
    /// Missing content terminates the match.
    fn load_round(&mut self, round: RoundNo) -> MatchResult<()> {
        let content = match self.content.round_content(round) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Cannot load round {}: {}", round, e);
                self.terminate();
                return Err(MatchError::MatchClosed);
            }
        };

        self.current_round = round;
        self.acks.reset(round);
        self.set_phase(MatchPhase::Loading);
        self.emit(ServerMessage::LoadRound { round, content });
        Ok(())
    }

    /// The roster just became empty
    fn abandon(&mut self) {
        match self.phase {
            MatchPhase::Lobby => {
                tracing::info!("Lobby is empty, waiting for joins");
            }
            MatchPhase::CountingDown if self.current_round == 1 => {
                tracing::info!("Everyone left before round 1 started, back to lobby");
                self.scheduler.cancel_all();
                self.acks.reset(self.current_round);
                self.set_phase(MatchPhase::Lobby);
            }
            _ => {
                tracing::info!("Match abandoned during {:?}", self.phase);
                self.terminate();
            }
        }
    }

    fn terminate(&mut self) {
        self.scheduler.cancel_all();
        self.set_phase(MatchPhase::Terminated);
        self.emit(ServerMessage::GameTerminated);
    }

    fn set_phase(&mut self, to: MatchPhase) {
        debug_assert!(
            is_valid_transition(self.phase, to),
            "invalid transition {:?} -> {:?}",
            self.phase,
            to
        );
        tracing::info!(
            "Phase {:?} -> {:?} (round {})",
            self.phase,
            to,
            self.current_round
        );
        self.phase = to;
    }

    fn emit(&mut self, msg: ServerMessage) {
        tracing::debug!("Broadcasting {:?}", msg);
        let failed = self.broadcaster.broadcast(&msg);
        self.failed.extend(failed);
    }

    fn send_to(&mut self, player_id: &PlayerId, msg: ServerMessage) {
        match self.broadcaster.send_to(player_id, &msg) {
            Ok(()) | Err(SendError::NoStream) => {}
            Err(e) => {
                tracing::warn!("Failed to send to {}: {}", player_id, e);
                self.failed.push_back(player_id.clone());
            }
        }
    }

    fn teardown(&mut self) {
        tracing::info!(
            "Match {} finished as {:?} after round {}",
            self.id,
            self.phase,
            self.current_round
        );
        self.scheduler.cancel_all();
        self.broadcaster.close_all();
        self.mailbox.close();
    }
}

/// Wall-clock time `duration` from now
fn deadline(duration: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ChallengePlan;
    use crate::session::Outbound;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    type Inbox = mpsc::UnboundedReceiver<ServerMessage>;

    fn config(max_players: usize, total_rounds: RoundNo) -> MatchConfig {
        MatchConfig {
            max_players,
            total_rounds,
            round_seconds: 30,
            countdown_seconds: 3,
        }
    }

    fn coordinator(max_players: usize, total_rounds: RoundNo) -> MatchCoordinator {
        let content: Arc<dyn RoundContent> =
            Arc::new(ChallengePlan::placeholder(total_rounds));
        let identity: Arc<dyn IdentityCheck> = Arc::new(|_: &PlayerId| true);
        let (coordinator, _handle) =
            MatchCoordinator::new(config(max_players, total_rounds), content, identity);
        coordinator
    }

    fn try_join(c: &mut MatchCoordinator, id: &str, name: &str) -> (MatchResult<PlayerInfo>, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply, mut result) = oneshot::channel();
        c.handle(Command::Join {
            player_id: id.to_string(),
            display_name: name.to_string(),
            stream: Some(Connection::new(tx)),
            reply,
        });
        (result.try_recv().unwrap(), rx)
    }

    fn attach(c: &mut MatchCoordinator, id: &str, tx: Outbound) -> MatchResult<()> {
        let (reply, mut result) = oneshot::channel();
        c.handle(Command::AttachStream {
            player_id: id.to_string(),
            stream: Connection::new(tx),
            reply,
        });
        result.try_recv().unwrap()
    }

    fn disconnect(c: &mut MatchCoordinator, id: &str, connection: ConnectionId) {
        c.handle(Command::Disconnected {
            player_id: id.to_string(),
            connection,
            cause: "connection reset".to_string(),
        });
    }

    fn join(c: &mut MatchCoordinator, id: &str) -> Inbox {
        let (result, rx) = try_join(c, id, &format!("player-{}", id));
        result.unwrap();
        rx
    }

    fn load(c: &mut MatchCoordinator, id: &str) {
        c.handle(Command::Ack(Ack::Load {
            player_id: id.to_string(),
        }));
    }

    fn submit(c: &mut MatchCoordinator, id: &str, won: bool) {
        c.handle(Command::Ack(Ack::Submission {
            player_id: id.to_string(),
            result: RoundResult { won, command: None },
        }));
    }

    fn leave(c: &mut MatchCoordinator, id: &str) {
        c.handle(Command::Leave {
            player_id: id.to_string(),
        });
    }

    fn fire(c: &mut MatchCoordinator, kind: TimerKind) {
        let generation = c.scheduler.generation(kind).expect("timer should be running");
        c.handle(Command::TimerFired(TimerFired { kind, generation }));
    }

    fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Drive a full match through `Playing` of the current round
    fn play_round(c: &mut MatchCoordinator, ids: &[&str]) {
        for id in ids {
            load(c, id);
        }
        assert_eq!(c.phase(), MatchPhase::CountingDown);
        fire(c, TimerKind::Countdown);
        assert_eq!(c.phase(), MatchPhase::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_player_single_round_match() {
        let mut c = coordinator(2, 1);
        let mut rx_a = join(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Lobby);
        let mut rx_b = join(&mut c, "b");

        assert_eq!(c.phase(), MatchPhase::Loading);
        assert_eq!(c.current_round(), 1);
        let msgs = drain(&mut rx_b);
        assert!(matches!(msgs[0], ServerMessage::Joined { .. }));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::LoadRound { round: 1, .. })));

        load(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Loading);
        load(&mut c, "b");
        assert_eq!(c.phase(), MatchPhase::CountingDown);

        fire(&mut c, TimerKind::Countdown);
        assert_eq!(c.phase(), MatchPhase::Playing);

        fire(&mut c, TimerKind::Round);
        assert_eq!(c.phase(), MatchPhase::Submitting);
        assert!(drain(&mut rx_a)
            .iter()
            .any(|m| matches!(m, ServerMessage::SubmitScoreRequest { round: 1 })));

        submit(&mut c, "a", true);
        assert_eq!(c.phase(), MatchPhase::Submitting);
        submit(&mut c, "b", false);
        assert_eq!(c.phase(), MatchPhase::Done);

        match drain(&mut rx_b).last() {
            Some(ServerMessage::GameOver { players }) => {
                assert_eq!(players.len(), 2);
                let a = players.iter().find(|p| p.id == "a").unwrap();
                assert!(a.scores[&1].won);
            }
            other => panic!("Expected GameOver, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_player_leaving_first_countdown_reverts_to_lobby() {
        let mut c = coordinator(1, 3);
        let _rx_a = join(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Loading);

        load(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::CountingDown);

        leave(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Lobby);
        assert_eq!(c.player_count(), 0);
        assert!(!c.scheduler.is_active(TimerKind::Countdown));

        // The match can fill up again
        let _rx_b = join(&mut c, "b");
        assert_eq!(c.phase(), MatchPhase::Loading);
        assert_eq!(c.current_round(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_after_first_round_terminates() {
        let mut c = coordinator(1, 3);
        let mut rx = join(&mut c, "a");
        play_round(&mut c, &["a"]);
        fire(&mut c, TimerKind::Round);
        submit(&mut c, "a", true);

        assert_eq!(c.phase(), MatchPhase::Loading);
        assert_eq!(c.current_round(), 2);
        play_round(&mut c, &["a"]);
        drain(&mut rx);

        leave(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Terminated);
        assert!(!c.scheduler.is_active(TimerKind::Round));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_roster_terminates_in_every_other_live_phase() {
        // Loading
        let mut c = coordinator(1, 2);
        let _rx_a = join(&mut c, "a");
        leave(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Terminated);

        // CountingDown of round 2
        let mut c = coordinator(1, 2);
        let _rx_a = join(&mut c, "a");
        play_round(&mut c, &["a"]);
        fire(&mut c, TimerKind::Round);
        submit(&mut c, "a", false);
        load(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::CountingDown);
        assert_eq!(c.current_round(), 2);
        leave(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Terminated);

        // Submitting
        let mut c = coordinator(1, 2);
        let _rx_a = join(&mut c, "a");
        play_round(&mut c, &["a"]);
        fire(&mut c, TimerKind::Round);
        leave(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emptied_lobby_keeps_waiting() {
        let mut c = coordinator(3, 1);
        let _rx_a = join(&mut c, "a");
        leave(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Lobby);

        let _rx_b = join(&mut c, "b");
        assert_eq!(c.player_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_completes_submission_quorum() {
        let mut c = coordinator(3, 2);
        let _rx: Vec<_> = ["a", "b", "c"].iter().map(|id| join(&mut c, id)).collect();
        play_round(&mut c, &["a", "b", "c"]);
        fire(&mut c, TimerKind::Round);

        submit(&mut c, "a", true);
        submit(&mut c, "b", true);
        assert_eq!(c.phase(), MatchPhase::Submitting);

        leave(&mut c, "c");
        assert_eq!(c.phase(), MatchPhase::Loading);
        assert_eq!(c.current_round(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_completes_final_quorum_with_game_over() {
        let mut c = coordinator(3, 1);
        let mut rxs: HashMap<&str, Inbox> =
            ["a", "b", "c"].iter().map(|id| (*id, join(&mut c, id))).collect();
        play_round(&mut c, &["a", "b", "c"]);
        fire(&mut c, TimerKind::Round);

        submit(&mut c, "a", true);
        submit(&mut c, "b", false);
        leave(&mut c, "c");
        assert_eq!(c.phase(), MatchPhase::Done);

        let msgs = drain(rxs.get_mut("a").unwrap());
        let left = msgs
            .iter()
            .position(|m| matches!(m, ServerMessage::PlayerLeft { .. }))
            .unwrap();
        let over = msgs
            .iter()
            .position(|m| matches!(m, ServerMessage::GameOver { .. }))
            .unwrap();
        assert!(left < over);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_completes_load_quorum() {
        let mut c = coordinator(2, 1);
        let _rx_a = join(&mut c, "a");
        let _rx_b = join(&mut c, "b");
        load(&mut c, "a");
        assert_eq!(c.phase(), MatchPhase::Loading);

        leave(&mut c, "b");
        assert_eq!(c.phase(), MatchPhase::CountingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_validation() {
        let mut c = coordinator(2, 1);
        let _rx_a = join(&mut c, "a");

        let (result, _) = try_join(&mut c, "b", "player-a");
        assert_eq!(result, Err(MatchError::DuplicateName("player-a".to_string())));

        let (result, _) = try_join(&mut c, "a", "Someone");
        assert_eq!(result, Err(MatchError::DuplicatePlayer("a".to_string())));

        let (result, _) = try_join(&mut c, "b", "   ");
        assert_eq!(result, Err(MatchError::InvalidName));

        // Rejections leave no trace
        assert_eq!(c.player_count(), 1);

        let _rx_b = join(&mut c, "b");
        assert_eq!(c.phase(), MatchPhase::Loading);

        let (result, _) = try_join(&mut c, "c", "Carol");
        assert_eq!(result, Err(MatchError::GameFull));

        leave(&mut c, "b");
        let (result, _) = try_join(&mut c, "c", "Carol");
        assert_eq!(result, Err(MatchError::JoinAfterStart));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_requires_known_identity() {
        let content: Arc<dyn RoundContent> = Arc::new(ChallengePlan::placeholder(1));
        let identity: Arc<dyn IdentityCheck> = Arc::new(|id: &PlayerId| id.starts_with("ok-"));
        let (mut c, _handle) = MatchCoordinator::new(config(2, 1), content, identity);

        let (result, _) = try_join(&mut c, "intruder", "Mallory");
        assert_eq!(
            result,
            Err(MatchError::UnknownIdentity("intruder".to_string()))
        );
        let (result, _) = try_join(&mut c, "ok-1", "Alice");
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acks_in_wrong_phase_are_ignored() {
        let mut c = coordinator(2, 1);
        let _rx_a = join(&mut c, "a");

        assert_eq!(
            c.record_ack(Ack::Load {
                player_id: "a".to_string()
            }),
            Err(MatchError::WrongPhase {
                expected: MatchPhase::Loading,
                actual: MatchPhase::Lobby,
            })
        );

        let _rx_b = join(&mut c, "b");
        submit(&mut c, "a", true);
        assert_eq!(c.acks.count(AckKind::Submission), 0);

        assert_eq!(
            c.record_ack(Ack::Load {
                player_id: "ghost".to_string()
            }),
            Err(MatchError::UnknownPlayer("ghost".to_string()))
        );
        assert_eq!(c.phase(), MatchPhase::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submission_keeps_first_result() {
        let mut c = coordinator(2, 1);
        let _rx_a = join(&mut c, "a");
        let _rx_b = join(&mut c, "b");
        play_round(&mut c, &["a", "b"]);
        fire(&mut c, TimerKind::Round);

        submit(&mut c, "a", true);
        submit(&mut c, "a", false);

        assert_eq!(c.acks.count(AckKind::Submission), 1);
        let a = c.roster.get_mut("a").unwrap();
        assert!(a.scores_by_round[&1].won);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_twice_equals_leaving_once() {
        let mut c = coordinator(3, 1);
        let mut rx_a = join(&mut c, "a");
        let _rx_b = join(&mut c, "b");
        drain(&mut rx_a);

        leave(&mut c, "b");
        let once = (c.phase(), c.player_count(), drain(&mut rx_a).len());
        leave(&mut c, "b");
        let twice = (c.phase(), c.player_count(), drain(&mut rx_a).len());

        assert_eq!(once, (MatchPhase::Lobby, 1, 1));
        assert_eq!(twice, (MatchPhase::Lobby, 1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_is_discarded() {
        let mut c = coordinator(1, 1);
        let _rx_a = join(&mut c, "a");
        load(&mut c, "a");
        let stale = c.scheduler.generation(TimerKind::Countdown).unwrap();

        // Countdown restarts, e.g. after reverting to the lobby and refilling
        leave(&mut c, "a");
        let _rx_b = join(&mut c, "b");
        load(&mut c, "b");
        assert_eq!(c.phase(), MatchPhase::CountingDown);

        c.handle(Command::TimerFired(TimerFired {
            kind: TimerKind::Countdown,
            generation: stale,
        }));
        assert_eq!(c.phase(), MatchPhase::CountingDown);

        fire(&mut c, TimerKind::Countdown);
        assert_eq!(c.phase(), MatchPhase::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_failure_is_treated_as_leave() {
        let mut c = coordinator(4, 1);
        let mut rx_a = join(&mut c, "a");
        let rx_b = join(&mut c, "b");
        drop(rx_b);

        // Next broadcast fails for b
        let _rx_c = join(&mut c, "c");

        assert_eq!(c.player_count(), 2);
        assert_eq!(c.phase(), MatchPhase::Lobby);
        assert!(drain(&mut rx_a).iter().any(|m| matches!(
            m,
            ServerMessage::PlayerLeft { player_id, .. } if player_id == "b"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_treated_as_leave() {
        let mut c = coordinator(2, 1);
        let _rx_a = join(&mut c, "a");
        let connection = c.broadcaster.connection_id("a").cloned().unwrap();
        disconnect(&mut c, "a", connection);
        assert_eq!(c.player_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_of_replaced_socket_is_ignored() {
        let mut c = coordinator(2, 1);
        let _rx_a = join(&mut c, "a");

        let (reply, mut result) = oneshot::channel();
        c.handle(Command::Join {
            player_id: "b".to_string(),
            display_name: "Reloader".to_string(),
            stream: None,
            reply,
        });
        assert!(result.try_recv().unwrap().is_ok());

        let (tx1, _rx1) = mpsc::unbounded_channel();
        attach(&mut c, "b", tx1).unwrap();
        let first = c.broadcaster.connection_id("b").cloned().unwrap();

        // Page reload: a second socket takes over before the first one closes
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        attach(&mut c, "b", tx2).unwrap();
        let second = c.broadcaster.connection_id("b").cloned().unwrap();
        assert_ne!(first, second);
        assert!(c.broadcaster.is_live("b"));

        disconnect(&mut c, "b", first);
        assert_eq!(c.player_count(), 2);
        assert_eq!(c.phase(), MatchPhase::Loading);

        // The new socket still receives and its acks count
        load(&mut c, "a");
        load(&mut c, "b");
        assert_eq!(c.phase(), MatchPhase::CountingDown);
        assert!(drain(&mut rx2)
            .iter()
            .any(|m| matches!(m, ServerMessage::CountingDown { .. })));

        disconnect(&mut c, "b", second);
        assert_eq!(c.player_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_without_stream_cannot_ack() {
        let mut c = coordinator(2, 1);
        let _rx_a = join(&mut c, "a");

        let (reply, mut result) = oneshot::channel();
        c.handle(Command::Join {
            player_id: "b".to_string(),
            display_name: "Offline".to_string(),
            stream: None,
            reply,
        });
        assert!(result.try_recv().unwrap().is_ok());
        assert_eq!(c.phase(), MatchPhase::Loading);

        load(&mut c, "a");
        load(&mut c, "b");
        assert_eq!(c.acks.count(AckKind::Load), 1);
        assert_eq!(c.phase(), MatchPhase::Loading);

        // Once a stream is attached the ack counts
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(attach(&mut c, "b", tx), Ok(()));
        load(&mut c, "b");
        assert_eq!(c.phase(), MatchPhase::CountingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_stream_for_unknown_player() {
        let mut c = coordinator(2, 1);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            attach(&mut c, "ghost", tx),
            Err(MatchError::UnknownPlayer("ghost".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_round() {
        let mut c = coordinator(2, 2);
        let _rx_a = join(&mut c, "a");
        let _rx_b = join(&mut c, "b");
        assert_eq!(
            c.advance_round(),
            Err(MatchError::WrongPhase {
                expected: MatchPhase::Submitting,
                actual: MatchPhase::Loading,
            })
        );

        play_round(&mut c, &["a", "b"]);
        fire(&mut c, TimerKind::Round);
        submit(&mut c, "a", true);

        // b never submits; the operator moves on
        assert_eq!(c.advance_round(), Ok(2));
        assert_eq!(c.phase(), MatchPhase::Loading);

        play_round(&mut c, &["a", "b"]);
        fire(&mut c, TimerKind::Round);
        assert_eq!(c.advance_round(), Err(MatchError::NoRoundsLeft));
        assert_eq!(c.phase(), MatchPhase::Submitting);
        assert_eq!(c.current_round(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_content_terminates() {
        let content: Arc<dyn RoundContent> = Arc::new(ChallengePlan::placeholder(1));
        let identity: Arc<dyn IdentityCheck> = Arc::new(|_: &PlayerId| true);
        let (mut c, _handle) = MatchCoordinator::new(config(1, 2), content, identity);

        let mut rx = join(&mut c, "a");
        play_round(&mut c, &["a"]);
        fire(&mut c, TimerKind::Round);
        submit(&mut c, "a", true);

        assert_eq!(c.phase(), MatchPhase::Terminated);
        assert_eq!(drain(&mut rx).last(), Some(&ServerMessage::GameTerminated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_is_monotonic_and_bounded() {
        let total = 4;
        let mut c = coordinator(2, total);
        let _rx_a = join(&mut c, "a");
        let _rx_b = join(&mut c, "b");

        let mut last = c.current_round();
        while !c.phase().is_terminal() {
            match c.phase() {
                MatchPhase::Loading => {
                    load(&mut c, "a");
                    load(&mut c, "b");
                }
                MatchPhase::CountingDown => fire(&mut c, TimerKind::Countdown),
                MatchPhase::Playing => fire(&mut c, TimerKind::Round),
                MatchPhase::Submitting => {
                    submit(&mut c, "b", false);
                    submit(&mut c, "a", true);
                }
                phase => panic!("unexpected phase {:?}", phase),
            }
            assert!(c.current_round() >= last);
            assert!(c.current_round() <= total);
            assert!(c.acks.count(AckKind::Load) <= c.player_count());
            assert!(c.acks.count(AckKind::Submission) <= c.player_count());
            last = c.current_round();
        }

        assert_eq!(c.phase(), MatchPhase::Done);
        assert_eq!(c.current_round(), total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot() {
        let mut c = coordinator(2, 1);
        let _rx_a = join(&mut c, "a");

        let snapshot = c.snapshot();
        assert_eq!(snapshot.phase, MatchPhase::Lobby);
        assert_eq!(snapshot.current_round, 0);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].display_name, "player-a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ends_when_every_handle_is_dropped() {
        let content: Arc<dyn RoundContent> = Arc::new(ChallengePlan::placeholder(1));
        let identity: Arc<dyn IdentityCheck> = Arc::new(|_: &PlayerId| true);

        let (handle, task) = spawn(config(2, 1), content.clone(), identity.clone());
        drop(handle);
        assert_eq!(task.await.unwrap(), MatchPhase::Lobby);

        // A pending countdown does not keep the mailbox open either
        let (handle, task) = spawn(config(1, 1), content, identity);
        let (tx, _rx) = mpsc::unbounded_channel();
        handle
            .join("a".to_string(), "A".to_string(), Some(Connection::new(tx)))
            .await
            .unwrap();
        handle.load_ack("a".to_string()).unwrap();
        assert_eq!(handle.snapshot().await.unwrap().phase, MatchPhase::CountingDown);

        drop(handle);
        assert_eq!(task.await.unwrap(), MatchPhase::CountingDown);
    }
}
