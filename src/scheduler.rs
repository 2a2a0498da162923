//! Countdown and round timers
//!
//! Each timer is a single spawned task that sleeps until its deadline and
//! posts one `TimerFired` into the coordinator's mailbox. Timers carry a
//! generation number; the coordinator only acts on an expiry whose
//! generation matches the timer currently held for that kind, so an expiry
//! that was already queued when its timer got replaced is discarded.
//!
//! The scheduler only holds a weak sender, so the mailbox closes once every
//! `MatchHandle` is gone.

use crate::coordinator::{Command, Mailbox};
use std::time::Duration;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Countdown,
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

/// A running timer. Cancelling is idempotent and a no-op after expiry.
#[derive(Debug)]
pub struct TimerHandle {
    kind: TimerKind,
    generation: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Owns at most one countdown timer and one round timer
pub struct RoundScheduler {
    mailbox: WeakUnboundedSender<Command>,
    next_generation: u64,
    countdown: Option<TimerHandle>,
    round: Option<TimerHandle>,
}

impl RoundScheduler {
    pub fn new(mailbox: &Mailbox) -> Self {
        Self {
            mailbox: mailbox.downgrade(),
            next_generation: 0,
            countdown: None,
            round: None,
        }
    }

    /// Start the pre-round countdown, replacing any running countdown.
    /// Returns the new timer's generation. Stop it early with
    /// `cancel(TimerKind::Countdown)`.
    pub fn start_countdown(&mut self, duration: Duration) -> u64 {
        self.start(TimerKind::Countdown, duration)
    }

    /// Start the round timer, replacing any running round timer.
    /// Returns the new timer's generation. Stop it early with
    /// `cancel(TimerKind::Round)`.
    pub fn start_round(&mut self, duration: Duration) -> u64 {
        self.start(TimerKind::Round, duration)
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.slot_mut(kind).take() {
            tracing::debug!("Cancelled {:?} timer #{}", kind, timer.generation);
            timer.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel(TimerKind::Countdown);
        self.cancel(TimerKind::Round);
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        self.slot(kind).is_some()
    }

    /// Generation of the running timer of `kind`, if any
    pub fn generation(&self, kind: TimerKind) -> Option<u64> {
        self.slot(kind).as_ref().map(TimerHandle::generation)
    }

    /// Accept an expiry if it belongs to the active timer of its kind.
    /// The slot is cleared on success; stale expiries return false.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        let current = self
            .slot(fired.kind)
            .as_ref()
            .is_some_and(|timer| timer.generation == fired.generation);
        if current {
            self.slot_mut(fired.kind).take();
        }
        current
    }

    fn start(&mut self, kind: TimerKind, duration: Duration) -> u64 {
        self.cancel(kind);

        self.next_generation += 1;
        let generation = self.next_generation;
        let mailbox = self.mailbox.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // Mailbox closed means the match already ended
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Command::TimerFired(TimerFired { kind, generation }));
            }
        });

        tracing::debug!("Started {:?} timer #{} ({:?})", kind, generation, duration);
        *self.slot_mut(kind) = Some(TimerHandle {
            kind,
            generation,
            task,
        });
        generation
    }

    fn slot(&self, kind: TimerKind) -> &Option<TimerHandle> {
        match kind {
            TimerKind::Countdown => &self.countdown,
            TimerKind::Round => &self.round,
        }
    }

    fn slot_mut(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Countdown => &mut self.countdown,
            TimerKind::Round => &mut self.round,
        }
    }
}

impl Drop for RoundScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
