use crate::error::{MatchError, MatchResult};
use crate::scheduler::TimerFired;
use crate::session::{Connection, ConnectionId};
use crate::types::*;
use tokio::sync::{mpsc, oneshot};

/// Sending half of a coordinator's mailbox
pub type Mailbox = mpsc::UnboundedSender<Command>;

/// Reply channel for commands that return a result to the caller
pub type Reply<T> = oneshot::Sender<MatchResult<T>>;

/// Acknowledgments from a player, classified at the session boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    Load {
        player_id: PlayerId,
    },
    Submission {
        player_id: PlayerId,
        result: RoundResult,
    },
}

impl Ack {
    pub fn player_id(&self) -> &PlayerId {
        match self {
            Ack::Load { player_id } | Ack::Submission { player_id, .. } => player_id,
        }
    }
}

/// Everything the coordinator reacts to. Processed strictly in arrival order.
#[derive(Debug)]
pub enum Command {
    Join {
        player_id: PlayerId,
        display_name: String,
        /// `None` seats the player without a live connection
        stream: Option<Connection>,
        reply: Reply<PlayerInfo>,
    },
    /// Give a seated player a (new) live connection
    AttachStream {
        player_id: PlayerId,
        stream: Connection,
        reply: Reply<()>,
    },
    Leave {
        player_id: PlayerId,
    },
    Ack(Ack),
    /// A send to this player's session failed
    SessionFailed {
        player_id: PlayerId,
    },
    /// The receive loop of one of the player's sockets ended
    Disconnected {
        player_id: PlayerId,
        connection: ConnectionId,
        cause: String,
    },
    TimerFired(TimerFired),
    /// Skip waiting for submissions and move to the next round
    AdvanceRound {
        reply: Reply<RoundNo>,
    },
    Snapshot {
        reply: Reply<MatchSnapshot>,
    },
}

/// Cloneable handle for posting commands to a running coordinator
#[derive(Debug, Clone)]
pub struct MatchHandle {
    id: MatchId,
    mailbox: Mailbox,
}

impl MatchHandle {
    pub(crate) fn new(id: MatchId, mailbox: Mailbox) -> Self {
        Self { id, mailbox }
    }

    /// A handle with no coordinator behind it; commands land in the
    /// returned receiver. Used to drive sessions in isolation.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(ulid::Ulid::new().to_string(), tx), rx)
    }

    pub fn id(&self) -> &MatchId {
        &self.id
    }

    /// True once the coordinator has stopped accepting commands
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub fn post(&self, cmd: Command) -> MatchResult<()> {
        self.mailbox.send(cmd).map_err(|_| MatchError::MatchClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> MatchResult<T> {
        let (tx, rx) = oneshot::channel();
        self.post(make(tx))?;
        rx.await.map_err(|_| MatchError::MatchClosed)?
    }

    pub async fn join(
        &self,
        player_id: PlayerId,
        display_name: String,
        stream: Option<Connection>,
    ) -> MatchResult<PlayerInfo> {
        self.request(|reply| Command::Join {
            player_id,
            display_name,
            stream,
            reply,
        })
        .await
    }

    pub async fn attach_stream(&self, player_id: PlayerId, stream: Connection) -> MatchResult<()> {
        self.request(|reply| Command::AttachStream {
            player_id,
            stream,
            reply,
        })
        .await
    }

    pub fn leave(&self, player_id: PlayerId) -> MatchResult<()> {
        self.post(Command::Leave { player_id })
    }

    pub fn load_ack(&self, player_id: PlayerId) -> MatchResult<()> {
        self.post(Command::Ack(Ack::Load { player_id }))
    }

    pub fn submit(&self, player_id: PlayerId, result: RoundResult) -> MatchResult<()> {
        self.post(Command::Ack(Ack::Submission { player_id, result }))
    }

    pub async fn advance_round(&self) -> MatchResult<RoundNo> {
        self.request(|reply| Command::AdvanceRound { reply }).await
    }

    pub async fn snapshot(&self) -> MatchResult<MatchSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }
}
