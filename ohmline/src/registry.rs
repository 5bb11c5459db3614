//! Shared roster of live connections and the shutdown poll.
//!
//! The live set and the vote map are guarded by one mutex because the tally
//! has to look at both at once: a connection leaving mid-poll must drop out of
//! the unanimity requirement in the same step that removes it. Nothing in here
//! touches a socket; lines for other connections are queued into their outbox
//! and the owning handler writes them.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info};

pub type ConnectionId = u64;

pub const VOTE_PROMPT: &str =
    "Shutdown vote started. Do you agree to shut down the server? (yes/no)";
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down by unanimous vote.";
pub const VOTE_FAILED_NOTICE: &str = "Shutdown vote failed.";

/// Work queued for a connection's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(String),
    Close,
}

/// The registry's reference to a connection: identity plus its outbox.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (Self { id, peer, outbox }, inbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a line. Returns `false` if the handler is already gone.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.outbox.send(Outbound::Line(line.into())).is_ok()
    }

    pub fn close(&self) {
        let _ = self.outbox.send(Outbound::Close);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteProgress {
    Pending { remaining: usize },
    Resolved(VoteOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("no shutdown vote is in progress")]
    NoVoteInProgress,
    #[error("a shutdown vote is already in progress")]
    AlreadyInProgress,
    #[error("connection already voted in this poll")]
    AlreadyVoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("server is shutting down")]
pub struct Terminating;

pub struct Registry {
    roster: Mutex<Roster>,
    shutdown: watch::Sender<bool>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Roster {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    // Non-empty exactly while a poll is outstanding. `None` means the
    // connection still owes a vote.
    votes: HashMap<ConnectionId, Option<Vote>>,
    terminating: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            roster: Mutex::new(Roster::default()),
            shutdown,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Flips to `true` once a shutdown vote passes.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_terminating(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn add(&self, handle: ConnectionHandle) -> Result<(), Terminating> {
        let mut roster = self.roster.lock().await;
        if roster.terminating {
            return Err(Terminating);
        }
        // A poll asks every registered connection, so a newcomer owes a vote
        // and has to be told.
        if !roster.votes.is_empty() {
            roster.votes.entry(handle.id()).or_insert(None);
            handle.send(VOTE_PROMPT);
            debug!(conn = handle.id(), "late joiner asked to vote");
        }
        roster.connections.insert(handle.id(), handle);
        Ok(())
    }

    /// Drops a connection and its vote. If that leaves every remaining
    /// participant with a recorded vote, the poll resolves right here.
    pub async fn remove(&self, id: ConnectionId) -> Option<VoteOutcome> {
        let mut roster = self.roster.lock().await;
        roster.connections.remove(&id)?;
        roster.votes.remove(&id);

        if roster.votes.is_empty() {
            return None;
        }
        match roster.tally() {
            VoteProgress::Pending { .. } => None,
            VoteProgress::Resolved(outcome) => {
                self.resolve(&mut roster, outcome, None);
                Some(outcome)
            }
        }
    }

    /// Best-effort delivery to every connection except `exclude`. Returns how
    /// many outboxes accepted the line.
    pub async fn broadcast(&self, exclude: Option<ConnectionId>, line: &str) -> usize {
        let roster = self.roster.lock().await;
        roster.broadcast(exclude, line)
    }

    pub async fn count(&self) -> usize {
        self.roster.lock().await.connections.len()
    }

    /// Opens a poll. Every connection registered at this point owes a vote,
    /// the initiator included; the others are asked for theirs.
    pub async fn start_vote(&self, initiator: ConnectionId) -> Result<(), VoteError> {
        let mut roster = self.roster.lock().await;
        match roster.votes.get(&initiator) {
            Some(Some(_)) => return Err(VoteError::AlreadyVoted),
            Some(None) => return Err(VoteError::AlreadyInProgress),
            None => {}
        }

        let ids: Vec<ConnectionId> = roster.connections.keys().copied().collect();
        for id in ids {
            roster.votes.entry(id).or_insert(None);
        }
        roster.broadcast(Some(initiator), VOTE_PROMPT);
        info!(initiator, participants = roster.votes.len(), "shutdown vote started");
        Ok(())
    }

    /// Records a vote and tallies. A resolved poll notifies everyone but the
    /// voter, who learns the outcome from the returned progress.
    pub async fn record_vote(
        &self,
        id: ConnectionId,
        vote: Vote,
    ) -> Result<VoteProgress, VoteError> {
        let mut roster = self.roster.lock().await;
        if roster.votes.is_empty() {
            return Err(VoteError::NoVoteInProgress);
        }
        if let Some(Some(_)) = roster.votes.get(&id) {
            return Err(VoteError::AlreadyVoted);
        }

        roster.votes.insert(id, Some(vote));
        debug!(conn = id, ?vote, "vote recorded");

        let progress = roster.tally();
        if let VoteProgress::Resolved(outcome) = progress {
            self.resolve(&mut roster, outcome, Some(id));
        }
        Ok(progress)
    }

    fn resolve(&self, roster: &mut Roster, outcome: VoteOutcome, exclude: Option<ConnectionId>) {
        roster.votes.clear();
        match outcome {
            VoteOutcome::Failed => {
                info!("shutdown vote failed");
                roster.broadcast(exclude, VOTE_FAILED_NOTICE);
            }
            VoteOutcome::Passed => {
                info!(connections = roster.connections.len(), "shutdown vote passed");
                self.terminate_locked(roster, exclude, SHUTDOWN_NOTICE);
            }
        }
    }

    /// Closes every connection with `notice` and stops further registrations.
    /// Used when the process is told to stop from outside the protocol.
    pub async fn terminate(&self, notice: &str) {
        let mut roster = self.roster.lock().await;
        if roster.terminating {
            return;
        }
        roster.votes.clear();
        self.terminate_locked(&mut roster, None, notice);
    }

    fn terminate_locked(&self, roster: &mut Roster, exclude: Option<ConnectionId>, notice: &str) {
        roster.broadcast(exclude, notice);
        for (_, handle) in roster.connections.drain() {
            handle.close();
        }
        roster.terminating = true;
        self.shutdown.send_replace(true);
    }
}

impl Roster {
    fn broadcast(&self, exclude: Option<ConnectionId>, line: &str) -> usize {
        let mut delivered = 0;
        for (id, handle) in &self.connections {
            if Some(*id) == exclude {
                continue;
            }
            if handle.send(line) {
                delivered += 1;
            } else {
                debug!(conn = id, peer = %handle.peer(), "dropping line for closed connection");
            }
        }
        delivered
    }

    fn tally(&self) -> VoteProgress {
        let mut remaining = 0;
        let mut unanimous = true;
        for id in self.connections.keys() {
            match self.votes.get(id) {
                Some(Some(Vote::Yes)) => {}
                Some(Some(Vote::No)) => unanimous = false,
                _ => remaining += 1,
            }
        }

        if remaining > 0 {
            VoteProgress::Pending { remaining }
        } else if unanimous {
            VoteProgress::Resolved(VoteOutcome::Passed)
        } else {
            VoteProgress::Resolved(VoteOutcome::Failed)
        }
    }
}
