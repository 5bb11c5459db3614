//! Command parsing and dispatch for the normal (non-calculator) surface.
//!
//! A line is split into a case-insensitive keyword and the remaining argument
//! text. Keywords outside the table become [`Command::Unknown`] so every line
//! gets an answer.

use chrono::Local;
use rand::Rng;
use tracing::{debug, info};

use crate::{
    registry::{
        Registry, SHUTDOWN_NOTICE, VOTE_FAILED_NOTICE, Vote, VoteError, VoteOutcome, VoteProgress,
    },
    session::Session,
};

pub const HELP_TEXT: &str = "Available commands: help - this list | cit - print a quote | \
dat - current date | cli - number of connected clients | bro [message] - send a message to \
all other clients | ss - start a vote on shutting down the server | yes/no - answer a shutdown \
vote | calculateohm - Ohm's law calculator (U, R, I) | ex - disconnect";
pub const UNKNOWN_REPLY: &str = "Unknown command. Type 'help' for the list of commands.";
pub const EMPTY_BROADCAST_REPLY: &str = "Message is empty. Usage: bro [message]";
pub const BROADCAST_SENT_REPLY: &str = "Broadcast message sent.";
pub const VOTE_STARTED_REPLY: &str = "Shutdown vote started. Waiting for all clients to vote.";
pub const FAREWELL: &str = "You have been disconnected.";
pub const CALCULATOR_REPLY: &str =
    "Entering Ohm's law calculator. Enter values for U, R or I. Type 'ex' to leave.";

const QUOTES: [&str; 3] = [
    "The best time to plant a tree was 20 years ago. The second best time is now.",
    "Be the change you wish to see in the world.",
    "Never give up. Great things take time.",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quote,
    Date,
    ClientCount,
    Broadcast { message: String },
    StartShutdownVote,
    CastVote(Vote),
    Disconnect,
    EnterCalculator,
    Unknown { keyword: String },
}

impl Command {
    /// Parses one framed line. The keyword is matched case-insensitively; the
    /// argument keeps its original case with outer whitespace removed.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (keyword, argument) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (line, ""),
        };

        match keyword.to_lowercase().as_str() {
            "help" => Command::Help,
            "cit" => Command::Quote,
            "dat" => Command::Date,
            "cli" => Command::ClientCount,
            "bro" => Command::Broadcast {
                message: argument.to_string(),
            },
            "ss" => Command::StartShutdownVote,
            "yes" => Command::CastVote(Vote::Yes),
            "no" => Command::CastVote(Vote::No),
            "ex" => Command::Disconnect,
            "calculateohm" => Command::EnterCalculator,
            _ => Command::Unknown {
                keyword: keyword.to_string(),
            },
        }
    }
}

/// Runs a command for `session`. `None` means nothing should be written back,
/// which only happens for [`Command::Disconnect`].
pub async fn dispatch(registry: &Registry, session: &mut Session, command: Command) -> Option<String> {
    let reply = match command {
        Command::Help => HELP_TEXT.to_string(),
        Command::Quote => quote(),
        Command::Date => date(),
        Command::ClientCount => {
            let count = registry.count().await;
            format!("Connected clients: {count}")
        }
        Command::Broadcast { message } => broadcast(registry, session, &message).await,
        Command::StartShutdownVote => start_vote(registry, session).await,
        Command::CastVote(vote) => cast_vote(registry, session, vote).await,
        Command::Disconnect => {
            disconnect(registry, session).await;
            return None;
        }
        Command::EnterCalculator => {
            session.enter_calculator();
            CALCULATOR_REPLY.to_string()
        }
        Command::Unknown { keyword } => {
            debug!(conn = session.id(), %keyword, "unknown command");
            UNKNOWN_REPLY.to_string()
        }
    };
    Some(reply)
}

fn quote() -> String {
    let index = rand::thread_rng().gen_range(0..QUOTES.len());
    QUOTES[index].to_string()
}

fn date() -> String {
    format!("Current date: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))
}

async fn broadcast(registry: &Registry, session: &Session, message: &str) -> String {
    if message.is_empty() {
        return EMPTY_BROADCAST_REPLY.to_string();
    }
    let delivered = registry
        .broadcast(Some(session.id()), &format!("BROADCAST: {message}"))
        .await;
    debug!(conn = session.id(), delivered, "broadcast relayed");
    BROADCAST_SENT_REPLY.to_string()
}

async fn start_vote(registry: &Registry, session: &Session) -> String {
    match registry.start_vote(session.id()).await {
        Ok(()) => VOTE_STARTED_REPLY.to_string(),
        Err(error) => vote_error_reply(error),
    }
}

async fn cast_vote(registry: &Registry, session: &Session, vote: Vote) -> String {
    match registry.record_vote(session.id(), vote).await {
        Ok(VoteProgress::Pending { remaining }) => {
            format!("Vote recorded. Waiting for {remaining} more vote(s).")
        }
        Ok(VoteProgress::Resolved(VoteOutcome::Passed)) => SHUTDOWN_NOTICE.to_string(),
        Ok(VoteProgress::Resolved(VoteOutcome::Failed)) => VOTE_FAILED_NOTICE.to_string(),
        Err(error) => vote_error_reply(error),
    }
}

fn vote_error_reply(error: VoteError) -> String {
    match error {
        VoteError::NoVoteInProgress => "No shutdown vote is in progress.".to_string(),
        VoteError::AlreadyInProgress => {
            "A shutdown vote is already in progress. Answer with yes or no.".to_string()
        }
        VoteError::AlreadyVoted => "You have already voted on the shutdown.".to_string(),
    }
}

async fn disconnect(registry: &Registry, session: &Session) {
    session.handle().send(FAREWELL);
    registry.remove(session.id()).await;
    session.handle().close();
    info!(conn = session.id(), peer = %session.handle().peer(), "client requested disconnect");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::{ConnectionHandle, Outbound, VOTE_PROMPT};

    async fn join(registry: &Registry) -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        let peer: SocketAddr = "127.0.0.1:40000".parse().expect("peer addr");
        let (handle, inbox) = ConnectionHandle::new(registry.next_id(), peer);
        registry.add(handle.clone()).await.expect("registration");
        (Session::new(handle), inbox)
    }

    fn drain(inbox: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = inbox.try_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(Command::parse("HELP"), Command::Help);
        assert_eq!(Command::parse("Dat"), Command::Date);
        assert_eq!(Command::parse("cLi"), Command::ClientCount);
        assert_eq!(Command::parse("CalculateOhm"), Command::EnterCalculator);
        assert_eq!(Command::parse("YES"), Command::CastVote(Vote::Yes));
        assert_eq!(Command::parse("no"), Command::CastVote(Vote::No));
    }

    #[test]
    fn broadcast_keeps_argument_text() {
        assert_eq!(
            Command::parse("BRO  Hello   World "),
            Command::Broadcast {
                message: "Hello   World".into()
            }
        );
        assert_eq!(
            Command::parse("bro"),
            Command::Broadcast {
                message: String::new()
            }
        );
    }

    #[test]
    fn unknown_keywords_fall_through() {
        assert_eq!(
            Command::parse("shutdown now"),
            Command::Unknown {
                keyword: "shutdown".into()
            }
        );
        assert_eq!(
            Command::parse("broadcast hi"),
            Command::Unknown {
                keyword: "broadcast".into()
            }
        );
    }

    #[tokio::test]
    async fn static_commands_answer() {
        let registry = Registry::new();
        let (mut session, _inbox) = join(&registry).await;

        let help = dispatch(&registry, &mut session, Command::Help).await;
        assert_eq!(help.as_deref(), Some(HELP_TEXT));

        let quote = dispatch(&registry, &mut session, Command::Quote)
            .await
            .expect("quote");
        assert!(QUOTES.contains(&quote.as_str()));

        let unknown = dispatch(
            &registry,
            &mut session,
            Command::Unknown {
                keyword: "x".into(),
            },
        )
        .await;
        assert_eq!(unknown.as_deref(), Some(UNKNOWN_REPLY));
    }

    #[tokio::test]
    async fn date_uses_timestamp_format() {
        let registry = Registry::new();
        let (mut session, _inbox) = join(&registry).await;
        let reply = dispatch(&registry, &mut session, Command::Date)
            .await
            .expect("date");
        let stamp = reply
            .strip_prefix("Current date: ")
            .expect("date prefix");
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn client_count_reflects_registry() {
        let registry = Registry::new();
        let (mut alice, _a) = join(&registry).await;
        let (_bob, _b) = join(&registry).await;
        let reply = dispatch(&registry, &mut alice, Command::ClientCount).await;
        assert_eq!(reply.as_deref(), Some("Connected clients: 2"));
    }

    #[tokio::test]
    async fn empty_broadcast_sends_nothing() {
        let registry = Registry::new();
        let (mut alice, mut alice_inbox) = join(&registry).await;
        let (_bob, mut bob_inbox) = join(&registry).await;

        let reply = dispatch(&registry, &mut alice, Command::parse("bro   ")).await;
        assert_eq!(reply.as_deref(), Some(EMPTY_BROADCAST_REPLY));
        assert!(drain(&mut bob_inbox).is_empty());
        assert!(drain(&mut alice_inbox).is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_other_connections() {
        let registry = Registry::new();
        let (mut alice, mut alice_inbox) = join(&registry).await;
        let (_bob, mut bob_inbox) = join(&registry).await;

        let reply = dispatch(&registry, &mut alice, Command::parse("bro hello")).await;
        assert_eq!(reply.as_deref(), Some(BROADCAST_SENT_REPLY));
        assert_eq!(
            drain(&mut bob_inbox),
            vec![Outbound::Line("BROADCAST: hello".into())]
        );
        assert!(drain(&mut alice_inbox).is_empty());
    }

    #[tokio::test]
    async fn vote_commands_report_progress() {
        let registry = Registry::new();
        let (mut alice, _a) = join(&registry).await;
        let (mut bob, mut bob_inbox) = join(&registry).await;

        let reply = dispatch(&registry, &mut alice, Command::CastVote(Vote::Yes)).await;
        assert_eq!(reply.as_deref(), Some("No shutdown vote is in progress."));

        let reply = dispatch(&registry, &mut alice, Command::StartShutdownVote).await;
        assert_eq!(reply.as_deref(), Some(VOTE_STARTED_REPLY));
        assert_eq!(
            drain(&mut bob_inbox),
            vec![Outbound::Line(VOTE_PROMPT.into())]
        );

        let reply = dispatch(&registry, &mut alice, Command::CastVote(Vote::Yes)).await;
        assert_eq!(
            reply.as_deref(),
            Some("Vote recorded. Waiting for 1 more vote(s).")
        );
        let reply = dispatch(&registry, &mut alice, Command::StartShutdownVote).await;
        assert_eq!(
            reply.as_deref(),
            Some("You have already voted on the shutdown.")
        );

        let reply = dispatch(&registry, &mut bob, Command::CastVote(Vote::No)).await;
        assert_eq!(reply.as_deref(), Some(VOTE_FAILED_NOTICE));
        assert!(!registry.is_terminating());
    }

    #[tokio::test]
    async fn disconnect_says_goodbye_and_leaves() {
        let registry = Registry::new();
        let (mut alice, mut alice_inbox) = join(&registry).await;

        let reply = dispatch(&registry, &mut alice, Command::Disconnect).await;
        assert_eq!(reply, None);
        assert_eq!(registry.count().await, 0);
        assert_eq!(
            drain(&mut alice_inbox),
            vec![Outbound::Line(FAREWELL.into()), Outbound::Close]
        );
    }

    #[tokio::test]
    async fn enter_calculator_opens_session() {
        let registry = Registry::new();
        let (mut alice, _a) = join(&registry).await;
        assert!(!alice.in_calculator());
        let reply = dispatch(&registry, &mut alice, Command::EnterCalculator).await;
        assert_eq!(reply.as_deref(), Some(CALCULATOR_REPLY));
        assert!(alice.in_calculator());
    }
}
