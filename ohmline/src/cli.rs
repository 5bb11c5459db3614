use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_LISTEN;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the line server, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a server and type commands interactively.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// Socket address to bind to. Use port 0 for an ephemeral port.
    /// Overrides the host/port from `--config`.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// JSON file with `host`, `port` and `idle_timeout_secs`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Close connections that send no complete line for this many seconds.
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the server to connect to.
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub server: SocketAddr,
}
