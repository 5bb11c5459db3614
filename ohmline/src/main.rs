use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ohmline::{
    cli::{Cli, Command, ServerArgs},
    client,
    config::ServerConfig,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Binds, announces the address on the first log line and serves until a
/// shutdown vote passes or ctrl-c arrives.
async fn serve(args: ServerArgs) -> Result<()> {
    let config = ServerConfig::from_args(&args)?;
    let server = Server::bind(&config).await?;
    let addr = server
        .local_addr()
        .context("listener has no local address")?;
    info!("server listening on {addr}");
    match config.idle_timeout {
        Some(timeout) => info!(idle_timeout_secs = timeout.as_secs(), "idle timeout enabled"),
        None => info!("idle timeout disabled"),
    }

    server.run_until_ctrl_c().await.inspect_err(|err| {
        warn!(error = ?err, "server stopped with error");
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Server(args) => serve(args).await,
        Command::Client(args) => client::run(args).await,
    }
}
