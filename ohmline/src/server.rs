//! TCP front end: the accept loop and one handler task per connection.
//!
//! The server moves through three phases, each logged: accepting, draining
//! and stopped. It stops accepting when the registry reports a passed
//! shutdown vote or when the caller's shutdown future completes, then waits
//! for every handler to finish.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    select,
    sync::{mpsc, watch},
    task::{JoinError, JoinSet},
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    framer::{FrameError, LineReader, write_line},
    registry::{ConnectionHandle, Outbound, Registry},
    session::Session,
};

pub const BANNER: &str = "Welcome to the server! Type 'help' for available commands.";
pub const IDLE_NOTICE: &str = "Idle timeout, closing connection.";
/// Sent when the process is stopped from outside, and to connections that
/// arrive while the server is already going down.
pub const TERMINATE_NOTICE: &str = "Server is shutting down.";

pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    idle_timeout: Option<Duration>,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, config.idle_timeout))
    }

    pub fn new(listener: TcpListener, idle_timeout: Option<Duration>) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
            idle_timeout,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Serves until a shutdown vote passes.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            registry,
            idle_timeout,
        } = self;
        tokio::pin!(shutdown);
        let voted_down = voted_down(registry.shutdown_signal());
        tokio::pin!(voted_down);
        let mut handlers = JoinSet::new();

        info!("server accepting connections");
        loop {
            select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    registry.terminate(TERMINATE_NOTICE).await;
                    break;
                }
                _ = &mut voted_down => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, idle_timeout, &mut handlers);
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    log_join_result(joined);
                }
            }
        }

        drop(listener);
        info!(handlers = handlers.len(), "server draining");
        while let Some(joined) = handlers.join_next().await {
            log_join_result(joined);
        }
        info!("server stopped");

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn voted_down(mut signal: watch::Receiver<bool>) {
    // The sender lives in the registry, which outlives the accept loop.
    let _ = signal.wait_for(|terminating| *terminating).await;
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
    idle_timeout: Option<Duration>,
    handlers: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => {
            let registry = Arc::clone(registry);
            handlers.spawn(async move {
                if let Err(err) = handle_connection(stream, peer, registry, idle_timeout).await {
                    warn!(peer = %peer, error = ?err, "client connection closed with error");
                }
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn log_join_result(result: Result<(), JoinError>) {
    if let Err(err) = result {
        warn!(error = ?err, "connection handler panicked");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    let (handle, mut inbox) = ConnectionHandle::new(registry.next_id(), peer);
    let id = handle.id();
    let (reader, mut writer) = stream.into_split();
    let mut reader = LineReader::new(reader);

    if registry.add(handle.clone()).await.is_err() {
        debug!(peer = %peer, "refusing connection during shutdown");
        write_line(&mut writer, TERMINATE_NOTICE).await?;
        return Ok(());
    }
    info!(conn = id, peer = %peer, "client connected");

    let mut session = Session::new(handle);
    let result = serve(
        &registry,
        &mut session,
        &mut reader,
        &mut writer,
        &mut inbox,
        idle_timeout,
    )
    .await;

    registry.remove(id).await;
    if let Err(err) = writer.shutdown().await {
        debug!(conn = id, error = ?err, "failed to shut down writer");
    }
    info!(conn = id, peer = %peer, "client disconnected");

    result
}

enum Incoming {
    Line(String),
    Closed,
    Idle,
}

async fn serve<R, W>(
    registry: &Registry,
    session: &mut Session,
    reader: &mut LineReader<R>,
    writer: &mut W,
    inbox: &mut mpsc::UnboundedReceiver<Outbound>,
    idle_timeout: Option<Duration>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(writer, BANNER).await?;
    let mut deadline = idle_timeout.map(|timeout| Instant::now() + timeout);

    loop {
        select! {
            // Drain queued lines before reading the next command.
            biased;

            outbound = inbox.recv() => match outbound {
                Some(Outbound::Line(line)) => write_line(writer, &line).await?,
                Some(Outbound::Close) | None => break,
            },
            incoming = next_line(reader, deadline) => match incoming? {
                Incoming::Line(line) => {
                    deadline = idle_timeout.map(|timeout| Instant::now() + timeout);
                    if let Some(reply) = session.handle_line(registry, &line).await {
                        write_line(writer, &reply).await?;
                    }
                }
                Incoming::Closed => break,
                Incoming::Idle => {
                    info!(conn = session.id(), "closing idle connection");
                    write_line(writer, IDLE_NOTICE).await?;
                    break;
                }
            },
        }
    }

    Ok(())
}

async fn next_line<R>(
    reader: &mut LineReader<R>,
    deadline: Option<Instant>,
) -> Result<Incoming, FrameError>
where
    R: AsyncRead + Unpin,
{
    let line = match deadline {
        Some(deadline) => match timeout_at(deadline, reader.read_line()).await {
            Ok(line) => line?,
            Err(_) => return Ok(Incoming::Idle),
        },
        None => reader.read_line().await?,
    };
    Ok(line.map_or(Incoming::Closed, Incoming::Line))
}
