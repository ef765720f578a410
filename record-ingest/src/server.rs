use std::{
    collections::HashSet,
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    select,
    sync::Mutex,
    task::{JoinError, JoinSet},
};
use tracing::{error, info, warn};

use crate::{
    connection::{self, Outcome},
    protocol::{DEFAULT_PORT, DEFAULT_READ_TIMEOUT},
    store::DurableStore,
};

/// Listener settings, filled from the `serve` command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub read_timeout: Duration,
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            data_dir: PathBuf::from("data"),
            read_timeout: DEFAULT_READ_TIMEOUT,
            backlog: 128,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Binds the listening socket with address reuse enabled so a restart is
    /// not blocked by connections of a previous run still in `TIME_WAIT`.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let socket = if config.listen.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("failed to create listening socket")?;

        socket
            .set_reuseaddr(true)
            .context("failed to enable address reuse")?;
        socket
            .bind(config.listen)
            .with_context(|| format!("failed to bind {}", config.listen))?;
        let listener = socket
            .listen(config.backlog)
            .with_context(|| format!("failed to listen on {}", config.listen))?;

        let store = DurableStore::open(&config.data_dir);
        Ok(Self::new(listener, store, config.read_timeout))
    }

    pub fn new(listener: TcpListener, store: DurableStore, read_timeout: Duration) -> Self {
        Self {
            listener,
            state: Arc::new(ServerState::new(store, read_timeout)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store_path(&self) -> &Path {
        self.state.store().path()
    }

    /// Accepts connections until `shutdown` resolves, then stops accepting
    /// and waits for every in-flight connection to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state, &mut handlers);
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    log_handler_exit(joined);
                }
            }
        }

        drop(listener);
        info!(in_flight = handlers.len(), "stopped accepting connections");
        while let Some(joined) = handlers.join_next().await {
            log_handler_exit(joined);
        }
        info!("server stopped");

        Ok(())
    }

    /// Runs until SIGINT, or SIGTERM on Unix.
    pub async fn run_until_signal(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = interrupt => info!("interrupt received, shutting down"),
        _ = terminate => info!("terminate signal received, shutting down"),
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
    handlers: &mut JoinSet<Outcome>,
) {
    match result {
        Ok((stream, peer)) => {
            let state = Arc::clone(state);
            handlers.spawn(async move {
                connection::handle_connection(stream, peer, &state).await
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn log_handler_exit(joined: Result<Outcome, JoinError>) {
    if let Err(err) = joined {
        error!(error = ?err, "connection handler did not finish");
    }
}

/// Process-lifetime state shared by all connection handlers.
pub(crate) struct ServerState {
    store: DurableStore,
    sessions: Mutex<HashSet<SocketAddr>>,
    read_timeout: Duration,
}

impl ServerState {
    pub(crate) fn new(store: DurableStore, read_timeout: Duration) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashSet::new()),
            read_timeout,
        }
    }

    pub(crate) fn store(&self) -> &DurableStore {
        &self.store
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Adds a peer to the active set and returns the new count.
    pub(crate) async fn register_session(&self, peer: SocketAddr) -> usize {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(peer);
        sessions.len()
    }

    /// Removes a peer from the active set and returns the remaining count.
    pub(crate) async fn remove_session(&self, peer: SocketAddr) -> usize {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&peer);
        sessions.len()
    }

    #[cfg(test)]
    pub(crate) async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
