//! TCP listener and server lifecycle.
//!
//! Binds the listening socket, accepts connections and spawns a
//! [`ConnectionHandler`] task for each one, and runs the graceful shutdown
//! sequence once the [`Lifecycle`] is stopped.

use crate::clock::format_timestamp;
use crate::config::Config;
use crate::connection::{ConnState, ConnectionId};
use crate::error::ServerError;
use crate::handler::ConnectionHandler;
use crate::lifecycle::Lifecycle;
use crate::registry::ClientRegistry;
use chrono::Utc;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<ClientRegistry>,
    lifecycle: Lifecycle,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, lifecycle: Lifecycle) -> Self {
        let registry = Arc::new(ClientRegistry::new(config.max_clients));

        Server {
            config,
            registry,
            lifecycle,
        }
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Create the listening socket. Must be called from within a tokio
    /// runtime.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.listen_address();
        let addr = address
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ServerError::Resolve(address.clone()))?;

        let listener = create_listener(addr, self.config.backlog)?;
        TcpListener::from_std(listener).map_err(ServerError::Listen)
    }

    /// Bind and serve until the lifecycle is stopped.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections on `listener` until the lifecycle is stopped, then
    /// shut down gracefully.
    pub async fn serve(self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!(address = %addr, max_clients = self.config.max_clients, "Server listening"),
            Err(e) => warn!(error = %e, "Server listening on unknown address"),
        }
        log_stats(&self.registry, &self.lifecycle);

        let stats = self.config.stats_interval.map(|every| {
            tokio::spawn(stats_task(
                Arc::clone(&self.registry),
                self.lifecycle.clone(),
                every,
            ))
        });

        let mut handlers: JoinSet<ConnState> = JoinSet::new();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                _ = self.lifecycle.stopped() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        let id = ConnectionId::new(next_id);
                        debug!(conn_id = %id, peer = %peer, "New connection");

                        let handler = ConnectionHandler::new(
                            id,
                            peer,
                            Arc::clone(&self.registry),
                            self.config.handshake_timeout,
                            self.lifecycle.token().child_token(),
                        );
                        handlers.spawn(handler.run(stream));
                    }
                    Err(e) => {
                        if !self.lifecycle.is_running() {
                            break;
                        }
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection handler panicked");
                        }
                    }
                }
            }
        }

        drop(listener);
        self.shutdown(handlers).await;
        if let Some(stats) = stats {
            stats.abort();
        }
    }

    async fn shutdown(&self, mut handlers: JoinSet<ConnState>) {
        self.lifecycle.request_stop();
        info!(handlers = handlers.len(), "Shutting down");

        let closed = self.registry.shutdown();
        info!(clients = closed.len(), "Closed client connections");

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = handlers.len(),
                grace = ?self.config.shutdown_grace,
                "Aborting handlers after grace period"
            );
            handlers.abort_all();
            while handlers.join_next().await.is_some() {}
        }

        log_stats(&self.registry, &self.lifecycle);
        info!("Server stopped");
    }
}

/// Create a listening socket with SO_REUSEADDR and the given backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> Result<std::net::TcpListener, ServerError> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(ServerError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(ServerError::Socket)?;
    socket.set_nonblocking(true).map_err(ServerError::Socket)?;
    socket
        .bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(ServerError::Listen)?;

    Ok(socket.into())
}

/// Background task that periodically reports server statistics
async fn stats_task(registry: Arc<ClientRegistry>, lifecycle: Lifecycle, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately; startup already logged a report.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = lifecycle.stopped() => return,
            _ = interval.tick() => log_stats(&registry, &lifecycle),
        }
    }
}

/// Log the run state and every active client.
pub fn log_stats(registry: &ClientRegistry, lifecycle: &Lifecycle) {
    let clients = registry.snapshot();
    info!(
        state = if lifecycle.is_running() { "running" } else { "stopped" },
        clients = clients.len(),
        capacity = registry.capacity(),
        "Server statistics"
    );

    for client in &clients {
        info!(
            conn_id = %client.id,
            username = %client.username,
            peer = %client.peer_address,
            since = %format_timestamp(client.connected_at.with_timezone(&Utc)),
            "Active client"
        );
    }
}
