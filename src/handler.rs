//! Per-connection handler.
//!
//! Drives one client through `Handshaking -> Active -> Closing -> Closed`
//! (or straight from `Handshaking` to `Closed` on rejection). The handler
//! owns the read side of the socket; all writes go through the connection's
//! mailbox and its writer task.

use crate::broadcast::{arrival_notice, SERVER_FULL, SHUTTING_DOWN, WELCOME};
use crate::connection::{spawn_writer, ConnState, Connection, ConnectionId, MAILBOX_CAPACITY};
use crate::protocol::{ChatMessage, DecodeError, FrameCodec, MessageKind, Username, SYSTEM_SENDER};
use crate::registry::{ClientRegistry, RegistryError};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;

const INVALID_USERNAME: &str = "Invalid username";
const EXPECTED_CONNECT: &str = "Expected connect message";
const MALFORMED: &str = "Malformed message";
const HANDSHAKE_TIMEOUT: &str = "Handshake timed out";

enum Flow {
    Continue,
    Close,
}

pub struct ConnectionHandler {
    id: ConnectionId,
    peer: SocketAddr,
    registry: Arc<ClientRegistry>,
    handshake_timeout: Duration,
    /// Cancelled on server shutdown, or by the registry when the client
    /// stops draining its mailbox.
    worker: CancellationToken,
    state: ConnState,
}

impl ConnectionHandler {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        registry: Arc<ClientRegistry>,
        handshake_timeout: Duration,
        worker: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            registry,
            handshake_timeout,
            worker,
            state: ConnState::Handshaking,
        }
    }

    fn transition(&mut self, next: ConnState) {
        if !self.state.can_transition_to(next) {
            warn!(conn_id = %self.id, from = %self.state, to = %next, "Rejected state transition");
            return;
        }
        trace!(conn_id = %self.id, from = %self.state, to = %next, "State change");
        self.state = next;
    }

    /// Serve the connection to completion. Returns the final state.
    pub async fn run(mut self, stream: TcpStream) -> ConnState {
        if let Err(e) = stream.set_nodelay(true) {
            trace!(conn_id = %self.id, error = %e, "Failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, FrameCodec);

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let connection = Connection::new(self.id, tx);
        let writer = spawn_writer(self.id, write_half, rx, self.worker.clone());

        if let Some(username) = self.handshake(&mut reader, &connection).await {
            if self.register(&connection, &username) {
                self.transition(ConnState::Active);
                self.welcome(&connection, &username);
                self.serve(&mut reader, &connection, &username).await;

                self.transition(ConnState::Closing);
                self.registry.remove(self.id);
            }
        }
        self.transition(ConnState::Closed);

        // The writer flushes what is queued once every sender is gone.
        drop(connection);
        drop(reader);
        let _ = writer.await;

        debug!(conn_id = %self.id, peer = %self.peer, "Connection closed");
        self.state
    }

    /// Wait for the `Connect` frame and validate it.
    async fn handshake(
        &self,
        reader: &mut FrameReader,
        connection: &Connection,
    ) -> Option<Username> {
        let first = tokio::select! {
            _ = self.worker.cancelled() => {
                debug!(conn_id = %self.id, "Shutdown during handshake");
                return None;
            }
            first = tokio::time::timeout(self.handshake_timeout, reader.next()) => first,
        };

        let msg = match first {
            Err(_) => {
                debug!(conn_id = %self.id, peer = %self.peer, "Handshake timed out");
                reject(connection, HANDSHAKE_TIMEOUT);
                return None;
            }
            Ok(None) => {
                debug!(conn_id = %self.id, "Peer closed before handshake");
                return None;
            }
            Ok(Some(Err(e))) => {
                debug!(conn_id = %self.id, error = %e, "Read error during handshake");
                return None;
            }
            Ok(Some(Ok(Err(e)))) => {
                warn!(conn_id = %self.id, error = %e, "Malformed handshake");
                reject(connection, MALFORMED);
                return None;
            }
            Ok(Some(Ok(Ok(msg)))) => msg,
        };

        if msg.kind() != MessageKind::Connect {
            warn!(conn_id = %self.id, kind = %msg.kind(), "Expected connect message");
            reject(connection, EXPECTED_CONNECT);
            return None;
        }

        match Username::parse(msg.sender()) {
            Ok(username) => Some(username),
            Err(e) => {
                warn!(conn_id = %self.id, username = msg.sender(), error = %e, "Invalid username");
                reject(connection, INVALID_USERNAME);
                None
            }
        }
    }

    fn register(&self, connection: &Connection, username: &Username) -> bool {
        let result = self.registry.add(
            connection.clone(),
            self.peer,
            username.clone(),
            self.worker.clone(),
        );

        match result {
            Ok(_) => true,
            Err(RegistryError::Full) => {
                warn!(conn_id = %self.id, username = %username, "Server full, rejecting client");
                reject(connection, SERVER_FULL);
                false
            }
            Err(RegistryError::Closed) => {
                reject(connection, SHUTTING_DOWN);
                false
            }
            Err(e @ RegistryError::AlreadyRegistered(_)) => {
                warn!(conn_id = %self.id, error = %e, "Registration failed");
                false
            }
        }
    }

    fn welcome(&self, connection: &Connection, username: &Username) {
        connection.send(ChatMessage::notification(WELCOME).encode());
        let delivered = self
            .registry
            .broadcast(&arrival_notice(username.as_str()), Some(self.id));
        info!(conn_id = %self.id, username = %username, delivered, "Client joined");
    }

    async fn serve(&self, reader: &mut FrameReader, connection: &Connection, username: &Username) {
        loop {
            tokio::select! {
                _ = self.worker.cancelled() => {
                    debug!(conn_id = %self.id, "Worker cancelled");
                    return;
                }
                _ = connection.closed() => {
                    debug!(conn_id = %self.id, "Writer gone");
                    return;
                }
                frame = reader.next() => match frame {
                    None => {
                        debug!(conn_id = %self.id, username = %username, "Peer closed connection");
                        return;
                    }
                    Some(Err(e)) => {
                        debug!(conn_id = %self.id, error = %e, "Read error");
                        return;
                    }
                    Some(Ok(Err(e))) => self.discard(e),
                    Some(Ok(Ok(msg))) => {
                        if let Flow::Close = self.dispatch(msg, connection, username) {
                            return;
                        }
                    }
                }
            }

            if !self.registry.is_active(self.id) {
                debug!(conn_id = %self.id, "Client deactivated");
                return;
            }
        }
    }

    fn dispatch(&self, msg: ChatMessage, connection: &Connection, username: &Username) -> Flow {
        match msg.kind() {
            MessageKind::Chat => {
                let relayed = ChatMessage::chat(username.as_str(), msg.body());
                let delivered = self.registry.broadcast(&relayed, None);
                debug!(conn_id = %self.id, username = %username, delivered, "Chat relayed");
                Flow::Continue
            }
            MessageKind::Disconnect => {
                let delivered = self.registry.announce_departure(self.id);
                info!(conn_id = %self.id, username = %username, ?delivered, "Client said goodbye");
                Flow::Close
            }
            MessageKind::Keepalive => {
                connection.send(ChatMessage::keepalive(SYSTEM_SENDER).encode());
                Flow::Continue
            }
            other => {
                debug!(conn_id = %self.id, kind = %other, "Ignoring unexpected message");
                Flow::Continue
            }
        }
    }

    fn discard(&self, error: DecodeError) {
        warn!(conn_id = %self.id, error = %error, "Discarding malformed frame");
    }
}

fn reject(connection: &Connection, reason: &str) {
    connection.send(ChatMessage::error(reason).encode());
}
