//! Per-connection state and outbound plumbing.
//!
//! Each accepted socket is split in two. The handler task owns the read half
//! and drives the [`ConnState`] machine; a writer task owns the write half and
//! drains a bounded mailbox of encoded frames. Anything that wants to talk
//! to the client, including the broadcast engine, enqueues into the mailbox
//! through a [`Connection`] and never touches the socket directly.

use bytes::Bytes;
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Frames a client may have queued before it counts as unreachable.
pub const MAILBOX_CAPACITY: usize = 64;

/// Server-assigned identity of one accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the client's `Connect` frame.
    Handshaking,
    /// Registered; relaying traffic.
    Active,
    /// Deregistering.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnState) -> bool {
        matches!(
            (self, next),
            (ConnState::Handshaking, ConnState::Active)
                | (ConnState::Handshaking, ConnState::Closed)
                | (ConnState::Active, ConnState::Closing)
                | (ConnState::Closing, ConnState::Closed)
        )
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Handshaking => "handshaking",
            ConnState::Active => "active",
            ConnState::Closing => "closing",
            ConnState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Sending side of a client's outbound mailbox.
///
/// Cloning is cheap. The mailbox closes once every clone is dropped, at which
/// point the writer task flushes what is queued and half-closes the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Bytes>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an encoded frame. Never blocks.
    ///
    /// Returns `false` if the writer task is gone or the mailbox is full,
    /// i.e. the peer has stopped reading.
    pub fn send(&self, frame: Bytes) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(conn_id = %self.id, "Mailbox full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the writer task has stopped accepting frames.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Resolves once the writer task has stopped accepting frames.
    pub async fn closed(&self) {
        self.outbound.closed().await
    }
}

/// Spawn the task that owns the socket's write half.
pub fn spawn_writer<W>(
    id: ConnectionId,
    writer: W,
    mailbox: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(write_loop(id, writer, mailbox, cancel))
}

async fn write_loop<W: AsyncWrite + Unpin>(
    id: ConnectionId,
    mut writer: W,
    mut mailbox: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!(conn_id = %id, "Writer cancelled");
                break;
            }
            frame = mailbox.recv() => frame,
        };

        let Some(frame) = frame else {
            trace!(conn_id = %id, "Mailbox closed");
            break;
        };

        // A peer that stops reading parks the write; cancellation must
        // still get through.
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!(conn_id = %id, "Writer cancelled mid-frame");
                break;
            }
            written = writer.write_all(&frame) => written,
        };
        if let Err(e) = written {
            debug!(conn_id = %id, error = %e, "Write failed");
            break;
        }
    }

    // Refuse further frames before the socket goes away so senders notice.
    mailbox.close();
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_transitions() {
        use ConnState::*;

        assert!(Handshaking.can_transition_to(Active));
        assert!(Handshaking.can_transition_to(Closed));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));

        assert!(!Handshaking.can_transition_to(Closing));
        assert!(!Active.can_transition_to(Closed));
        assert!(!Active.can_transition_to(Handshaking));
        assert!(!Closing.can_transition_to(Active));
        for next in [Handshaking, Active, Closing, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let conn = Connection::new(ConnectionId::new(7), tx);

        assert!(conn.send(Bytes::from_static(b"frame")));
        assert!(!conn.is_closed());

        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.send(Bytes::from_static(b"frame")));
    }

    #[tokio::test]
    async fn test_writer_drains_then_exits() {
        let first = Bytes::from_static(b"first frame");
        let second = Bytes::from_static(b"second frame");
        let mock = tokio_test::io::Builder::new()
            .write(&first)
            .write(&second)
            .build();

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let conn = Connection::new(ConnectionId::new(1), tx);
        let writer = spawn_writer(conn.id(), mock, rx, CancellationToken::new());

        assert!(conn.send(first.clone()));
        assert!(conn.send(second.clone()));
        drop(conn);

        tokio_test::assert_ok!(writer.await);
    }

    #[tokio::test]
    async fn test_writer_stops_on_cancel() {
        let mock = tokio_test::io::Builder::new().build();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let conn = Connection::new(ConnectionId::new(2), tx);
        let cancel = CancellationToken::new();
        let writer = spawn_writer(conn.id(), mock, rx, cancel.clone());

        cancel.cancel();
        tokio_test::assert_ok!(writer.await);
        assert!(conn.is_closed());
        assert!(!conn.send(Bytes::from_static(b"late")));
    }

    #[tokio::test]
    async fn test_writer_error_closes_mailbox() {
        let mock = tokio_test::io::Builder::new()
            .write_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .build();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let conn = Connection::new(ConnectionId::new(3), tx);
        let writer = spawn_writer(conn.id(), mock, rx, CancellationToken::new());

        assert!(conn.send(Bytes::from_static(b"doomed")));
        tokio_test::assert_ok!(writer.await);
        assert!(conn.is_closed());
    }

    #[test]
    fn test_send_to_full_mailbox() {
        let (tx, mut rx) = mpsc::channel(2);
        let conn = Connection::new(ConnectionId::new(8), tx);

        assert!(conn.send(Bytes::from_static(b"one")));
        assert!(conn.send(Bytes::from_static(b"two")));
        assert!(!conn.send(Bytes::from_static(b"three")));
        assert!(!conn.is_closed());

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"one"));
        assert!(conn.send(Bytes::from_static(b"three")));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_write() {
        // The peer end is kept open but never read, so the pipe fills up.
        let (socket, _peer) = tokio::io::duplex(16);
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let conn = Connection::new(ConnectionId::new(9), tx);
        let cancel = CancellationToken::new();
        let writer = spawn_writer(conn.id(), socket, rx, cancel.clone());

        assert!(conn.send(Bytes::from(vec![b'x'; 1024])));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!writer.is_finished());
        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(conn.is_closed());
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "#42");
        assert_eq!(ConnectionId::new(42).get(), 42);
    }
}
