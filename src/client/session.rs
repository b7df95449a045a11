//! Client connection session.

use super::command::{parse_input, Command, Input};
use super::display::{self, render, Console};
use super::{ClientError, ClientSettings, HANDSHAKE_TIMEOUT, KEEPALIVE_INTERVAL};
use crate::protocol::{ChatMessage, FrameCodec, MessageKind};
use futures_util::{SinkExt, StreamExt};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// An open connection to the chat server.
pub struct Session {
    settings: ClientSettings,
    reader: FrameReader,
    writer: FrameWriter,
    keepalive: Duration,
}

impl Session {
    /// Open the TCP connection. No frames are exchanged yet.
    pub async fn connect(settings: ClientSettings) -> Result<Self, ClientError> {
        let addr = settings.address();
        info!(server = %addr, "Connecting");

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            settings,
            reader: FramedRead::new(read_half, FrameCodec),
            writer: FramedWrite::new(write_half, FrameCodec),
            keepalive: KEEPALIVE_INTERVAL,
        })
    }

    /// Override the keepalive period.
    pub fn with_keepalive(mut self, every: Duration) -> Self {
        self.keepalive = every;
        self
    }

    /// Send `Connect` and wait for the server's answer.
    ///
    /// Returns the welcome notification, or [`ClientError::Rejected`] with
    /// the server's reason.
    pub async fn handshake(&mut self) -> Result<ChatMessage, ClientError> {
        let hello = ChatMessage::connect(self.settings.username.as_str());
        self.writer.send(&hello).await?;

        let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.reader.next())
            .await
            .map_err(|_| ClientError::HandshakeTimeout)?;

        match reply {
            None => Err(ClientError::ConnectionClosed),
            Some(Err(e)) => Err(ClientError::Io(e)),
            Some(Ok(Err(e))) => Err(ClientError::Decode(e)),
            Some(Ok(Ok(msg))) if msg.kind() == MessageKind::Error => {
                Err(ClientError::Rejected(msg.body().to_string()))
            }
            Some(Ok(Ok(msg))) => Ok(msg),
        }
    }

    /// Run until the user quits, `input` ends, `stop` fires or the server
    /// goes away.
    pub async fn run<I, W>(
        self,
        input: I,
        console: Console<W>,
        stop: CancellationToken,
    ) -> Result<(), ClientError>
    where
        I: AsyncBufRead + Unpin,
        W: Write + Send + 'static,
    {
        let Session {
            settings,
            reader,
            mut writer,
            keepalive,
        } = self;

        let connected = Arc::new(AtomicBool::new(true));
        let mut receive = tokio::spawn(receive_loop(
            reader,
            console.clone(),
            Arc::clone(&connected),
        ));

        let mut input_half = InputHalf {
            settings: &settings,
            writer: &mut writer,
            console: &console,
            connected: &connected,
        };

        tokio::select! {
            _ = &mut receive => {
                console.line("Server closed the connection.");
                Ok(())
            }
            result = input_half.run(input, keepalive, &stop) => {
                receive.abort();
                result
            }
        }
    }
}

async fn receive_loop<W: Write>(
    mut reader: FrameReader,
    console: Console<W>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Ok(msg)) => {
                if let Some(line) = render(&msg) {
                    console.line(&line);
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Discarding malformed frame"),
            Err(e) => {
                debug!(error = %e, "Receive failed");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
}

struct InputHalf<'a, W> {
    settings: &'a ClientSettings,
    writer: &'a mut FrameWriter,
    console: &'a Console<W>,
    connected: &'a AtomicBool,
}

impl<W: Write> InputHalf<'_, W> {
    async fn run<I>(
        &mut self,
        input: I,
        keepalive: Duration,
        stop: &CancellationToken,
    ) -> Result<(), ClientError>
    where
        I: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut ticker = tokio::time::interval_at(Instant::now() + keepalive, keepalive);

        loop {
            tokio::select! {
                _ = stop.cancelled() => return self.leave().await,
                _ = ticker.tick() => {
                    let ping = ChatMessage::keepalive(self.username());
                    self.send(ping).await?;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        // End of input behaves like /quit.
                        return self.leave().await;
                    };
                    match parse_input(&line) {
                        Input::Empty => {}
                        Input::Chat(text) => {
                            let msg = ChatMessage::chat(self.username(), text);
                            self.send(msg).await?;
                        }
                        Input::Command(Command::Quit) => return self.leave().await,
                        Input::Command(Command::Help) => self.console.line(display::help()),
                        Input::Command(Command::Status) => {
                            let connected = self.connected.load(Ordering::Acquire);
                            self.console.line(&display::status(self.settings, connected));
                        }
                        Input::Command(Command::Unknown(command)) => {
                            self.console.line(&display::unknown_command(&command));
                        }
                    }
                }
            }
        }
    }

    fn username(&self) -> &str {
        self.settings.username.as_str()
    }

    async fn send(&mut self, msg: ChatMessage) -> Result<(), ClientError> {
        self.writer.send(&msg).await?;
        Ok(())
    }

    async fn leave(&mut self) -> Result<(), ClientError> {
        self.console.line("Leaving the chat...");
        let goodbye = ChatMessage::disconnect(self.username());
        // The server may already be gone; leaving is best-effort.
        if let Err(e) = self.writer.send(&goodbye).await {
            debug!(error = %e, "Failed to send disconnect");
        }
        Ok(())
    }
}
