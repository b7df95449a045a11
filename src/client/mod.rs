//! Interactive terminal client.
//!
//! Connects to a chat server, performs the `Connect` handshake and then runs
//! two concurrent halves: one renders incoming messages, the other reads
//! input lines, sends chat messages, handles `/` commands and keeps the
//! connection alive.

pub mod command;
pub mod display;
pub mod session;

use crate::config::DEFAULT_PORT;
use crate::error::{ERROR_CONFIG, ERROR_CONNECT, ERROR_SOCKET, ERROR_THREAD};
use crate::protocol::{DecodeError, Username, UsernameError};
use clap::Parser;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

pub use command::{parse_input, Command, Input};
pub use display::{render, Console};
pub use session::Session;

pub const DEFAULT_SERVER: &str = "127.0.0.1";

/// Interval between keepalive frames
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// How long to wait for the server's reply to `Connect`
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Command-line arguments for the chat client
#[derive(Parser, Debug)]
#[command(name = "chat-client")]
#[command(version)]
#[command(about = "Terminal client for the chat relay", long_about = None)]
pub struct ClientArgs {
    /// Name shown to other users (letters, digits and '_', at most 31)
    pub username: String,

    /// Server IP address
    #[arg(default_value = DEFAULT_SERVER)]
    pub server_ip: String,

    /// Server port
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    #[error("invalid server address '{0}'")]
    InvalidAddress(String),

    #[error("invalid port {0}")]
    InvalidPort(u16),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server rejected connection: {0}")]
    Rejected(String),

    #[error("no reply from server within {:?}", HANDSHAKE_TIMEOUT)]
    HandshakeTimeout,

    #[error("server closed the connection")]
    ConnectionClosed,

    #[error("malformed reply from server: {0}")]
    Decode(#[from] DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl ClientError {
    pub fn code(&self) -> i32 {
        match self {
            ClientError::InvalidUsername(_) | ClientError::InvalidPort(_) => ERROR_CONFIG,
            ClientError::InvalidAddress(_)
            | ClientError::Connect { .. }
            | ClientError::Rejected(_)
            | ClientError::HandshakeTimeout
            | ClientError::ConnectionClosed
            | ClientError::Decode(_) => ERROR_CONNECT,
            ClientError::Io(_) => ERROR_SOCKET,
            ClientError::Runtime(_) => ERROR_THREAD,
        }
    }
}

/// Validated connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub username: Username,
    pub server_ip: IpAddr,
    pub port: u16,
}

impl ClientSettings {
    pub fn new(username: &str, server_ip: &str, port: u16) -> Result<Self, ClientError> {
        let username = Username::parse(username)?;
        let server_ip = server_ip
            .parse()
            .map_err(|_| ClientError::InvalidAddress(server_ip.to_string()))?;
        if port == 0 {
            return Err(ClientError::InvalidPort(port));
        }
        Ok(Self {
            username,
            server_ip,
            port,
        })
    }

    pub fn from_args(args: &ClientArgs) -> Result<Self, ClientError> {
        Self::new(&args.username, &args.server_ip, args.port)
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = ClientArgs::try_parse_from(["chat-client", "alice"]).unwrap();
        assert_eq!(args.server_ip, "127.0.0.1");
        assert_eq!(args.port, 8080);

        let settings = ClientSettings::from_args(&args).unwrap();
        assert_eq!(settings.address(), "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_args_required_username() {
        assert!(ClientArgs::try_parse_from(["chat-client"]).is_err());
    }

    #[test]
    fn test_settings_validation() {
        let err = ClientSettings::new("bad name", "127.0.0.1", 8080).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUsername(_)));
        assert_eq!(err.code(), ERROR_CONFIG);

        let err = ClientSettings::new("bob", "localhost", 8080).unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress(_)));
        assert_eq!(err.code(), ERROR_CONNECT);

        let err = ClientSettings::new("bob", "10.0.0.1", 0).unwrap_err();
        assert!(matches!(err, ClientError::InvalidPort(0)));

        let ok = ClientSettings::new("bob", "::1", 9000).unwrap();
        assert_eq!(ok.address(), "[::1]:9000".parse().unwrap());
    }
}
