//! Process-level errors and exit codes.
//!
//! Each fatal error maps to a small negative code; the binaries exit with its
//! absolute value.

use crate::config::ConfigError;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

pub const ERROR_SOCKET: i32 = -1;
pub const ERROR_BIND: i32 = -2;
pub const ERROR_LISTEN: i32 = -3;
pub const ERROR_ACCEPT: i32 = -4;
pub const ERROR_CONNECT: i32 = -5;
pub const ERROR_THREAD: i32 = -6;
pub const ERROR_MEMORY: i32 = -7;
pub const ERROR_CONFIG: i32 = -8;

/// Fatal server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot resolve listen address '{0}'")]
    Resolve(String),

    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl ServerError {
    pub fn code(&self) -> i32 {
        match self {
            ServerError::Config(_) => ERROR_CONFIG,
            ServerError::Resolve(_) | ServerError::Bind { .. } => ERROR_BIND,
            ServerError::Socket(_) => ERROR_SOCKET,
            ServerError::Listen(_) => ERROR_LISTEN,
            ServerError::Runtime(_) => ERROR_THREAD,
        }
    }
}

/// Map an internal code to a process exit status.
pub fn exit_status(code: i32) -> i32 {
    code.abs()
}
