//! chat-relay: a multi-client TCP chat relay
//!
//! Clients connect over TCP, register under a username and exchange
//! fixed-size binary frames. The server relays chat messages to everyone
//! and announces arrivals and departures.
//!
//! Features:
//! - Bounded client registry with at-most-once departure notices
//! - Per-connection writer tasks; fan-out never blocks on a slow socket
//! - Graceful shutdown on SIGINT/SIGTERM with a bounded grace period
//! - Configuration via CLI arguments or TOML file
//! - Interactive terminal client

pub mod broadcast;
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod server;

pub use config::Config;
pub use connection::{ConnState, Connection, ConnectionId};
pub use lifecycle::Lifecycle;
pub use protocol::{ChatMessage, MessageKind};
pub use registry::{ClientInfo, ClientRegistry, RegistryError, Removal};
pub use server::Server;
