//! chat-server: relay chat messages between TCP clients
//!
//! ```text
//! chat-server [PORT] [--host H] [--max-clients N] [--config FILE] [--log-level L]
//! ```
//!
//! SIGINT or SIGTERM stops the server gracefully. On a fatal error the
//! process exits with a nonzero status identifying the failing step.

use chat_relay::config::Config;
use chat_relay::error::{exit_status, ServerError, ERROR_CONFIG};
use chat_relay::lifecycle::{self, Lifecycle};
use chat_relay::{logging, Server};
use std::process;
use tracing::{error, info};

fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("chat-server: {e}");
            process::exit(exit_status(ERROR_CONFIG));
        }
    };

    logging::init(&config.log_level);
    lifecycle::ignore_sigpipe();

    info!(
        host = %config.host,
        port = config.port,
        max_clients = config.max_clients,
        "Starting chat server"
    );

    if let Err(e) = run(config) {
        error!(error = %e, "Server failed");
        process::exit(exit_status(e.code()));
    }
}

fn run(config: Config) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;

    runtime.block_on(async {
        let lifecycle = Lifecycle::new();
        lifecycle::spawn_signal_listener(lifecycle.clone());
        Server::new(config, lifecycle).run().await
    })
}
