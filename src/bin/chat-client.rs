//! chat-client: interactive terminal client
//!
//! ```text
//! chat-client <USERNAME> [SERVER_IP] [PORT]
//! ```

use chat_relay::client::display::{self, Console};
use chat_relay::client::{ClientArgs, ClientError, ClientSettings, Session};
use chat_relay::error::exit_status;
use chat_relay::lifecycle::{self, Lifecycle};
use chat_relay::logging;
use clap::Parser;
use std::process;
use tokio::io::BufReader;

fn main() {
    let args = ClientArgs::parse();
    logging::init(&args.log_level);
    lifecycle::ignore_sigpipe();

    if let Err(e) = run(&args) {
        eprintln!("chat-client: {e}");
        process::exit(exit_status(e.code()));
    }
    println!("\nClient finished.");
}

fn run(args: &ClientArgs) -> Result<(), ClientError> {
    let settings = ClientSettings::from_args(args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ClientError::Runtime)?;

    let result = runtime.block_on(async {
        let mut session = Session::connect(settings).await?;
        let welcome = session.handshake().await?;

        let console = Console::new(std::io::stdout());
        console.line(display::banner());
        if let Some(line) = display::render(&welcome) {
            console.line(&line);
        }

        let lifecycle = Lifecycle::new();
        lifecycle::spawn_signal_listener(lifecycle.clone());

        let input = BufReader::new(tokio::io::stdin());
        session.run(input, console, lifecycle.token().clone()).await
    });

    // The stdin reader sits on a blocking thread that may never return.
    runtime.shutdown_background();
    result
}
