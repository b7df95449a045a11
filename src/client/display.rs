//! Terminal output for the client.

use super::ClientSettings;
use crate::clock::format_unix;
use crate::protocol::{ChatMessage, MessageKind};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, line-atomic output sink.
///
/// The receive and input halves both print; the mutex keeps their lines from
/// interleaving.
#[derive(Debug)]
pub struct Console<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for Console<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    /// Print one line.
    pub fn line(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // Terminal output is best-effort.
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

impl Console<Vec<u8>> {
    /// Everything printed so far.
    pub fn contents(&self) -> String {
        let out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// How a received message is shown, if at all.
pub fn render(msg: &ChatMessage) -> Option<String> {
    match msg.kind() {
        MessageKind::Chat => Some(format!(
            "{} <{}> {}",
            format_unix(msg.sent_at()),
            msg.sender(),
            msg.body()
        )),
        MessageKind::Notification => Some(format!(
            "{} {}",
            format_unix(msg.sent_at()),
            msg.body()
        )),
        MessageKind::Error => Some(format!("[ERROR] {}", msg.body())),
        MessageKind::Connect | MessageKind::Disconnect | MessageKind::Keepalive => None,
    }
}

pub fn banner() -> &'static str {
    "\
+-------------------------------------------------------------+
|                      TCP CHAT CLIENT                        |
|                                                             |
|  * Type a message and press Enter to send it                |
|  * Use /help to list commands                               |
|  * Use /quit to leave the chat                              |
+-------------------------------------------------------------+"
}

pub fn help() -> &'static str {
    "\
=== COMMANDS ===
/help, /h     - Show this help
/quit, /q     - Leave the chat
/status, /s   - Show connection status

To send a message, type it and press Enter.
================"
}

pub fn status(settings: &ClientSettings, connected: bool) -> String {
    format!(
        "=== CLIENT STATUS ===\n\
         User: {}\n\
         Server: {}\n\
         State: {}\n\
         =====================",
        settings.username,
        settings.address(),
        if connected { "connected" } else { "disconnected" }
    )
}

pub fn unknown_command(command: &str) -> String {
    format!("Unknown command: {command}\nUse /help to list available commands.")
}
