//! Server run state, signal handling and process-wide setup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared run flag plus the root cancellation token.
///
/// Every connection's token is a child of `token`, so a stop request reaches
/// the accept loop and all handlers at once.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    running: Arc<AtomicBool>,
    token: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            token: CancellationToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the server to stop. Idempotent.
    pub fn request_stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Stop requested");
        }
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task that turns SIGINT/SIGTERM into [`Lifecycle::request_stop`].
pub fn spawn_signal_listener(lifecycle: Lifecycle) {
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_shutdown_signal() => {
                if let Err(e) = result {
                    error!(error = %e, "Error waiting for shutdown signal");
                    return;
                }
                info!("Shutdown signal received");
                lifecycle.request_stop();
            }
            _ = lifecycle.stopped() => {}
        }
    });
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

/// Writes to a dead peer must surface as `EPIPE`, not kill the process.
pub fn ignore_sigpipe() {
    // SAFETY: installing SIG_IGN has no preconditions.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_stop() {
        let lifecycle = Lifecycle::new();
        let clone = lifecycle.clone();
        assert!(lifecycle.is_running());
        assert!(!lifecycle.token().is_cancelled());

        clone.request_stop();
        assert!(!lifecycle.is_running());
        assert!(lifecycle.token().is_cancelled());

        clone.request_stop();
        assert!(!lifecycle.is_running());
    }

    #[tokio::test]
    async fn test_stop_cancels_children() {
        let lifecycle = Lifecycle::new();
        let child = lifecycle.token().child_token();

        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.stopped().await })
        };

        lifecycle.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(child.is_cancelled());
    }
}
