//! Background task that brings the session up at startup.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionManager;

/// Default pause between failed attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// How the supervisor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Connected { attempts: u64 },
    Stopped,
    /// The loop panicked or was aborted before reaching either outcome.
    Failed,
}

/// Retries `ensure_connected` on a fixed interval until it succeeds.
///
/// No backoff and no attempt cap; the gateway is expected to become
/// reachable eventually.
pub struct ReconnectSupervisor {
    shutdown: CancellationToken,
    handle: JoinHandle<SupervisorExit>,
}

impl ReconnectSupervisor {
    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(connection: Arc<ConnectionManager>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { run(connection, interval, token).await });
        Self { shutdown, handle }
    }

    /// Ask the loop to stop. Takes effect during a wait or a connect attempt.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to end.
    pub async fn wait(self) -> SupervisorExit {
        match self.handle.await {
            Ok(exit) => exit,
            Err(e) => {
                error!("Reconnect supervisor failed: {e}");
                SupervisorExit::Failed
            }
        }
    }
}

async fn run(
    connection: Arc<ConnectionManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> SupervisorExit {
    let mut attempts = 0_u64;
    loop {
        attempts += 1;
        let result = tokio::select! {
            _ = shutdown.cancelled() => return SupervisorExit::Stopped,
            result = connection.ensure_connected() => result,
        };

        match result {
            Ok(_) => {
                info!("Gateway session established after {attempts} attempt(s)");
                return SupervisorExit::Connected { attempts };
            }
            Err(e) => {
                warn!(
                    "Gateway not reachable ({e}), retrying in {}s",
                    interval.as_secs_f64()
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return SupervisorExit::Stopped,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
