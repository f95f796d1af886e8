//! Owner of the single gateway session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::broker::{Connector, Session};
use crate::error::{Error, Result};
use crate::types::ConnectParams;

/// Default bound on a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Holds at most one live session and serializes attempts to open it.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    params: ConnectParams,
    timeout: Duration,
    session: Mutex<Option<Arc<dyn Session>>>,
    attempts: AtomicU64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, params: ConnectParams, timeout: Duration) -> Self {
        Self {
            connector,
            params,
            timeout,
            session: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// Return the live session, connecting first if needed.
    ///
    /// The lock is held across the whole check-and-connect sequence, so
    /// callers arriving during an attempt wait for it and reuse its session.
    pub async fn ensure_connected(&self) -> Result<Arc<dyn Session>> {
        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref() {
            if session.is_connected() {
                return Ok(Arc::clone(session));
            }
            warn!("Session to {} is no longer connected, reconnecting", self.params.address());
            *slot = None;
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        let address = self.params.address();
        info!("Connecting to IB Gateway at {address} (client_id={})...", self.params.client_id);

        let session = match tokio::time::timeout(self.timeout, self.connector.connect(&self.params)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("Failed to connect to IB Gateway at {address}: {e}");
                return Err(Error::Connection(format!("failed to connect to {address}: {e}")));
            }
            Err(_) => {
                error!(
                    "Connect to IB Gateway at {address} timed out after {}s",
                    self.timeout.as_secs_f64()
                );
                return Err(Error::Connection(format!(
                    "connect to {address} timed out after {:?}",
                    self.timeout
                )));
            }
        };

        info!("Connected to IB Gateway at {address}");
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Best-effort status without waiting on an in-flight connect.
    pub fn is_connected(&self) -> bool {
        match self.session.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|s| s.is_connected()),
            Err(_) => false,
        }
    }

    /// Number of connect attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBroker;

    fn params() -> ConnectParams {
        ConnectParams {
            host: "127.0.0.1".into(),
            port: 4002,
            client_id: 7,
        }
    }

    #[tokio::test]
    async fn fast_path_skips_connector() {
        let broker = MockBroker::builder().build();
        let manager = ConnectionManager::new(broker.connector(), params(), DEFAULT_CONNECT_TIMEOUT);

        manager.ensure_connected().await.unwrap();
        manager.ensure_connected().await.unwrap();

        assert_eq!(broker.connect_calls(), 1);
        assert_eq!(manager.connect_attempts(), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn failure_is_returned_not_retried() {
        let broker = MockBroker::builder().fail_connects(1).build();
        let manager = ConnectionManager::new(broker.connector(), params(), DEFAULT_CONNECT_TIMEOUT);

        let err = manager.ensure_connected().await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(broker.connect_calls(), 1);
        assert!(!manager.is_connected());

        manager.ensure_connected().await.unwrap();
        assert_eq!(broker.connect_calls(), 2);
    }

    #[tokio::test]
    async fn slow_connect_times_out() {
        let broker = MockBroker::builder()
            .connect_delay(Duration::from_millis(500))
            .build();
        let manager =
            ConnectionManager::new(broker.connector(), params(), Duration::from_millis(50));

        let err = manager.ensure_connected().await.err().unwrap();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn dropped_session_is_replaced() {
        let broker = MockBroker::builder().build();
        let manager = ConnectionManager::new(broker.connector(), params(), DEFAULT_CONNECT_TIMEOUT);

        let first = manager.ensure_connected().await.unwrap();
        broker.drop_connection();
        assert!(!first.is_connected());

        let second = manager.ensure_connected().await.unwrap();
        assert!(second.is_connected());
        assert_eq!(broker.connect_calls(), 2);
    }
}
