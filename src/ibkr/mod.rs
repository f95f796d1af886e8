//! Interactive Brokers (IBKR) gateway session, wrapping the TWS/Gateway
//! blocking API.
//!
//! Blocking calls run on `spawn_blocking`; push streams (ticks, order
//! status) are drained on worker threads.

pub mod client;
pub mod orders;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use async_trait::async_trait;
use ibapi::client::blocking::Client;
use log::{info, warn};
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::broker::{BrokerResult, Connector, FeedId, Session, TickFeed};
use crate::error::BrokerError;
use crate::types::*;
use orders::TradeRegistry;

/// Opens [`IbkrSession`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct IbkrConnector;

impl IbkrConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for IbkrConnector {
    async fn connect(&self, params: &ConnectParams) -> BrokerResult<Arc<dyn Session>> {
        let address = params.address();
        let client_id = params.client_id;

        let client = tokio::task::spawn_blocking(move || Client::connect(&address, client_id))
            .await
            .map_err(|e| BrokerError::Other(format!("connect worker failed: {e}")))?
            .map_err(|e| {
                BrokerError::Connection(format!("failed to connect to {}: {e}", params.address()))
            })?;

        info!("Connected (client_id={client_id})");
        Ok(Arc::new(IbkrSession::new(client)))
    }
}

/// Whether an API error means the transport is gone.
fn is_disconnect(err: &ibapi::Error) -> bool {
    matches!(
        err,
        ibapi::Error::ConnectionFailed
            | ibapi::Error::ConnectionReset
            | ibapi::Error::Shutdown
            | ibapi::Error::Io(_)
    )
}

/// One live TWS/Gateway connection.
pub struct IbkrSession {
    client: Arc<Client>,
    connected: Arc<AtomicBool>,
    registry: TradeRegistry,
    next_feed: AtomicU64,
    feeds: Mutex<FxHashMap<FeedId, Arc<AtomicBool>>>,
}

impl IbkrSession {
    fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
            connected: Arc::new(AtomicBool::new(true)),
            registry: TradeRegistry::default(),
            next_feed: AtomicU64::new(1),
            feeds: Mutex::new(FxHashMap::default()),
        }
    }

    fn classify(&self, what: &str, err: ibapi::Error) -> BrokerError {
        if is_disconnect(&err) {
            warn!("Gateway connection lost during {what}: {err}");
            self.connected.store(false, Ordering::SeqCst);
            BrokerError::Connection(format!("{what}: {err}"))
        } else {
            BrokerError::Request(format!("{what}: {err}"))
        }
    }

    /// Run a blocking client call off the async runtime.
    async fn blocking<T, F>(&self, what: &str, f: F) -> BrokerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> Result<T, ibapi::Error> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| BrokerError::Other(format!("{what}: worker failed: {e}")))?
            .map_err(|e| self.classify(what, e))
    }
}

#[async_trait]
impl Session for IbkrSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn account_values(&self) -> BrokerResult<Vec<AccountValue>> {
        self.blocking("account summary", client::account_values).await
    }

    async fn positions(&self) -> BrokerResult<Vec<PositionRecord>> {
        self.blocking("positions", client::positions).await
    }

    async fn pnl(&self, positions: &[PositionRecord]) -> BrokerResult<Vec<PnlRecord>> {
        let positions = positions.to_vec();
        self.blocking("pnl", move |c| client::pnl(c, &positions)).await
    }

    async fn qualify(&self, spec: &ContractSpec) -> BrokerResult<Vec<Instrument>> {
        let spec = spec.clone();
        self.blocking("contract details", move |c| client::qualify(c, &spec))
            .await
    }

    async fn subscribe_snapshot(&self, instrument: &Instrument) -> BrokerResult<TickFeed> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let client = Arc::clone(&self.client);
        let contract = client::instrument_contract(instrument);
        let flag = Arc::clone(&cancelled);
        thread::spawn(move || client::stream_snapshot(client, contract, tx, flag, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.classify("market data", e)),
            Err(_) => return Err(BrokerError::Other("market data: worker exited".into())),
        }

        let id = FeedId(self.next_feed.fetch_add(1, Ordering::SeqCst));
        self.feeds
            .lock()
            .map_err(|_| BrokerError::Other("feed table poisoned".into()))?
            .insert(id, cancelled);
        Ok(TickFeed { id, ticks: rx })
    }

    fn cancel_market_data(&self, feed: FeedId) {
        if let Ok(mut feeds) = self.feeds.lock() {
            if let Some(flag) = feeds.remove(&feed) {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn historical_bars(
        &self,
        instrument: &Instrument,
        request: &BarRequest,
    ) -> BrokerResult<Vec<Bar>> {
        let instrument = instrument.clone();
        let request = request.clone();
        self.blocking("historical data", move |c| {
            client::historical_bars(c, &instrument, &request)
        })
        .await
    }

    async fn option_chains(&self, instrument: &Instrument) -> BrokerResult<Vec<OptionChain>> {
        let instrument = instrument.clone();
        self.blocking("option parameters", move |c| client::option_chains(c, &instrument))
            .await
    }

    async fn place_order(
        &self,
        instrument: &Instrument,
        order: &OrderRequest,
    ) -> BrokerResult<Trade> {
        let client = Arc::clone(&self.client);
        let registry = self.registry.clone();
        let connected = Arc::clone(&self.connected);
        let instrument = instrument.clone();
        let order = order.clone();

        tokio::task::spawn_blocking(move || {
            orders::submit_order(client, registry, connected, &instrument, &order)
        })
        .await
        .map_err(|e| BrokerError::Other(format!("place order: worker failed: {e}")))?
        .map_err(|e| match self.classify("place order", e) {
            BrokerError::Request(msg) => BrokerError::Order(msg),
            other => other,
        })
    }

    fn cancel_order(&self, order_id: OrderId) {
        orders::cancel_order(Arc::clone(&self.client), self.registry.clone(), order_id);
    }

    async fn trades(&self) -> BrokerResult<Vec<Trade>> {
        Ok(self.registry.snapshot())
    }
}
