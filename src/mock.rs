//! Mock broker for testing: implements [`Connector`] and [`Session`] with
//! scripted behaviour and records every interaction.
//!
//! Use this in integration tests to exercise the desk without a gateway.
//!
//! ```ignore
//! use ibdesk::mock::MockBroker;
//!
//! let broker = MockBroker::builder()
//!     .with_stock("AAPL", 265598, "NASDAQ")
//!     .with_quote("AAPL", vec![ScriptedTick::after_ms(5, TickField::Last, 190.0)])
//!     .build();
//! let connector = broker.connector();
//! ```

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::broker::{BrokerResult, Connector, FeedId, Session, TickFeed};
use crate::error::BrokerError;
use crate::types::*;

/// A tick delivered `after` the snapshot request.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedTick {
    pub after: Duration,
    pub field: TickField,
    pub value: f64,
}

impl ScriptedTick {
    pub fn after_ms(ms: u64, field: TickField, value: f64) -> Self {
        Self {
            after: Duration::from_millis(ms),
            field,
            value,
        }
    }
}

/// A recorded order submission for assertion in tests.
#[derive(Debug, Clone)]
pub struct RecordedOrder {
    pub order_id: OrderId,
    pub instrument: Instrument,
    pub request: OrderRequest,
}

/// Builder for `MockBroker`.
pub struct MockBrokerBuilder {
    connect_failures: u32,
    connect_delay: Duration,
    contracts: Vec<Instrument>,
    quotes: FxHashMap<String, Vec<ScriptedTick>>,
    account_values: Vec<AccountValue>,
    positions: Vec<PositionRecord>,
    pnl: Vec<PnlRecord>,
    bars: Vec<Bar>,
    chains: Vec<OptionChain>,
    history_error: Option<String>,
    market_data_error: Option<String>,
    close_feeds: bool,
    reject_orders: bool,
    ack_latency: Duration,
    ack_status: String,
    trades: Vec<Trade>,
}

impl MockBrokerBuilder {
    /// Fail the first `n` connect attempts.
    pub fn fail_connects(mut self, n: u32) -> Self {
        self.connect_failures = n;
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Register a stock listed on `primary_exchange` (also reachable via SMART).
    pub fn with_stock(mut self, symbol: &str, con_id: i32, primary_exchange: &str) -> Self {
        self.contracts.push(Instrument {
            con_id,
            symbol: symbol.to_string(),
            sec_type: "STK".to_string(),
            exchange: "SMART".to_string(),
            primary_exchange: primary_exchange.to_string(),
            currency: "USD".to_string(),
        });
        self
    }

    /// Ticks delivered for every snapshot of `symbol`. Symbols without a
    /// script get a feed that stays silent until cancelled, unless
    /// [`close_feeds`](Self::close_feeds) is set.
    pub fn with_quote(mut self, symbol: &str, ticks: Vec<ScriptedTick>) -> Self {
        self.quotes.insert(symbol.to_string(), ticks);
        self
    }

    pub fn with_account_value(mut self, account: &str, tag: &str, value: &str) -> Self {
        self.account_values.push(AccountValue {
            account: account.to_string(),
            tag: tag.to_string(),
            value: value.to_string(),
            currency: "USD".to_string(),
        });
        self
    }

    pub fn with_position(
        mut self,
        account: &str,
        symbol: &str,
        con_id: i32,
        position: f64,
        avg_cost: f64,
    ) -> Self {
        self.positions.push(PositionRecord {
            account: account.to_string(),
            con_id,
            symbol: symbol.to_string(),
            sec_type: "STK".to_string(),
            exchange: "NASDAQ".to_string(),
            position,
            avg_cost,
        });
        self
    }

    pub fn with_pnl(mut self, account: &str, con_id: i32, value: f64, unrealized: f64, realized: f64) -> Self {
        self.pnl.push(PnlRecord {
            account: account.to_string(),
            con_id,
            position: 0.0,
            daily_pnl: None,
            unrealized_pnl: Some(unrealized),
            realized_pnl: Some(realized),
            value: Some(value),
        });
        self
    }

    pub fn with_bars(mut self, bars: Vec<Bar>) -> Self {
        self.bars = bars;
        self
    }

    pub fn with_option_chain(mut self, chain: OptionChain) -> Self {
        self.chains.push(chain);
        self
    }

    /// Make historical data and option chain requests fail with `message`.
    pub fn fail_history(mut self, message: &str) -> Self {
        self.history_error = Some(message.to_string());
        self
    }

    /// Make snapshot requests fail with `message`.
    pub fn fail_market_data(mut self, message: &str) -> Self {
        self.market_data_error = Some(message.to_string());
        self
    }

    /// End every snapshot feed after its last scripted tick (immediately
    /// for symbols without a script).
    pub fn close_feeds(mut self) -> Self {
        self.close_feeds = true;
        self
    }

    pub fn reject_orders(mut self) -> Self {
        self.reject_orders = true;
        self
    }

    /// Status the broker reports `latency` after a submit.
    pub fn ack(mut self, status: &str, latency: Duration) -> Self {
        self.ack_status = status.to_string();
        self.ack_latency = latency;
        self
    }

    /// An order already known to the session.
    pub fn with_trade(mut self, order_id: i32, symbol: &str, status: &str) -> Self {
        let mut state = OrderState::pending(100.0);
        state.status = status.to_string();
        self.trades.push(Trade {
            order_id: OrderId(order_id),
            symbol: symbol.to_string(),
            action: Action::Buy,
            order_type: "LMT".to_string(),
            total_quantity: 100.0,
            limit_price: Some(10.0),
            aux_price: None,
            state,
        });
        self
    }

    pub fn build(self) -> MockBroker {
        MockBroker {
            state: Arc::new(MockState {
                connect_failures: AtomicU32::new(self.connect_failures),
                connect_delay: self.connect_delay,
                contracts: self.contracts,
                quotes: self.quotes,
                account_values: self.account_values,
                positions: self.positions,
                pnl: self.pnl,
                bars: self.bars,
                chains: self.chains,
                history_error: self.history_error,
                market_data_error: self.market_data_error,
                close_feeds: self.close_feeds,
                reject_orders: self.reject_orders,
                ack_latency: self.ack_latency,
                ack_status: self.ack_status,
                connect_calls: AtomicU64::new(0),
                live_generation: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
                session_calls: AtomicU64::new(0),
                next_order_id: AtomicI32::new(1001),
                next_feed: AtomicU64::new(1),
                snapshot_requests: AtomicU64::new(0),
                market_data_cancels: AtomicU64::new(0),
                open_feeds: Mutex::new(FxHashMap::default()),
                trades: Mutex::new(self.trades),
                placed: Mutex::new(Vec::new()),
                cancel_requests: Mutex::new(Vec::new()),
            }),
        }
    }
}

struct MockState {
    connect_failures: AtomicU32,
    connect_delay: Duration,
    contracts: Vec<Instrument>,
    quotes: FxHashMap<String, Vec<ScriptedTick>>,
    account_values: Vec<AccountValue>,
    positions: Vec<PositionRecord>,
    pnl: Vec<PnlRecord>,
    bars: Vec<Bar>,
    chains: Vec<OptionChain>,
    history_error: Option<String>,
    market_data_error: Option<String>,
    close_feeds: bool,
    reject_orders: bool,
    ack_latency: Duration,
    ack_status: String,

    connect_calls: AtomicU64,
    live_generation: AtomicU64,
    next_generation: AtomicU64,
    session_calls: AtomicU64,
    next_order_id: AtomicI32,
    next_feed: AtomicU64,
    snapshot_requests: AtomicU64,
    market_data_cancels: AtomicU64,
    open_feeds: Mutex<FxHashMap<FeedId, mpsc::UnboundedSender<Tick>>>,
    trades: Mutex<Vec<Trade>>,
    placed: Mutex<Vec<RecordedOrder>>,
    cancel_requests: Mutex<Vec<OrderId>>,
}

impl MockState {
    fn set_status(&self, order_id: OrderId, status: &str) {
        let mut trades = self.trades.lock().unwrap();
        if let Some(trade) = trades.iter_mut().find(|t| t.order_id == order_id) {
            trade.state.status = status.to_string();
        }
    }
}

/// A mock gateway that records calls and returns configurable responses.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn builder() -> MockBrokerBuilder {
        MockBrokerBuilder {
            connect_failures: 0,
            connect_delay: Duration::ZERO,
            contracts: Vec::new(),
            quotes: FxHashMap::default(),
            account_values: Vec::new(),
            positions: Vec::new(),
            pnl: Vec::new(),
            bars: Vec::new(),
            chains: Vec::new(),
            history_error: None,
            market_data_error: None,
            close_feeds: false,
            reject_orders: false,
            ack_latency: Duration::from_millis(5),
            ack_status: "Submitted".to_string(),
            trades: Vec::new(),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Simulate the gateway dropping the live session.
    pub fn drop_connection(&self) {
        self.state.live_generation.store(0, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u64 {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    /// Calls made on any session (every `Session` method counts).
    pub fn session_calls(&self) -> u64 {
        self.state.session_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot_requests(&self) -> u64 {
        self.state.snapshot_requests.load(Ordering::SeqCst)
    }

    pub fn market_data_cancels(&self) -> u64 {
        self.state.market_data_cancels.load(Ordering::SeqCst)
    }

    /// Snapshot feeds not yet cancelled.
    pub fn open_feeds(&self) -> usize {
        self.state.open_feeds.lock().unwrap().len()
    }

    pub fn placed_orders(&self) -> Vec<RecordedOrder> {
        self.state.placed.lock().unwrap().clone()
    }

    pub fn cancel_requests(&self) -> Vec<OrderId> {
        self.state.cancel_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockBroker {
    async fn connect(&self, params: &ConnectParams) -> BrokerResult<Arc<dyn Session>> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.state.connect_delay.is_zero() {
            tokio::time::sleep(self.state.connect_delay).await;
        }

        let failures = &self.state.connect_failures;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::Connection(format!(
                "mock: connection refused at {}",
                params.address()
            )));
        }

        let generation = self.state.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.live_generation.store(generation, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            state: Arc::clone(&self.state),
            generation,
        }))
    }
}

async fn play_script(script: Vec<ScriptedTick>, tx: mpsc::UnboundedSender<Tick>) {
    for tick in script {
        tokio::time::sleep(tick.after).await;
        let sent = tx.send(Tick {
            field: tick.field,
            value: tick.value,
            time: Utc::now(),
        });
        if sent.is_err() {
            break;
        }
    }
}

struct MockSession {
    state: Arc<MockState>,
    generation: u64,
}

impl MockSession {
    fn touch(&self) -> BrokerResult<()> {
        self.state.session_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_connected() {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

#[async_trait]
impl Session for MockSession {
    fn is_connected(&self) -> bool {
        self.state.live_generation.load(Ordering::SeqCst) == self.generation
    }

    async fn account_values(&self) -> BrokerResult<Vec<AccountValue>> {
        self.touch()?;
        Ok(self.state.account_values.clone())
    }

    async fn positions(&self) -> BrokerResult<Vec<PositionRecord>> {
        self.touch()?;
        Ok(self.state.positions.clone())
    }

    async fn pnl(&self, positions: &[PositionRecord]) -> BrokerResult<Vec<PnlRecord>> {
        self.touch()?;
        Ok(self
            .state
            .pnl
            .iter()
            .filter(|p| {
                positions
                    .iter()
                    .any(|r| r.account == p.account && r.con_id == p.con_id)
            })
            .cloned()
            .collect())
    }

    async fn qualify(&self, spec: &ContractSpec) -> BrokerResult<Vec<Instrument>> {
        self.touch()?;
        Ok(self
            .state
            .contracts
            .iter()
            .filter(|c| c.symbol.eq_ignore_ascii_case(&spec.symbol) && c.currency == spec.currency)
            .filter(|c| spec.exchange == c.exchange || spec.exchange == c.primary_exchange)
            .cloned()
            .collect())
    }

    async fn subscribe_snapshot(&self, instrument: &Instrument) -> BrokerResult<TickFeed> {
        self.touch()?;
        self.state.snapshot_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.state.market_data_error {
            return Err(BrokerError::Request(msg.clone()));
        }

        let id = FeedId(self.state.next_feed.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        let script = self
            .state
            .quotes
            .get(&instrument.symbol)
            .cloned()
            .unwrap_or_default();

        if self.state.close_feeds {
            // The script task holds the only sender.
            tokio::spawn(play_script(script, tx));
        } else {
            if !script.is_empty() {
                tokio::spawn(play_script(script, tx.clone()));
            }
            // Keep the feed open until cancelled, like an unanswered request.
            self.state.open_feeds.lock().unwrap().insert(id, tx);
        }
        Ok(TickFeed { id, ticks: rx })
    }

    fn cancel_market_data(&self, feed: FeedId) {
        self.state.session_calls.fetch_add(1, Ordering::SeqCst);
        self.state.market_data_cancels.fetch_add(1, Ordering::SeqCst);
        self.state.open_feeds.lock().unwrap().remove(&feed);
    }

    async fn historical_bars(
        &self,
        _instrument: &Instrument,
        _request: &BarRequest,
    ) -> BrokerResult<Vec<Bar>> {
        self.touch()?;
        match &self.state.history_error {
            Some(msg) => Err(BrokerError::Request(msg.clone())),
            None => Ok(self.state.bars.clone()),
        }
    }

    async fn option_chains(&self, instrument: &Instrument) -> BrokerResult<Vec<OptionChain>> {
        self.touch()?;
        match &self.state.history_error {
            Some(msg) => Err(BrokerError::Request(msg.clone())),
            None => Ok(self
                .state
                .chains
                .iter()
                .filter(|c| c.underlying_con_id == instrument.con_id)
                .cloned()
                .collect()),
        }
    }

    async fn place_order(
        &self,
        instrument: &Instrument,
        order: &OrderRequest,
    ) -> BrokerResult<Trade> {
        self.touch()?;
        if self.state.reject_orders {
            return Err(BrokerError::Order("mock: order rejected".into()));
        }

        let order_id = OrderId(self.state.next_order_id.fetch_add(1, Ordering::SeqCst));
        let trade = Trade {
            order_id,
            symbol: instrument.symbol.clone(),
            action: order.action,
            order_type: order.kind.code().to_string(),
            total_quantity: order.quantity,
            limit_price: order.kind.limit_price(),
            aux_price: order.kind.stop_price(),
            state: OrderState::pending(order.quantity),
        };

        self.state.trades.lock().unwrap().push(trade.clone());
        self.state.placed.lock().unwrap().push(RecordedOrder {
            order_id,
            instrument: instrument.clone(),
            request: order.clone(),
        });

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(state.ack_latency).await;
            let status = state.ack_status.clone();
            state.set_status(order_id, &status);
        });

        Ok(trade)
    }

    fn cancel_order(&self, order_id: OrderId) {
        self.state.session_calls.fetch_add(1, Ordering::SeqCst);
        self.state.cancel_requests.lock().unwrap().push(order_id);

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(state.ack_latency).await;
            state.set_status(order_id, "Cancelled");
        });
    }

    async fn trades(&self) -> BrokerResult<Vec<Trade>> {
        self.touch()?;
        Ok(self.state.trades.lock().unwrap().clone())
    }
}
