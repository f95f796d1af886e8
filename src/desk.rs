//! The desk: top-level owner of the session and entry point for every
//! operation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::broker::{Connector, Session};
use crate::connection::{ConnectionManager, DEFAULT_CONNECT_TIMEOUT};
use crate::contracts;
use crate::error::{Error, Result};
use crate::guard::{Admission, Mutation, MutationOutcome, ReadOnlyGuard};
use crate::market_data::{self, DEFAULT_QUOTE_TIMEOUT};
use crate::numeric::{finite_or, positive_or};
use crate::orders::{self, CancelResult, DEFAULT_ACK_DELAY, OrderResult, PlaceOrderParams};
use crate::supervisor::{DEFAULT_RECONNECT_INTERVAL, ReconnectSupervisor};
use crate::types::*;

/// Account tags kept in the summary.
pub const SUMMARY_TAGS: [&str; 5] = [
    "NetLiquidation",
    "CashBalance",
    "TotalCashValue",
    "BuyingPower",
    "GrossPositionValue",
];

/// Tunables for a desk.
#[derive(Debug, Clone)]
pub struct DeskSettings {
    pub read_only: bool,
    pub currency: String,
    pub connect_timeout: Duration,
    pub quote_timeout: Duration,
    pub ack_delay: Duration,
    pub reconnect_interval: Duration,
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self {
            read_only: false,
            currency: "USD".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            quote_timeout: DEFAULT_QUOTE_TIMEOUT,
            ack_delay: DEFAULT_ACK_DELAY,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Order as listed by [`Desk::orders`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub symbol: String,
    pub action: Action,
    pub order_type: String,
    pub total_quantity: f64,
    pub limit_price: Option<f64>,
    pub aux_price: Option<f64>,
    pub status: String,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: Option<f64>,
}

impl From<Trade> for OrderView {
    fn from(t: Trade) -> Self {
        Self {
            order_id: t.order_id,
            symbol: t.symbol,
            action: t.action,
            order_type: t.order_type,
            total_quantity: t.total_quantity,
            limit_price: positive_or(t.limit_price, None),
            aux_price: positive_or(t.aux_price, None),
            status: t.state.status,
            filled: t.state.filled,
            remaining: t.state.remaining,
            avg_fill_price: positive_or(Some(t.state.avg_fill_price), None),
        }
    }
}

/// Owns the connection manager and the read-only guard.
pub struct Desk {
    connection: Arc<ConnectionManager>,
    guard: ReadOnlyGuard,
    settings: DeskSettings,
}

impl Desk {
    pub fn new(connector: Arc<dyn Connector>, params: ConnectParams, settings: DeskSettings) -> Self {
        let connection = Arc::new(ConnectionManager::new(
            connector,
            params,
            settings.connect_timeout,
        ));
        Self {
            connection,
            guard: ReadOnlyGuard::new(settings.read_only),
            settings,
        }
    }

    pub fn settings(&self) -> &DeskSettings {
        &self.settings
    }

    /// Gateway address and client id this desk connects with.
    pub fn connect_params(&self) -> &ConnectParams {
        self.connection.params()
    }

    /// Whether a live session is held right now. Never blocks.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connection.connect_attempts()
    }

    /// Make sure a live session exists, connecting if needed. The session
    /// itself stays inside the desk.
    pub async fn connect(&self) -> Result<()> {
        self.session().await.map(|_| ())
    }

    pub fn is_read_only(&self) -> bool {
        self.guard.is_read_only()
    }

    /// Start the background connect loop.
    pub fn spawn_supervisor(&self) -> ReconnectSupervisor {
        ReconnectSupervisor::spawn(Arc::clone(&self.connection), self.settings.reconnect_interval)
    }

    async fn session(&self) -> Result<Arc<dyn Session>> {
        self.connection.ensure_connected().await
    }

    async fn resolve(&self, session: &dyn Session, symbol: &str, exchange: &str) -> Result<Instrument> {
        contracts::resolve(session, symbol, exchange, &self.settings.currency).await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn account_summary(&self) -> Result<BTreeMap<String, AccountEntry>> {
        let session = self.session().await?;
        let values = session
            .account_values()
            .await
            .map_err(|e| Error::broker("account summary", e))?;

        let summary: BTreeMap<_, _> = values
            .into_iter()
            .filter(|v| SUMMARY_TAGS.contains(&v.tag.as_str()))
            .map(|v| {
                debug!("Account: {}={} {}", v.tag, v.value, v.currency);
                (
                    v.tag,
                    AccountEntry {
                        value: v.value,
                        currency: v.currency,
                        account: v.account,
                    },
                )
            })
            .collect();
        Ok(summary)
    }

    /// Positions joined with P&L on `(account, con_id)`.
    pub async fn positions(&self) -> Result<Vec<Position>> {
        let session = self.session().await?;
        let records = session
            .positions()
            .await
            .map_err(|e| Error::broker("positions", e))?;
        let pnl = session
            .pnl(&records)
            .await
            .map_err(|e| Error::broker("position P&L", e))?;

        info!("Fetched {} positions ({} with P&L)", records.len(), pnl.len());
        Ok(join_positions(records, pnl))
    }

    pub async fn orders(&self) -> Result<Vec<OrderView>> {
        let session = self.session().await?;
        let trades = session
            .trades()
            .await
            .map_err(|e| Error::broker("orders", e))?;
        Ok(trades.into_iter().map(OrderView::from).collect())
    }

    pub async fn quote(&self, symbol: &str, exchange: &str) -> Result<Quote> {
        let session = self.session().await?;
        let instrument = self.resolve(session.as_ref(), symbol, exchange).await?;
        market_data::snapshot_quote(session.as_ref(), &instrument, self.settings.quote_timeout).await
    }

    pub async fn historical_bars(
        &self,
        symbol: &str,
        exchange: &str,
        request: &BarRequest,
    ) -> Result<Vec<Bar>> {
        let session = self.session().await?;
        let instrument = self.resolve(session.as_ref(), symbol, exchange).await?;
        let bars = session
            .historical_bars(&instrument, request)
            .await
            .map_err(|e| {
                Error::broker(
                    format!(
                        "historical data for {symbol} ({}, {})",
                        request.duration, request.bar_size
                    ),
                    e,
                )
            })?;
        debug!("Fetched {} bars for {symbol}", bars.len());
        Ok(bars)
    }

    pub async fn option_chain(&self, symbol: &str, exchange: &str) -> Result<Vec<OptionChain>> {
        let session = self.session().await?;
        let instrument = self.resolve(session.as_ref(), symbol, exchange).await?;
        session
            .option_chains(&instrument)
            .await
            .map_err(|e| Error::broker(format!("option chain for {symbol}"), e))
    }

    // ------------------------------------------------------------------
    // Mutations: all routed through `execute`
    // ------------------------------------------------------------------

    /// Run a mutating operation after the read-only check.
    pub async fn execute(&self, mutation: Mutation) -> Result<MutationOutcome> {
        let mutation = match self.guard.admit(mutation) {
            Admission::Allowed(m) => m,
            Admission::Rejected(outcome) => return Ok(outcome),
        };

        let session = self.session().await?;
        match mutation {
            Mutation::Place(params) => {
                let instrument = self
                    .resolve(session.as_ref(), &params.symbol, &params.exchange)
                    .await?;
                orders::place_order(session.as_ref(), &instrument, &params, self.settings.ack_delay)
                    .await
                    .map(MutationOutcome::Placed)
            }
            Mutation::Cancel { order_id } => {
                orders::cancel_order(session.as_ref(), order_id, self.settings.ack_delay)
                    .await
                    .map(MutationOutcome::Cancelled)
            }
        }
    }

    pub async fn place_order(&self, params: PlaceOrderParams) -> Result<OrderResult> {
        match self.execute(Mutation::Place(params)).await? {
            MutationOutcome::Placed(result) => Ok(result),
            MutationOutcome::Cancelled(_) => unreachable!("placement produced a cancel outcome"),
        }
    }

    pub async fn cancel_order(&self, order_id: OrderId) -> Result<CancelResult> {
        match self.execute(Mutation::Cancel { order_id }).await? {
            MutationOutcome::Cancelled(result) => Ok(result),
            MutationOutcome::Placed(_) => unreachable!("cancel produced a placement outcome"),
        }
    }
}

/// Join position rows with P&L snapshots.
///
/// Missing P&L leaves price, value and P&L at zero. Market price is value
/// divided by position, and zero for a flat position.
pub fn join_positions(records: Vec<PositionRecord>, pnl: Vec<PnlRecord>) -> Vec<Position> {
    let by_key: FxHashMap<(String, i32), PnlRecord> = pnl
        .into_iter()
        .map(|p| ((p.account.clone(), p.con_id), p))
        .collect();

    records
        .into_iter()
        .map(|r| {
            let (market_price, market_value, unrealized_pnl, realized_pnl) =
                match by_key.get(&(r.account.clone(), r.con_id)) {
                    Some(p) => {
                        let value = finite_or(p.value, 0.0);
                        let price = if r.position == 0.0 { 0.0 } else { value / r.position };
                        (
                            price,
                            value,
                            finite_or(p.unrealized_pnl, 0.0),
                            finite_or(p.realized_pnl, 0.0),
                        )
                    }
                    None => (0.0, 0.0, 0.0, 0.0),
                };
            Position {
                account: r.account,
                symbol: r.symbol,
                sec_type: r.sec_type,
                exchange: r.exchange,
                position: r.position,
                avg_cost: r.avg_cost,
                market_price,
                market_value,
                unrealized_pnl,
                realized_pnl,
            }
        })
        .collect()
}
