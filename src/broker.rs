//! The seam between the desk and a brokerage gateway.
//!
//! A [`Connector`] opens sessions; a [`Session`] is one live connection.
//! Implementations:
//!
//! - **IBKR** (feature `ibkr`): TWS / IB Gateway via the `ibapi` client
//! - **Mock** ([`crate::mock`]): scripted in-memory broker for tests

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::types::*;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Identifies one market data request so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId(pub u64);

/// A live snapshot request: ticks arrive on `ticks` until the feed ends or
/// is cancelled.
#[derive(Debug)]
pub struct TickFeed {
    pub id: FeedId,
    pub ticks: mpsc::UnboundedReceiver<Tick>,
}

/// Opens sessions against a gateway.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new session. Called only by the connection manager.
    async fn connect(&self, params: &ConnectParams) -> BrokerResult<Arc<dyn Session>>;
}

/// One live connection to the gateway.
///
/// Reads may be issued concurrently; the implementation is responsible for
/// correlating responses with requests.
#[async_trait]
pub trait Session: Send + Sync {
    /// Whether the transport is still up. Checked lazily before reuse.
    fn is_connected(&self) -> bool;

    /// All account values reported for the managed accounts.
    async fn account_values(&self) -> BrokerResult<Vec<AccountValue>>;

    /// Current positions across accounts.
    async fn positions(&self) -> BrokerResult<Vec<PositionRecord>>;

    /// P&L snapshots for the given positions. Positions without data are
    /// simply missing from the result.
    async fn pnl(&self, positions: &[PositionRecord]) -> BrokerResult<Vec<PnlRecord>>;

    /// Every contract matching `spec`.
    async fn qualify(&self, spec: &ContractSpec) -> BrokerResult<Vec<Instrument>>;

    /// Start a one-shot (non-streaming) market data request. Returns once the
    /// gateway has accepted or refused the request.
    async fn subscribe_snapshot(&self, instrument: &Instrument) -> BrokerResult<TickFeed>;

    /// Release a market data request. Must be safe to call after the feed
    /// has already ended.
    fn cancel_market_data(&self, feed: FeedId);

    async fn historical_bars(
        &self,
        instrument: &Instrument,
        request: &BarRequest,
    ) -> BrokerResult<Vec<Bar>>;

    async fn option_chains(&self, instrument: &Instrument) -> BrokerResult<Vec<OptionChain>>;

    /// Submit an order. Returns the trade as known immediately after
    /// submission; later state arrives asynchronously and is visible via
    /// [`Session::trades`].
    async fn place_order(
        &self,
        instrument: &Instrument,
        order: &OrderRequest,
    ) -> BrokerResult<Trade>;

    /// Request cancellation. Rejections are only visible via later status.
    fn cancel_order(&self, order_id: OrderId);

    /// Orders known to this session, with their latest state.
    async fn trades(&self) -> BrokerResult<Vec<Trade>>;
}
