//! Shared desk types: contracts, orders, trades, quotes, positions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Status reported when the read-only guard refuses a mutation.
pub const STATUS_REJECTED: &str = "REJECTED";
/// Status reported when a cancel targets an order the session does not know.
pub const STATUS_NOT_FOUND: &str = "NOT_FOUND";

/// Gateway address and client identity used to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
}

impl ConnectParams {
    /// `host:port` form used by the API client.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Broker-assigned order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub i32);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to qualify a stock contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSpec {
    pub symbol: String,
    pub sec_type: String,
    pub exchange: String,
    pub currency: String,
}

impl ContractSpec {
    pub fn stock(symbol: &str, exchange: &str, currency: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            sec_type: "STK".to_string(),
            exchange: exchange.to_string(),
            currency: currency.to_string(),
        }
    }
}

/// A contract the broker has resolved to a single tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instrument {
    pub con_id: i32,
    pub symbol: String,
    pub sec_type: String,
    pub exchange: String,
    pub primary_exchange: String,
    pub currency: String,
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            other => Err(Error::InvalidRequest(format!(
                "action must be BUY or SELL, got '{other}'"
            ))),
        }
    }
}

/// Order kind with its kind-specific price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderKind {
    Limit { limit_price: f64 },
    Market,
    Stop { stop_price: f64 },
}

impl OrderKind {
    /// IB order type code.
    pub fn code(&self) -> &'static str {
        match self {
            OrderKind::Limit { .. } => "LMT",
            OrderKind::Market => "MKT",
            OrderKind::Stop { .. } => "STP",
        }
    }

    pub fn limit_price(&self) -> Option<f64> {
        match self {
            OrderKind::Limit { limit_price } => Some(*limit_price),
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<f64> {
        match self {
            OrderKind::Stop { stop_price } => Some(*stop_price),
            _ => None,
        }
    }
}

/// Order as handed to the session for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub action: Action,
    pub quantity: f64,
    pub kind: OrderKind,
}

/// Broker-reported state of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderState {
    pub status: String,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
}

impl OrderState {
    /// State of an order that has been handed to the API but not acknowledged.
    pub fn pending(quantity: f64) -> Self {
        Self {
            status: "PendingSubmit".to_string(),
            filled: 0.0,
            remaining: quantity,
            avg_fill_price: 0.0,
        }
    }
}

/// An order the session knows about, with its latest state.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub order_id: OrderId,
    pub symbol: String,
    pub action: Action,
    pub order_type: String,
    pub total_quantity: f64,
    pub limit_price: Option<f64>,
    pub aux_price: Option<f64>,
    pub state: OrderState,
}

/// Raw position row from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub account: String,
    pub con_id: i32,
    pub symbol: String,
    pub sec_type: String,
    pub exchange: String,
    pub position: f64,
    pub avg_cost: f64,
}

/// Per-position profit and loss snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PnlRecord {
    pub account: String,
    pub con_id: i32,
    pub position: f64,
    pub daily_pnl: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub value: Option<f64>,
}

/// Position joined with its P&L.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub account: String,
    pub symbol: String,
    pub sec_type: String,
    pub exchange: String,
    pub position: f64,
    pub avg_cost: f64,
    pub market_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

/// One account value as reported by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountValue {
    pub account: String,
    pub tag: String,
    pub value: String,
    pub currency: String,
}

/// Account summary entry keyed by tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountEntry {
    pub value: String,
    pub currency: String,
    pub account: String,
}

/// Which quote field a tick updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickField {
    Bid,
    Ask,
    Last,
    Close,
    Volume,
}

/// One market data update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub field: TickField,
    pub value: f64,
    pub time: DateTime<Utc>,
}

/// Snapshot quote; every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

impl Quote {
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }

    /// True once any price field a caller can act on is known.
    pub fn has_price(&self) -> bool {
        self.last.is_some() || self.close.is_some() || self.bid.is_some() || self.ask.is_some()
    }
}

/// Historical bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Option parameters for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionChain {
    pub exchange: String,
    pub underlying_con_id: i32,
    pub trading_class: String,
    pub multiplier: String,
    pub expirations: Vec<String>,
    pub strikes: Vec<f64>,
}

/// Unit of a historical duration string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Seconds,
    Days,
    Weeks,
    Months,
    Years,
}

/// Largest lookback amount the gateway accepts (a signed 32-bit field).
pub const MAX_DURATION_AMOUNT: u32 = i32::MAX as u32;

/// Historical lookback such as `1 D` or `3 M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryDuration {
    pub amount: u32,
    pub unit: DurationUnit,
}

impl fmt::Display for HistoryDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            DurationUnit::Seconds => "S",
            DurationUnit::Days => "D",
            DurationUnit::Weeks => "W",
            DurationUnit::Months => "M",
            DurationUnit::Years => "Y",
        };
        write!(f, "{} {}", self.amount, unit)
    }
}

impl FromStr for HistoryDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidRequest(format!("invalid duration '{s}' (expected e.g. '1 D')"));
        let mut parts = s.split_whitespace();
        let amount: u32 = parts
            .next()
            .and_then(|n| n.parse().ok())
            .filter(|n| (1..=MAX_DURATION_AMOUNT).contains(n))
            .ok_or_else(invalid)?;
        let unit = match parts.next().map(|u| u.to_ascii_uppercase()) {
            Some(u) if u == "S" => DurationUnit::Seconds,
            Some(u) if u == "D" => DurationUnit::Days,
            Some(u) if u == "W" => DurationUnit::Weeks,
            Some(u) if u == "M" => DurationUnit::Months,
            Some(u) if u == "Y" => DurationUnit::Years,
            _ => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { amount, unit })
    }
}

/// Bar size settings accepted by the historical data endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarSize {
    Sec,
    Sec5,
    Sec15,
    Sec30,
    Min,
    Min2,
    Min3,
    Min5,
    Min15,
    Min20,
    Min30,
    Hour,
    Hour2,
    Hour3,
    Hour4,
    Hour8,
    Day,
    Week,
    Month,
}

impl BarSize {
    const ALL: [(BarSize, &'static str); 19] = [
        (BarSize::Sec, "1 secs"),
        (BarSize::Sec5, "5 secs"),
        (BarSize::Sec15, "15 secs"),
        (BarSize::Sec30, "30 secs"),
        (BarSize::Min, "1 min"),
        (BarSize::Min2, "2 mins"),
        (BarSize::Min3, "3 mins"),
        (BarSize::Min5, "5 mins"),
        (BarSize::Min15, "15 mins"),
        (BarSize::Min20, "20 mins"),
        (BarSize::Min30, "30 mins"),
        (BarSize::Hour, "1 hour"),
        (BarSize::Hour2, "2 hours"),
        (BarSize::Hour3, "3 hours"),
        (BarSize::Hour4, "4 hours"),
        (BarSize::Hour8, "8 hours"),
        (BarSize::Day, "1 day"),
        (BarSize::Week, "1 week"),
        (BarSize::Month, "1 month"),
    ];

    /// Canonical IB setting string.
    pub fn as_str(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(size, _)| size == self)
            .map(|(_, s)| *s)
            .unwrap_or("1 hour")
    }
}

impl fmt::Display for BarSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BarSize {
    type Err = Error;

    /// Accepts the canonical settings plus singular/plural variants
    /// (`1 min`, `1 mins`, `5 min`, `1 hours`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
        let singular = |t: &str| t.trim_end_matches('s').to_string();
        BarSize::ALL
            .iter()
            .find(|(_, name)| *name == normalized || singular(name) == singular(&normalized))
            .map(|(size, _)| *size)
            .ok_or_else(|| Error::InvalidRequest(format!("unsupported bar size '{s}'")))
    }
}

/// Historical data request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BarRequest {
    pub duration: HistoryDuration,
    pub bar_size: BarSize,
    /// Price basis; only `TRADES` is requested by the desk.
    pub what_to_show: &'static str,
    pub use_rth: bool,
}

impl BarRequest {
    /// Trade-price bars over regular trading hours.
    pub fn trades(duration: HistoryDuration, bar_size: BarSize) -> Self {
        Self {
            duration,
            bar_size,
            what_to_show: "TRADES",
            use_rth: true,
        }
    }
}
