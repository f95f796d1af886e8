//! Order submission and cancellation with a best-effort acknowledgement wait.

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::broker::Session;
use crate::error::{Error, Result};
use crate::types::*;

/// Default pause between a submit/cancel and reading the status back.
pub const DEFAULT_ACK_DELAY: Duration = Duration::from_secs(1);

/// Parameters of an order placement as the caller supplied them.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderParams {
    pub symbol: String,
    pub action: Action,
    pub quantity: f64,
    pub kind: OrderKind,
    pub exchange: String,
}

impl PlaceOrderParams {
    pub fn to_request(&self) -> OrderRequest {
        OrderRequest {
            action: self.action,
            quantity: self.quantity,
            kind: self.kind,
        }
    }
}

/// Outcome of a placement (or its rejection).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderResult {
    pub order_id: OrderId,
    pub status: String,
    pub symbol: String,
    pub action: Action,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OrderResult {
    /// Result echoing `params` with the given id and status.
    pub fn echo(params: &PlaceOrderParams, order_id: OrderId, status: &str) -> Self {
        Self {
            order_id,
            status: status.to_string(),
            symbol: params.symbol.clone(),
            action: params.action,
            quantity: params.quantity,
            limit_price: params.kind.limit_price(),
            stop_price: params.kind.stop_price(),
            message: None,
        }
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelResult {
    pub order_id: OrderId,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

async fn find_trade(session: &dyn Session, order_id: OrderId) -> Result<Option<Trade>> {
    let trades = session
        .trades()
        .await
        .map_err(|e| Error::broker("reading known orders", e))?;
    Ok(trades.into_iter().find(|t| t.order_id == order_id))
}

/// Submit an order for an already resolved instrument.
///
/// Waits `ack_delay` for the initial status; the reported status is not
/// necessarily terminal.
pub(crate) async fn place_order(
    session: &dyn Session,
    instrument: &Instrument,
    params: &PlaceOrderParams,
    ack_delay: Duration,
) -> Result<OrderResult> {
    let request = params.to_request();
    info!(
        "Submitting: {} {} {} {} (con_id={})",
        request.action,
        request.quantity,
        instrument.symbol,
        request.kind.code(),
        instrument.con_id
    );

    let submitted = session
        .place_order(instrument, &request)
        .await
        .map_err(|e| Error::broker(format!("placing order for {}", params.symbol), e))?;
    let order_id = submitted.order_id;

    tokio::time::sleep(ack_delay).await;

    let state = match find_trade(session, order_id).await? {
        Some(trade) => trade.state,
        None => {
            warn!("Order {order_id} not listed after submit, reporting initial state");
            submitted.state
        }
    };

    info!("Order {order_id}: {} (filled {})", state.status, state.filled);
    Ok(OrderResult::echo(params, order_id, &state.status))
}

/// Cancel a known order by id.
///
/// Unknown ids return `NOT_FOUND` without contacting the broker further.
pub(crate) async fn cancel_order(
    session: &dyn Session,
    order_id: OrderId,
    ack_delay: Duration,
) -> Result<CancelResult> {
    let Some(trade) = find_trade(session, order_id).await? else {
        info!("Cancel requested for unknown order {order_id}");
        return Ok(CancelResult {
            order_id,
            status: STATUS_NOT_FOUND.to_string(),
            message: Some(format!("order {order_id} not found among known orders")),
        });
    };

    info!("Cancelling order {order_id} ({} {})", trade.action, trade.symbol);
    session.cancel_order(order_id);

    tokio::time::sleep(ack_delay).await;

    let status = match find_trade(session, order_id).await? {
        Some(t) => t.state.status,
        None => trade.state.status,
    };
    debug!("Cancel status for {order_id}: {status}");

    Ok(CancelResult {
        order_id,
        status,
        message: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_carries_kind_price() {
        let params = PlaceOrderParams {
            symbol: "AAPL".into(),
            action: Action::Buy,
            quantity: 10.0,
            kind: OrderKind::Stop { stop_price: 140.0 },
            exchange: "SMART".into(),
        };
        let result = OrderResult::echo(&params, OrderId(0), STATUS_REJECTED);
        assert_eq!(result.stop_price, Some(140.0));
        assert_eq!(result.limit_price, None);
        assert_eq!(result.status, "REJECTED");
    }

    #[test]
    fn serialization_omits_absent_prices() {
        let params = PlaceOrderParams {
            symbol: "MSFT".into(),
            action: Action::Sell,
            quantity: 5.0,
            kind: OrderKind::Market,
            exchange: "SMART".into(),
        };
        let json = serde_json::to_value(OrderResult::echo(&params, OrderId(12), "Submitted")).unwrap();
        assert_eq!(json["order_id"], 12);
        assert_eq!(json["action"], "SELL");
        assert!(json.get("limit_price").is_none());
        assert!(json.get("stop_price").is_none());
    }
}
