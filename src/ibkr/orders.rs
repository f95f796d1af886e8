//! Order construction, submission and status tracking.
//!
//! Status updates for each submitted or cancelled order are drained on a
//! worker thread into the session's [`TradeRegistry`]. A drain thread ends
//! when its order is terminal, its status stream is exhausted, or the
//! session drops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use ibapi::client::blocking::Client;
use ibapi::orders::order_builder::{limit_order, market_order, stop};
use ibapi::orders::{Action as IbAction, CancelOrder, Order, PlaceOrder};
use log::{debug, info, warn};

use super::client::instrument_contract;
use crate::types::*;

/// Statuses after which the broker sends no further updates.
const TERMINAL: [&str; 4] = ["Filled", "Cancelled", "ApiCancelled", "Inactive"];

/// Registry size above which the oldest finished orders are forgotten.
const MAX_TRACKED: usize = 1000;

/// One order status report from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StatusReport {
    pub status: String,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
}

/// Orders known to this session, updated by worker threads.
#[derive(Clone, Default)]
pub(crate) struct TradeRegistry {
    trades: Arc<Mutex<BTreeMap<OrderId, Trade>>>,
}

impl TradeRegistry {
    pub(crate) fn insert(&self, trade: Trade) {
        if let Ok(mut trades) = self.trades.lock() {
            trades.insert(trade.order_id, trade);
            if trades.len() > MAX_TRACKED {
                let excess = trades.len() - MAX_TRACKED;
                let finished: Vec<OrderId> = trades
                    .values()
                    .filter(|t| TERMINAL.contains(&t.state.status.as_str()))
                    .map(|t| t.order_id)
                    .take(excess)
                    .collect();
                for id in finished {
                    trades.remove(&id);
                }
            }
        }
    }

    /// Apply a status update; returns true when the order reached a terminal
    /// state.
    fn update(&self, order_id: OrderId, status: &str, filled: f64, remaining: f64, avg: f64) -> bool {
        if let Ok(mut trades) = self.trades.lock() {
            if let Some(trade) = trades.get_mut(&order_id) {
                trade.state = OrderState {
                    status: status.to_string(),
                    filled,
                    remaining,
                    avg_fill_price: avg,
                };
            }
        }
        TERMINAL.contains(&status)
    }

    pub(crate) fn snapshot(&self) -> Vec<Trade> {
        self.trades
            .lock()
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Apply status reports for `id` until the order is terminal, `reports` is
/// exhausted, or `connected` drops. `None` items carry no status.
pub(crate) fn track_status(
    registry: &TradeRegistry,
    id: OrderId,
    connected: &AtomicBool,
    reports: impl Iterator<Item = Option<StatusReport>>,
) {
    for report in reports {
        if !connected.load(Ordering::SeqCst) {
            debug!("Order {id}: session dropped, no longer tracking");
            return;
        }
        let Some(report) = report else {
            continue;
        };
        debug!(
            "Order {id} status: {} filled={} remaining={}",
            report.status, report.filled, report.remaining
        );
        let done = registry.update(
            id,
            &report.status,
            report.filled,
            report.remaining,
            report.avg_fill_price,
        );
        if done {
            return;
        }
    }
    debug!("Order {id}: status stream ended");
}

fn ib_order(request: &OrderRequest) -> Order {
    let action = match request.action {
        Action::Buy => IbAction::Buy,
        Action::Sell => IbAction::Sell,
    };
    match request.kind {
        OrderKind::Limit { limit_price } => limit_order(action, request.quantity, limit_price),
        OrderKind::Market => market_order(action, request.quantity),
        OrderKind::Stop { stop_price } => stop(action, request.quantity, stop_price),
    }
}

/// Submit an order and start tracking its status. Blocking.
pub(crate) fn submit_order(
    client: Arc<Client>,
    registry: TradeRegistry,
    connected: Arc<AtomicBool>,
    instrument: &Instrument,
    request: &OrderRequest,
) -> Result<Trade, ibapi::Error> {
    let contract = instrument_contract(instrument);
    let order = ib_order(request);
    let order_id = client.next_valid_order_id()?;

    info!(
        "Submitting: {} {} {} {} (id={order_id})",
        request.action,
        request.quantity,
        instrument.symbol,
        request.kind.code()
    );

    let subscription = client.place_order(order_id, &contract, &order)?;

    let trade = Trade {
        order_id: OrderId(order_id),
        symbol: instrument.symbol.clone(),
        action: request.action,
        order_type: request.kind.code().to_string(),
        total_quantity: request.quantity,
        limit_price: request.kind.limit_price(),
        aux_price: request.kind.stop_price(),
        state: OrderState::pending(request.quantity),
    };
    registry.insert(trade.clone());

    let id = OrderId(order_id);
    thread::spawn(move || {
        let reports = subscription.into_iter().map(|response| match response {
            PlaceOrder::OrderStatus(status) => Some(StatusReport {
                status: status.status,
                filled: status.filled,
                remaining: status.remaining,
                avg_fill_price: status.average_fill_price,
            }),
            PlaceOrder::Message(notice) => {
                if notice.code < 0 || notice.code >= 2000 {
                    warn!("Order {id} error {}: {}", notice.code, notice.message);
                }
                None
            }
            _ => None,
        });
        track_status(&registry, id, &connected, reports);
    });

    Ok(trade)
}

/// Request cancellation; the outcome lands in the registry. Never fails
/// loudly.
pub(crate) fn cancel_order(client: Arc<Client>, registry: TradeRegistry, order_id: OrderId) {
    info!("Cancelling order {order_id}");
    thread::spawn(move || match client.cancel_order(order_id.0, "") {
        Ok(subscription) => {
            for response in subscription {
                match response {
                    CancelOrder::OrderStatus(s) => {
                        debug!("Cancel status for {order_id}: {}", s.status);
                        if registry.update(order_id, &s.status, s.filled, s.remaining, s.average_fill_price) {
                            break;
                        }
                    }
                    CancelOrder::Notice(notice) => {
                        debug!("Cancel notice for {order_id}: {}", notice.message);
                    }
                }
            }
        }
        Err(e) => {
            warn!("Failed to cancel order {order_id}: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(id: i32, status: &str) -> Trade {
        let mut state = OrderState::pending(10.0);
        state.status = status.to_string();
        Trade {
            order_id: OrderId(id),
            symbol: "AAPL".to_string(),
            action: Action::Buy,
            order_type: "LMT".to_string(),
            total_quantity: 10.0,
            limit_price: Some(100.0),
            aux_price: None,
            state,
        }
    }

    fn report(status: &str, filled: f64) -> Option<StatusReport> {
        Some(StatusReport {
            status: status.to_string(),
            filled,
            remaining: 10.0 - filled,
            avg_fill_price: 100.0,
        })
    }

    #[test]
    fn tracking_stops_at_terminal_status() {
        let registry = TradeRegistry::default();
        registry.insert(trade(1, "PendingSubmit"));
        let connected = AtomicBool::new(true);

        let mut reports = vec![
            report("Submitted", 0.0),
            None,
            report("Filled", 10.0),
            report("Submitted", 0.0),
        ]
        .into_iter();
        track_status(&registry, OrderId(1), &connected, reports.by_ref());

        assert_eq!(reports.len(), 1);
        let state = &registry.snapshot()[0].state;
        assert_eq!(state.status, "Filled");
        assert_eq!(state.filled, 10.0);
    }

    #[test]
    fn tracking_ends_with_exhausted_stream() {
        let registry = TradeRegistry::default();
        registry.insert(trade(2, "PendingSubmit"));
        let connected = AtomicBool::new(true);

        track_status(&registry, OrderId(2), &connected, vec![report("Submitted", 0.0)].into_iter());

        assert_eq!(registry.snapshot()[0].state.status, "Submitted");
    }

    #[test]
    fn tracking_stops_when_session_drops() {
        let registry = TradeRegistry::default();
        registry.insert(trade(3, "PendingSubmit"));
        let connected = AtomicBool::new(false);

        let mut reports = vec![report("Submitted", 0.0), report("Filled", 10.0)].into_iter();
        track_status(&registry, OrderId(3), &connected, reports.by_ref());

        assert_eq!(reports.len(), 1);
        assert_eq!(registry.snapshot()[0].state.status, "PendingSubmit");
    }

    #[test]
    fn registry_forgets_oldest_finished_orders() {
        let registry = TradeRegistry::default();
        registry.insert(trade(1, "Submitted"));
        for id in 2..=(MAX_TRACKED as i32 + 1) {
            registry.insert(trade(id, "Filled"));
        }

        let trades = registry.snapshot();
        assert_eq!(trades.len(), MAX_TRACKED);
        assert_eq!(trades[0].order_id, OrderId(1));
        assert!(trades.iter().all(|t| t.order_id != OrderId(2)));
    }
}
