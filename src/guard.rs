//! Read-only admission check for mutating operations.
//!
//! Every mutation is a [`Mutation`] value and passes through
//! [`ReadOnlyGuard::admit`] before anything touches the session.

use log::warn;
use serde::Serialize;

use crate::orders::{CancelResult, OrderResult, PlaceOrderParams};
use crate::types::{OrderId, STATUS_REJECTED};

/// Order id reported for placements that were never submitted.
pub const UNSUBMITTED_ORDER_ID: OrderId = OrderId(0);

const READ_ONLY_MESSAGE: &str = "read-only mode is enabled; order operations are disabled";

/// A broker-mutating operation with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Place(PlaceOrderParams),
    Cancel { order_id: OrderId },
}

/// Result of a mutation, rejected or executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MutationOutcome {
    Placed(OrderResult),
    Cancelled(CancelResult),
}

/// Decision taken before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Allowed(Mutation),
    Rejected(MutationOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOnlyGuard {
    read_only: bool,
}

impl ReadOnlyGuard {
    pub fn new(read_only: bool) -> Self {
        Self { read_only }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn admit(&self, mutation: Mutation) -> Admission {
        if !self.read_only {
            return Admission::Allowed(mutation);
        }
        Admission::Rejected(reject(&mutation))
    }
}

/// Synthetic rejection echoing the caller's parameters.
fn reject(mutation: &Mutation) -> MutationOutcome {
    match mutation {
        Mutation::Place(params) => {
            warn!(
                "Read-only: rejected {} {} {} {}",
                params.kind.code(),
                params.action,
                params.quantity,
                params.symbol
            );
            let mut result = OrderResult::echo(params, UNSUBMITTED_ORDER_ID, STATUS_REJECTED);
            result.message = Some(READ_ONLY_MESSAGE.to_string());
            MutationOutcome::Placed(result)
        }
        Mutation::Cancel { order_id } => {
            warn!("Read-only: rejected cancel of order {order_id}");
            MutationOutcome::Cancelled(CancelResult {
                order_id: *order_id,
                status: STATUS_REJECTED.to_string(),
                message: Some(READ_ONLY_MESSAGE.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, OrderKind};

    fn limit_buy() -> Mutation {
        Mutation::Place(PlaceOrderParams {
            symbol: "AAPL".into(),
            action: Action::Buy,
            quantity: 10.0,
            kind: OrderKind::Limit { limit_price: 150.0 },
            exchange: "SMART".into(),
        })
    }

    #[test]
    fn allowed_when_writable() {
        let guard = ReadOnlyGuard::new(false);
        assert_eq!(guard.admit(limit_buy()), Admission::Allowed(limit_buy()));
    }

    #[test]
    fn placement_rejection_echoes_params() {
        let guard = ReadOnlyGuard::new(true);
        let Admission::Rejected(MutationOutcome::Placed(result)) = guard.admit(limit_buy()) else {
            panic!("expected placement rejection");
        };
        assert_eq!(result.order_id, UNSUBMITTED_ORDER_ID);
        assert_eq!(result.status, STATUS_REJECTED);
        assert_eq!(result.symbol, "AAPL");
        assert_eq!(result.action, Action::Buy);
        assert_eq!(result.quantity, 10.0);
        assert_eq!(result.limit_price, Some(150.0));
        assert!(result.message.is_some());
    }

    #[test]
    fn cancel_rejection_echoes_order_id() {
        let guard = ReadOnlyGuard::new(true);
        let outcome = guard.admit(Mutation::Cancel {
            order_id: OrderId(42),
        });
        let Admission::Rejected(MutationOutcome::Cancelled(result)) = outcome else {
            panic!("expected cancel rejection");
        };
        assert_eq!(result.order_id, OrderId(42));
        assert_eq!(result.status, STATUS_REJECTED);
    }
}
