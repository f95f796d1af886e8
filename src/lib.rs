//! # ibdesk
//!
//! Session and order-execution core for trading against Interactive Brokers
//! (TWS / IB Gateway).
//!
//! The [`Desk`] owns the single gateway session through a
//! [`ConnectionManager`], resolves contracts, waits for snapshot quotes with
//! a bounded timeout, places and cancels orders, and refuses every mutating
//! operation while read-only mode is on.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ibdesk::{Action, ConnectParams, Desk, DeskSettings, OrderKind, PlaceOrderParams};
//!
//! let desk = Desk::new(connector, params, DeskSettings::default());
//! let supervisor = desk.spawn_supervisor();
//!
//! let quote = desk.quote("AAPL", "SMART").await?;
//! let result = desk
//!     .place_order(PlaceOrderParams {
//!         symbol: "AAPL".into(),
//!         action: Action::Buy,
//!         quantity: 10.0,
//!         kind: OrderKind::Limit { limit_price: 150.0 },
//!         exchange: "SMART".into(),
//!     })
//!     .await?;
//! ```
//!
//! ## Features
//!
//! - `ibkr`: the [`ibkr`] connector built on the `ibapi` client.

pub mod broker;
pub mod connection;
pub mod contracts;
pub mod desk;
pub mod error;
pub mod guard;
pub mod market_data;
pub mod mock;
pub mod numeric;
pub mod orders;
pub mod supervisor;
pub mod types;

#[cfg(feature = "ibkr")]
pub mod ibkr;

pub use broker::{Connector, Session};
pub use connection::ConnectionManager;
pub use desk::{Desk, DeskSettings, OrderView};
pub use error::{BrokerError, Error, Result};
pub use guard::{Admission, Mutation, MutationOutcome, ReadOnlyGuard};
pub use orders::{CancelResult, OrderResult, PlaceOrderParams};
pub use supervisor::{ReconnectSupervisor, SupervisorExit};
pub use types::*;
