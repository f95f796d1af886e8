//! Symbol to instrument resolution.

use log::debug;

use crate::broker::Session;
use crate::error::{Error, Result};
use crate::types::{ContractSpec, Instrument};

/// Resolve a stock symbol on `exchange` to exactly one instrument.
///
/// Not cached: the broker may answer with a primary exchange that differs
/// from the one requested, and that answer can change between calls.
pub async fn resolve(
    session: &dyn Session,
    symbol: &str,
    exchange: &str,
    currency: &str,
) -> Result<Instrument> {
    let spec = ContractSpec::stock(symbol, exchange, currency);
    let mut matches = session
        .qualify(&spec)
        .await
        .map_err(|e| Error::broker(format!("contract lookup for {symbol} on {exchange}"), e))?;

    let resolution_error = |reason: String| Error::Resolution {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        reason,
    };

    matches.sort_by_key(|i| i.con_id);
    matches.dedup_by_key(|i| i.con_id);

    match matches.len() {
        0 => Err(resolution_error("unknown contract".into())),
        1 => {
            let instrument = matches.remove(0);
            debug!(
                "Resolved {symbol}/{exchange} to con_id={} (primary {})",
                instrument.con_id, instrument.primary_exchange
            );
            Ok(instrument)
        }
        n => Err(resolution_error(format!(
            "ambiguous contract ({n} matches: {})",
            matches
                .iter()
                .map(|i| format!("{}@{}", i.con_id, i.primary_exchange))
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
