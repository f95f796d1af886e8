//! One-shot quote snapshots with a bounded wait.

use std::time::Duration;

use log::{debug, info};
use tokio::time::{Instant, timeout_at};

use crate::broker::{FeedId, Session};
use crate::error::{Error, Result};
use crate::numeric::positive_or;
use crate::types::{Instrument, Quote, Tick, TickField};

/// Default upper bound on waiting for the first usable price.
pub const DEFAULT_QUOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cancels the feed when dropped, whichever way the wait ends.
struct FeedGuard<'a> {
    session: &'a dyn Session,
    feed: FeedId,
}

impl Drop for FeedGuard<'_> {
    fn drop(&mut self) {
        debug!("Cancelling market data feed {:?}", self.feed);
        self.session.cancel_market_data(self.feed);
    }
}

/// Apply one tick to the quote. Non-positive values are "no data".
fn apply_tick(quote: &mut Quote, tick: &Tick) {
    let value = positive_or(Some(tick.value), None);
    let slot = match tick.field {
        TickField::Bid => &mut quote.bid,
        TickField::Ask => &mut quote.ask,
        TickField::Last => &mut quote.last,
        TickField::Close => &mut quote.close,
        TickField::Volume => &mut quote.volume,
    };
    if value.is_some() {
        *slot = value;
        quote.time = Some(tick.time);
    }
}

/// Request a snapshot and wait until a price arrives or `wait` elapses.
///
/// A timeout is not an error: the quote is returned with whatever fields are
/// known, possibly none.
pub async fn snapshot_quote(
    session: &dyn Session,
    instrument: &Instrument,
    wait: Duration,
) -> Result<Quote> {
    let mut feed = session
        .subscribe_snapshot(instrument)
        .await
        .map_err(|e| Error::broker(format!("market data request for {}", instrument.symbol), e))?;
    let _guard = FeedGuard {
        session,
        feed: feed.id,
    };

    let deadline = Instant::now() + wait;
    let mut quote = Quote::empty(&instrument.symbol);

    loop {
        match timeout_at(deadline, feed.ticks.recv()).await {
            Ok(Some(tick)) => {
                debug!("{} tick {:?}={}", instrument.symbol, tick.field, tick.value);
                apply_tick(&mut quote, &tick);
                if quote.has_price() {
                    break;
                }
            }
            Ok(None) => {
                debug!("{} snapshot feed ended", instrument.symbol);
                break;
            }
            Err(_) => {
                info!(
                    "No usable quote for {} within {}s, returning partial data",
                    instrument.symbol,
                    wait.as_secs_f64()
                );
                break;
            }
        }
    }

    Ok(quote)
}
