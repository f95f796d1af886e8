//! Blocking gateway requests: account data, positions, P&L, contracts,
//! market data, historical bars and option parameters.
//!
//! Every function here blocks on the `ibapi` client and is run off the async
//! runtime by [`super::IbkrSession`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use ibapi::accounts::types::{AccountGroup, AccountId, ContractId};
use ibapi::accounts::{AccountSummaryResult, PositionUpdate};
use ibapi::client::blocking::Client;
use ibapi::contracts::{Contract, Currency, Exchange, SecurityType, Symbol};
use ibapi::market_data::TradingHours;
use ibapi::market_data::historical::{
    BarSize as IbBarSize, Duration as IbDuration, WhatToShow,
};
use ibapi::market_data::realtime::{TickType, TickTypes};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::desk::SUMMARY_TAGS;
use crate::numeric::positive_or;
use crate::types::*;

/// Wait for the first P&L update of one position.
const PNL_WAIT: Duration = Duration::from_secs(2);
/// Poll interval for streams drained on worker threads.
pub(crate) const POLL: Duration = Duration::from_millis(250);
/// Upper bound on collecting option parameter rows.
const CHAIN_WAIT: Duration = Duration::from_secs(10);

pub(crate) fn stock_contract(spec: &ContractSpec) -> Contract {
    Contract {
        symbol: Symbol(spec.symbol.clone()),
        security_type: SecurityType::Stock,
        exchange: Exchange(spec.exchange.clone()),
        currency: Currency(spec.currency.clone()),
        ..Default::default()
    }
}

/// Contract for an already resolved instrument (pinned by contract id).
pub(crate) fn instrument_contract(instrument: &Instrument) -> Contract {
    Contract {
        contract_id: instrument.con_id,
        symbol: Symbol(instrument.symbol.clone()),
        security_type: SecurityType::Stock,
        exchange: Exchange(instrument.exchange.clone()),
        primary_exchange: Exchange(instrument.primary_exchange.clone()),
        currency: Currency(instrument.currency.clone()),
        ..Default::default()
    }
}

/// Gateway security type code (`STK`, `OPT`, `FUT`, ...).
fn sec_type_code(contract: &Contract) -> String {
    contract.security_type.to_string()
}

pub(crate) fn account_values(client: &Client) -> Result<Vec<AccountValue>, ibapi::Error> {
    let group = AccountGroup("All".to_string());
    let subscription = client.account_summary(&group, &SUMMARY_TAGS)?;

    let mut values = Vec::new();
    for result in subscription {
        match result {
            AccountSummaryResult::Summary(s) => {
                debug!("Account: {}={} {}", s.tag, s.value, s.currency);
                values.push(AccountValue {
                    account: s.account.to_string(),
                    tag: s.tag.to_string(),
                    value: s.value.to_string(),
                    currency: s.currency.to_string(),
                });
            }
            AccountSummaryResult::End => break,
        }
    }
    Ok(values)
}

pub(crate) fn positions(client: &Client) -> Result<Vec<PositionRecord>, ibapi::Error> {
    let subscription = client.positions()?;

    let mut positions = Vec::new();
    for update in subscription {
        match update {
            PositionUpdate::Position(pos) => {
                debug!(
                    "Position: {} {} qty={} avg_cost={:.2}",
                    pos.account, pos.contract.symbol, pos.position, pos.average_cost
                );
                positions.push(PositionRecord {
                    account: pos.account.to_string(),
                    con_id: pos.contract.contract_id,
                    symbol: pos.contract.symbol.to_string(),
                    sec_type: sec_type_code(&pos.contract),
                    exchange: pos.contract.exchange.to_string(),
                    position: pos.position,
                    avg_cost: pos.average_cost,
                });
            }
            PositionUpdate::PositionEnd => break,
        }
    }

    info!("Fetched {} positions", positions.len());
    Ok(positions)
}

/// First P&L update per position; positions that report nothing within
/// [`PNL_WAIT`] are left out.
pub(crate) fn pnl(
    client: &Client,
    positions: &[PositionRecord],
) -> Result<Vec<PnlRecord>, ibapi::Error> {
    let mut records = Vec::with_capacity(positions.len());
    for pos in positions {
        let account = AccountId(pos.account.clone());
        let subscription = client.pnl_single(&account, ContractId(pos.con_id), None)?;
        match subscription.next_timeout(PNL_WAIT) {
            Some(update) => records.push(PnlRecord {
                account: pos.account.clone(),
                con_id: pos.con_id,
                position: update.position,
                daily_pnl: Some(update.daily_pnl),
                unrealized_pnl: Some(update.unrealized_pnl),
                realized_pnl: Some(update.realized_pnl),
                value: Some(update.value),
            }),
            None => warn!("No P&L for {} ({}) within {:?}", pos.symbol, pos.account, PNL_WAIT),
        }
        subscription.cancel();
    }
    Ok(records)
}

pub(crate) fn qualify(client: &Client, spec: &ContractSpec) -> Result<Vec<Instrument>, ibapi::Error> {
    let details = client.contract_details(&stock_contract(spec))?;
    Ok(details
        .into_iter()
        .map(|d| Instrument {
            con_id: d.contract.contract_id,
            symbol: d.contract.symbol.to_string(),
            sec_type: spec.sec_type.clone(),
            exchange: d.contract.exchange.to_string(),
            primary_exchange: d.contract.primary_exchange.to_string(),
            currency: d.contract.currency.to_string(),
        })
        .collect())
}

fn tick_field(tick_type: &TickType) -> Option<TickField> {
    match tick_type {
        TickType::Bid => Some(TickField::Bid),
        TickType::Ask => Some(TickField::Ask),
        TickType::Last => Some(TickField::Last),
        TickType::Close => Some(TickField::Close),
        TickType::Volume => Some(TickField::Volume),
        _ => None,
    }
}

/// Drain a snapshot request into `ticks` until it ends, the receiver goes
/// away, or `cancelled` is raised. Runs on its own thread.
///
/// The outcome of the request itself is reported once on `ready` before any
/// tick is drained.
pub(crate) fn stream_snapshot(
    client: Arc<Client>,
    contract: Contract,
    ticks: mpsc::UnboundedSender<Tick>,
    cancelled: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<(), ibapi::Error>>,
) {
    let subscription = match client.market_data(&contract).snapshot().subscribe() {
        Ok(s) => s,
        Err(e) => {
            warn!("Market data request for {} failed: {e}", contract.symbol);
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        subscription.cancel();
        return;
    }

    while !cancelled.load(Ordering::SeqCst) {
        let Some(tick) = subscription.next_timeout(POLL) else {
            continue;
        };
        let update = match tick {
            TickTypes::Price(p) => tick_field(&p.tick_type).map(|f| (f, p.price)),
            TickTypes::PriceSize(ps) => tick_field(&ps.price_tick_type).map(|f| (f, ps.price)),
            TickTypes::Size(s) => tick_field(&s.tick_type).map(|f| (f, s.size)),
            TickTypes::SnapshotEnd => break,
            _ => None,
        };
        if let Some((field, value)) = update {
            let tick = Tick {
                field,
                value,
                time: Utc::now(),
            };
            if ticks.send(tick).is_err() {
                break;
            }
        }
    }
    subscription.cancel();
}

fn ib_duration(d: &HistoryDuration) -> IbDuration {
    let n = i32::try_from(d.amount).unwrap_or(i32::MAX);
    match d.unit {
        DurationUnit::Seconds => IbDuration::seconds(n),
        DurationUnit::Days => IbDuration::days(n),
        DurationUnit::Weeks => IbDuration::weeks(n),
        DurationUnit::Months => IbDuration::months(n),
        DurationUnit::Years => IbDuration::years(n),
    }
}

fn ib_bar_size(size: BarSize) -> IbBarSize {
    match size {
        BarSize::Sec => IbBarSize::Sec,
        BarSize::Sec5 => IbBarSize::Sec5,
        BarSize::Sec15 => IbBarSize::Sec15,
        BarSize::Sec30 => IbBarSize::Sec30,
        BarSize::Min => IbBarSize::Min,
        BarSize::Min2 => IbBarSize::Min2,
        BarSize::Min3 => IbBarSize::Min3,
        BarSize::Min5 => IbBarSize::Min5,
        BarSize::Min15 => IbBarSize::Min15,
        BarSize::Min20 => IbBarSize::Min20,
        BarSize::Min30 => IbBarSize::Min30,
        BarSize::Hour => IbBarSize::Hour,
        BarSize::Hour2 => IbBarSize::Hour2,
        BarSize::Hour3 => IbBarSize::Hour3,
        BarSize::Hour4 => IbBarSize::Hour4,
        BarSize::Hour8 => IbBarSize::Hour8,
        BarSize::Day => IbBarSize::Day,
        BarSize::Week => IbBarSize::Week,
        BarSize::Month => IbBarSize::Month,
    }
}

/// Trade-price bars ending now.
pub(crate) fn historical_bars(
    client: &Client,
    instrument: &Instrument,
    request: &BarRequest,
) -> Result<Vec<Bar>, ibapi::Error> {
    let trading_hours = if request.use_rth {
        TradingHours::Regular
    } else {
        TradingHours::Extended
    };
    let data = client.historical_data(
        &instrument_contract(instrument),
        None,
        ib_duration(&request.duration),
        ib_bar_size(request.bar_size),
        WhatToShow::Trades,
        trading_hours,
    )?;

    Ok(data
        .bars
        .iter()
        .map(|b| Bar {
            date: b.date.to_string(),
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
        })
        .collect())
}

pub(crate) fn option_chains(
    client: &Client,
    instrument: &Instrument,
) -> Result<Vec<OptionChain>, ibapi::Error> {
    let subscription =
        client.option_chain(&instrument.symbol, "", SecurityType::Stock, instrument.con_id)?;

    let started = Instant::now();
    let mut chains = Vec::new();
    while started.elapsed() < CHAIN_WAIT {
        match subscription.next_timeout(Duration::from_secs(1)) {
            Some(chain) => chains.push(OptionChain {
                exchange: chain.exchange.to_string(),
                underlying_con_id: chain.underlying_contract_id,
                trading_class: chain.trading_class.to_string(),
                multiplier: chain.multiplier.to_string(),
                expirations: chain.expirations.clone(),
                strikes: chain
                    .strikes
                    .iter()
                    .filter_map(|s| positive_or(Some(*s), None))
                    .collect(),
            }),
            None => break,
        }
    }
    Ok(chains)
}
