//! One-shot CLI commands: connection status and a positions table.

use std::collections::BTreeMap;

use ibdesk::{AccountEntry, Desk, Position};

use crate::error::Result;

/// Connect once and print the account summary.
pub async fn check_status(desk: &Desk) -> Result<()> {
    let params = desk.connect_params();
    print!(
        "Connecting to IB Gateway at {} (client_id={})... ",
        params.address(),
        params.client_id
    );
    desk.connect().await?;
    println!("OK");

    let summary = desk.account_summary().await?;
    print!("{}", format_summary(&summary));
    if desk.is_read_only() {
        println!("Read-only mode: order placement and cancellation are disabled");
    }
    Ok(())
}

/// Print current positions with P&L.
pub async fn show_positions(desk: &Desk) -> Result<()> {
    let positions = desk.positions().await?;
    print!("{}", format_positions(&positions));
    Ok(())
}

pub fn format_summary(summary: &BTreeMap<String, AccountEntry>) -> String {
    let mut out = String::new();
    for (tag, entry) in summary {
        out.push_str(&format!(
            "  {:20} {:>16} {:4} ({})\n",
            tag, entry.value, entry.currency, entry.account
        ));
    }
    out
}

pub fn format_positions(positions: &[Position]) -> String {
    if positions.is_empty() {
        return "No positions.\n".to_string();
    }

    let mut out = String::from("CURRENT POSITIONS:\n");
    out.push_str(&format!(
        "  {:10} {:8} {:>10} {:>10} {:>12} {:>12} {:>12}\n",
        "Account", "Symbol", "Qty", "Avg cost", "Value", "Unreal P&L", "Real P&L"
    ));
    for pos in positions {
        out.push_str(&format!(
            "  {:10} {:8} {:>10} {:>10.2} {:>12.2} {:>12.2} {:>12.2}\n",
            pos.account,
            pos.symbol,
            pos.position,
            pos.avg_cost,
            pos.market_value,
            pos.unrealized_pnl,
            pos.realized_pnl,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(symbol: &str, qty: f64) -> Position {
        Position {
            account: "DU1".into(),
            symbol: symbol.into(),
            sec_type: "STK".into(),
            exchange: "NASDAQ".into(),
            position: qty,
            avg_cost: 150.0,
            market_price: 190.0,
            market_value: qty * 190.0,
            unrealized_pnl: 400.0,
            realized_pnl: 0.0,
        }
    }

    #[test]
    fn empty_positions() {
        assert_eq!(format_positions(&[]), "No positions.\n");
    }

    #[test]
    fn positions_table_has_one_row_each() {
        let table = format_positions(&[position("AAPL", 10.0), position("MSFT", 5.0)]);
        assert_eq!(table.lines().count(), 4);
        assert!(table.contains("AAPL"));
        assert!(table.contains("1900.00"));
    }

    #[test]
    fn summary_lists_tags_in_order() {
        let mut summary = BTreeMap::new();
        for tag in ["NetLiquidation", "BuyingPower"] {
            summary.insert(
                tag.to_string(),
                AccountEntry {
                    value: "1000".into(),
                    currency: "USD".into(),
                    account: "DU1".into(),
                },
            );
        }
        let text = format_summary(&summary);
        let first = text.lines().next().unwrap();
        assert!(first.contains("BuyingPower"));
    }
}
