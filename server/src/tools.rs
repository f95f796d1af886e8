//! Tool registry: names, input schemas, argument decoding and dispatch onto
//! the [`Desk`].

use std::sync::Arc;

use ibdesk::{
    Action, BarRequest, BarSize, Desk, HistoryDuration, OrderId, OrderKind, PlaceOrderParams,
};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};

pub const DEFAULT_DURATION: &str = "1 D";
pub const DEFAULT_BAR_SIZE: &str = "1 hour";

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Text handed back to the caller for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

fn exchange_schema() -> Value {
    json!({ "type": "string", "description": "Exchange (default SMART)" })
}

fn symbol_schema() -> Value {
    json!({ "type": "string", "description": "Ticker symbol, e.g. AAPL" })
}

fn order_schema(price_field: Option<(&str, &str)>) -> Value {
    let mut properties = json!({
        "symbol": symbol_schema(),
        "action": { "type": "string", "enum": ["BUY", "SELL"] },
        "quantity": { "type": "number", "exclusiveMinimum": 0 },
        "exchange": exchange_schema(),
    });
    let mut required = vec!["symbol", "action", "quantity"];
    if let Some((field, description)) = price_field {
        properties[field] = json!({
            "type": "number",
            "exclusiveMinimum": 0,
            "description": description,
        });
        required.push(field);
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Every tool the server exposes.
pub fn definitions() -> Vec<ToolDefinition> {
    let no_args = json!({ "type": "object", "properties": {} });
    vec![
        ToolDefinition {
            name: "get_account_summary",
            description: "Account summary: net liquidation, cash, buying power, gross position value",
            input_schema: no_args.clone(),
        },
        ToolDefinition {
            name: "get_positions",
            description: "Current positions with market value and P&L",
            input_schema: no_args.clone(),
        },
        ToolDefinition {
            name: "get_orders",
            description: "Orders placed in this session with their latest status",
            input_schema: no_args,
        },
        ToolDefinition {
            name: "get_stock_price",
            description: "Snapshot quote (bid, ask, last, close, volume) for a stock",
            input_schema: json!({
                "type": "object",
                "properties": { "symbol": symbol_schema(), "exchange": exchange_schema() },
                "required": ["symbol"],
            }),
        },
        ToolDefinition {
            name: "get_historical_data",
            description: "Historical trade bars over regular trading hours",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "symbol": symbol_schema(),
                    "duration": { "type": "string", "description": "Lookback, e.g. '1 D', '2 W', '1 Y' (default 1 D)" },
                    "bar_size": { "type": "string", "description": "Bar size, e.g. '5 mins', '1 hour', '1 day' (default 1 hour)" },
                    "exchange": exchange_schema(),
                },
                "required": ["symbol"],
            }),
        },
        ToolDefinition {
            name: "get_option_chain",
            description: "Option expirations and strikes per exchange for a stock",
            input_schema: json!({
                "type": "object",
                "properties": { "symbol": symbol_schema(), "exchange": exchange_schema() },
                "required": ["symbol"],
            }),
        },
        ToolDefinition {
            name: "place_limit_order",
            description: "Place a limit order",
            input_schema: order_schema(Some(("limit_price", "Limit price"))),
        },
        ToolDefinition {
            name: "place_market_order",
            description: "Place a market order",
            input_schema: order_schema(None),
        },
        ToolDefinition {
            name: "place_stop_order",
            description: "Place a stop order",
            input_schema: order_schema(Some(("stop_price", "Stop trigger price"))),
        },
        ToolDefinition {
            name: "cancel_order",
            description: "Cancel an order placed in this session",
            input_schema: json!({
                "type": "object",
                "properties": { "order_id": { "type": "integer", "exclusiveMinimum": 0 } },
                "required": ["order_id"],
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct SymbolArgs {
    symbol: String,
    #[serde(default)]
    exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryArgs {
    symbol: String,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bar_size: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderArgs {
    symbol: String,
    action: String,
    quantity: f64,
    #[serde(default)]
    limit_price: Option<f64>,
    #[serde(default)]
    stop_price: Option<f64>,
    #[serde(default)]
    exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelArgs {
    order_id: i32,
}

fn decode<T: DeserializeOwned>(args: &Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args).map_err(|e| Error::InvalidArguments(e.to_string()))
}

fn symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(Error::InvalidArguments("symbol must not be empty".into()));
    }
    Ok(symbol)
}

fn positive(name: &str, value: Option<f64>) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        Some(v) => Err(Error::InvalidArguments(format!("{name} must be > 0, got {v}"))),
        None => Err(Error::InvalidArguments(format!("missing field `{name}`"))),
    }
}

fn parse_action(raw: &str) -> Result<Action> {
    raw.parse()
        .map_err(|_| Error::InvalidArguments(format!("action must be BUY or SELL, got '{raw}'")))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Dispatches tool calls onto a shared desk.
pub struct Tools {
    desk: Arc<Desk>,
    default_exchange: String,
}

impl Tools {
    pub fn new(desk: Arc<Desk>, default_exchange: impl Into<String>) -> Self {
        Self {
            desk,
            default_exchange: default_exchange.into(),
        }
    }

    pub fn desk(&self) -> &Arc<Desk> {
        &self.desk
    }

    fn exchange(&self, requested: Option<String>) -> String {
        requested
            .map(|e| e.trim().to_ascii_uppercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.default_exchange.clone())
    }

    fn order_params(&self, args: OrderArgs, kind: OrderKind) -> Result<PlaceOrderParams> {
        Ok(PlaceOrderParams {
            symbol: symbol(&args.symbol)?,
            action: parse_action(&args.action)?,
            quantity: positive("quantity", Some(args.quantity))?,
            kind,
            exchange: self.exchange(args.exchange),
        })
    }

    /// Run one tool and return its JSON result.
    pub async fn dispatch(&self, name: &str, args: &Value) -> Result<Value> {
        debug!("Tool call {name}: {args}");
        match name {
            "get_account_summary" => to_json(&self.desk.account_summary().await?),
            "get_positions" => to_json(&self.desk.positions().await?),
            "get_orders" => to_json(&self.desk.orders().await?),
            "get_stock_price" => {
                let args: SymbolArgs = decode(args)?;
                let symbol = symbol(&args.symbol)?;
                let exchange = self.exchange(args.exchange);
                to_json(&self.desk.quote(&symbol, &exchange).await?)
            }
            "get_historical_data" => {
                let args: HistoryArgs = decode(args)?;
                let symbol = symbol(&args.symbol)?;
                let exchange = self.exchange(args.exchange);
                let duration: HistoryDuration = args
                    .duration
                    .as_deref()
                    .unwrap_or(DEFAULT_DURATION)
                    .parse()
                    .map_err(|e: ibdesk::Error| Error::InvalidArguments(e.to_string()))?;
                let bar_size: BarSize = args
                    .bar_size
                    .as_deref()
                    .unwrap_or(DEFAULT_BAR_SIZE)
                    .parse()
                    .map_err(|e: ibdesk::Error| Error::InvalidArguments(e.to_string()))?;
                let request = BarRequest::trades(duration, bar_size);
                to_json(&self.desk.historical_bars(&symbol, &exchange, &request).await?)
            }
            "get_option_chain" => {
                let args: SymbolArgs = decode(args)?;
                let symbol = symbol(&args.symbol)?;
                let exchange = self.exchange(args.exchange);
                to_json(&self.desk.option_chain(&symbol, &exchange).await?)
            }
            "place_limit_order" => {
                let args: OrderArgs = decode(args)?;
                let limit_price = positive("limit_price", args.limit_price)?;
                let params = self.order_params(args, OrderKind::Limit { limit_price })?;
                to_json(&self.desk.place_order(params).await?)
            }
            "place_market_order" => {
                let args: OrderArgs = decode(args)?;
                let params = self.order_params(args, OrderKind::Market)?;
                to_json(&self.desk.place_order(params).await?)
            }
            "place_stop_order" => {
                let args: OrderArgs = decode(args)?;
                let stop_price = positive("stop_price", args.stop_price)?;
                let params = self.order_params(args, OrderKind::Stop { stop_price })?;
                to_json(&self.desk.place_order(params).await?)
            }
            "cancel_order" => {
                let args: CancelArgs = decode(args)?;
                if args.order_id <= 0 {
                    return Err(Error::InvalidArguments(format!(
                        "order_id must be > 0, got {}",
                        args.order_id
                    )));
                }
                to_json(&self.desk.cancel_order(OrderId(args.order_id)).await?)
            }
            other => Err(Error::UnknownTool(other.to_string())),
        }
    }

    /// Run one tool and render the outcome as text; failures become
    /// `Error: <message>`.
    pub async fn call(&self, name: &str, args: &Value) -> ToolOutput {
        let rendered = match self.dispatch(name, args).await {
            Ok(value) => serde_json::to_string_pretty(&value).map_err(Error::from),
            Err(e) => Err(e),
        };
        match rendered {
            Ok(text) => ToolOutput {
                text,
                is_error: false,
            },
            Err(e) => {
                error!("Tool {name} failed: {e}");
                ToolOutput {
                    text: format!("Error: {e}"),
                    is_error: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_an_object_schema() {
        let defs = definitions();
        assert_eq!(defs.len(), 10);
        for def in &defs {
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
        }
    }

    #[test]
    fn order_schemas_require_their_price() {
        let defs = definitions();
        let find = |name: &str| defs.iter().find(|d| d.name == name).unwrap().input_schema.clone();
        let limit = find("place_limit_order");
        assert!(limit["required"].as_array().unwrap().contains(&json!("limit_price")));
        let stop = find("place_stop_order");
        assert!(stop["required"].as_array().unwrap().contains(&json!("stop_price")));
        let market = find("place_market_order");
        assert_eq!(market["required"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn definition_serializes_camel_case_schema_key() {
        let value = serde_json::to_value(&definitions()[0]).unwrap();
        assert!(value.get("inputSchema").is_some());
    }

    #[test]
    fn positive_rejects_zero_negative_and_nan() {
        assert!(positive("quantity", Some(0.0)).is_err());
        assert!(positive("quantity", Some(-1.0)).is_err());
        assert!(positive("quantity", Some(f64::NAN)).is_err());
        assert!(positive("quantity", None).is_err());
        assert_eq!(positive("quantity", Some(2.5)).unwrap(), 2.5);
    }

    #[test]
    fn symbol_is_normalized() {
        assert_eq!(symbol(" aapl ").unwrap(), "AAPL");
        assert!(symbol("  ").is_err());
    }

    #[test]
    fn decode_treats_null_as_empty_object() {
        let err = decode::<SymbolArgs>(&Value::Null).unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));
        let args: SymbolArgs = decode(&json!({ "symbol": "MSFT" })).unwrap();
        assert_eq!(args.symbol, "MSFT");
        assert!(args.exchange.is_none());
    }
}
