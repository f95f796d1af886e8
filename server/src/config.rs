//! TOML configuration loading, environment overrides and validation.

use std::path::Path;
use std::time::Duration;

use ibdesk::{ConnectParams, DeskSettings};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Paper or live gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

impl std::str::FromStr for TradingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => Err(Error::Config(format!(
                "trading mode must be 'paper' or 'live', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_paper_port")]
    pub paper_port: u16,
    #[serde(default = "default_live_port")]
    pub live_port: u16,
    /// Explicit port; wins over the mode-based selection when set.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_mode")]
    pub trading_mode: TradingMode,
    #[serde(default = "default_client_id")]
    pub client_id: i32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "ib-gateway".into()
}
fn default_paper_port() -> u16 {
    4002
}
fn default_live_port() -> u16 {
    4001
}
fn default_mode() -> TradingMode {
    TradingMode::Paper
}
fn default_client_id() -> i32 {
    1
}
fn default_connect_timeout() -> u64 {
    20
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            paper_port: default_paper_port(),
            live_port: default_live_port(),
            port: None,
            trading_mode: default_mode(),
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_quote_timeout")]
    pub quote_timeout_secs: u64,
    #[serde(default = "default_ack_delay")]
    pub order_ack_delay_ms: u64,
    #[serde(default = "default_exchange")]
    pub default_exchange: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_listen_port() -> u16 {
    8000
}
fn default_reconnect_interval() -> u64 {
    5
}
fn default_quote_timeout() -> u64 {
    10
}
fn default_ack_delay() -> u64 {
    1000
}
fn default_exchange() -> String {
    "SMART".into()
}
fn default_currency() -> String {
    "USD".into()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            listen_port: default_listen_port(),
            reconnect_interval_secs: default_reconnect_interval(),
            quote_timeout_secs: default_quote_timeout(),
            order_ack_delay_ms: default_ack_delay(),
            default_exchange: default_exchange(),
            currency: default_currency(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name}: cannot parse '{raw}'")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{name}: expected a boolean, got '{raw}'"))),
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults; then apply
    /// environment overrides.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Config::default()
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("IBKR_HOST") {
            self.connection.host = host;
        }
        if let Some(port) = lookup("IBKR_GATEWAY_PORT") {
            self.connection.port = Some(parse_env("IBKR_GATEWAY_PORT", &port)?);
        }
        if let Some(mode) = lookup("IBKR_TRADING_MODE") {
            self.connection.trading_mode = mode.parse()?;
        }
        if let Some(id) = lookup("IBKR_CLIENT_ID") {
            self.connection.client_id = parse_env("IBKR_CLIENT_ID", &id)?;
        }
        if let Some(flag) = lookup("IBKR_READ_ONLY") {
            self.service.read_only = parse_bool("IBKR_READ_ONLY", &flag)?;
        }
        if let Some(port) = lookup("MCP_PORT") {
            self.service.listen_port = parse_env("MCP_PORT", &port)?;
        }
        Ok(())
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.connection.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.gateway_port() == 0 {
            return Err(Error::Config("gateway port must be > 0".into()));
        }
        if self.service.listen_port == 0 {
            return Err(Error::Config("listen_port must be > 0".into()));
        }
        if self.connection.connect_timeout_secs == 0 {
            return Err(Error::Config("connect_timeout_secs must be > 0".into()));
        }
        if self.service.reconnect_interval_secs == 0 {
            return Err(Error::Config("reconnect_interval_secs must be > 0".into()));
        }
        if self.service.quote_timeout_secs == 0 {
            return Err(Error::Config("quote_timeout_secs must be > 0".into()));
        }
        if self.service.currency.trim().is_empty() {
            return Err(Error::Config("currency must not be empty".into()));
        }
        Ok(())
    }

    /// Gateway port: explicit override, else by trading mode.
    pub fn gateway_port(&self) -> u16 {
        self.connection.port.unwrap_or(match self.connection.trading_mode {
            TradingMode::Paper => self.connection.paper_port,
            TradingMode::Live => self.connection.live_port,
        })
    }

    /// IBKR connection address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.connection.host, self.gateway_port())
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.connection.host.clone(),
            port: self.gateway_port(),
            client_id: self.connection.client_id,
        }
    }

    pub fn desk_settings(&self) -> DeskSettings {
        DeskSettings {
            read_only: self.service.read_only,
            currency: self.service.currency.clone(),
            connect_timeout: Duration::from_secs(self.connection.connect_timeout_secs),
            quote_timeout: Duration::from_secs(self.service.quote_timeout_secs),
            ack_delay: Duration::from_millis(self.service.order_ack_delay_ms),
            reconnect_interval: Duration::from_secs(self.service.reconnect_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn example_toml() -> &'static str {
        r#"
[connection]
host = "127.0.0.1"
paper_port = 4002
live_port = 4001
trading_mode = "live"
client_id = 100
connect_timeout_secs = 15

[service]
read_only = true
listen_port = 9000
quote_timeout_secs = 3
order_ack_delay_ms = 500
"#
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn parse_example_config() {
        let config: Config = toml::from_str(example_toml()).unwrap();
        assert_eq!(config.connection.client_id, 100);
        assert_eq!(config.connection.trading_mode, TradingMode::Live);
        assert!(config.service.read_only);
        assert_eq!(config.service.listen_port, 9000);
        assert_eq!(config.service.default_exchange, "SMART");
        assert_eq!(config.service.reconnect_interval_secs, 5);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.connection.host, "ib-gateway");
        assert_eq!(config.gateway_port(), 4002);
        assert_eq!(config.service.currency, "USD");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn port_follows_trading_mode() {
        let config: Config = toml::from_str(example_toml()).unwrap();
        assert_eq!(config.gateway_port(), 4001);
        assert_eq!(config.address(), "127.0.0.1:4001");
    }

    #[test]
    fn explicit_port_wins() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config
            .apply_env(env(&[("IBKR_GATEWAY_PORT", "7497")]))
            .unwrap();
        assert_eq!(config.gateway_port(), 7497);
    }

    #[test]
    fn env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("IBKR_HOST", "gw.internal"),
                ("IBKR_TRADING_MODE", "LIVE"),
                ("IBKR_CLIENT_ID", "42"),
                ("IBKR_READ_ONLY", "yes"),
                ("MCP_PORT", "8080"),
            ]))
            .unwrap();
        assert_eq!(config.connection.host, "gw.internal");
        assert_eq!(config.gateway_port(), 4001);
        assert_eq!(config.connection.client_id, 42);
        assert!(config.service.read_only);
        assert_eq!(config.service.listen_port, 8080);
    }

    #[test]
    fn bad_env_values_are_errors() {
        let mut config = Config::default();
        assert!(config.apply_env(env(&[("IBKR_CLIENT_ID", "abc")])).is_err());
        assert!(config.apply_env(env(&[("IBKR_READ_ONLY", "maybe")])).is_err());
        assert!(config.apply_env(env(&[("IBKR_TRADING_MODE", "demo")])).is_err());
    }

    #[test]
    fn validate_catches_bad_port() {
        let mut config = Config::default();
        config.connection.port = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_empty_host() {
        let mut config = Config::default();
        config.connection.host = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn desk_settings_conversion() {
        let config: Config = toml::from_str(example_toml()).unwrap();
        let settings = config.desk_settings();
        assert!(settings.read_only);
        assert_eq!(settings.quote_timeout, Duration::from_secs(3));
        assert_eq!(settings.ack_delay, Duration::from_millis(500));
        assert_eq!(settings.connect_timeout, Duration::from_secs(15));
        let params = config.connect_params();
        assert_eq!(params.port, 4001);
        assert_eq!(params.client_id, 100);
    }
}
