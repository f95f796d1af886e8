//! Error types for the session core.

/// Failures reported by a broker session or connector (transport level).
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not connected")]
    NotConnected,

    #[error("request failed: {0}")]
    Request(String),

    #[error("order error: {0}")]
    Order(String),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by desk operations to the calling boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The gateway session could not be established.
    #[error("IBKR connection error: {0}")]
    Connection(String),

    /// The symbol/exchange pair did not map to exactly one tradable contract.
    #[error("could not resolve {symbol} on {exchange}: {reason}")]
    Resolution {
        symbol: String,
        exchange: String,
        reason: String,
    },

    /// The broker rejected or failed a request.
    #[error("{context}: {source}")]
    BrokerRequest {
        context: String,
        #[source]
        source: BrokerError,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Wrap a broker failure with the operation it interrupted.
    pub fn broker(context: impl Into<String>, source: BrokerError) -> Self {
        Error::BrokerRequest {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
