//! Error taxonomy for the engine.
//!
//! Validation failures are returned to the caller of the dispatcher,
//! matching failures stay inside one instrument's loop.

use std::path::PathBuf;

use thiserror::Error;

use crate::command::Side;

/// Rejection reasons for inbound order requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("unknown instrument: {instrument_id}")]
    UnknownInstrument { instrument_id: String },

    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(u64),

    #[error("limit order requires a price")]
    MissingPrice,

    #[error("price must be positive, got {0}")]
    InvalidPrice(String),

    #[error("market {side} order rejected: no liquidity on the opposite side")]
    NoLiquidity { side: Side },

    #[error("order {broker_id}/{client_order_id} already exists")]
    DuplicateOrder {
        broker_id: String,
        client_order_id: String,
    },

    #[error("new quantity {requested} does not exceed filled quantity {filled}")]
    AmendBelowFilled { requested: u64, filled: u64 },

    #[error("market orders cannot be re-priced")]
    MarketOrderReprice,
}

/// Failure of a single matching attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("trade channel closed for {instrument_id}")]
    TradeChannelClosed { instrument_id: String },

    #[error("market data channel closed for {instrument_id}")]
    MarketDataChannelClosed { instrument_id: String },

    #[error("book inconsistent for {instrument_id}: {detail}")]
    BookInconsistent {
        instrument_id: String,
        detail: &'static str,
    },
}

impl MatchError {
    /// Whether the matching loop must stop after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MatchError::TradeChannelClosed { .. } | MatchError::MarketDataChannelClosed { .. }
        )
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Malformed rows in a CSV order feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown side: {0}")]
    UnknownSide(String),

    #[error("unknown order type: {0}")]
    UnknownOrderType(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("malformed feed row: {0}")]
    Csv(String),
}

impl From<csv::Error> for FeedError {
    fn from(err: csv::Error) -> Self {
        FeedError::Csv(err.to_string())
    }
}
