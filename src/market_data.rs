//! Market data snapshots published after every match.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::order_book::BookSnapshot;
use crate::price::Price;

/// Aggregated quantity at one price.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DepthLevel {
    pub price: Price,
    /// Total remaining quantity at this price
    pub quantity: u64,
    /// Number of resting orders at this price
    pub orders: usize,
}

/// Top-of-book view of one instrument, emitted after each trade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarketData {
    pub instrument_id: String,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_trade_price: Option<Price>,
    pub timestamp: DateTime<Utc>,
    /// Best levels first
    pub bid_levels: Vec<DepthLevel>,
    /// Best levels first
    pub ask_levels: Vec<DepthLevel>,
}

impl MarketData {
    pub fn from_snapshot(
        instrument_id: &str,
        snapshot: BookSnapshot,
        last_trade_price: Option<Price>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument_id: instrument_id.to_owned(),
            best_bid: snapshot.best_bid,
            best_ask: snapshot.best_ask,
            last_trade_price,
            timestamp,
            bid_levels: snapshot.bids,
            ask_levels: snapshot.asks,
        }
    }
}
