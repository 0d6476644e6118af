//! Command types for the dispatcher.
//!
//! Commands are inputs from the protocol layer. They carry raw,
//! unvalidated values; the dispatcher turns them into pooled orders.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Buy = 0,
    /// Sell side (asks)
    Sell = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        })
    }
}

/// Order type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Priced at the opposite best on entry, then rests like a limit order
    Market,
    /// Rests at its own price
    Limit,
}

/// Identity of an order within one instrument.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OrderKey {
    pub broker_id: String,
    pub client_order_id: String,
}

impl OrderKey {
    pub fn new(broker_id: impl Into<String>, client_order_id: impl Into<String>) -> Self {
        Self {
            broker_id: broker_id.into(),
            client_order_id: client_order_id.into(),
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.broker_id, self.client_order_id)
    }
}

// ============================================================================
// Input Commands
// ============================================================================

/// Place a new order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderRequest {
    pub instrument_id: String,
    pub broker_id: String,
    pub client_order_id: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Required for limit orders, ignored for market orders
    pub price: Option<Decimal>,
    pub quantity: u64,
}

impl OrderRequest {
    /// A limit order request.
    pub fn limit(
        instrument_id: impl Into<String>,
        broker_id: impl Into<String>,
        client_order_id: impl Into<String>,
        side: Side,
        price: Decimal,
        quantity: u64,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            broker_id: broker_id.into(),
            client_order_id: client_order_id.into(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
        }
    }

    /// A market order request.
    pub fn market(
        instrument_id: impl Into<String>,
        broker_id: impl Into<String>,
        client_order_id: impl Into<String>,
        side: Side,
        quantity: u64,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            broker_id: broker_id.into(),
            client_order_id: client_order_id.into(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
        }
    }

    pub fn key(&self) -> OrderKey {
        OrderKey::new(self.broker_id.clone(), self.client_order_id.clone())
    }
}

/// Cancel an existing order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelRequest {
    pub instrument_id: String,
    pub key: OrderKey,
}

/// Replace price and quantity of an existing order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmendRequest {
    pub instrument_id: String,
    pub key: OrderKey,
    pub new_price: Decimal,
    /// New total order quantity (must exceed what has already filled)
    pub new_quantity: u64,
}

/// Input commands from the protocol layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    New(OrderRequest),
    Cancel(CancelRequest),
    Amend(AmendRequest),
}

impl Command {
    /// Instrument the command is routed to.
    pub fn instrument_id(&self) -> &str {
        match self {
            Command::New(req) => &req.instrument_id,
            Command::Cancel(req) => &req.instrument_id,
            Command::Amend(req) => &req.instrument_id,
        }
    }
}
