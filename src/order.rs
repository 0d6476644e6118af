//! Order - a poolable unit of trading interest.
//!
//! Quantities keep `filled + remaining == original` across every public
//! mutation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::arena::{ArenaTicket, Pooled};
use crate::command::{OrderKey, OrderType, Side};
use crate::price::Price;

/// Values applied to an order on checkout.
#[derive(Clone, Debug)]
pub struct OrderFields {
    pub key: OrderKey,
    pub side: Side,
    pub order_type: OrderType,
    /// Book price; synthesized for market orders
    pub price: Price,
    pub quantity: u64,
}

/// A resting or incoming order.
#[derive(Clone)]
pub struct Order {
    ticket: ArenaTicket,
    instrument_id: Arc<str>,
    key: OrderKey,
    /// Assigned on every checkout, strictly increasing per instrument
    sequence: u64,
    side: Side,
    order_type: OrderType,
    price: Price,
    original_qty: u64,
    filled_qty: u64,
    remaining_qty: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Pooled for Order {
    type Fields = OrderFields;

    fn empty(instrument_id: Arc<str>, ticket: ArenaTicket) -> Self {
        let now = Utc::now();
        Self {
            ticket,
            instrument_id,
            key: OrderKey::new(String::new(), String::new()),
            sequence: 0,
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Price::ZERO,
            original_qty: 0,
            filled_qty: 0,
            remaining_qty: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn reset(&mut self, sequence: u64, fields: OrderFields) {
        let now = Utc::now();
        self.key = fields.key;
        self.sequence = sequence;
        self.side = fields.side;
        self.order_type = fields.order_type;
        self.price = fields.price;
        self.original_qty = fields.quantity;
        self.filled_qty = 0;
        self.remaining_qty = fields.quantity;
        self.created_at = now;
        self.updated_at = now;
    }

    #[inline]
    fn ticket(&self) -> ArenaTicket {
        self.ticket
    }

    #[inline]
    fn set_ticket(&mut self, ticket: ArenaTicket) {
        self.ticket = ticket;
    }

    #[inline]
    fn instrument_id(&self) -> &str {
        &self.instrument_id
    }
}

impl Order {
    #[inline]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    #[inline]
    pub fn key(&self) -> &OrderKey {
        &self.key
    }

    #[inline]
    pub fn broker_id(&self) -> &str {
        &self.key.broker_id
    }

    #[inline]
    pub fn client_order_id(&self) -> &str {
        &self.key.client_order_id
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    #[inline]
    pub fn price(&self) -> Price {
        self.price
    }

    #[inline]
    pub fn original_qty(&self) -> u64 {
        self.original_qty
    }

    #[inline]
    pub fn filled_qty(&self) -> u64 {
        self.filled_qty
    }

    #[inline]
    pub fn remaining_qty(&self) -> u64 {
        self.remaining_qty
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.remaining_qty == 0
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Apply an execution of `qty`.
    ///
    /// The caller guarantees `qty <= remaining_qty`.
    #[inline]
    pub(crate) fn fill(&mut self, qty: u64, at: DateTime<Utc>) {
        debug_assert!(qty <= self.remaining_qty, "Overfill");
        self.remaining_qty -= qty;
        self.filled_qty += qty;
        self.updated_at = at;
    }

    /// Replace the total quantity; `quantity` must exceed the filled amount.
    pub(crate) fn set_quantity(&mut self, quantity: u64) {
        debug_assert!(quantity > self.filled_qty);
        self.original_qty = quantity;
        self.remaining_qty = quantity - self.filled_qty;
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_price(&mut self, price: Price) {
        self.price = price;
        self.updated_at = Utc::now();
    }
}

impl fmt::Debug for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Order")
            .field("instrument", &self.instrument_id)
            .field("key", &self.key)
            .field("sequence", &self.sequence)
            .field("side", &self.side)
            .field("type", &self.order_type)
            .field("price", &self.price)
            .field("original", &self.original_qty)
            .field("filled", &self.filled_qty)
            .field("remaining", &self.remaining_qty)
            .finish()
    }
}
