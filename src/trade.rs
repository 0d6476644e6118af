//! Trade - a poolable execution record.
//!
//! Trades leave the engine through the outbound trade channel. The
//! consumer hands each one back with `Engine::release_trade` once done.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::arena::{ArenaTicket, Pooled};
use crate::price::Price;

/// Values recorded for one execution.
#[derive(Clone, Debug, Default)]
pub struct TradeFields {
    pub buy_broker_id: String,
    pub sell_broker_id: String,
    pub buy_order_id: String,
    pub sell_order_id: String,
    pub price: Price,
    pub quantity: u64,
}

/// An executed trade.
#[derive(Clone)]
pub struct Trade {
    ticket: ArenaTicket,
    instrument_id: Arc<str>,
    /// Per-instrument trade id, strictly increasing
    sequence: u64,
    fields: TradeFields,
    executed_at: DateTime<Utc>,
}

impl Pooled for Trade {
    type Fields = TradeFields;

    fn empty(instrument_id: Arc<str>, ticket: ArenaTicket) -> Self {
        Self {
            ticket,
            instrument_id,
            sequence: 0,
            fields: TradeFields::default(),
            executed_at: Utc::now(),
        }
    }

    fn reset(&mut self, sequence: u64, fields: TradeFields) {
        self.sequence = sequence;
        self.fields = fields;
        self.executed_at = Utc::now();
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

impl Trade {
    /// Overwrite a pre-acquired trade with the execution that just happened.
    #[inline]
    pub(crate) fn record(&mut self, fields: TradeFields, at: DateTime<Utc>) {
        self.fields = fields;
        self.executed_at = at;
    }

    #[inline]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn buy_broker_id(&self) -> &str {
        &self.fields.buy_broker_id
    }

    pub fn sell_broker_id(&self) -> &str {
        &self.fields.sell_broker_id
    }

    pub fn buy_order_id(&self) -> &str {
        &self.fields.buy_order_id
    }

    pub fn sell_order_id(&self) -> &str {
        &self.fields.sell_order_id
    }

    #[inline]
    pub fn price(&self) -> Price {
        self.fields.price
    }

    #[inline]
    pub fn quantity(&self) -> u64 {
        self.fields.quantity
    }

    pub fn executed_at(&self) -> DateTime<Utc> {
        self.executed_at
    }

    /// Owned, serializable copy for writers.
    pub fn to_record(&self) -> TradeRecord {
        TradeRecord {
            trade_id: self.sequence,
            instrument_id: self.instrument_id.to_string(),
            buy_broker_id: self.fields.buy_broker_id.clone(),
            sell_broker_id: self.fields.sell_broker_id.clone(),
            buy_order_id: self.fields.buy_order_id.clone(),
            sell_order_id: self.fields.sell_order_id.clone(),
            price: self.fields.price,
            quantity: self.fields.quantity,
            executed_at: self.executed_at,
        }
    }
}

impl fmt::Debug for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trade")
            .field("instrument", &self.instrument_id)
            .field("sequence", &self.sequence)
            .field("buy", &format_args!("{}/{}", self.fields.buy_broker_id, self.fields.buy_order_id))
            .field("sell", &format_args!("{}/{}", self.fields.sell_broker_id, self.fields.sell_order_id))
            .field("price", &self.fields.price)
            .field("qty", &self.fields.quantity)
            .finish()
    }
}

/// Flat trade row, one per execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TradeRecord {
    pub trade_id: u64,
    pub instrument_id: String,
    pub buy_broker_id: String,
    pub sell_broker_id: String,
    pub buy_order_id: String,
    pub sell_order_id: String,
    pub price: Price,
    pub quantity: u64,
    pub executed_at: DateTime<Utc>,
}
