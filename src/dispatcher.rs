//! Order Processing Dispatcher - validation and insertion of inbound orders.
//!
//! The dispatcher never matches. It places orders into the right side of
//! the right book and wakes that instrument's matching loop; crossing is
//! left to the loop.
//!
//! Pool calls are never made under a book lock: orders are acquired before
//! insertion and released after the side lock has been dropped.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::{Command, OrderKey, OrderRequest, OrderType};
use crate::engine::Engine;
use crate::error::OrderError;
use crate::instrument::Instrument;
use crate::order::OrderFields;
use crate::order_book::Amended;
use crate::price::Price;

/// Acknowledgement of an order that now rests in the book.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub instrument_id: String,
    pub key: OrderKey,
    /// Arena sequence of the resting order
    pub sequence: u64,
    /// Insertion price; synthesized from the opposite best for market orders
    pub price: Price,
    pub quantity: u64,
}

/// Result of a dispatched command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchAck {
    Accepted(Accepted),
    /// Whether the order was found and removed
    Cancelled(bool),
    /// Whether the order was found and amended
    Amended(bool),
}

/// Tally of a [`OrderDispatcher::run`] session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub accepted: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub amended: u64,
    /// Cancels and amends that named an order not in the book
    pub not_found: u64,
}

/// Entry point for the protocol layer. Cheap to clone.
#[derive(Clone, Debug)]
pub struct OrderDispatcher {
    engine: Arc<Engine>,
}

impl OrderDispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    #[inline]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn instrument(&self, instrument_id: &str) -> Result<&Arc<Instrument>, OrderError> {
        self.engine
            .instrument(instrument_id)
            .ok_or_else(|| OrderError::UnknownInstrument {
                instrument_id: instrument_id.to_owned(),
            })
    }

    /// Validate a request and rest it in the book.
    ///
    /// Limit orders rest at their own price. Market orders rest at the
    /// current best price of the opposite side and are rejected when that
    /// side is empty. Rejections leave the book and pools untouched.
    pub fn put_order(&self, req: OrderRequest) -> Result<Accepted, OrderError> {
        let instrument = self.instrument(&req.instrument_id)?;
        if req.quantity == 0 {
            return Err(OrderError::InvalidQuantity(req.quantity));
        }

        let price = match req.order_type {
            OrderType::Limit => {
                let raw = req.price.ok_or(OrderError::MissingPrice)?;
                validate_price(raw)?
            }
            OrderType::Market => instrument
                .book()
                .best_price(req.side.opposite())
                .ok_or(OrderError::NoLiquidity { side: req.side })?,
        };

        let key = req.key();
        if instrument.book().contains(&key) {
            return Err(duplicate(key));
        }

        let order = instrument.order_pool().acquire(OrderFields {
            key: key.clone(),
            side: req.side,
            order_type: req.order_type,
            price,
            quantity: req.quantity,
        });
        let sequence = order.sequence();

        if let Err(order) = instrument.book().insert(order) {
            instrument.order_pool().release(order);
            return Err(duplicate(key));
        }
        instrument.notify_book_changed();

        debug!(
            instrument = %req.instrument_id,
            order = %key,
            side = %req.side,
            order_type = ?req.order_type,
            %price,
            qty = req.quantity,
            "order accepted"
        );
        Ok(Accepted {
            instrument_id: req.instrument_id,
            key,
            sequence,
            price,
            quantity: req.quantity,
        })
    }

    /// Cancel an order anywhere in its instrument's book and return it to
    /// the pool. Returns whether it was found.
    pub fn remove_order(
        &self,
        instrument_id: &str,
        broker_id: &str,
        client_order_id: &str,
    ) -> Result<bool, OrderError> {
        let instrument = self.instrument(instrument_id)?;
        let key = OrderKey::new(broker_id, client_order_id);

        let Some(order) = instrument.book().cancel(&key) else {
            return Ok(false);
        };
        instrument.order_pool().release(order);
        debug!(instrument = %instrument_id, order = %key, "order cancelled");
        Ok(true)
    }

    /// Replace price and total quantity of a resting order.
    ///
    /// A price change or a quantity increase sends the order to the tail
    /// of its (new) level. Returns whether the order was found.
    pub fn update_order(
        &self,
        instrument_id: &str,
        broker_id: &str,
        client_order_id: &str,
        new_price: Decimal,
        new_quantity: u64,
    ) -> Result<bool, OrderError> {
        let instrument = self.instrument(instrument_id)?;
        if new_quantity == 0 {
            return Err(OrderError::InvalidQuantity(new_quantity));
        }
        let price = validate_price(new_price)?;
        let key = OrderKey::new(broker_id, client_order_id);

        let Some(Amended { price, remaining_qty, priority_kept }) =
            instrument.book().update(&key, price, new_quantity)?
        else {
            return Ok(false);
        };
        instrument.notify_book_changed();

        debug!(
            instrument = %instrument_id,
            order = %key,
            %price,
            remaining = remaining_qty,
            priority_kept,
            "order amended"
        );
        Ok(true)
    }

    /// Route one inbound command.
    pub fn dispatch(&self, command: Command) -> Result<DispatchAck, OrderError> {
        match command {
            Command::New(req) => self.put_order(req).map(DispatchAck::Accepted),
            Command::Cancel(req) => self
                .remove_order(&req.instrument_id, &req.key.broker_id, &req.key.client_order_id)
                .map(DispatchAck::Cancelled),
            Command::Amend(req) => self
                .update_order(
                    &req.instrument_id,
                    &req.key.broker_id,
                    &req.key.client_order_id,
                    req.new_price,
                    req.new_quantity,
                )
                .map(DispatchAck::Amended),
        }
    }

    /// Consume the inbound channel until every sender is gone.
    pub async fn run(&self, mut inbound: mpsc::Receiver<Command>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        while let Some(command) = inbound.recv().await {
            let instrument_id = command.instrument_id().to_owned();
            match self.dispatch(command) {
                Ok(DispatchAck::Accepted(_)) => stats.accepted += 1,
                Ok(DispatchAck::Cancelled(true)) => stats.cancelled += 1,
                Ok(DispatchAck::Amended(true)) => stats.amended += 1,
                Ok(DispatchAck::Cancelled(false) | DispatchAck::Amended(false)) => {
                    stats.not_found += 1
                }
                Err(err) => {
                    stats.rejected += 1;
                    warn!(instrument = %instrument_id, error = %err, "command rejected");
                }
            }
        }
        info!(?stats, "inbound channel closed");
        stats
    }
}

fn validate_price(raw: Decimal) -> Result<Price, OrderError> {
    let price = Price::new(raw);
    if price.is_positive() {
        Ok(price)
    } else {
        Err(OrderError::InvalidPrice(raw.to_string()))
    }
}

fn duplicate(key: OrderKey) -> OrderError {
    OrderError::DuplicateOrder {
        broker_id: key.broker_id,
        client_order_id: key.client_order_id,
    }
}
