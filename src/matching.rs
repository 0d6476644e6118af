//! Matching Engine - the per-instrument matching loop.
//!
//! Each cycle crosses at most one pair of orders at the top of the book:
//! 1. PRE-CHECK: unlocked (per-side read) test for a crossable book
//! 2. RESERVE: outbound trade slot and a pooled trade, before any book lock
//! 3. EXECUTE: bid then ask write lock, re-check, fill both heads, enqueue
//!    the trade, pop fully filled heads
//! 4. PUBLISH: release filled orders to the arena, then send a market-data
//!    snapshot taken under fresh read locks
//!
//! Every trade prints at the ask side's top price. A market order at the
//! head of its level crosses whatever is on the other side; a market sell
//! hitting a limit bid prints at the bid.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arrayvec::ArrayVec;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::command::OrderType;
use crate::error::MatchError;
use crate::instrument::Instrument;
use crate::market_data::MarketData;
use crate::order::Order;
use crate::order_book::TopOfBook;
use crate::price::Price;
use crate::trade::{Trade, TradeFields};

/// Lifecycle of a matching loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Matching,
    Stopped,
}

/// One executed match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchSummary {
    pub trade_id: u64,
    pub price: Price,
    pub quantity: u64,
    /// Orders that were fully filled and returned to the arena
    pub completed: usize,
}

/// Result of one `match_top_order` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Book not crossable; nothing changed
    NoCross,
    Matched(MatchSummary),
    /// Stop requested while waiting for channel capacity; nothing changed
    Interrupted,
}

/// Why a matching loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    Failed(MatchError),
}

/// Trade price if the two tops cross.
///
/// Limit vs limit crosses when bid >= ask and prints at the ask. A market
/// order at either head always crosses: a market bid prints at the ask.
///
/// One departure from "always the ask's top price": a resting market ask
/// facing a limit bid prints at the bid. Its own book price is only the
/// bid observed at entry, which may be stale, so the live bid is the
/// price a market sell actually accepts.
pub fn cross_price(bid: TopOfBook, ask: TopOfBook) -> Option<Price> {
    match (bid.head_type, ask.head_type) {
        (OrderType::Limit, OrderType::Limit) => (bid.price >= ask.price).then_some(ask.price),
        (OrderType::Market, _) => Some(ask.price),
        (OrderType::Limit, OrderType::Market) => Some(bid.price),
    }
}

/// Resolves once a stop has been requested or the stop sender is gone.
fn stop_requested(rx: &mut watch::Receiver<bool>) -> impl Future<Output = ()> + '_ {
    async move {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// What happened under the book locks.
enum Execution {
    /// Re-check failed; the pre-acquired trade goes back to the arena
    NotCrossed(Trade),
    Inconsistent(Trade, &'static str),
    Done {
        summary: MatchSummary,
        completed: ArrayVec<Order, 2>,
    },
}

/// Step 3 of the cycle, run under both write locks.
fn execute_top(instrument: &Instrument, mut trade: Trade, permit: mpsc::Permit<'_, Trade>) -> Execution {
    let mut sides = instrument.book().lock_both();
    let (bids, asks) = sides.split();

    let (Some(bid_top), Some(ask_top)) = (bids.top(), asks.top()) else {
        return Execution::NotCrossed(trade);
    };
    let Some(price) = cross_price(bid_top, ask_top) else {
        return Execution::NotCrossed(trade);
    };
    let (Some(bid), Some(ask)) = (bids.head(), asks.head()) else {
        return Execution::Inconsistent(trade, "top level without head order");
    };

    let quantity = bid.remaining_qty().min(ask.remaining_qty());
    if quantity == 0 {
        return Execution::Inconsistent(trade, "filled order left resting");
    }

    let fields = TradeFields {
        buy_broker_id: bid.broker_id().to_owned(),
        sell_broker_id: ask.broker_id().to_owned(),
        buy_order_id: bid.client_order_id().to_owned(),
        sell_order_id: ask.client_order_id().to_owned(),
        price,
        quantity,
    };

    let now = Utc::now();
    bids.fill_head(quantity, now);
    asks.fill_head(quantity, now);

    trade.record(fields, now);
    let trade_id = trade.sequence();
    permit.send(trade);

    let mut completed = ArrayVec::new();
    if let Some(order) = bids.pop_filled_head() {
        completed.push(order);
    }
    if let Some(order) = asks.pop_filled_head() {
        completed.push(order);
    }

    Execution::Done {
        summary: MatchSummary {
            trade_id,
            price,
            quantity,
            completed: completed.len(),
        },
        completed,
    }
}

/// The matching loop of one instrument.
pub struct MatchingEngine {
    instrument: Arc<Instrument>,
    trades: mpsc::Sender<Trade>,
    market_data: mpsc::Sender<MarketData>,
    shutdown: watch::Receiver<bool>,
    idle_delay: Duration,
    depth_levels: usize,
    last_trade_price: Option<Price>,
    state: LoopState,
}

impl MatchingEngine {
    pub fn new(
        instrument: Arc<Instrument>,
        trades: mpsc::Sender<Trade>,
        market_data: mpsc::Sender<MarketData>,
        shutdown: watch::Receiver<bool>,
        idle_delay: Duration,
        depth_levels: usize,
    ) -> Self {
        Self {
            instrument,
            trades,
            market_data,
            shutdown,
            idle_delay,
            depth_levels,
            last_trade_price: None,
            state: LoopState::Idle,
        }
    }

    /// Attempt a single top-of-book match.
    ///
    /// Waits for trade channel capacity before touching the book, so a
    /// full channel throttles this instrument and a closed one fails the
    /// attempt with the book untouched.
    pub async fn match_top_order(&mut self) -> Result<MatchOutcome, MatchError> {
        let (bid, ask) = self.instrument.book().tops();
        let crossable = matches!((bid, ask), (Some(b), Some(a)) if cross_price(b, a).is_some());
        if !crossable {
            return Ok(MatchOutcome::NoCross);
        }

        let permit = tokio::select! {
            biased;
            _ = stop_requested(&mut self.shutdown) => return Ok(MatchOutcome::Interrupted),
            permit = self.trades.reserve() => permit.map_err(|_| MatchError::TradeChannelClosed {
                instrument_id: self.instrument.id().to_owned(),
            })?,
        };

        let trade = self.instrument.trade_pool().acquire(TradeFields::default());
        self.state = LoopState::Matching;
        let execution = execute_top(&self.instrument, trade, permit);

        let summary = match execution {
            Execution::NotCrossed(trade) => {
                self.instrument.trade_pool().release(trade);
                self.state = LoopState::Idle;
                return Ok(MatchOutcome::NoCross);
            }
            Execution::Inconsistent(trade, detail) => {
                self.instrument.trade_pool().release(trade);
                self.state = LoopState::Idle;
                return Err(MatchError::BookInconsistent {
                    instrument_id: self.instrument.id().to_owned(),
                    detail,
                });
            }
            Execution::Done { summary, completed } => {
                for order in completed {
                    self.instrument.order_pool().release(order);
                }
                summary
            }
        };

        debug!(
            instrument = %self.instrument.id(),
            trade_id = summary.trade_id,
            price = %summary.price,
            qty = summary.quantity,
            "trade"
        );
        self.last_trade_price = Some(summary.price);

        let snapshot = self.instrument.book().snapshot(self.depth_levels);
        let md = MarketData::from_snapshot(self.instrument.id(), snapshot, self.last_trade_price, Utc::now());
        // The trade is already committed; a stop only drops this snapshot
        let sent = tokio::select! {
            biased;
            _ = stop_requested(&mut self.shutdown) => None,
            sent = self.market_data.send(md) => Some(sent),
        };
        self.state = LoopState::Idle;
        match sent {
            Some(sent) => sent.map_err(|_| MatchError::MarketDataChannelClosed {
                instrument_id: self.instrument.id().to_owned(),
            })?,
            None => debug!(instrument = %self.instrument.id(), "market data dropped on stop"),
        }

        Ok(MatchOutcome::Matched(summary))
    }

    /// Run until stopped or until an outbound channel closes.
    pub async fn run(mut self) -> LoopExit {
        info!(instrument = %self.instrument.id(), "matching loop started");

        let exit = loop {
            if self.stop_signalled() {
                break LoopExit::Stopped;
            }

            match self.match_top_order().await {
                Ok(MatchOutcome::Matched(_)) => tokio::task::yield_now().await,
                Ok(MatchOutcome::NoCross) => self.idle().await,
                Ok(MatchOutcome::Interrupted) => break LoopExit::Stopped,
                Err(err) if err.is_fatal() => {
                    error!(instrument = %self.instrument.id(), error = %err, "matching loop failed");
                    break LoopExit::Failed(err);
                }
                Err(err) => {
                    warn!(instrument = %self.instrument.id(), error = %err, "matching attempt failed");
                    self.idle().await;
                }
            }
        };

        self.state = LoopState::Stopped;
        info!(instrument = %self.instrument.id(), ?exit, "matching loop stopped");
        exit
    }

    /// A stop was requested, or the stop sender is gone.
    fn stop_signalled(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Wait for the idle delay, a book change, or a stop request.
    async fn idle(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.idle_delay) => {}
            _ = self.instrument.wakeup().notified() => {}
            _ = stop_requested(&mut self.shutdown) => {}
        }
    }

    #[inline]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[inline]
    pub fn last_trade_price(&self) -> Option<Price> {
        self.last_trade_price
    }

    #[inline]
    pub fn instrument(&self) -> &Arc<Instrument> {
        &self.instrument
    }
}
