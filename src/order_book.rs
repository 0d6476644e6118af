//! Order Book - bid and ask sides behind independent read-write locks.
//!
//! Each side keeps a price-ordered map of FIFO levels plus a lookup table
//! from order key to (price, sequence) for cancel and amend anywhere in
//! the side.
//!
//! Lock discipline: a code path that needs both sides goes through
//! [`OrderBook::lock_both`], which takes bid before ask and releases ask
//! before bid. Single-side paths take only their own side.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::command::{OrderKey, OrderType, Side};
use crate::error::OrderError;
use crate::market_data::DepthLevel;
use crate::order::Order;
use crate::price::Price;
use crate::price_level::PriceLevel;

/// Where a resting order lives inside its side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Locator {
    pub price: Price,
    pub sequence: u64,
}

/// Best level price and the type of the order at its head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopOfBook {
    pub price: Price,
    pub head_type: OrderType,
}

/// Result of a successful amend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Amended {
    pub price: Price,
    pub remaining_qty: u64,
    /// False when the order moved to the tail of a level
    pub priority_kept: bool,
}

/// One side of the book.
#[derive(Debug)]
pub struct BookSide {
    side: Side,
    /// Ascending by price; bids read from the back, asks from the front
    levels: BTreeMap<Price, PriceLevel>,
    /// Lookup table: OrderKey -> Locator
    index: FxHashMap<OrderKey, Locator>,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            index: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    // ========================================================================
    // Best Price Access
    // ========================================================================

    /// Best price: highest bid or lowest ask.
    #[inline]
    pub fn best_price(&self) -> Option<Price> {
        match self.side {
            Side::Buy => self.levels.keys().next_back().copied(),
            Side::Sell => self.levels.keys().next().copied(),
        }
    }

    pub fn best_level(&self) -> Option<(Price, &PriceLevel)> {
        match self.side {
            Side::Buy => self.levels.iter().next_back(),
            Side::Sell => self.levels.iter().next(),
        }
        .map(|(price, level)| (*price, level))
    }

    fn best_level_mut(&mut self) -> Option<(Price, &mut PriceLevel)> {
        match self.side {
            Side::Buy => self.levels.iter_mut().next_back(),
            Side::Sell => self.levels.iter_mut().next(),
        }
        .map(|(price, level)| (*price, level))
    }

    /// Best price together with the type of the order at its head.
    pub fn top(&self) -> Option<TopOfBook> {
        let (price, level) = self.best_level()?;
        let head = level.head()?;
        Some(TopOfBook {
            price,
            head_type: head.order_type(),
        })
    }

    /// Head order of the best level.
    pub fn head(&self) -> Option<&Order> {
        self.best_level().and_then(|(_, level)| level.head())
    }

    // ========================================================================
    // Order Management
    // ========================================================================

    /// Place an order at the tail of its price level.
    ///
    /// Hands the order back if its key is already resting on this side.
    pub fn insert(&mut self, order: Order) -> Result<(), Order> {
        if self.index.contains_key(order.key()) {
            return Err(order);
        }
        debug_assert_eq!(order.side(), self.side);

        let locator = Locator {
            price: order.price(),
            sequence: order.sequence(),
        };
        self.index.insert(order.key().clone(), locator);
        self.levels
            .entry(locator.price)
            .or_insert_with(PriceLevel::new)
            .push_back(order);
        Ok(())
    }

    /// Pop the head order of the best level, dropping the level if empty.
    pub fn remove_head(&mut self) -> Option<Order> {
        let (price, level) = self.best_level_mut()?;
        let order = level.pop_front()?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        self.index.remove(order.key());
        Some(order)
    }

    /// Remove an order from anywhere in this side.
    pub fn cancel(&mut self, key: &OrderKey) -> Option<Order> {
        let locator = self.index.remove(key)?;
        let level = self.levels.get_mut(&locator.price)?;
        let order = level.remove(locator.sequence);
        if level.is_empty() {
            self.levels.remove(&locator.price);
        }
        order
    }

    /// Replace price and total quantity of a resting order.
    ///
    /// Returns `Ok(None)` if the key is not on this side. A quantity-only
    /// reduction keeps the order's place; a price change or a quantity
    /// increase moves it to the tail of the target level.
    pub fn amend(
        &mut self,
        key: &OrderKey,
        new_price: Price,
        new_qty: u64,
    ) -> Result<Option<Amended>, OrderError> {
        let Some(locator) = self.index.get(key).copied() else {
            return Ok(None);
        };
        let Some(level) = self.levels.get_mut(&locator.price) else {
            return Ok(None);
        };
        let Some(order) = level.get(locator.sequence) else {
            return Ok(None);
        };

        if order.order_type() == OrderType::Market && new_price != locator.price {
            return Err(OrderError::MarketOrderReprice);
        }
        if new_qty <= order.filled_qty() {
            return Err(OrderError::AmendBelowFilled {
                requested: new_qty,
                filled: order.filled_qty(),
            });
        }

        let priority_kept = new_price == locator.price && new_qty <= order.original_qty();
        if priority_kept {
            if let Some(order) = level.get_mut(locator.sequence) {
                let before = order.remaining_qty();
                order.set_quantity(new_qty);
                let after = order.remaining_qty();
                level.subtract_qty(before - after);
                return Ok(Some(Amended {
                    price: new_price,
                    remaining_qty: after,
                    priority_kept,
                }));
            }
            return Ok(None);
        }

        let Some(mut order) = level.remove(locator.sequence) else {
            return Ok(None);
        };
        if level.is_empty() {
            self.levels.remove(&locator.price);
        }

        order.set_price(new_price);
        order.set_quantity(new_qty);
        let remaining_qty = order.remaining_qty();
        self.index.insert(
            key.clone(),
            Locator {
                price: new_price,
                sequence: locator.sequence,
            },
        );
        self.levels
            .entry(new_price)
            .or_insert_with(PriceLevel::new)
            .push_back(order);

        Ok(Some(Amended {
            price: new_price,
            remaining_qty,
            priority_kept,
        }))
    }

    // ========================================================================
    // Matching Support
    // ========================================================================

    /// Execute `qty` against the head order of the best level.
    ///
    /// The head stays in place; call [`BookSide::pop_filled_head`] after
    /// the trade has been enqueued.
    pub(crate) fn fill_head(&mut self, qty: u64, at: DateTime<Utc>) -> bool {
        let Some((_, level)) = self.best_level_mut() else {
            return false;
        };
        let Some(head) = level.head_mut() else {
            return false;
        };
        head.fill(qty, at);
        level.subtract_qty(qty);
        true
    }

    /// Pop the head of the best level if it has nothing left to fill.
    pub(crate) fn pop_filled_head(&mut self) -> Option<Order> {
        let filled = self.head().is_some_and(Order::is_filled);
        if filled {
            self.remove_head()
        } else {
            None
        }
    }

    // ========================================================================
    // Utility Methods
    // ========================================================================

    pub fn contains(&self, key: &OrderKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &OrderKey) -> Option<&Order> {
        let locator = self.index.get(key)?;
        self.levels.get(&locator.price)?.get(locator.sequence)
    }

    pub fn level(&self, price: Price) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    /// Best `depth` levels, best first.
    pub fn depth(&self, depth: usize) -> Vec<DepthLevel> {
        let summarize = |(price, level): (&Price, &PriceLevel)| DepthLevel {
            price: *price,
            quantity: level.total_qty(),
            orders: level.count(),
        };
        match self.side {
            Side::Buy => self.levels.iter().rev().take(depth).map(summarize).collect(),
            Side::Sell => self.levels.iter().take(depth).map(summarize).collect(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Every resting order, best level first, FIFO within a level.
    pub fn orders(&self) -> Vec<&Order> {
        match self.side {
            Side::Buy => self.levels.values().rev().flat_map(|l| l.iter()).collect(),
            Side::Sell => self.levels.values().flat_map(|l| l.iter()).collect(),
        }
    }
}

/// Both sides write-locked, acquired bid first.
///
/// Field order fixes drop order: the ask guard is released before the
/// bid guard.
pub struct BothSides<'a> {
    ask: RwLockWriteGuard<'a, BookSide>,
    bid: RwLockWriteGuard<'a, BookSide>,
}

impl BothSides<'_> {
    pub fn bid(&mut self) -> &mut BookSide {
        &mut self.bid
    }

    pub fn ask(&mut self) -> &mut BookSide {
        &mut self.ask
    }

    /// Mutable access to both sides at once, `(bid, ask)`.
    pub fn split(&mut self) -> (&mut BookSide, &mut BookSide) {
        (&mut *self.bid, &mut *self.ask)
    }
}

/// Best prices and top levels read under the side read locks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookSnapshot {
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// Per-instrument order book.
#[derive(Debug)]
pub struct OrderBook {
    bids: RwLock<BookSide>,
    asks: RwLock<BookSide>,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new() -> Self {
        Self {
            bids: RwLock::new(BookSide::new(Side::Buy)),
            asks: RwLock::new(BookSide::new(Side::Sell)),
        }
    }

    #[inline]
    fn lock_for(&self, side: Side) -> &RwLock<BookSide> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Shared lock on one side.
    pub fn read(&self, side: Side) -> RwLockReadGuard<'_, BookSide> {
        self.lock_for(side).read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive lock on one side. Never hold it while locking the other
    /// side; use [`OrderBook::lock_both`] for that.
    pub fn write(&self, side: Side) -> RwLockWriteGuard<'_, BookSide> {
        self.lock_for(side).write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive locks on both sides, bid then ask.
    pub fn lock_both(&self) -> BothSides<'_> {
        let bid = self.write(Side::Buy);
        let ask = self.write(Side::Sell);
        BothSides { ask, bid }
    }

    // ========================================================================
    // Best Price Access
    // ========================================================================

    /// Get the best bid price (highest buy price)
    pub fn best_bid(&self) -> Option<Price> {
        self.read(Side::Buy).best_price()
    }

    /// Get the best ask price (lowest sell price)
    pub fn best_ask(&self) -> Option<Price> {
        self.read(Side::Sell).best_price()
    }

    pub fn best_price(&self, side: Side) -> Option<Price> {
        self.read(side).best_price()
    }

    /// Top of both sides, each read under its own short read lock.
    pub fn tops(&self) -> (Option<TopOfBook>, Option<TopOfBook>) {
        let bid = self.read(Side::Buy).top();
        let ask = self.read(Side::Sell).top();
        (bid, ask)
    }

    // ========================================================================
    // Order Management
    // ========================================================================

    /// Insert under the order's side write lock.
    pub fn insert(&self, order: Order) -> Result<(), Order> {
        self.write(order.side()).insert(order)
    }

    pub fn remove_head(&self, side: Side) -> Option<Order> {
        self.write(side).remove_head()
    }

    /// Cancel an order on whichever side holds it.
    ///
    /// Sides are searched one at a time; both are never held together.
    pub fn cancel(&self, key: &OrderKey) -> Option<Order> {
        if let Some(order) = self.write(Side::Buy).cancel(key) {
            return Some(order);
        }
        self.write(Side::Sell).cancel(key)
    }

    /// Amend an order on whichever side holds it.
    pub fn update(
        &self,
        key: &OrderKey,
        new_price: Price,
        new_qty: u64,
    ) -> Result<Option<Amended>, OrderError> {
        if let Some(amended) = self.write(Side::Buy).amend(key, new_price, new_qty)? {
            return Ok(Some(amended));
        }
        self.write(Side::Sell).amend(key, new_price, new_qty)
    }

    pub fn contains(&self, key: &OrderKey) -> bool {
        self.read(Side::Buy).contains(key) || self.read(Side::Sell).contains(key)
    }

    // ========================================================================
    // Utility Methods
    // ========================================================================

    pub fn depth(&self, side: Side, depth: usize) -> Vec<DepthLevel> {
        self.read(side).depth(depth)
    }

    /// Consistent view of both sides (read locks, bid then ask).
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        let bids = self.read(Side::Buy);
        let asks = self.read(Side::Sell);
        BookSnapshot {
            best_bid: bids.best_price(),
            best_ask: asks.best_price(),
            bids: bids.depth(depth),
            asks: asks.depth(depth),
        }
    }

    pub fn order_count(&self) -> usize {
        self.read(Side::Buy).order_count() + self.read(Side::Sell).order_count()
    }

    /// Calculate spread (best_ask - best_bid)
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if ask > bid => Some(Price::new(ask.value() - bid.value())),
            _ => None,
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
