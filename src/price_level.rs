//! Price Level - A FIFO queue of orders at a single price point.
//!
//! The level owns its orders. Removal from an arbitrary position keeps
//! the relative order of everything else.

use std::collections::VecDeque;

use crate::order::Order;

/// A queue of orders at a specific price level.
///
/// Orders are processed in FIFO order (price-time priority).
#[derive(Clone, Debug, Default)]
pub struct PriceLevel {
    /// Oldest order first
    orders: VecDeque<Order>,
    /// Total remaining quantity across all orders at this level; wide so
    /// that summing many large orders cannot overflow
    total_qty: u128,
}

impl PriceLevel {
    /// Create a new empty price level
    #[inline]
    pub fn new() -> Self {
        Self {
            orders: VecDeque::new(),
            total_qty: 0,
        }
    }

    /// Returns true if there are no orders at this level
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.orders.len()
    }

    /// Total remaining quantity, saturating at `u64::MAX`.
    #[inline]
    pub fn total_qty(&self) -> u64 {
        u64::try_from(self.total_qty).unwrap_or(u64::MAX)
    }

    /// Append an order to the tail of the queue (newest order).
    ///
    /// # Complexity
    /// O(1) amortized
    #[inline]
    pub fn push_back(&mut self, order: Order) {
        self.total_qty += u128::from(order.remaining_qty());
        self.orders.push_back(order);
    }

    /// Remove and return the head order (oldest/highest priority).
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn pop_front(&mut self) -> Option<Order> {
        let order = self.orders.pop_front()?;
        self.total_qty -= u128::from(order.remaining_qty());
        Some(order)
    }

    /// Peek at the head order without removing it.
    #[inline]
    pub fn head(&self) -> Option<&Order> {
        self.orders.front()
    }

    #[inline]
    pub(crate) fn head_mut(&mut self) -> Option<&mut Order> {
        self.orders.front_mut()
    }

    /// Remove the order with the given sequence number from anywhere in
    /// the queue (for cancel/amend).
    ///
    /// # Complexity
    /// O(n) in the level's order count
    pub fn remove(&mut self, sequence: u64) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.sequence() == sequence)?;
        let order = self.orders.remove(pos)?;
        self.total_qty -= u128::from(order.remaining_qty());
        Some(order)
    }

    pub fn get(&self, sequence: u64) -> Option<&Order> {
        self.orders.iter().find(|o| o.sequence() == sequence)
    }

    pub(crate) fn get_mut(&mut self, sequence: u64) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.sequence() == sequence)
    }

    /// Update total quantity after a fill or an in-place reduction.
    ///
    /// Call this after modifying an order's quantity directly.
    #[inline]
    pub(crate) fn subtract_qty(&mut self, qty: u64) {
        let qty = u128::from(qty);
        debug_assert!(self.total_qty >= qty);
        self.total_qty -= qty;
    }

    /// Orders in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }
}
