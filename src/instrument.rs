//! Instrument - the independent state of one tradable symbol.
//!
//! One book, one order arena and one trade arena per instrument. Nothing
//! here is shared between instruments.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Notify;

use crate::arena::{Arena, PoolCounts};
use crate::config::EngineConfig;
use crate::order::Order;
use crate::order_book::OrderBook;
use crate::trade::Trade;

/// Pool health of one instrument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentCounts {
    pub orders: PoolCounts,
    pub trades: PoolCounts,
}

pub struct Instrument {
    id: Arc<str>,
    book: OrderBook,
    orders: Arena<Order>,
    trades: Arena<Trade>,
    /// Signalled by the dispatcher after book changes
    wakeup: Notify,
}

impl Instrument {
    pub fn new(id: &str, config: &EngineConfig) -> Self {
        let id: Arc<str> = Arc::from(id);
        Self {
            book: OrderBook::new(),
            orders: Arena::new(id.clone(), "order", config.max_free_orders),
            trades: Arena::new(id.clone(), "trade", config.max_free_trades),
            wakeup: Notify::new(),
            id,
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub(crate) fn shared_id(&self) -> &Arc<str> {
        &self.id
    }

    #[inline]
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    #[inline]
    pub fn order_pool(&self) -> &Arena<Order> {
        &self.orders
    }

    #[inline]
    pub fn trade_pool(&self) -> &Arena<Trade> {
        &self.trades
    }

    pub fn counts(&self) -> InstrumentCounts {
        InstrumentCounts {
            orders: self.orders.counts(),
            trades: self.trades.counts(),
        }
    }

    /// Wake the matching loop; a wakeup with no waiter is kept for the next wait.
    pub fn notify_book_changed(&self) {
        self.wakeup.notify_one();
    }

    pub(crate) fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    /// Pre-construct pooled instances ahead of trading.
    pub fn warm_up(&self, orders: usize, trades: usize) {
        self.orders.warm_up(orders);
        self.trades.warm_up(trades);
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("id", &self.id)
            .field("orders", &self.orders)
            .field("trades", &self.trades)
            .finish()
    }
}
