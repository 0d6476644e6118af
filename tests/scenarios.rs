//! Scenario Tests - reference order flows driven one match cycle at a time.
//!
//! The matching loop is not spawned here; each test calls
//! `match_top_order` directly so cycles are observable one by one.

use std::str::FromStr;
use std::sync::Arc;

use equity_match::{
    Engine, EngineConfig, InstrumentOutputs, MarketData, MatchOutcome, MatchingEngine, OrderDispatcher,
    OrderError, OrderRequest, OrderType, PoolCounts, Price, Side, Trade,
};
use rust_decimal::Decimal;
use tokio::sync::watch;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn px(s: &str) -> Price {
    Price::parse(s).unwrap()
}

struct Market {
    engine: Arc<Engine>,
    dispatcher: OrderDispatcher,
    matcher: MatchingEngine,
    outputs: InstrumentOutputs,
    _stop: watch::Sender<bool>,
}

impl Market {
    fn new() -> Self {
        let engine = Arc::new(Engine::new(EngineConfig::with_instruments(["ACME"])).unwrap());
        let (stop, stop_rx) = watch::channel(false);
        let (matcher, outputs) = engine.matcher("ACME", stop_rx).unwrap();
        Self {
            dispatcher: OrderDispatcher::new(engine.clone()),
            engine,
            matcher,
            outputs,
            _stop: stop,
        }
    }

    fn limit(&self, broker: &str, id: &str, side: Side, price: &str, qty: u64) {
        self.dispatcher
            .put_order(OrderRequest::limit("ACME", broker, id, side, dec(price), qty))
            .unwrap();
    }

    fn market(&self, broker: &str, id: &str, side: Side, qty: u64) -> Result<Price, OrderError> {
        self.dispatcher
            .put_order(OrderRequest::market("ACME", broker, id, side, qty))
            .map(|accepted| accepted.price)
    }

    /// Bid 8.1x300 from Broker1; asks 8.2x100, 8.4x300, 8.5x400 from Broker2.
    fn reference_book() -> Self {
        let market = Self::new();
        market.limit("Broker1", "bid-81", Side::Buy, "8.1", 300);
        market.limit("Broker2", "ask-82", Side::Sell, "8.2", 100);
        market.limit("Broker2", "ask-84", Side::Sell, "8.4", 300);
        market.limit("Broker2", "ask-85", Side::Sell, "8.5", 400);
        market
    }

    async fn cycle(&mut self) -> MatchOutcome {
        self.matcher.match_top_order().await.unwrap()
    }

    fn trade(&mut self) -> Trade {
        self.outputs.trades.try_recv().expect("trade emitted")
    }

    fn market_data(&mut self) -> MarketData {
        self.outputs.market_data.try_recv().expect("market data emitted")
    }

    fn assert_quiet(&mut self) {
        assert!(self.outputs.trades.try_recv().is_err(), "unexpected trade");
        assert!(self.outputs.market_data.try_recv().is_err(), "unexpected market data");
    }

    fn counts(&self) -> (PoolCounts, PoolCounts) {
        let counts = self.engine.pool_counts("ACME").unwrap();
        (counts.orders, counts.trades)
    }

    fn book(&self) -> &equity_match::OrderBook {
        self.engine.instrument("ACME").unwrap().book()
    }
}

// ============================================================================
// Market Orders
// ============================================================================

#[tokio::test]
async fn test_market_buy_takes_best_ask() {
    let mut m = Market::reference_book();
    assert_eq!(m.market("Broker3", "mkt-1", Side::Buy, 100), Ok(px("8.2")));

    assert!(matches!(m.cycle().await, MatchOutcome::Matched(_)));

    let trade = m.trade();
    assert_eq!(trade.price(), px("8.2"));
    assert_eq!(trade.quantity(), 100);
    assert_eq!(trade.buy_broker_id(), "Broker3");
    assert_eq!(trade.sell_broker_id(), "Broker2");

    let md = m.market_data();
    assert_eq!(md.best_bid, Some(px("8.1")));
    assert_eq!(md.best_ask, Some(px("8.4")));
    assert_eq!(md.last_trade_price, Some(px("8.2")));
    m.engine.release_trade(trade);
}

#[tokio::test]
async fn test_market_buy_sweeps_two_levels() {
    let mut m = Market::reference_book();
    m.market("Broker3", "mkt-1", Side::Buy, 400).unwrap();

    assert!(matches!(m.cycle().await, MatchOutcome::Matched(_)));
    let first = m.trade();
    assert_eq!((first.price(), first.quantity()), (px("8.2"), 100));
    assert_eq!(first.sell_order_id(), "ask-82");

    // Residual market buy still rests at 8.2 yet crosses the 8.4 ask
    assert_eq!(m.book().best_bid(), Some(px("8.2")));
    assert!(matches!(m.cycle().await, MatchOutcome::Matched(_)));
    let second = m.trade();
    assert_eq!((second.price(), second.quantity()), (px("8.4"), 300));
    assert_eq!(second.sell_order_id(), "ask-84");
    assert_eq!(second.buy_order_id(), "mkt-1");
    assert!(second.sequence() > first.sequence());

    m.market_data();
    let md = m.market_data();
    assert_eq!(md.best_bid, Some(px("8.1")));
    assert_eq!(md.best_ask, Some(px("8.5")));

    assert_eq!(m.cycle().await, MatchOutcome::NoCross);
    m.assert_quiet();
}

#[tokio::test]
async fn test_market_sell_residual_rests() {
    let mut m = Market::new();
    m.limit("Broker1", "bid-81", Side::Buy, "8.1", 300);

    m.market("Broker4", "mkt-s", Side::Sell, 400).unwrap();
    assert_eq!(m.book().best_ask(), Some(px("8.1")));

    assert!(matches!(m.cycle().await, MatchOutcome::Matched(_)));
    let trade = m.trade();
    assert_eq!(trade.price(), px("8.1"));
    assert_eq!(trade.quantity(), 300);
    assert_eq!(trade.buy_broker_id(), "Broker1");
    assert_eq!(trade.sell_broker_id(), "Broker4");

    assert_eq!(m.book().best_bid(), None);
    assert_eq!(m.book().best_ask(), Some(px("8.1")));
    let asks = m.book().read(Side::Sell);
    let residual = asks.head().unwrap();
    assert_eq!(residual.order_type(), OrderType::Market);
    assert_eq!(residual.remaining_qty(), 100);
    assert_eq!(residual.filled_qty(), 300);
    drop(asks);

    assert_eq!(m.cycle().await, MatchOutcome::NoCross);
}

#[tokio::test]
async fn test_market_sell_without_bids_rejected() {
    let mut m = Market::new();
    m.limit("Broker2", "ask-82", Side::Sell, "8.2", 100);
    let before = m.counts();

    assert_eq!(
        m.market("Broker4", "mkt-s", Side::Sell, 400),
        Err(OrderError::NoLiquidity { side: Side::Sell })
    );
    assert_eq!(m.book().order_count(), 1);
    assert_eq!(m.cycle().await, MatchOutcome::NoCross);
    m.assert_quiet();
    assert_eq!(m.counts(), before);
}

// ============================================================================
// Cancel and Amend
// ============================================================================

#[tokio::test]
async fn test_cancel_sole_bid() {
    let m = Market::new();
    m.limit("Broker1", "bid-81", Side::Buy, "8.1", 300);
    let (before, _) = m.counts();

    assert_eq!(m.dispatcher.remove_order("ACME", "Broker1", "bid-81"), Ok(true));
    assert_eq!(m.book().best_bid(), None);

    let (after, _) = m.counts();
    assert_eq!(after.free, before.free + 1);
    assert_eq!(after.in_use, before.in_use - 1);
}

#[tokio::test]
async fn test_reprice_creates_new_level() {
    let mut m = Market::reference_book();
    m.limit("Broker1", "bid-80", Side::Buy, "8.0", 50);

    assert_eq!(
        m.dispatcher.update_order("ACME", "Broker1", "bid-81", dec("7.9"), 300),
        Ok(true)
    );
    {
        let bids = m.book().read(Side::Buy);
        let level = bids.level(px("7.9")).unwrap();
        assert_eq!(level.count(), 1);
        assert_eq!(level.head().unwrap().client_order_id(), "bid-81");
        assert!(bids.level(px("8.1")).is_none());
        assert_eq!(bids.best_price(), Some(px("8.0")));
    }

    assert_eq!(m.cycle().await, MatchOutcome::NoCross);
    m.assert_quiet();
}

#[tokio::test]
async fn test_reprice_into_cross_trades_on_next_cycle() {
    let mut m = Market::reference_book();
    m.dispatcher
        .update_order("ACME", "Broker1", "bid-81", dec("8.4"), 300)
        .unwrap();

    assert!(matches!(m.cycle().await, MatchOutcome::Matched(_)));
    let trade = m.trade();
    assert_eq!((trade.price(), trade.quantity()), (px("8.2"), 100));
}

// ============================================================================
// Pool Reuse
// ============================================================================

#[tokio::test]
async fn test_recycled_orders_carry_no_residue() {
    let mut m = Market::new();
    m.limit("Broker1", "b1", Side::Buy, "8.2", 100);
    m.limit("Broker2", "a1", Side::Sell, "8.2", 40);
    m.cycle().await;
    m.dispatcher.remove_order("ACME", "Broker1", "b1").unwrap();
    let trade = m.trade();
    m.engine.release_trade(trade);

    let (orders, trades) = m.counts();
    assert_eq!(orders, PoolCounts { free: 2, in_use: 0 });
    assert_eq!(trades, PoolCounts { free: 1, in_use: 0 });

    m.limit("Broker9", "fresh", Side::Sell, "9.9", 7);
    let asks = m.book().read(Side::Sell);
    let order = asks.head().unwrap();
    assert_eq!(order.broker_id(), "Broker9");
    assert_eq!(order.price(), px("9.9"));
    assert_eq!(order.original_qty(), 7);
    assert_eq!(order.filled_qty(), 0);
    assert_eq!(order.remaining_qty(), 7);
    assert_eq!(order.order_type(), OrderType::Limit);
}
