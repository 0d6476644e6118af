//! Stress Tests - concurrent producers against running matching loops.
//!
//! These tests verify correctness under contention:
//! - Quantity conservation across many concurrent producers
//! - Pool accounting while cancels race the matching loop
//! - FIFO order at a single heavily loaded level
//! - Instrument isolation when one loop fails

use std::sync::Arc;
use std::time::Duration;

use equity_match::{
    Engine, EngineConfig, InstrumentOutputs, LoopExit, MatchError, MatchOutcome, OrderDispatcher, OrderRequest, OrderType, Price,
    Side,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use tokio::sync::watch;

fn engine(instruments: &[&str]) -> Arc<Engine> {
    let config = EngineConfig {
        trade_channel_capacity: 64,
        market_data_channel_capacity: 64,
        ..EngineConfig::with_instruments(instruments.iter().copied())
    };
    Arc::new(Engine::new(config).unwrap())
}

/// Poll `done` until it holds, failing after a generous timeout.
async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Contention
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_conserve_quantity() {
    const PRODUCERS: u64 = 4;
    const ORDERS_PER_PRODUCER: u64 = 500;

    let engine = engine(&["ACME"]);
    let mut running = engine.start();
    let InstrumentOutputs { mut trades, mut market_data } = running.take_outputs("ACME").unwrap();

    let consumer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut traded = 0u64;
            while let Some(trade) = trades.recv().await {
                traded += trade.quantity();
                engine.release_trade(trade);
            }
            traded
        })
    };
    let md_drain = tokio::spawn(async move { while market_data.recv().await.is_some() {} });

    let dispatcher = OrderDispatcher::new(engine.clone());
    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let dispatcher = dispatcher.clone();
        producers.push(tokio::task::spawn_blocking(move || {
            let mut rng = ChaCha8Rng::seed_from_u64(p);
            let mut submitted = 0u64;
            for i in 0..ORDERS_PER_PRODUCER {
                let qty = rng.gen_range(1..50);
                let price = Decimal::new(1000, 2);
                // Each producer submits matching buy and sell volume
                for side in [Side::Buy, Side::Sell] {
                    let id = format!("{side}-{p}-{i}");
                    dispatcher
                        .put_order(OrderRequest::limit("ACME", format!("P{p}"), id, side, price, qty))
                        .unwrap();
                }
                submitted += qty;
            }
            submitted
        }));
    }

    let mut submitted = 0;
    for producer in producers {
        submitted += producer.await.unwrap();
    }

    let acme = engine.instrument("ACME").unwrap().clone();
    wait_until(|| acme.book().order_count() == 0).await;

    let exits = running.shutdown().await;
    assert_eq!(exits, vec![("ACME".to_owned(), LoopExit::Stopped)]);
    let traded = consumer.await.unwrap();
    md_drain.await.unwrap();

    assert_eq!(traded, submitted);
    let counts = engine.pool_counts("ACME").unwrap();
    assert_eq!(counts.orders.in_use, 0);
    assert_eq!(counts.trades.in_use, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancels_racing_the_matching_loop() {
    const ROUNDS: u64 = 2_000;

    let engine = engine(&["ACME"]);
    let mut running = engine.start();
    let InstrumentOutputs { mut trades, mut market_data } = running.take_outputs("ACME").unwrap();
    let consumer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            while let Some(trade) = trades.recv().await {
                engine.release_trade(trade);
            }
        })
    };
    tokio::spawn(async move { while market_data.recv().await.is_some() {} });

    let dispatcher = OrderDispatcher::new(engine.clone());
    let churn = {
        let dispatcher = dispatcher.clone();
        tokio::task::spawn_blocking(move || {
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            let mut found = 0u64;
            for i in 0..ROUNDS {
                let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
                let price = Decimal::new(rng.gen_range(995..1005), 2);
                let id = format!("c{i}");
                dispatcher
                    .put_order(OrderRequest::limit("ACME", "Churn", id.as_str(), side, price, rng.gen_range(1..100)))
                    .unwrap();
                if rng.gen_bool(0.5) && dispatcher.remove_order("ACME", "Churn", &id).unwrap() {
                    found += 1;
                }
            }
            found
        })
    };
    churn.await.unwrap();

    let acme = engine.instrument("ACME").unwrap().clone();
    wait_until(|| {
        let (bid, ask) = acme.book().tops();
        !matches!((bid, ask), (Some(b), Some(a)) if b.price >= a.price)
    })
    .await;
    running.shutdown().await;
    consumer.await.unwrap();

    // Every order still in use is resting in the book, and each is consistent
    let counts = engine.pool_counts("ACME").unwrap();
    assert_eq!(counts.orders.in_use, acme.book().order_count());
    assert_eq!(counts.trades.in_use, 0);
    for side in [Side::Buy, Side::Sell] {
        let book_side = acme.book().read(side);
        for order in book_side.orders() {
            assert_eq!(order.filled_qty() + order.remaining_qty(), order.original_qty());
            assert!(order.remaining_qty() > 0);
        }
    }
}

#[tokio::test]
async fn test_single_level_fifo_under_load() {
    const ASKS: u64 = 1_000;

    let engine = engine(&["ACME"]);
    let dispatcher = OrderDispatcher::new(engine.clone());
    let (_stop, stop_rx) = watch::channel(false);
    let (mut matcher, mut outputs) = engine.matcher("ACME", stop_rx).unwrap();

    for i in 0..ASKS {
        dispatcher
            .put_order(OrderRequest::limit("ACME", "Seller", format!("a{i:04}"), Side::Sell, Decimal::new(820, 2), 3))
            .unwrap();
    }
    dispatcher
        .put_order(OrderRequest::market("ACME", "Buyer", "sweep", Side::Buy, ASKS * 3))
        .unwrap();

    let mut expected = 0u64;
    while let MatchOutcome::Matched(summary) = matcher.match_top_order().await.unwrap() {
        assert_eq!(summary.price, Price::parse("8.2").unwrap());
        let trade = outputs.trades.try_recv().unwrap();
        assert_eq!(trade.sell_order_id(), format!("a{expected:04}"));
        engine.release_trade(trade);
        outputs.market_data.try_recv().unwrap();
        expected += 1;
    }

    assert_eq!(expected, ASKS);
    assert_eq!(engine.instrument("ACME").unwrap().book().order_count(), 0);
    let counts = engine.pool_counts("ACME").unwrap();
    assert_eq!(counts.orders.in_use, 0);
    assert_eq!(counts.trades.free, 1);
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_instrument_does_not_stop_others() {
    let engine = engine(&["ACME", "GLOBEX"]);
    let mut running = engine.start();

    // ACME's consumer goes away; its loop fails on the next match attempt
    drop(running.take_outputs("ACME").unwrap());
    let mut globex = running.take_outputs("GLOBEX").unwrap();

    let dispatcher = OrderDispatcher::new(engine.clone());
    for instrument in ["ACME", "GLOBEX"] {
        dispatcher
            .put_order(OrderRequest::limit(instrument, "B1", "b", Side::Buy, Decimal::new(100, 0), 10))
            .unwrap();
        dispatcher
            .put_order(OrderRequest::limit(instrument, "B2", "a", Side::Sell, Decimal::new(100, 0), 10))
            .unwrap();
    }

    let trade = globex.trades.recv().await.unwrap();
    assert_eq!(trade.instrument_id(), "GLOBEX");
    engine.release_trade(trade);
    globex.market_data.recv().await.unwrap();

    // GLOBEX keeps trading after ACME's failure
    dispatcher
        .put_order(OrderRequest::limit("GLOBEX", "B1", "b2", Side::Buy, Decimal::new(101, 0), 5))
        .unwrap();
    dispatcher
        .put_order(OrderRequest::market("GLOBEX", "B2", "m2", Side::Sell, 5))
        .unwrap();
    let trade = globex.trades.recv().await.unwrap();
    assert_eq!(trade.quantity(), 5);
    engine.release_trade(trade);

    wait_until(|| running.active_loops() == 1).await;
    let mut exits = running.shutdown().await;
    exits.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        exits[0],
        (
            "ACME".to_owned(),
            LoopExit::Failed(MatchError::TradeChannelClosed { instrument_id: "ACME".into() })
        )
    );
    assert_eq!(exits[1], ("GLOBEX".to_owned(), LoopExit::Stopped));

    // ACME's crossed orders were never touched
    let acme = engine.instrument("ACME").unwrap();
    assert_eq!(acme.book().order_count(), 2);
    let bids = acme.book().read(Side::Buy);
    assert_eq!(bids.head().unwrap().remaining_qty(), 10);
    assert_eq!(bids.head().unwrap().order_type(), OrderType::Limit);
}
