//! Determinism Test - Golden Master verification.
//!
//! Verifies that the engine produces identical trades across runs when
//! given the same command sequence and the same match cycle schedule.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use equity_match::{
    AmendRequest, CancelRequest, Command, Engine, EngineConfig, MatchOutcome, OrderDispatcher, OrderKey,
    OrderRequest, Side,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use tokio::sync::watch;

/// Generate a deterministic sequence of commands
fn generate_commands(seed: u64, count: usize) -> Vec<Command> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut commands = Vec::with_capacity(count);
    let mut active: Vec<OrderKey> = Vec::new();
    let mut next_id = 1u64;

    for _ in 0..count {
        let roll: f64 = rng.gen();
        if active.is_empty() || roll < 0.6 {
            let key = OrderKey::new(format!("Broker{}", rng.gen_range(1..10)), format!("o{next_id}"));
            next_id += 1;
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let quantity = rng.gen_range(1..500);
            let request = if rng.gen_bool(0.1) {
                OrderRequest::market("ACME", key.broker_id.clone(), key.client_order_id.clone(), side, quantity)
            } else {
                let price = Decimal::new(rng.gen_range(950..1050), 2);
                OrderRequest::limit("ACME", key.broker_id.clone(), key.client_order_id.clone(), side, price, quantity)
            };
            commands.push(Command::New(request));
            active.push(key);
        } else if roll < 0.8 {
            let key = active.swap_remove(rng.gen_range(0..active.len()));
            commands.push(Command::Cancel(CancelRequest {
                instrument_id: "ACME".into(),
                key,
            }));
        } else {
            let key = active[rng.gen_range(0..active.len())].clone();
            commands.push(Command::Amend(AmendRequest {
                instrument_id: "ACME".into(),
                key,
                new_price: Decimal::new(rng.gen_range(950..1050), 2),
                new_quantity: rng.gen_range(1..800),
            }));
        }
    }

    commands
}

/// Run every command, draining all crosses after each one, and hash the trades.
async fn run_and_hash(commands: &[Command]) -> (u64, usize) {
    let engine = Arc::new(Engine::new(EngineConfig::with_instruments(["ACME"])).unwrap());
    let dispatcher = OrderDispatcher::new(engine.clone());
    let (_stop, stop_rx) = watch::channel(false);
    let (mut matcher, mut outputs) = engine.matcher("ACME", stop_rx).unwrap();

    let mut hasher = DefaultHasher::new();
    let mut trades = 0;

    for command in commands {
        // Rejections (stale cancels, market orders into an empty side) are part of the stream
        let _ = dispatcher.dispatch(command.clone());

        while let MatchOutcome::Matched(_) = matcher.match_top_order().await.unwrap() {
            let trade = outputs.trades.try_recv().unwrap();
            trade.sequence().hash(&mut hasher);
            trade.price().hash(&mut hasher);
            trade.quantity().hash(&mut hasher);
            trade.buy_order_id().hash(&mut hasher);
            trade.sell_order_id().hash(&mut hasher);
            engine.release_trade(trade);
            outputs.market_data.try_recv().unwrap();
            trades += 1;
        }
    }

    let book = engine.instrument("ACME").unwrap().book();
    for side in [Side::Buy, Side::Sell] {
        for order in book.read(side).orders() {
            order.client_order_id().hash(&mut hasher);
            order.remaining_qty().hash(&mut hasher);
        }
    }

    (hasher.finish(), trades)
}

#[tokio::test]
async fn test_determinism_same_seed() {
    let commands = generate_commands(12345, 5_000);

    let (hash1, trades1) = run_and_hash(&commands).await;
    let (hash2, trades2) = run_and_hash(&commands).await;

    assert_eq!(hash1, hash2, "Same commands must produce identical results");
    assert_eq!(trades1, trades2);
    assert!(trades1 > 0, "Stream should produce at least one trade");
}

#[tokio::test]
async fn test_determinism_different_seeds() {
    let (hash1, _) = run_and_hash(&generate_commands(111, 2_000)).await;
    let (hash2, _) = run_and_hash(&generate_commands(222, 2_000)).await;

    assert_ne!(hash1, hash2, "Different seeds should produce different results");
}

#[tokio::test]
async fn test_book_never_left_crossed() {
    let commands = generate_commands(999, 3_000);
    let engine = Arc::new(Engine::new(EngineConfig::with_instruments(["ACME"])).unwrap());
    let dispatcher = OrderDispatcher::new(engine.clone());
    let (_stop, stop_rx) = watch::channel(false);
    let (mut matcher, mut outputs) = engine.matcher("ACME", stop_rx).unwrap();
    let book = engine.instrument("ACME").unwrap().book();

    for command in commands {
        let _ = dispatcher.dispatch(command);
        while let MatchOutcome::Matched(_) = matcher.match_top_order().await.unwrap() {
            let trade = outputs.trades.try_recv().unwrap();
            engine.release_trade(trade);
            outputs.market_data.try_recv().unwrap();
        }

        let (bid, ask) = book.tops();
        if let (Some(bid), Some(ask)) = (bid, ask) {
            assert!(equity_match::cross_price(bid, ask).is_none(), "Book left crossed");
        }
    }

    let counts = engine.pool_counts("ACME").unwrap();
    assert_eq!(counts.orders.in_use, book.order_count());
    assert_eq!(counts.trades.in_use, 0);
}
