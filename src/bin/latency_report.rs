use std::sync::Arc;
use std::time::{Duration, Instant};

use equity_match::{Engine, EngineConfig, MatchOutcome, OrderDispatcher, OrderRequest, Side};
use hdrhistogram::Histogram;
use rust_decimal::Decimal;
use tokio::sync::watch;

const ITERATIONS: u64 = 200_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Preparing Latency Benchmark...");

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let engine = Arc::new(Engine::new(EngineConfig::with_instruments(["ACME"]))?);
    engine.warm_up(1024, 1024);
    let dispatcher = OrderDispatcher::new(engine.clone());

    let (_stop, stop_rx) = watch::channel(false);
    let (mut matcher, mut outputs) = engine
        .matcher("ACME", stop_rx)
        .ok_or("instrument ACME not configured")?;

    let mut put_hist = Histogram::<u64>::new_with_bounds(1, 10_000_000, 3)?;
    let mut match_hist = Histogram::<u64>::new_with_bounds(1, 10_000_000, 3)?;
    let mut total = Duration::ZERO;

    println!("Running {} put+match cycles...", ITERATIONS);

    runtime.block_on(async {
        for i in 0..ITERATIONS {
            let price = Decimal::new(10_000 + (i % 100) as i64, 2);
            let ask = OrderRequest::limit("ACME", "Seller", format!("a{i}"), Side::Sell, price, 10);
            let bid = OrderRequest::limit("ACME", "Buyer", format!("b{i}"), Side::Buy, price, 10);

            let start = Instant::now();
            std::hint::black_box(dispatcher.put_order(ask)?);
            std::hint::black_box(dispatcher.put_order(bid)?);
            let put_elapsed = start.elapsed();

            let start = Instant::now();
            let outcome = matcher.match_top_order().await?;
            let match_elapsed = start.elapsed();
            if !matches!(outcome, MatchOutcome::Matched(_)) {
                return Err(format!("cycle {i} did not match: {outcome:?}").into());
            }

            put_hist.record(put_elapsed.as_nanos() as u64).unwrap_or(());
            match_hist.record(match_elapsed.as_nanos() as u64).unwrap_or(());
            total += put_elapsed + match_elapsed;

            while let Ok(trade) = outputs.trades.try_recv() {
                engine.release_trade(trade);
            }
            while outputs.market_data.try_recv().is_ok() {}
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;

    println!("\n=== Latency Report (ns) ===");
    println!("Cycles:     {}", ITERATIONS);
    println!("Throughput: {:.2} cycles/sec", ITERATIONS as f64 / total.as_secs_f64());
    for (name, histogram) in [("put x2", &put_hist), ("match", &match_hist)] {
        println!("--- {name} ---");
        println!("Min:    {:8} ns", histogram.min());
        println!("P50:    {:8} ns", histogram.value_at_quantile(0.50));
        println!("P90:    {:8} ns", histogram.value_at_quantile(0.90));
        println!("P99:    {:8} ns", histogram.value_at_quantile(0.99));
        println!("P99.9:  {:8} ns", histogram.value_at_quantile(0.999));
        println!("Max:    {:8} ns", histogram.max());
    }

    let counts = engine.pool_counts("ACME").ok_or("instrument ACME not configured")?;
    println!("---------------------------");
    println!("Order pool: {} free / {} in use", counts.orders.free, counts.orders.in_use);
    println!("Trade pool: {} free / {} in use", counts.trades.free, counts.trades.in_use);
    Ok(())
}
