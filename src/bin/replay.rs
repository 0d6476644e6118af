//! Replay a CSV order feed through live matching loops.
//!
//! Trades are written as CSV, market data as JSON lines. Every trade is
//! returned to its instrument's pool once written.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use equity_match::feed::parse_feed;
use equity_match::{cross_price, Engine, EngineConfig, MarketData, OrderDispatcher, TradeRecord};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "replay", about = "Replay an order feed through the matching engine")]
struct Args {
    /// CSV order feed
    #[arg(long)]
    feed: PathBuf,

    /// JSON engine config; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instruments to trade, overriding the config's list
    #[arg(long, value_delimiter = ',')]
    instruments: Vec<String>,

    /// Trade CSV output (stdout when omitted)
    #[arg(long)]
    trades_out: Option<PathBuf>,

    /// Market data JSON lines output (discarded when omitted)
    #[arg(long)]
    market_data_out: Option<PathBuf>,
}

fn open_output(path: Option<&PathBuf>) -> io::Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if !args.instruments.is_empty() {
        config.instruments = args.instruments.clone();
    }

    let engine = Arc::new(Engine::new(config)?);
    let mut running = engine.start();

    // Fan every instrument's outputs into one writer per stream
    let (record_tx, mut record_rx) = mpsc::channel::<TradeRecord>(1024);
    let (md_tx, mut md_rx) = mpsc::channel::<MarketData>(1024);
    for id in engine.instrument_ids() {
        let Some(mut outputs) = running.take_outputs(id) else {
            continue;
        };
        let engine = engine.clone();
        let record_tx = record_tx.clone();
        tokio::spawn(async move {
            while let Some(trade) = outputs.trades.recv().await {
                let record = trade.to_record();
                engine.release_trade(trade);
                if record_tx.send(record).await.is_err() {
                    break;
                }
            }
        });
        let md_tx = md_tx.clone();
        tokio::spawn(async move {
            while let Some(md) = outputs.market_data.recv().await {
                if md_tx.send(md).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(record_tx);
    drop(md_tx);

    let trades_out = open_output(args.trades_out.as_ref())?;
    let trade_writer = tokio::task::spawn_blocking(move || -> Result<u64, csv::Error> {
        let mut writer = csv::Writer::from_writer(trades_out);
        let mut written = 0;
        while let Some(record) = record_rx.blocking_recv() {
            writer.serialize(&record)?;
            written += 1;
        }
        writer.flush()?;
        Ok(written)
    });

    let md_out = match &args.market_data_out {
        Some(path) => Some(open_output(Some(path))?),
        None => None,
    };
    let md_writer = tokio::task::spawn_blocking(move || -> Result<u64, io::Error> {
        let mut out = md_out;
        let mut written = 0;
        while let Some(md) = md_rx.blocking_recv() {
            if let Some(out) = out.as_mut() {
                serde_json::to_writer(&mut *out, &md)?;
                out.write_all(b"\n")?;
            }
            written += 1;
        }
        if let Some(out) = out.as_mut() {
            out.flush()?;
        }
        Ok(written)
    });

    // Feed the dispatcher through the inbound channel
    let dispatcher = OrderDispatcher::new(engine.clone());
    let (inbound_tx, inbound_rx) = mpsc::channel(1024);
    let dispatch = tokio::spawn(async move { dispatcher.run(inbound_rx).await });

    let mut malformed = 0u64;
    for (line, row) in parse_feed(File::open(&args.feed)?).into_iter().enumerate() {
        match row {
            Ok(command) => inbound_tx.send(command).await?,
            Err(err) => {
                malformed += 1;
                warn!(row = line + 1, error = %err, "skipping feed row");
            }
        }
    }
    drop(inbound_tx);
    let stats = dispatch.await?;

    // Let every live loop drain whatever still crosses; a failed loop never will
    loop {
        let crossing = engine.instrument_ids().into_iter().any(|id| {
            running.is_active(id)
                && engine.instrument(id).is_some_and(|instrument| {
                    matches!(instrument.book().tops(), (Some(bid), Some(ask)) if cross_price(bid, ask).is_some())
                })
        });
        if !crossing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    for (id, exit) in running.shutdown().await {
        info!(instrument = %id, ?exit, "loop exit");
    }
    let trades = trade_writer.await??;
    let market_data = md_writer.await??;

    info!(?stats, malformed, trades, market_data, "replay finished");
    for id in engine.instrument_ids() {
        if let Some(counts) = engine.pool_counts(id) {
            info!(instrument = %id, ?counts, "pool counts");
        }
    }
    Ok(())
}
