//! Engine - owns every instrument and runs one matching loop per instrument.
//!
//! Constructed once at startup from an [`EngineConfig`] and shared by
//! handle (`Arc<Engine>`) with the dispatcher, the matching loops and the
//! downstream writers. There is no process-wide state.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::instrument::{Instrument, InstrumentCounts};
use crate::market_data::MarketData;
use crate::matching::{LoopExit, MatchingEngine};
use crate::trade::Trade;

/// Receiving ends of one instrument's outbound channels.
#[derive(Debug)]
pub struct InstrumentOutputs {
    pub trades: mpsc::Receiver<Trade>,
    pub market_data: mpsc::Receiver<MarketData>,
}

pub struct Engine {
    config: EngineConfig,
    instruments: FxHashMap<Arc<str>, Arc<Instrument>>,
}

impl Engine {
    /// Build one book and two arenas per configured instrument.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let instruments = config
            .instruments
            .iter()
            .map(|id| {
                let instrument = Arc::new(Instrument::new(id, &config));
                (instrument.shared_id().clone(), instrument)
            })
            .collect();
        Ok(Self { config, instruments })
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn instrument(&self, id: &str) -> Option<&Arc<Instrument>> {
        self.instruments.get(id)
    }

    /// Known instrument ids, sorted.
    pub fn instrument_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.instruments.keys().map(|id| &**id).collect();
        ids.sort_unstable();
        ids
    }

    /// Free and in-use counts of both pools of one instrument.
    pub fn pool_counts(&self, id: &str) -> Option<InstrumentCounts> {
        self.instrument(id).map(|instrument| instrument.counts())
    }

    /// Pre-construct pooled instances for every instrument.
    pub fn warm_up(&self, orders: usize, trades: usize) {
        for instrument in self.instruments.values() {
            instrument.warm_up(orders, trades);
        }
    }

    /// Return a consumed trade to the pool of the instrument it came from.
    pub fn release_trade(&self, trade: Trade) {
        match self.instruments.get(trade.instrument_id()) {
            Some(instrument) => instrument.trade_pool().release(trade),
            None => warn!(instrument = %trade.instrument_id(), "trade released to unknown instrument"),
        }
    }

    /// Build the matching loop of one instrument with fresh outbound channels.
    pub fn matcher(
        &self,
        id: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Option<(MatchingEngine, InstrumentOutputs)> {
        let instrument = self.instrument(id)?.clone();
        let (trade_tx, trades) = mpsc::channel(self.config.trade_channel_capacity);
        let (md_tx, market_data) = mpsc::channel(self.config.market_data_channel_capacity);
        let matcher = MatchingEngine::new(
            instrument,
            trade_tx,
            md_tx,
            shutdown,
            self.config.idle_delay(),
            self.config.depth_levels,
        );
        Some((matcher, InstrumentOutputs { trades, market_data }))
    }

    /// Spawn one matching loop per instrument on the current runtime.
    pub fn start(self: &Arc<Self>) -> RunningEngine {
        let (stop, stop_rx) = watch::channel(false);
        let mut loops = Vec::with_capacity(self.instruments.len());
        let mut outputs = FxHashMap::default();

        for id in self.instrument_ids() {
            let Some((matcher, out)) = self.matcher(id, stop_rx.clone()) else {
                continue;
            };
            loops.push((id.to_owned(), tokio::spawn(matcher.run())));
            outputs.insert(id.to_owned(), out);
        }

        info!(instruments = loops.len(), "engine started");
        RunningEngine { stop, loops, outputs }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("instruments", &self.instrument_ids())
            .finish()
    }
}

/// Handle over the spawned matching loops.
pub struct RunningEngine {
    stop: watch::Sender<bool>,
    loops: Vec<(String, JoinHandle<LoopExit>)>,
    outputs: FxHashMap<String, InstrumentOutputs>,
}

impl RunningEngine {
    /// Take the output receivers of one instrument. Yields `None` the second time.
    pub fn take_outputs(&mut self, id: &str) -> Option<InstrumentOutputs> {
        self.outputs.remove(id)
    }

    /// Loops that have not exited yet.
    pub fn active_loops(&self) -> usize {
        self.loops.iter().filter(|(_, handle)| !handle.is_finished()).count()
    }

    /// Whether the loop of one instrument is still running.
    pub fn is_active(&self, id: &str) -> bool {
        self.loops
            .iter()
            .any(|(loop_id, handle)| loop_id == id && !handle.is_finished())
    }

    /// Signal every loop to stop after its current cycle.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop every loop and wait for it, reporting how each one ended.
    pub async fn shutdown(self) -> Vec<(String, LoopExit)> {
        self.stop();
        let Self { loops, outputs, .. } = self;
        // Receivers nobody took would otherwise keep full channels alive
        drop(outputs);

        let mut exits = Vec::with_capacity(loops.len());
        for (id, handle) in loops {
            match handle.await {
                Ok(exit) => exits.push((id, exit)),
                Err(err) => error!(instrument = %id, error = %err, "matching loop panicked"),
            }
        }
        info!("engine stopped");
        exits
    }
}
