//! # Equity-Match
//!
//! A per-instrument limit order book matching engine.
//!
//! ## Design Principles
//!
//! - **Instrument isolation**: every instrument owns its book, its order
//!   arena and its trade arena; nothing is shared across instruments
//! - **Two locks per book**: bid and ask sides are locked independently;
//!   paths that need both take bid first and release ask first
//! - **Insertion is not matching**: the dispatcher only rests orders, a
//!   dedicated loop per instrument crosses the top of book one match at a time
//! - **Pooled objects**: orders and trades are recycled through arenas
//!   with generation-checked tickets
//!
//! ## Architecture
//!
//! ```text
//! [Protocol Layer] --> [OrderDispatcher] --> [OrderBook (per instrument)]
//!                                                     |
//!                                           [MatchingEngine loop]
//!                                              |             |
//!                                        [Trade channel] [MarketData channel]
//! ```

pub mod arena;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod feed;
pub mod instrument;
pub mod market_data;
pub mod matching;
pub mod order;
pub mod order_book;
pub mod price;
pub mod price_level;
pub mod trade;

// Re-exports for convenience
pub use arena::{Arena, ArenaTicket, PoolCounts, Pooled};
pub use command::{AmendRequest, CancelRequest, Command, OrderKey, OrderRequest, OrderType, Side};
pub use config::EngineConfig;
pub use dispatcher::{Accepted, DispatchAck, DispatchStats, OrderDispatcher};
pub use engine::{Engine, InstrumentOutputs, RunningEngine};
pub use error::{ConfigError, FeedError, MatchError, OrderError};
pub use instrument::{Instrument, InstrumentCounts};
pub use market_data::{DepthLevel, MarketData};
pub use matching::{cross_price, LoopExit, LoopState, MatchOutcome, MatchSummary, MatchingEngine};
pub use order::{Order, OrderFields};
pub use order_book::{BookSide, BookSnapshot, OrderBook, TopOfBook};
pub use price::Price;
pub use price_level::PriceLevel;
pub use trade::{Trade, TradeFields, TradeRecord};
