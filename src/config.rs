//! Engine configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Tunables for the engine. Every field has a default.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Known instrument ids
    pub instruments: Vec<String>,
    /// Bound of each instrument's outbound trade channel
    pub trade_channel_capacity: usize,
    /// Bound of each instrument's outbound market-data channel
    pub market_data_channel_capacity: usize,
    /// Sleep between cycles that found nothing to cross
    pub idle_delay_ms: u64,
    /// Free orders retained per instrument
    pub max_free_orders: usize,
    /// Free trades retained per instrument
    pub max_free_trades: usize,
    /// Price levels per side copied into market data
    pub depth_levels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            trade_channel_capacity: 1024,
            market_data_channel_capacity: 1024,
            idle_delay_ms: 1,
            max_free_orders: 65_536,
            max_free_trades: 16_384,
            depth_levels: 10,
        }
    }
}

impl EngineConfig {
    /// Default config trading the given instruments.
    pub fn with_instruments<I, S>(instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            instruments: instruments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trade_channel_capacity == 0 || self.market_data_channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be positive".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for id in &self.instruments {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("empty instrument id".into()));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate instrument id {id}")));
            }
        }
        Ok(())
    }

    pub fn idle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_delay_ms)
    }
}
