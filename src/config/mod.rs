//! Configuration management for the envelope trader.
//!
//! Loads settings from `config.toml` and `ENVT__`-prefixed environment
//! variables. Per-pair strategy parameters are a structured record type
//! validated at load time, not a loosely-typed mapping.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::exchange::MarginMode;

/// Which candle field feeds the moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSource {
    Close,
    OhlcAverage,
}

/// A direction the strategy is allowed to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

/// Per-pair strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    /// Price source for the moving average
    #[serde(default = "default_price_source")]
    pub src: PriceSource,
    /// Moving average window length in bars
    #[serde(default = "default_ma_base_window")]
    pub ma_base_window: usize,
    /// Envelope fractions, ascending, each in (0, 1)
    pub envelopes: Vec<Decimal>,
    /// Fraction of the account balance targeted by this pair (0, 1]
    #[serde(default = "default_pair_size")]
    pub size: Decimal,
    /// Enabled entry directions
    #[serde(default = "default_sides")]
    pub sides: Vec<Direction>,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Margin mode applied to every pair
    #[serde(default = "default_margin_mode")]
    pub margin_mode: MarginMode,
    /// Leverage configured on the exchange per pair
    #[serde(default = "default_exchange_leverage")]
    pub exchange_leverage: u8,
    /// Candle timeframe (e.g. "1h")
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Leverage multiplier applied to order sizing
    #[serde(default = "default_size_leverage")]
    pub size_leverage: Decimal,
    /// Stop-loss distance from entry price (0, 1)
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Number of candles fetched per pair (window + margin)
    #[serde(default = "default_ohlcv_limit")]
    pub ohlcv_limit: usize,
    /// Strategy parameters keyed by pair (e.g. "ETH/USDT")
    #[serde(default)]
    pub pairs: HashMap<String, PairConfig>,
}

// Default value functions

fn default_price_source() -> PriceSource {
    PriceSource::Close
}

fn default_ma_base_window() -> usize {
    5
}

fn default_pair_size() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_sides() -> Vec<Direction> {
    vec![Direction::Long]
}

fn default_margin_mode() -> MarginMode {
    MarginMode::Isolated
}

fn default_exchange_leverage() -> u8 {
    4
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_size_leverage() -> Decimal {
    Decimal::from(4)
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(2, 1) // 0.2
}

fn default_ohlcv_limit() -> usize {
    50
}

impl Config {
    /// Load configuration from `config.toml` and environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("ENVT"))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate run-level and per-pair parameters.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.exchange_leverage >= 1, "exchange_leverage must be >= 1");

        anyhow::ensure!(
            self.size_leverage >= Decimal::ONE,
            "size_leverage must be >= 1"
        );

        anyhow::ensure!(
            self.stop_loss_pct > Decimal::ZERO && self.stop_loss_pct < Decimal::ONE,
            "stop_loss_pct must be in (0, 1)"
        );

        for (pair, params) in &self.pairs {
            params
                .validate()
                .with_context(|| format!("invalid config for pair {pair}"))?;

            // Need the window to end at the second-to-last candle.
            anyhow::ensure!(
                self.ohlcv_limit >= params.ma_base_window + 1,
                "ohlcv_limit {} too small for ma_base_window {} on {}",
                self.ohlcv_limit,
                params.ma_base_window,
                pair
            );
        }

        Ok(())
    }
}

impl PairConfig {
    /// Validate envelope list, capital fraction and direction set.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.ma_base_window >= 1, "ma_base_window must be >= 1");

        anyhow::ensure!(!self.envelopes.is_empty(), "envelopes must be non-empty");

        anyhow::ensure!(
            self.envelopes
                .iter()
                .all(|e| *e > Decimal::ZERO && *e < Decimal::ONE),
            "each envelope fraction must be in (0, 1)"
        );

        anyhow::ensure!(
            self.envelopes.windows(2).all(|w| w[0] < w[1]),
            "envelopes must be strictly increasing"
        );

        anyhow::ensure!(
            self.size > Decimal::ZERO && self.size <= Decimal::ONE,
            "size must be in (0, 1]"
        );

        anyhow::ensure!(!self.sides.is_empty(), "sides must be non-empty");

        anyhow::ensure!(
            self.sides.len() <= 2
                && self
                    .sides
                    .iter()
                    .collect::<std::collections::HashSet<_>>()
                    .len()
                    == self.sides.len(),
            "sides must not contain duplicates"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            margin_mode: default_margin_mode(),
            exchange_leverage: default_exchange_leverage(),
            timeframe: default_timeframe(),
            size_leverage: default_size_leverage(),
            stop_loss_pct: default_stop_loss_pct(),
            ohlcv_limit: default_ohlcv_limit(),
            pairs: HashMap::new(),
        }
    }
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            src: default_price_source(),
            ma_base_window: default_ma_base_window(),
            envelopes: vec![Decimal::new(5, 2), Decimal::new(75, 3)], // 0.05, 0.075
            size: default_pair_size(),
            sides: default_sides(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_pair_config_is_valid() {
        assert!(PairConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_envelopes() {
        let params = PairConfig {
            envelopes: vec![],
            ..PairConfig::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_non_increasing_envelopes() {
        let params = PairConfig {
            envelopes: vec![dec!(0.075), dec!(0.05)],
            ..PairConfig::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_envelope_out_of_range() {
        let params = PairConfig {
            envelopes: vec![dec!(0.05), dec!(1.0)],
            ..PairConfig::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_sides() {
        let params = PairConfig {
            sides: vec![Direction::Long, Direction::Long],
            ..PairConfig::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_lookback_shorter_than_window() {
        let mut config = Config::default();
        config.ohlcv_limit = 5;
        config.pairs.insert(
            "ETH/USDT".to_string(),
            PairConfig {
                ma_base_window: 10,
                ..PairConfig::default()
            },
        );
        assert!(config.validate().is_err());
    }
}
