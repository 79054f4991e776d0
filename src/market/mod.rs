//! Market snapshot builder: moving-average envelope bands per pair.
//!
//! All derived values are computed from the window ending at the
//! second-to-last candle. The last bar is still forming and is never used,
//! so a run never acts on an incomplete candle.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::{PairConfig, PriceSource};
use crate::exchange::{Candle, MarketInfo};

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Not enough completed bars to fill the moving-average window.
    #[error("{pair}: need {needed} candles for the moving average, have {have}")]
    InsufficientHistory {
        pair: String,
        needed: usize,
        have: usize,
    },
}

/// Simple moving average over the last `window` values.
pub fn sma(values: &[Decimal], window: usize) -> Option<Decimal> {
    if window == 0 || values.len() < window {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(window).sum();
    Some(sum / Decimal::from(window as u64))
}

/// Upper-band fraction matching envelope fraction `e`.
///
/// Chosen so the percentage move from the lower band back up to the band
/// reference compounds to the same magnitude as the drop: `1/(1-e) - 1`,
/// not a naive symmetric `+e`.
pub fn upper_fraction(e: Decimal) -> Decimal {
    Decimal::ONE / (Decimal::ONE - e) - Decimal::ONE
}

/// One envelope level: entry prices below and above the moving average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeBand {
    pub low: Decimal,
    pub high: Decimal,
}

/// Per-pair indicator state for one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSnapshot {
    pub pair: String,
    pub market: MarketInfo,
    /// Moving average over the previous completed bar's window.
    pub ma_base: Decimal,
    /// Bands indexed like the configured envelope list (innermost first).
    pub bands: Vec<EnvelopeBand>,
}

impl PairSnapshot {
    /// Compute the snapshot from raw candles (oldest first, last bar may be
    /// still forming) and the pair's strategy parameters.
    pub fn compute(
        pair: &str,
        candles: &[Candle],
        params: &PairConfig,
        market: MarketInfo,
    ) -> Result<Self, SnapshotError> {
        let window = params.ma_base_window;

        // Drop the still-forming last bar before anything else.
        let completed = match candles.len() {
            0 | 1 => &[][..],
            n => &candles[..n - 1],
        };

        let prices: Vec<Decimal> = completed
            .iter()
            .map(|c| match params.src {
                PriceSource::Close => c.close,
                PriceSource::OhlcAverage => c.ohlc_average(),
            })
            .collect();

        let ma_base = sma(&prices, window).ok_or_else(|| SnapshotError::InsufficientHistory {
            pair: pair.to_string(),
            needed: window + 1,
            have: candles.len(),
        })?;

        let bands = params
            .envelopes
            .iter()
            .map(|e| EnvelopeBand {
                low: ma_base * (Decimal::ONE - e),
                high: ma_base * (Decimal::ONE + upper_fraction(*e)),
            })
            .collect();

        Ok(Self {
            pair: pair.to_string(),
            market,
            ma_base,
            bands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(close: Decimal) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: close,
            high: close * dec!(1.01),
            low: close * dec!(0.99),
            close,
            volume: dec!(100),
        }
    }

    fn market() -> MarketInfo {
        MarketInfo {
            min_amount: dec!(0.1),
            amount_precision: 2,
            price_precision: 4,
        }
    }

    #[test]
    fn test_sma_basic() {
        let prices = vec![dec!(100), dec!(102), dec!(104), dec!(106), dec!(108)];
        assert_eq!(sma(&prices, 5), Some(dec!(104)));
        // Only the trailing window counts
        assert_eq!(sma(&prices, 2), Some(dec!(107)));
    }

    #[test]
    fn test_sma_insufficient_data() {
        assert_eq!(sma(&[dec!(100), dec!(102)], 5), None);
        assert_eq!(sma(&[dec!(100)], 0), None);
    }

    #[test]
    fn test_last_forming_bar_is_ignored() {
        let params = PairConfig {
            ma_base_window: 3,
            ..PairConfig::default()
        };
        // Window covers 100, 100, 100; the trailing 999 bar must not count.
        let candles = vec![
            candle(dec!(100)),
            candle(dec!(100)),
            candle(dec!(100)),
            candle(dec!(999)),
        ];
        let snapshot = PairSnapshot::compute("ETH/USDT", &candles, &params, market()).unwrap();
        assert_eq!(snapshot.ma_base, dec!(100));
    }

    #[test]
    fn test_bands_bracket_the_moving_average() {
        let params = PairConfig {
            ma_base_window: 2,
            envelopes: vec![dec!(0.03), dec!(0.05), dec!(0.075), dec!(0.2)],
            ..PairConfig::default()
        };
        let candles = vec![candle(dec!(200)), candle(dec!(200)), candle(dec!(200))];
        let snapshot = PairSnapshot::compute("ETH/USDT", &candles, &params, market()).unwrap();

        for band in &snapshot.bands {
            assert!(band.low < snapshot.ma_base);
            assert!(band.high > snapshot.ma_base);
        }
        // Lows strictly decreasing, highs strictly increasing with the index
        assert!(snapshot.bands.windows(2).all(|w| w[0].low > w[1].low));
        assert!(snapshot.bands.windows(2).all(|w| w[0].high < w[1].high));
    }

    #[test]
    fn test_upper_fraction_compounds_symmetrically() {
        // 1/(1-0.05) - 1
        let up = upper_fraction(dec!(0.05));
        assert!((up - dec!(0.0526315789)).abs() < dec!(0.0000001));
        // Dropping by e from the upper band lands back on the base:
        // (1 + up) * (1 - e) == 1
        let e = dec!(0.075);
        let product = (Decimal::ONE + upper_fraction(e)) * (Decimal::ONE - e);
        assert!((product - Decimal::ONE).abs() < dec!(0.0000000001));
    }

    #[test]
    fn test_upper_fractions_strictly_increasing() {
        let envelopes = vec![dec!(0.01), dec!(0.02), dec!(0.05), dec!(0.3), dec!(0.9)];
        let uppers: Vec<Decimal> = envelopes.iter().map(|e| upper_fraction(*e)).collect();
        assert!(uppers.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ohlc_average_source() {
        let params = PairConfig {
            src: PriceSource::OhlcAverage,
            ma_base_window: 1,
            ..PairConfig::default()
        };
        let mut bar = candle(dec!(100));
        bar.open = dec!(90);
        bar.high = dec!(110);
        bar.low = dec!(80);
        bar.close = dec!(100);
        let candles = vec![bar, candle(dec!(500))];
        let snapshot = PairSnapshot::compute("ETH/USDT", &candles, &params, market()).unwrap();
        assert_eq!(snapshot.ma_base, dec!(95));
    }

    #[test]
    fn test_insufficient_history_is_an_error() {
        let params = PairConfig {
            ma_base_window: 5,
            ..PairConfig::default()
        };
        let candles = vec![candle(dec!(100)); 5]; // only 4 completed bars
        let err = PairSnapshot::compute("ETH/USDT", &candles, &params, market()).unwrap_err();
        assert!(matches!(err, SnapshotError::InsufficientHistory { .. }));
    }
}
