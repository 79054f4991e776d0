//! Core exchange-facing types shared by the gateway trait and the strategy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The opposite side, used when closing or unwinding.
    pub fn invert(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Position side on the perpetual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The order side that reduces a position of this side.
    pub fn closing_order_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Margin mode for positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Isolated,
    Crossed,
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginMode::Isolated => write!(f, "isolated"),
            MarginMode::Crossed => write!(f, "crossed"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Limit,
    Market,
}

/// Per-pair trading constraints, sourced once per run from `load_markets`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    /// Minimum order size in base units; smaller orders are skipped client-side.
    pub min_amount: Decimal,
    /// Number of decimal places accepted for order amounts.
    pub amount_precision: u32,
    /// Number of decimal places accepted for order prices.
    pub price_precision: u32,
}

/// USDT account balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsdtBalance {
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Mean of open, high, low and close, used by the `ohlc-average` price source.
    pub fn ohlc_average(&self) -> Decimal {
        (self.open + self.high + self.low + self.close) / Decimal::from(4)
    }
}

/// An open perpetual position, read fresh from the gateway each run.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub pair: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub margin_mode: MarginMode,
    pub leverage: Decimal,
}

/// A resting (non-trigger) order currently open on the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub id: String,
    pub pair: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
    pub timestamp: i64,
}

/// A trigger (conditional) order currently open on the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOrder {
    pub id: String,
    pub pair: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub trigger_price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
    pub timestamp: i64,
}

/// Request to place a plain order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub pair: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// Limit price; `None` for market orders.
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub reduce_only: bool,
    pub margin_mode: MarginMode,
}

/// Request to place a trigger order.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOrderRequest {
    pub pair: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// Limit price the order rests at once triggered; `None` for market triggers.
    pub price: Option<Decimal>,
    pub trigger_price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
    pub margin_mode: MarginMode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_invert() {
        assert_eq!(OrderSide::Buy.invert(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.invert(), OrderSide::Buy);
    }

    #[test]
    fn test_closing_order_side() {
        assert_eq!(PositionSide::Long.closing_order_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.closing_order_side(), OrderSide::Buy);
    }

    #[test]
    fn test_ohlc_average() {
        let candle = Candle {
            timestamp: Utc::now(),
            open: dec!(10),
            high: dec!(14),
            low: dec!(8),
            close: dec!(12),
            volume: dec!(100),
        };
        assert_eq!(candle.ohlc_average(), dec!(11));
    }
}
