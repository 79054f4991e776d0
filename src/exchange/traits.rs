//! Venue-agnostic gateway trait for USDT perpetual exchanges.
//!
//! The reconciliation core consumes the exchange exclusively through this
//! interface. Authentication, REST/WS transport, symbol metadata parsing and
//! rate limiting all live behind it, so the strategy can be driven against a
//! live venue or the in-memory mock interchangeably.

use async_trait::async_trait;
use std::collections::HashMap;

use super::error::GatewayError;
use super::types::{
    Candle, MarginMode, MarketInfo, OrderRequest, Position, RestingOrder, TriggerOrder,
    TriggerOrderRequest, UsdtBalance,
};

/// Gateway to a USDT perpetual futures venue.
///
/// All account-state reads return fresh data; nothing is cached between runs.
/// The connection behind the gateway is opened once per run and must be
/// released with [`PerpGateway::close`] exactly once on every exit path.
#[async_trait]
pub trait PerpGateway: Send + Sync {
    /// Load per-pair trading constraints (minimum size, precisions).
    async fn load_markets(&self) -> Result<HashMap<String, MarketInfo>, GatewayError>;

    /// Current USDT account balance.
    async fn get_balance(&self) -> Result<UsdtBalance, GatewayError>;

    /// The most recent `limit` OHLCV bars for a pair, oldest first. The last
    /// bar may still be forming.
    async fn get_last_ohlcv(
        &self,
        pair: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError>;

    /// Set margin mode and leverage for a pair. Best-effort: callers swallow
    /// failures, the exchange keeps whatever was previously configured.
    async fn set_margin_mode_and_leverage(
        &self,
        pair: &str,
        margin_mode: MarginMode,
        leverage: u8,
    ) -> Result<(), GatewayError>;

    /// Open positions for the given pairs.
    async fn get_open_positions(&self, pairs: &[String]) -> Result<Vec<Position>, GatewayError>;

    /// Open resting orders for a pair.
    async fn get_open_orders(&self, pair: &str) -> Result<Vec<RestingOrder>, GatewayError>;

    /// Open trigger orders for a pair.
    async fn get_open_trigger_orders(&self, pair: &str)
        -> Result<Vec<TriggerOrder>, GatewayError>;

    /// Place a plain (limit/market) order.
    async fn place_order(&self, request: &OrderRequest) -> Result<(), GatewayError>;

    /// Place a trigger order.
    async fn place_trigger_order(&self, request: &TriggerOrderRequest)
        -> Result<(), GatewayError>;

    /// Cancel resting orders by id. Returns the number cancelled.
    async fn cancel_orders(&self, pair: &str, ids: &[String]) -> Result<usize, GatewayError>;

    /// Cancel trigger orders by id. Returns the number cancelled.
    async fn cancel_trigger_orders(&self, pair: &str, ids: &[String])
        -> Result<usize, GatewayError>;

    /// Release the underlying connection. Must be called exactly once per run.
    async fn close(&self) -> Result<(), GatewayError>;
}
