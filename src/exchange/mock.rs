//! In-memory gateway for paper trading and driver tests.
//!
//! Mirrors the live gateway surface over an `Arc<RwLock<_>>` state block, with
//! scripted failure injection so the runner's isolation behavior can be
//! exercised without a network.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::GatewayError;
use super::traits::PerpGateway;
use super::types::{
    Candle, MarginMode, MarketInfo, OrderRequest, Position, RestingOrder, TriggerOrder,
    TriggerOrderRequest, UsdtBalance,
};

/// Mutable exchange state behind the mock.
#[derive(Debug, Default)]
struct MockState {
    markets: HashMap<String, MarketInfo>,
    balance: Decimal,
    candles: HashMap<String, Vec<Candle>>,
    positions: Vec<Position>,
    open_orders: HashMap<String, Vec<RestingOrder>>,
    open_triggers: HashMap<String, Vec<TriggerOrder>>,

    // Recorded operations, inspected by tests.
    placed_orders: Vec<OrderRequest>,
    placed_triggers: Vec<TriggerOrderRequest>,
    cancelled_order_ids: Vec<String>,
    cancelled_trigger_ids: Vec<String>,
    leverage_calls: Vec<(String, MarginMode, u8)>,

    // Failure injection.
    fail_placements_for: HashSet<String>,
    fail_leverage_for: HashSet<String>,
    fail_balance: bool,
}

/// Gateway that simulates a perpetual venue in memory.
pub struct MockGateway {
    state: Arc<RwLock<MockState>>,
    close_calls: AtomicUsize,
}

impl MockGateway {
    /// Create a mock gateway with the given USDT balance.
    pub fn new(balance: Decimal) -> Self {
        let state = MockState {
            balance,
            ..MockState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// A market with permissive defaults (min 0.1 units, 2/4 dp).
    pub fn default_market() -> MarketInfo {
        MarketInfo {
            min_amount: dec!(0.1),
            amount_precision: 2,
            price_precision: 4,
        }
    }

    /// Deterministic hourly candle series ending now, gently oscillating
    /// around `base` so moving averages land near it.
    pub fn synthetic_candles(base: Decimal, bars: usize) -> Vec<Candle> {
        let now = Utc::now();
        (0..bars)
            .map(|i| {
                // +/-0.5% square-ish wave, period 8 bars
                let offset = if (i / 4) % 2 == 0 {
                    base * dec!(0.005)
                } else {
                    -base * dec!(0.005)
                };
                let close = base + offset;
                Candle {
                    timestamp: now - Duration::hours((bars - i) as i64),
                    open: close,
                    high: close * dec!(1.002),
                    low: close * dec!(0.998),
                    close,
                    volume: dec!(1000),
                }
            })
            .collect()
    }

    pub async fn seed_market(&self, pair: &str, market: MarketInfo) {
        self.state.write().await.markets.insert(pair.to_string(), market);
    }

    pub async fn seed_candles(&self, pair: &str, candles: Vec<Candle>) {
        self.state.write().await.candles.insert(pair.to_string(), candles);
    }

    pub async fn seed_position(&self, position: Position) {
        self.state.write().await.positions.push(position);
    }

    pub async fn seed_resting_order(&self, order: RestingOrder) {
        self.state
            .write()
            .await
            .open_orders
            .entry(order.pair.clone())
            .or_default()
            .push(order);
    }

    pub async fn seed_trigger_order(&self, order: TriggerOrder) {
        self.state
            .write()
            .await
            .open_triggers
            .entry(order.pair.clone())
            .or_default()
            .push(order);
    }

    /// Make every subsequent placement for `pair` fail with a rejection.
    pub async fn fail_placements_for(&self, pair: &str) {
        self.state
            .write()
            .await
            .fail_placements_for
            .insert(pair.to_string());
    }

    /// Make leverage configuration fail for `pair`.
    pub async fn fail_leverage_for(&self, pair: &str) {
        self.state
            .write()
            .await
            .fail_leverage_for
            .insert(pair.to_string());
    }

    /// Make `get_balance` fail with a fatal connection error.
    pub async fn fail_balance_with_connection_error(&self) {
        self.state.write().await.fail_balance = true;
    }

    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.read().await.placed_orders.clone()
    }

    pub async fn placed_trigger_orders(&self) -> Vec<TriggerOrderRequest> {
        self.state.read().await.placed_triggers.clone()
    }

    pub async fn cancelled_order_ids(&self) -> Vec<String> {
        self.state.read().await.cancelled_order_ids.clone()
    }

    pub async fn cancelled_trigger_ids(&self) -> Vec<String> {
        self.state.read().await.cancelled_trigger_ids.clone()
    }

    pub async fn leverage_calls(&self) -> Vec<(String, MarginMode, u8)> {
        self.state.read().await.leverage_calls.clone()
    }

    /// How many times `close` has been called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PerpGateway for MockGateway {
    async fn load_markets(&self) -> Result<HashMap<String, MarketInfo>, GatewayError> {
        Ok(self.state.read().await.markets.clone())
    }

    async fn get_balance(&self) -> Result<UsdtBalance, GatewayError> {
        let state = self.state.read().await;
        if state.fail_balance {
            return Err(GatewayError::Connection("scripted balance failure".into()));
        }
        Ok(UsdtBalance {
            total: state.balance,
            free: state.balance,
            used: Decimal::ZERO,
        })
    }

    async fn get_last_ohlcv(
        &self,
        pair: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let state = self.state.read().await;
        let candles = state
            .candles
            .get(pair)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownPair(pair.to_string()))?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn set_margin_mode_and_leverage(
        &self,
        pair: &str,
        margin_mode: MarginMode,
        leverage: u8,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if state.fail_leverage_for.contains(pair) {
            return Err(GatewayError::rejected(
                "set_margin_mode_and_leverage",
                format!("leverage not supported for {pair}"),
            ));
        }
        state
            .leverage_calls
            .push((pair.to_string(), margin_mode, leverage));
        Ok(())
    }

    async fn get_open_positions(&self, pairs: &[String]) -> Result<Vec<Position>, GatewayError> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .iter()
            .filter(|p| pairs.contains(&p.pair))
            .cloned()
            .collect())
    }

    async fn get_open_orders(&self, pair: &str) -> Result<Vec<RestingOrder>, GatewayError> {
        Ok(self
            .state
            .read()
            .await
            .open_orders
            .get(pair)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_open_trigger_orders(
        &self,
        pair: &str,
    ) -> Result<Vec<TriggerOrder>, GatewayError> {
        Ok(self
            .state
            .read()
            .await
            .open_triggers
            .get(pair)
            .cloned()
            .unwrap_or_default())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if state.fail_placements_for.contains(&request.pair) {
            return Err(GatewayError::rejected(
                "place_order",
                format!("scripted failure for {}", request.pair),
            ));
        }
        state.placed_orders.push(request.clone());
        Ok(())
    }

    async fn place_trigger_order(
        &self,
        request: &TriggerOrderRequest,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if state.fail_placements_for.contains(&request.pair) {
            return Err(GatewayError::rejected(
                "place_trigger_order",
                format!("scripted failure for {}", request.pair),
            ));
        }
        state.placed_triggers.push(request.clone());
        Ok(())
    }

    async fn cancel_orders(&self, pair: &str, ids: &[String]) -> Result<usize, GatewayError> {
        let mut state = self.state.write().await;
        let mut cancelled = 0;
        if let Some(orders) = state.open_orders.get_mut(pair) {
            let before = orders.len();
            orders.retain(|o| !ids.contains(&o.id));
            cancelled = before - orders.len();
        }
        state.cancelled_order_ids.extend(ids.iter().cloned());
        Ok(cancelled)
    }

    async fn cancel_trigger_orders(
        &self,
        pair: &str,
        ids: &[String],
    ) -> Result<usize, GatewayError> {
        let mut state = self.state.write().await;
        let mut cancelled = 0;
        if let Some(orders) = state.open_triggers.get_mut(pair) {
            let before = orders.len();
            orders.retain(|o| !ids.contains(&o.id));
            cancelled = before - orders.len();
        }
        state.cancelled_trigger_ids.extend(ids.iter().cloned());
        Ok(cancelled)
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
