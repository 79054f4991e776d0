//! Concurrent execution driver.
//!
//! Executes one reconciliation pass as a sequence of strict phases, each a
//! joint await over independent per-pair or per-order gateway futures:
//!
//!   (a) load markets, set margin mode and leverage (best-effort)
//!   (b) fetch OHLCV and compute envelope snapshots
//!   (c) fetch balance, positions, open orders and trigger orders
//!   (d) cancel existing trigger and resting orders
//!   (e) place close and stop-loss orders for existing positions
//!   (f) place new envelope entry triggers
//!
//! Phase (d) fully completes before (f) begins so an envelope slot is never
//! covered twice. Individual order failures are caught at the operation
//! boundary and counted; only a gateway connection failure aborts the run,
//! and the connection is released on every exit path.

use anyhow::Result;
use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::exchange::PerpGateway;
use crate::market::PairSnapshot;
use crate::strategy::{build_plan, ActionPlan, ReconcilerInputs};

/// Per-phase progress and failure counts for one pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunReport {
    pub pairs_active: usize,
    pub pairs_dropped: usize,
    pub triggers_cancelled: usize,
    pub orders_cancelled: usize,
    pub cancel_failures: usize,
    pub close_orders_placed: usize,
    pub stop_losses_placed: usize,
    pub entries_placed: usize,
    pub placement_failures: usize,
}

/// Execute one reconciliation pass and release the gateway connection.
///
/// The connection is closed exactly once whether the pass succeeds or fails;
/// a close failure surfaces only when the pass itself succeeded.
pub async fn run<G: PerpGateway>(gateway: &G, config: &Config) -> Result<RunReport> {
    info!("--- Execution started ---");
    let result = execute_pass(gateway, config).await;
    let close_result = gateway.close().await;

    match (result, close_result) {
        (Ok(report), Ok(())) => {
            info!(
                pairs_active = report.pairs_active,
                pairs_dropped = report.pairs_dropped,
                triggers_cancelled = report.triggers_cancelled,
                orders_cancelled = report.orders_cancelled,
                cancel_failures = report.cancel_failures,
                close_orders = report.close_orders_placed,
                stop_losses = report.stop_losses_placed,
                entries = report.entries_placed,
                placement_failures = report.placement_failures,
                "--- Execution finished ---"
            );
            Ok(report)
        }
        (Ok(_), Err(close_err)) => Err(close_err.into()),
        (Err(run_err), close_result) => {
            if let Err(close_err) = close_result {
                warn!(error = %close_err, "Failed to release gateway connection");
            }
            Err(run_err)
        }
    }
}

async fn execute_pass<G: PerpGateway>(gateway: &G, config: &Config) -> Result<RunReport> {
    let mut report = RunReport::default();

    // Phase (a): markets and leverage.
    let markets = gateway.load_markets().await?;

    let mut active: Vec<String> = Vec::new();
    for pair in config.pairs.keys() {
        if markets.contains_key(pair) {
            active.push(pair.clone());
        } else {
            warn!(%pair, "Pair not found in exchange markets, removing from this run");
            report.pairs_dropped += 1;
        }
    }
    active.sort();

    info!(
        margin_mode = %config.margin_mode,
        leverage = config.exchange_leverage,
        pairs = active.len(),
        "Setting margin mode and leverage"
    );
    let leverage_results = join_all(active.iter().map(|pair| {
        gateway.set_margin_mode_and_leverage(pair, config.margin_mode, config.exchange_leverage)
    }))
    .await;
    for (pair, result) in active.iter().zip(leverage_results) {
        // Best-effort: the exchange keeps its previous setting on failure.
        if let Err(e) = result {
            warn!(%pair, error = %e, "Failed to set margin mode / leverage, continuing");
        }
    }

    // Phase (b): OHLCV and indicators.
    info!(pairs = active.len(), "Fetching data and computing indicators");
    let ohlcv_results = join_all(
        active
            .iter()
            .map(|pair| gateway.get_last_ohlcv(pair, &config.timeframe, config.ohlcv_limit)),
    )
    .await;

    let mut snapshots: HashMap<String, PairSnapshot> = HashMap::new();
    for (pair, result) in active.iter().zip(ohlcv_results) {
        let candles = match result {
            Ok(candles) => candles,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(%pair, error = %e, "Failed to fetch OHLCV, dropping pair for this run");
                report.pairs_dropped += 1;
                continue;
            }
        };
        let params = &config.pairs[pair];
        match PairSnapshot::compute(pair, &candles, params, markets[pair].clone()) {
            Ok(snapshot) => {
                snapshots.insert(pair.clone(), snapshot);
            }
            Err(e) => {
                warn!(%pair, error = %e, "Dropping pair for this run");
                report.pairs_dropped += 1;
            }
        }
    }

    let pairs: Vec<String> = {
        let mut pairs: Vec<String> = snapshots.keys().cloned().collect();
        pairs.sort();
        pairs
    };
    report.pairs_active = pairs.len();

    // Phase (c): account state, read fresh every run.
    let balance = gateway.get_balance().await?;
    info!(total = %balance.total, "Fetched USDT balance");

    let positions = gateway.get_open_positions(&pairs).await?;
    info!(count = positions.len(), "Fetched open positions");

    let trigger_results = join_all(pairs.iter().map(|p| gateway.get_open_trigger_orders(p))).await;
    let order_results = join_all(pairs.iter().map(|p| gateway.get_open_orders(p))).await;

    let mut open_triggers = HashMap::new();
    for (pair, result) in pairs.iter().zip(trigger_results) {
        open_triggers.insert(pair.clone(), result?);
    }
    let mut open_orders = HashMap::new();
    for (pair, result) in pairs.iter().zip(order_results) {
        open_orders.insert(pair.clone(), result?);
    }

    let plan = build_plan(&ReconcilerInputs {
        snapshots: &snapshots,
        balance: balance.total,
        positions: &positions,
        open_orders: &open_orders,
        open_triggers: &open_triggers,
        config,
    });
    log_plan(&plan);

    // Phase (d): cancellation. Must fully complete, successfully or with
    // isolated per-batch failure, before any entry trigger is placed.
    let cancel_trigger_results = join_all(
        plan.cancel_triggers
            .iter()
            .map(|b| gateway.cancel_trigger_orders(&b.pair, &b.ids)),
    )
    .await;
    for (batch, result) in plan.cancel_triggers.iter().zip(cancel_trigger_results) {
        match result {
            Ok(n) => report.triggers_cancelled += n,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                error!(pair = %batch.pair, ids = batch.ids.len(), error = %e, "Failed to cancel trigger orders");
                report.cancel_failures += 1;
            }
        }
    }

    let cancel_order_results = join_all(
        plan.cancel_orders
            .iter()
            .map(|b| gateway.cancel_orders(&b.pair, &b.ids)),
    )
    .await;
    for (batch, result) in plan.cancel_orders.iter().zip(cancel_order_results) {
        match result {
            Ok(n) => report.orders_cancelled += n,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                error!(pair = %batch.pair, ids = batch.ids.len(), error = %e, "Failed to cancel orders");
                report.cancel_failures += 1;
            }
        }
    }

    // Phase (e): close and stop-loss orders for existing positions.
    let close_results = join_all(plan.close_orders.iter().map(|o| gateway.place_order(o))).await;
    for (order, result) in plan.close_orders.iter().zip(close_results) {
        match result {
            Ok(()) => report.close_orders_placed += 1,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                error!(
                    pair = %order.pair,
                    side = %order.side,
                    size = %order.size,
                    price = ?order.price,
                    error = %e,
                    "Failed to place close order"
                );
                report.placement_failures += 1;
            }
        }
    }

    let stop_results = join_all(
        plan.stop_losses
            .iter()
            .map(|o| gateway.place_trigger_order(o)),
    )
    .await;
    for (order, result) in plan.stop_losses.iter().zip(stop_results) {
        match result {
            Ok(()) => report.stop_losses_placed += 1,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                error!(
                    pair = %order.pair,
                    side = %order.side,
                    size = %order.size,
                    trigger = %order.trigger_price,
                    error = %e,
                    "Failed to place stop-loss order"
                );
                report.placement_failures += 1;
            }
        }
    }

    // Phase (f): new envelope entry triggers.
    let entry_results = join_all(
        plan.entry_triggers
            .iter()
            .map(|o| gateway.place_trigger_order(o)),
    )
    .await;
    for (order, result) in plan.entry_triggers.iter().zip(entry_results) {
        match result {
            Ok(()) => report.entries_placed += 1,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                error!(
                    pair = %order.pair,
                    side = %order.side,
                    size = %order.size,
                    price = ?order.price,
                    trigger = %order.trigger_price,
                    error = %e,
                    "Failed to place entry trigger order"
                );
                report.placement_failures += 1;
            }
        }
    }

    Ok(report)
}

fn log_plan(plan: &ActionPlan) {
    let cancel_count: usize = plan
        .cancel_triggers
        .iter()
        .chain(plan.cancel_orders.iter())
        .map(|b| b.ids.len())
        .sum();
    info!(
        cancels = cancel_count,
        closes = plan.close_orders.len(),
        stop_losses = plan.stop_losses.len(),
        entries = plan.entry_triggers.len(),
        "Reconciliation plan ready"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, PairConfig};
    use crate::exchange::{
        Candle, MarginMode, MockGateway, OrderSide, Position, PositionSide,
        TriggerOrder,
    };
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn flat_candles(close: Decimal, bars: usize) -> Vec<Candle> {
        let now = Utc::now();
        (0..bars)
            .map(|i| Candle {
                timestamp: now - Duration::hours((bars - i) as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: dec!(1000),
            })
            .collect()
    }

    fn test_config(pairs: &[&str]) -> Config {
        let mut config = Config::default();
        for pair in pairs {
            config.pairs.insert(
                pair.to_string(),
                PairConfig {
                    ma_base_window: 5,
                    envelopes: vec![dec!(0.05), dec!(0.1)],
                    size: dec!(0.1),
                    sides: vec![Direction::Long],
                    ..PairConfig::default()
                },
            );
        }
        config
    }

    async fn seed_pair(gateway: &MockGateway, pair: &str) {
        gateway.seed_market(pair, MockGateway::default_market()).await;
        gateway.seed_candles(pair, flat_candles(dec!(100), 50)).await;
    }

    #[tokio::test]
    async fn test_full_pass_places_full_coverage_entries() {
        let gateway = MockGateway::new(dec!(1000));
        seed_pair(&gateway, "ETH/USDT").await;
        let config = test_config(&["ETH/USDT"]);

        let report = run(&gateway, &config).await.unwrap();

        assert_eq!(report.pairs_active, 1);
        assert_eq!(report.pairs_dropped, 0);
        assert_eq!(report.entries_placed, 2);
        assert_eq!(report.placement_failures, 0);

        let entries = gateway.placed_trigger_orders().await;
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.side, OrderSide::Buy);
            assert!(!entry.reduce_only);
            // Trigger rests 0.5% above its limit price
            let price = entry.price.unwrap();
            assert_eq!(
                entry.trigger_price,
                crate::strategy::round_price(price * dec!(1.005), &MockGateway::default_market())
            );
        }

        // Leverage configured once per active pair
        let calls = gateway.leverage_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, MarginMode::Isolated);

        assert_eq!(gateway.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_pair_missing_from_markets_is_dropped() {
        let gateway = MockGateway::new(dec!(1000));
        seed_pair(&gateway, "ETH/USDT").await;
        // "FOO/USDT" is configured but the exchange does not list it.
        let config = test_config(&["ETH/USDT", "FOO/USDT"]);

        let report = run(&gateway, &config).await.unwrap();

        assert_eq!(report.pairs_active, 1);
        assert_eq!(report.pairs_dropped, 1);
        assert!(gateway
            .placed_trigger_orders()
            .await
            .iter()
            .all(|t| t.pair == "ETH/USDT"));
    }

    #[tokio::test]
    async fn test_insufficient_history_drops_pair_without_aborting() {
        let gateway = MockGateway::new(dec!(1000));
        gateway
            .seed_market("ETH/USDT", MockGateway::default_market())
            .await;
        gateway
            .seed_candles("ETH/USDT", flat_candles(dec!(100), 3))
            .await;
        let config = test_config(&["ETH/USDT"]);

        let report = run(&gateway, &config).await.unwrap();

        assert_eq!(report.pairs_active, 0);
        assert_eq!(report.pairs_dropped, 1);
        assert!(gateway.placed_trigger_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_placement_failure_is_isolated_per_pair() {
        let gateway = MockGateway::new(dec!(1000));
        seed_pair(&gateway, "ADA/USDT").await;
        seed_pair(&gateway, "ETH/USDT").await;
        gateway.fail_placements_for("ADA/USDT").await;
        let config = test_config(&["ADA/USDT", "ETH/USDT"]);

        let report = run(&gateway, &config).await.unwrap();

        // ADA's two entries fail, ETH's two still go through.
        assert_eq!(report.entries_placed, 2);
        assert_eq!(report.placement_failures, 2);
        assert!(gateway
            .placed_trigger_orders()
            .await
            .iter()
            .all(|t| t.pair == "ETH/USDT"));
        assert_eq!(gateway.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_leverage_failure_is_swallowed() {
        let gateway = MockGateway::new(dec!(1000));
        seed_pair(&gateway, "ETH/USDT").await;
        gateway.fail_leverage_for("ETH/USDT").await;
        let config = test_config(&["ETH/USDT"]);

        let report = run(&gateway, &config).await.unwrap();

        assert_eq!(report.entries_placed, 2);
        assert!(gateway.leverage_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_propagates_but_still_closes() {
        let gateway = MockGateway::new(dec!(1000));
        seed_pair(&gateway, "ETH/USDT").await;
        gateway.fail_balance_with_connection_error().await;
        let config = test_config(&["ETH/USDT"]);

        let result = run(&gateway, &config).await;

        assert!(result.is_err());
        assert_eq!(gateway.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_position_pair_gets_close_stop_loss_and_slot_reopen() {
        let gateway = MockGateway::new(dec!(1000));
        seed_pair(&gateway, "ETH/USDT").await;
        gateway
            .seed_position(Position {
                pair: "ETH/USDT".to_string(),
                side: PositionSide::Long,
                size: dec!(2),
                entry_price: dec!(95),
                mark_price: dec!(96),
                margin_mode: MarginMode::Isolated,
                leverage: dec!(4),
            })
            .await;
        // One envelope slot still open on the exchange.
        gateway
            .seed_trigger_order(TriggerOrder {
                id: "t1".to_string(),
                pair: "ETH/USDT".to_string(),
                side: OrderSide::Buy,
                price: dec!(90),
                trigger_price: dec!(90.45),
                size: dec!(4),
                reduce_only: false,
                timestamp: 0,
            })
            .await;
        let config = test_config(&["ETH/USDT"]);

        let report = run(&gateway, &config).await.unwrap();

        assert_eq!(report.triggers_cancelled, 1);
        assert_eq!(report.close_orders_placed, 1);
        assert_eq!(report.stop_losses_placed, 1);
        // Only the surviving slot is re-opened, at the outermost level.
        assert_eq!(report.entries_placed, 1);

        let closes = gateway.placed_orders().await;
        assert_eq!(closes.len(), 1);
        assert!(closes[0].reduce_only);
        assert_eq!(closes[0].side, OrderSide::Sell);
        assert_eq!(closes[0].price, Some(dec!(100))); // flat MA

        let triggers = gateway.placed_trigger_orders().await;
        let stop = triggers.iter().find(|t| t.reduce_only).unwrap();
        assert_eq!(stop.trigger_price, dec!(76)); // 95 * (1 - 0.2)
        let entry = triggers.iter().find(|t| !t.reduce_only).unwrap();
        assert_eq!(entry.price, Some(dec!(90))); // outermost band, 100 * 0.9

        assert!(gateway.cancelled_trigger_ids().await.contains(&"t1".to_string()));
    }
}
