//! State reconciler: the core of the strategy.
//!
//! A pure, stateless transform from freshly-read exchange state (snapshots,
//! balance, positions, open orders) to an [`ActionPlan`]. Re-deriving the
//! full plan every invocation makes the system self-healing against missed
//! runs and partial failures: the exchange converges to the same order set
//! regardless of what the previous pass managed to complete.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::{Config, Direction};
use crate::exchange::{
    OrderKind, OrderRequest, OrderSide, Position, RestingOrder, TriggerOrder, TriggerOrderRequest,
};
use crate::market::PairSnapshot;
use crate::strategy::sizing::{round_price, round_size};

/// Entry triggers fire slightly beyond the limit price in the adverse
/// direction so the resting limit order is marketable once triggered.
const BUY_TRIGGER_OFFSET: Decimal = dec!(1.005);
const SELL_TRIGGER_OFFSET: Decimal = dec!(0.995);

/// Order ids to cancel on one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelBatch {
    pub pair: String,
    pub ids: Vec<String>,
}

/// The reconciler's output: everything one pass will send to the exchange,
/// grouped by execution phase. Constructed fresh each run, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPlan {
    /// Trigger orders to cancel, per pair (phase d).
    pub cancel_triggers: Vec<CancelBatch>,
    /// Resting orders to cancel, per pair (phase d).
    pub cancel_orders: Vec<CancelBatch>,
    /// Reduce-only limit closes at the moving average (phase e).
    pub close_orders: Vec<OrderRequest>,
    /// Reduce-only stop-loss market triggers (phase e).
    pub stop_losses: Vec<TriggerOrderRequest>,
    /// New envelope entry triggers (phase f).
    pub entry_triggers: Vec<TriggerOrderRequest>,
}

impl ActionPlan {
    pub fn is_empty(&self) -> bool {
        self.cancel_triggers.is_empty()
            && self.cancel_orders.is_empty()
            && self.close_orders.is_empty()
            && self.stop_losses.is_empty()
            && self.entry_triggers.is_empty()
    }
}

/// Everything the reconciler reads, keyed per pair.
#[derive(Debug)]
pub struct ReconcilerInputs<'a> {
    pub snapshots: &'a HashMap<String, PairSnapshot>,
    /// Total USDT balance used for sizing.
    pub balance: Decimal,
    pub positions: &'a [Position],
    pub open_orders: &'a HashMap<String, Vec<RestingOrder>>,
    pub open_triggers: &'a HashMap<String, Vec<TriggerOrder>>,
    pub config: &'a Config,
}

/// Build the action plan for one reconciliation pass.
pub fn build_plan(inputs: &ReconcilerInputs) -> ActionPlan {
    let mut plan = ActionPlan::default();
    let config = inputs.config;

    // Deterministic pair order keeps plans comparable across invocations.
    let mut pairs: Vec<&String> = inputs.snapshots.keys().collect();
    pairs.sort();

    // Every open trigger and resting order on an active pair is cancelled
    // before anything is re-placed, so a slot is never covered twice.
    for pair in &pairs {
        if let Some(triggers) = inputs.open_triggers.get(*pair) {
            if !triggers.is_empty() {
                plan.cancel_triggers.push(CancelBatch {
                    pair: (*pair).clone(),
                    ids: triggers.iter().map(|t| t.id.clone()).collect(),
                });
            }
        }
        if let Some(orders) = inputs.open_orders.get(*pair) {
            if !orders.is_empty() {
                plan.cancel_orders.push(CancelBatch {
                    pair: (*pair).clone(),
                    ids: orders.iter().map(|o| o.id.clone()).collect(),
                });
            }
        }
    }

    // Pairs holding a position: close at the moving average, protect with a
    // stop loss, and re-open only the envelope slots that were still open.
    let mut pairs_with_position: HashSet<&str> = HashSet::new();
    for position in inputs.positions {
        let Some(snapshot) = inputs.snapshots.get(&position.pair) else {
            continue;
        };
        let Some(params) = config.pairs.get(&position.pair) else {
            continue;
        };
        pairs_with_position.insert(position.pair.as_str());

        let market = &snapshot.market;
        let Some(close_size) = round_size(position.size, market) else {
            debug!(pair = %position.pair, size = %position.size, "Position below minimum, skipping close orders");
            continue;
        };

        // Reduce-only limit close at the moving average.
        plan.close_orders.push(OrderRequest {
            pair: position.pair.clone(),
            side: position.side.closing_order_side(),
            kind: OrderKind::Limit,
            price: Some(round_price(snapshot.ma_base, market)),
            size: close_size,
            reduce_only: true,
            margin_mode: config.margin_mode,
        });

        // Stop loss: entry * (1 - pct) for longs, (1 + pct) for shorts.
        let raw_stop = match position.side {
            crate::exchange::PositionSide::Long => {
                position.entry_price * (Decimal::ONE - config.stop_loss_pct)
            }
            crate::exchange::PositionSide::Short => {
                position.entry_price * (Decimal::ONE + config.stop_loss_pct)
            }
        };
        plan.stop_losses.push(TriggerOrderRequest {
            pair: position.pair.clone(),
            side: position.side.closing_order_side(),
            kind: OrderKind::Market,
            price: None,
            trigger_price: round_price(raw_stop, market),
            size: close_size,
            reduce_only: true,
            margin_mode: config.margin_mode,
        });

        // Slot accounting: the open non-reduce triggers per side are the
        // envelope levels that have not fired yet. After cancellation the
        // same number of slots is re-opened at the highest-indexed
        // (outermost) levels, preserving the coverage that existed.
        let triggers = inputs
            .open_triggers
            .get(&position.pair)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let open_buys = triggers
            .iter()
            .filter(|t| t.side == OrderSide::Buy && !t.reduce_only)
            .count();
        let open_sells = triggers
            .iter()
            .filter(|t| t.side == OrderSide::Sell && !t.reduce_only)
            .count();

        let n_envelopes = snapshot.bands.len();
        for (side, open_count) in [(OrderSide::Buy, open_buys), (OrderSide::Sell, open_sells)] {
            let open_count = open_count.min(n_envelopes);
            for index in (n_envelopes - open_count)..n_envelopes {
                let band = &snapshot.bands[index];
                let band_price = match side {
                    OrderSide::Buy => band.low,
                    OrderSide::Sell => band.high,
                };
                if let Some(request) = entry_trigger(
                    &position.pair,
                    side,
                    band_price,
                    params.size,
                    n_envelopes,
                    inputs.balance,
                    config,
                    market,
                ) {
                    plan.entry_triggers.push(request);
                }
            }
        }
    }

    // Pairs with no position get full coverage: one trigger per envelope
    // level for every enabled direction.
    for pair in &pairs {
        if pairs_with_position.contains(pair.as_str()) {
            continue;
        }
        let snapshot = &inputs.snapshots[*pair];
        let Some(params) = config.pairs.get(*pair) else {
            continue;
        };
        let n_envelopes = snapshot.bands.len();

        for band in &snapshot.bands {
            for direction in &params.sides {
                let (side, band_price) = match direction {
                    Direction::Long => (OrderSide::Buy, band.low),
                    Direction::Short => (OrderSide::Sell, band.high),
                };
                if let Some(request) = entry_trigger(
                    pair,
                    side,
                    band_price,
                    params.size,
                    n_envelopes,
                    inputs.balance,
                    config,
                    &snapshot.market,
                ) {
                    plan.entry_triggers.push(request);
                }
            }
        }
    }

    plan
}

/// Build a single sized entry trigger, or `None` when the per-slot size
/// rounds below the exchange minimum.
#[allow(clippy::too_many_arguments)]
fn entry_trigger(
    pair: &str,
    side: OrderSide,
    band_price: Decimal,
    size_fraction: Decimal,
    n_envelopes: usize,
    balance: Decimal,
    config: &Config,
    market: &crate::exchange::MarketInfo,
) -> Option<TriggerOrderRequest> {
    if band_price <= Decimal::ZERO {
        return None;
    }

    let raw_trigger = match side {
        OrderSide::Buy => band_price * BUY_TRIGGER_OFFSET,
        OrderSide::Sell => band_price * SELL_TRIGGER_OFFSET,
    };

    // Capital fraction spread evenly across envelope levels, leveraged,
    // denominated in base units at the band price.
    let raw_size = size_fraction * balance / Decimal::from(n_envelopes as u64)
        * config.size_leverage
        / band_price;
    let size = round_size(raw_size, market)?;

    Some(TriggerOrderRequest {
        pair: pair.to_string(),
        side,
        kind: OrderKind::Limit,
        price: Some(round_price(band_price, market)),
        trigger_price: round_price(raw_trigger, market),
        size,
        reduce_only: false,
        margin_mode: config.margin_mode,
    })
}
