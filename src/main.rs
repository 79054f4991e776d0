//! Envelope Trader - Main Entry Point
//!
//! Runs a single reconciliation pass. Without live exchange credentials the
//! pass executes against the in-memory paper-trading gateway; external
//! scheduling (cron, systemd timer) drives periodic invocation.

use anyhow::Result;
use clap::Parser;
use envelope_trader::config::Config;
use envelope_trader::exchange::MockGateway;
use envelope_trader::runner;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Envelope Trader CLI
#[derive(Parser)]
#[command(name = "envelope-trader")]
#[command(version, about = "Moving-average envelope trading on USDT perpetual futures")]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    let _cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "Envelope Trader v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load()?;
    if config.pairs.is_empty() {
        warn!("No pairs configured; nothing to do");
        return Ok(());
    }
    info!(
        pairs = config.pairs.len(),
        timeframe = %config.timeframe,
        margin_mode = %config.margin_mode,
        "Configuration loaded"
    );

    if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
        anyhow::bail!(
            "Live trading requires an exchange connectivity layer implementing PerpGateway; \
             none is compiled into this build"
        );
    }

    info!("Paper trading mode: running against the in-memory mock venue");
    let gateway = MockGateway::new(dec!(10000));
    for pair in config.pairs.keys() {
        gateway.seed_market(pair, MockGateway::default_market()).await;
        gateway
            .seed_candles(
                pair,
                MockGateway::synthetic_candles(dec!(100), config.ohlcv_limit),
            )
            .await;
    }

    let report = runner::run(&gateway, &config).await?;

    info!(
        entries = report.entries_placed,
        failures = report.placement_failures,
        "Pass complete"
    );
    Ok(())
}
