//! # Envelope Trader
//!
//! A Rust application that trades a moving-average envelope strategy on USDT
//! perpetual futures. Each invocation performs a single reconciliation pass:
//! it computes price bands around a moving average per pair, reads live
//! exchange state, and issues the minimum batch of cancel/create operations
//! to converge the exchange onto the desired band-based order set.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Gateway trait, shared types and the in-memory mock venue
//! - `market`: Snapshot builder (moving average and envelope bands)
//! - `strategy`: State reconciler and order sizing
//! - `runner`: Phased concurrent execution driver

pub mod config;
pub mod exchange;
pub mod market;
pub mod runner;
pub mod strategy;

pub use config::Config;
