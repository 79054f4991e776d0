//! Trading logic: plan construction and order sizing.

pub mod reconciler;
pub mod sizing;

pub use reconciler::{build_plan, ActionPlan, CancelBatch, ReconcilerInputs};
pub use sizing::{round_price, round_size};
