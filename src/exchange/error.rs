//! Gateway error taxonomy.
//!
//! Per-operation failures (a rejected order, a failed cancel) are isolated at
//! the call site and never abort a run. Only a connection-level failure is
//! fatal and propagates to the invoking process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection or session failure. The only fatal class: a run aborts,
    /// after the gateway connection has been released.
    #[error("gateway connection failure: {0}")]
    Connection(String),

    /// The exchange rejected a specific request (order, cancel, leverage set).
    #[error("exchange rejected {context}: {message}")]
    Rejected { context: String, message: String },

    /// The requested pair is unknown to the exchange.
    #[error("unknown pair: {0}")]
    UnknownPair(String),
}

impl GatewayError {
    pub fn rejected(context: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Connection(_))
    }
}
