//! Exchange gateway surface.
//!
//! The strategy core talks to the venue exclusively through the
//! [`PerpGateway`] trait. A live connectivity layer (auth, REST/WS transport,
//! rate limiting) plugs in behind it; [`MockGateway`] provides the same
//! surface in memory for paper trading and tests.

mod error;
pub mod mock;
mod traits;
mod types;

pub use error::GatewayError;
pub use mock::MockGateway;
pub use traits::PerpGateway;
pub use types::*;
