//! Venue integration.
//!
//! - `traits`: the [`ExchangeClient`] interface a quoting session drives
//! - `signer`: request signing capability handed to clients
//! - `paper`: in-process venue simulation used by the binary and tests

mod paper;
mod signer;
mod traits;
mod types;

pub use paper::{PaperFill, PaperVenue, RestingOrder, SeatStatus, Side, TraderBook};
pub use signer::{sign_request, LocalSigner, Signer};
pub use traits::{ExchangeClient, QuoteRefresh};
pub use types::*;

#[cfg(test)]
pub use traits::MockExchangeClient;
