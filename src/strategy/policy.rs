//! Price-improvement policy.
//!
//! Decides where to place the bid and ask around fair price given the
//! current best bid/offer. The function is pure: no I/O, no clock.
//!
//! Modes:
//! - `Ignore`: `fair * (1 ∓ edge)`, independent of the book
//! - `Join`: rest at the best bid/ask, never closer to fair than the edge
//! - `Dime`: one tick inside the best bid/ask, never closer to fair than the edge
//! - `Ubermensch`: one tick inside the best bid/ask, never closer to fair than the margin

use crate::utils::decimal::{ceil_to_tick, floor_to_tick, from_basis_points};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How aggressively to approach the best bid/offer.
///
/// The numeric encoding (`as_u8`) is the one the venue program expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceImprovementMode {
    Ubermensch,
    Join,
    Dime,
    Ignore,
}

impl PriceImprovementMode {
    pub const ALL: [PriceImprovementMode; 4] = [
        PriceImprovementMode::Ubermensch,
        PriceImprovementMode::Join,
        PriceImprovementMode::Dime,
        PriceImprovementMode::Ignore,
    ];

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceImprovementMode::Ubermensch => "ubermensch",
            PriceImprovementMode::Join => "join",
            PriceImprovementMode::Dime => "dime",
            PriceImprovementMode::Ignore => "ignore",
        }
    }
}

impl TryFrom<u8> for PriceImprovementMode {
    type Error = PolicyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(PolicyError::UnknownMode(value))
    }
}

impl fmt::Display for PriceImprovementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound for edge and margin: 100% of the fair price.
pub const MAX_BPS: u64 = 10_000;

/// Errors from quote policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("quote edge must be non-zero")]
    ZeroEdge,

    #[error("{name} of {bps} bps is above the {max} bps limit", max = MAX_BPS)]
    BpsOutOfRange { name: &'static str, bps: u64 },

    #[error("invalid strategy params: margin {margin_bps} bps exceeds edge {edge_bps} bps")]
    MarginExceedsEdge { margin_bps: u64, edge_bps: u64 },

    #[error("fair price must be positive, got {0}")]
    NonPositiveFairPrice(Decimal),

    #[error("tick size must be positive, got {0}")]
    InvalidTickSize(Decimal),

    #[error("unknown price improvement mode {0}")]
    UnknownMode(u8),
}

/// Check the parameters every mode relies on.
pub fn validate_params(
    mode: PriceImprovementMode,
    edge_bps: u64,
    margin_bps: u64,
) -> Result<(), PolicyError> {
    if edge_bps == 0 {
        return Err(PolicyError::ZeroEdge);
    }
    for (name, bps) in [("edge", edge_bps), ("margin", margin_bps)] {
        if bps > MAX_BPS {
            return Err(PolicyError::BpsOutOfRange { name, bps });
        }
    }
    if mode == PriceImprovementMode::Ubermensch && margin_bps > edge_bps {
        return Err(PolicyError::MarginExceedsEdge {
            margin_bps,
            edge_bps,
        });
    }
    Ok(())
}

/// Everything the policy looks at for one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyInput {
    pub mode: PriceImprovementMode,
    pub fair_price: Decimal,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub edge_bps: u64,
    pub margin_bps: u64,
    pub tick_size: Decimal,
}

/// Chosen bid and ask prices, on the tick grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePrices {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Decide bid/ask prices for one tick.
///
/// The result always satisfies `bid < ask` and `bid <= fair <= ask`.
pub fn decide_quotes(input: &PolicyInput) -> Result<QuotePrices, PolicyError> {
    validate_params(input.mode, input.edge_bps, input.margin_bps)?;
    if input.fair_price <= Decimal::ZERO {
        return Err(PolicyError::NonPositiveFairPrice(input.fair_price));
    }
    if input.tick_size <= Decimal::ZERO {
        return Err(PolicyError::InvalidTickSize(input.tick_size));
    }

    let fair = input.fair_price;
    let tick = input.tick_size;

    // Rounded away from fair so the tick grid never eats into the edge.
    let edge = from_basis_points(input.edge_bps);
    let edge_bid = floor_to_tick(fair * (Decimal::ONE - edge), tick);
    let edge_ask = ceil_to_tick(fair * (Decimal::ONE + edge), tick);

    let margin = from_basis_points(input.margin_bps);
    let margin_bid = floor_to_tick(fair * (Decimal::ONE - margin), tick);
    let margin_ask = ceil_to_tick(fair * (Decimal::ONE + margin), tick);

    let bid = match (input.mode, input.best_bid) {
        (PriceImprovementMode::Ignore, _) | (_, None) => edge_bid,
        (PriceImprovementMode::Join, Some(best)) => best.min(edge_bid),
        (PriceImprovementMode::Dime, Some(best)) => (best + tick).min(edge_bid),
        (PriceImprovementMode::Ubermensch, Some(best)) => (best + tick).min(margin_bid),
    };

    let ask = match (input.mode, input.best_ask) {
        (PriceImprovementMode::Ignore, _) | (_, None) => edge_ask,
        (PriceImprovementMode::Join, Some(best)) => best.max(edge_ask),
        (PriceImprovementMode::Dime, Some(best)) => (best - tick).max(edge_ask),
        (PriceImprovementMode::Ubermensch, Some(best)) => (best - tick).max(margin_ask),
    };

    Ok(uncross(bid, ask, fair, tick))
}

/// Widen a crossed or locked pair to one tick, moving the side nearer to fair.
fn uncross(bid: Decimal, ask: Decimal, fair: Decimal, tick: Decimal) -> QuotePrices {
    if ask - bid >= tick {
        return QuotePrices { bid, ask };
    }
    if fair - bid <= ask - fair {
        QuotePrices {
            bid: ask - tick,
            ask,
        }
    } else {
        QuotePrices {
            bid,
            ask: bid + tick,
        }
    }
}
