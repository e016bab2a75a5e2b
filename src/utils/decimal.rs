//! Decimal arithmetic utilities for prices, sizes and token amounts.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Largest scale a `Decimal` can carry.
const MAX_SCALE: u32 = 28;

/// Round down to a multiple of the tick size (used for bids).
pub fn floor_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).floor() * tick_size
}

/// Round up to a multiple of the tick size (used for asks).
pub fn ceil_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).ceil() * tick_size
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Convert basis points to decimal rate
pub fn from_basis_points(bps: u64) -> Decimal {
    Decimal::from(bps) / dec!(10000)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Smallest representable unit for a token with `decimals` places, e.g. 0.001 for 3.
pub fn unit_size(decimals: u32) -> Decimal {
    Decimal::new(1, decimals.min(MAX_SCALE))
}

/// Convert raw token atoms to human units (`atoms / 10^decimals`).
pub fn from_atoms(atoms: u64, decimals: u32) -> Decimal {
    let mut value = Decimal::from(atoms);
    // Scale is clamped to the representable range, so this cannot fail.
    let _ = value.set_scale(decimals.min(MAX_SCALE));
    value
}

/// Convert human units back to raw atoms, truncating any sub-atom remainder.
///
/// Negative amounts yield zero; amounts beyond `u64` saturate.
pub fn to_atoms(value: Decimal, decimals: u32) -> u64 {
    if value <= Decimal::ZERO {
        return 0;
    }
    let scale = Decimal::from_i128_with_scale(10_i128.pow(decimals.min(MAX_SCALE)), 0);
    value
        .checked_mul(scale)
        .and_then(|atoms| atoms.trunc().to_u64())
        .unwrap_or(u64::MAX)
}
