//! Per-tick quote construction.

use super::policy::{decide_quotes, PolicyError, PolicyInput, QuotePrices};
use crate::config::StrategyConfig;
use crate::exchange::{AccountId, MarketState};
use crate::utils::decimal::{from_atoms, round_down_to_lot, safe_div, unit_size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market view used for one tick: fair price plus venue metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub fair_price: Decimal,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub tick_size: Decimal,
    pub base_decimals: u32,
    pub quote_decimals: u32,
    pub base_vault: AccountId,
    pub quote_vault: AccountId,
}

impl MarketSnapshot {
    pub fn new(fair_price: Decimal, market: MarketState) -> Self {
        Self {
            fair_price,
            best_bid: market.best_bid,
            best_ask: market.best_ask,
            tick_size: market.tick_size,
            base_decimals: market.base_decimals,
            quote_decimals: market.quote_decimals,
            base_vault: market.base_vault,
            quote_vault: market.quote_vault,
        }
    }
}

/// Prices and sizes for one quote refresh.
///
/// A side with zero size is not quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteParams {
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub bid_size_base: Decimal,
    pub ask_size_base: Decimal,
    /// Notional per side in quote units
    pub size_quote: Decimal,
}

impl QuoteParams {
    /// Size both sides from one quote notional, rounded down to the base unit.
    pub fn from_prices(
        prices: QuotePrices,
        size_quote_atoms: u64,
        snapshot: &MarketSnapshot,
    ) -> Self {
        let size_quote = from_atoms(size_quote_atoms, snapshot.quote_decimals);
        let lot = unit_size(snapshot.base_decimals);
        let size_at = |price: Decimal| {
            if price <= Decimal::ZERO {
                Decimal::ZERO
            } else {
                round_down_to_lot(safe_div(size_quote, price), lot)
            }
        };

        Self {
            bid_price: prices.bid,
            ask_price: prices.ask,
            bid_size_base: size_at(prices.bid),
            ask_size_base: size_at(prices.ask),
            size_quote,
        }
    }

    pub fn has_bid(&self) -> bool {
        self.bid_price > Decimal::ZERO && self.bid_size_base > Decimal::ZERO
    }

    pub fn has_ask(&self) -> bool {
        self.ask_price > Decimal::ZERO && self.ask_size_base > Decimal::ZERO
    }
}

/// Run the price-improvement policy and size the result.
pub fn compute_quotes(
    strategy: &StrategyConfig,
    snapshot: &MarketSnapshot,
) -> Result<QuoteParams, PolicyError> {
    let prices = decide_quotes(&PolicyInput {
        mode: strategy.price_improvement_mode,
        fair_price: snapshot.fair_price,
        best_bid: snapshot.best_bid,
        best_ask: snapshot.best_ask,
        edge_bps: strategy.quote_edge_bps,
        margin_bps: strategy.margin_bps,
        tick_size: snapshot.tick_size,
    })?;

    Ok(QuoteParams::from_prices(
        prices,
        strategy.quote_size_quote_atoms,
        snapshot,
    ))
}
