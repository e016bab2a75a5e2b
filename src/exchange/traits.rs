//! Venue-agnostic client interface.
//!
//! Every mutating call is signed by the client's [`Signer`](super::Signer)
//! and returns the resulting [`TxRef`]. Implementations must not retry
//! internally; callers decide how to treat each [`VenueError`].

use super::types::{AccountId, BalanceError, MarketId, MarketState, TraderId, TxRef, VenueError};
use crate::config::StrategyConfig;
use crate::strategy::{PriceImprovementMode, QuoteParams};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// Payload of a quote refresh: new prices/sizes plus the strategy fields
/// the venue stores alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRefresh {
    pub fair_price: Decimal,
    pub quotes: QuoteParams,
    pub quote_edge_bps: u64,
    pub quote_size_quote_atoms: u64,
    pub margin_bps: u64,
    pub post_only: bool,
    pub price_improvement_mode: PriceImprovementMode,
}

impl QuoteRefresh {
    pub fn new(fair_price: Decimal, quotes: QuoteParams, strategy: &StrategyConfig) -> Self {
        Self {
            fair_price,
            quotes,
            quote_edge_bps: strategy.quote_edge_bps,
            quote_size_quote_atoms: strategy.quote_size_quote_atoms,
            margin_bps: strategy.margin_bps,
            post_only: strategy.post_only,
            price_improvement_mode: strategy.price_improvement_mode,
        }
    }
}

/// Limit-order-book venue operations used by a quoting session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Create the on-venue strategy state for (trader, market).
    async fn initialize_strategy(
        &self,
        trader: &TraderId,
        market: &MarketId,
        config: &StrategyConfig,
    ) -> Result<TxRef, VenueError>;

    /// Request a trading seat on the market.
    async fn request_seat(&self, trader: &TraderId, market: &MarketId)
        -> Result<TxRef, VenueError>;

    /// Claim (activate) a previously requested seat.
    async fn claim_seat(&self, trader: &TraderId, market: &MarketId) -> Result<TxRef, VenueError>;

    /// Replace the trader's resting quotes.
    async fn refresh_quotes(
        &self,
        trader: &TraderId,
        market: &MarketId,
        refresh: &QuoteRefresh,
    ) -> Result<TxRef, VenueError>;

    async fn cancel_all_orders(
        &self,
        trader: &TraderId,
        market: &MarketId,
    ) -> Result<TxRef, VenueError>;

    /// Withdraw all free funds to the trader's token accounts.
    async fn withdraw_all(&self, trader: &TraderId, market: &MarketId)
        -> Result<TxRef, VenueError>;

    /// Raw token balance in atoms.
    async fn get_balance(&self, account: &AccountId) -> Result<u64, BalanceError>;

    /// Market metadata and the best bid/ask excluding the trader's own orders.
    async fn fetch_market(&self, market: &MarketId) -> Result<MarketState, VenueError>;
}
