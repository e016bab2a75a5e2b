//! Market -> price feed registry and fair price derivation.

use super::{FeedId, OracleError, PriceOracle};
use crate::config::FeedPairConfig;
use crate::exchange::MarketId;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no oracle feeds registered for market {0}")]
    UnknownMarket(MarketId),
}

/// USD-denominated feeds for a market's base and quote tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPair {
    pub base: FeedId,
    pub quote: FeedId,
}

/// Validated USD prices of both tokens, captured together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentPrices {
    pub base_usd: Decimal,
    pub quote_usd: Decimal,
}

impl ComponentPrices {
    /// Base token priced in quote tokens. Zero when the quote price is zero,
    /// which quote computation rejects as a non-positive fair price.
    pub fn fair_price(&self) -> Decimal {
        self.base_usd
            .checked_div(self.quote_usd)
            .unwrap_or(Decimal::ZERO)
    }
}

impl FeedPair {
    /// Fetch both component prices, rejecting any that is not positive.
    pub async fn component_prices(
        &self,
        oracle: &dyn PriceOracle,
    ) -> Result<ComponentPrices, OracleError> {
        let base_usd = positive(&self.base, oracle.get_price(&self.base).await?)?;
        let quote_usd = positive(&self.quote, oracle.get_price(&self.quote).await?)?;
        debug!(base = %self.base, %base_usd, quote = %self.quote, %quote_usd, "Component prices");
        Ok(ComponentPrices {
            base_usd,
            quote_usd,
        })
    }
}

fn positive(feed: &FeedId, price: Decimal) -> Result<Decimal, OracleError> {
    if price <= Decimal::ZERO {
        return Err(OracleError::NonPositive {
            feed: feed.clone(),
            price,
        });
    }
    Ok(price)
}

/// Explicit market -> feeds mapping, resolved once at session start.
#[derive(Debug, Clone, Default)]
pub struct FeedRegistry {
    feeds: HashMap<MarketId, FeedPair>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(feeds: &HashMap<String, FeedPairConfig>) -> Self {
        let mut registry = Self::new();
        for (market, pair) in feeds {
            registry.register(
                MarketId::new(market.as_str()),
                FeedPair {
                    base: FeedId::new(pair.base_feed.as_str()),
                    quote: FeedId::new(pair.quote_feed.as_str()),
                },
            );
        }
        registry
    }

    pub fn register(&mut self, market: MarketId, pair: FeedPair) {
        self.feeds.insert(market, pair);
    }

    pub fn resolve(&self, market: &MarketId) -> Result<&FeedPair, RegistryError> {
        self.feeds
            .get(market)
            .ok_or_else(|| RegistryError::UnknownMarket(market.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{MockPriceOracle, PriceStatus};
    use rust_decimal_macros::dec;

    fn sol_pair() -> FeedPair {
        FeedPair {
            base: FeedId::new("SOL/USD"),
            quote: FeedId::new("USDC/USD"),
        }
    }

    #[test]
    fn test_resolve_registered_market() {
        let mut registry = FeedRegistry::new();
        registry.register(MarketId::new("SOL-USDC"), sol_pair());

        assert_eq!(
            registry.resolve(&MarketId::new("SOL-USDC")),
            Ok(&sol_pair())
        );
        assert_eq!(
            registry.resolve(&MarketId::new("ETH-USDC")),
            Err(RegistryError::UnknownMarket(MarketId::new("ETH-USDC")))
        );
    }

    #[test]
    fn test_registry_from_config() {
        let registry = FeedRegistry::from_config(&HashMap::from([(
            "SOL-USDC".to_string(),
            FeedPairConfig {
                base_feed: "SOL/USD".to_string(),
                quote_feed: "USDC/USD".to_string(),
            },
        )]));

        assert_eq!(
            registry.resolve(&MarketId::new("SOL-USDC")).unwrap(),
            &sol_pair()
        );
    }

    #[tokio::test]
    async fn test_fair_price_is_base_over_quote() {
        let mut oracle = MockPriceOracle::new();
        oracle
            .expect_get_price()
            .returning(|feed| match feed.as_str() {
                "SOL/USD" => Ok(dec!(20)),
                _ => Ok(dec!(0.8)),
            });

        let prices = sol_pair().component_prices(&oracle).await.unwrap();
        assert_eq!(prices.fair_price(), dec!(25));
    }

    #[tokio::test]
    async fn test_zero_quote_price_rejected() {
        let mut oracle = MockPriceOracle::new();
        oracle
            .expect_get_price()
            .returning(|feed| match feed.as_str() {
                "SOL/USD" => Ok(dec!(20)),
                _ => Ok(Decimal::ZERO),
            });

        let err = sol_pair().component_prices(&oracle).await.unwrap_err();
        assert_eq!(
            err,
            OracleError::NonPositive {
                feed: FeedId::new("USDC/USD"),
                price: Decimal::ZERO,
            }
        );

        let unchecked = ComponentPrices {
            base_usd: dec!(20),
            quote_usd: Decimal::ZERO,
        };
        assert_eq!(unchecked.fair_price(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_component_failure_propagates() {
        let mut oracle = MockPriceOracle::new();
        oracle.expect_get_price().returning(|feed| {
            Err(OracleError::Status {
                feed: feed.clone(),
                status: PriceStatus::Halted,
            })
        });

        let err = sol_pair().component_prices(&oracle).await.unwrap_err();
        assert_eq!(err.kind(), "status");
    }
}
