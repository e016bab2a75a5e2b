//! Price oracle interface and reading validation.
//!
//! A reading is only usable when it is fresh, its feed is trading, its
//! price is positive and its confidence interval is tight enough.

mod feeds;
mod paper;

pub use feeds::{ComponentPrices, FeedPair, FeedRegistry, RegistryError};
pub use paper::PaperOracle;

use crate::utils::string_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

string_id!(
    /// Oracle price feed identifier.
    FeedId
);

/// Publication status of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceStatus {
    Unknown,
    Trading,
    Halted,
    Auction,
}

/// Errors from oracle price lookups.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("price for {feed} is stale: published {age_secs}s ago (max {max_secs}s)")]
    Stale {
        feed: FeedId,
        age_secs: i64,
        max_secs: i64,
    },

    #[error("feed {feed} is not trading (status {status:?})")]
    Status { feed: FeedId, status: PriceStatus },

    #[error("feed {feed} reported non-positive price {price}")]
    NonPositive { feed: FeedId, price: Decimal },

    #[error("feed {feed} confidence {confidence} too wide for price {price}")]
    LowConfidence {
        feed: FeedId,
        price: Decimal,
        confidence: Decimal,
    },

    #[error("unknown feed {0}")]
    UnknownFeed(FeedId),

    #[error("oracle request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl OracleError {
    /// Short label used in tick failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::Stale { .. } => "stale",
            OracleError::Status { .. } => "status",
            OracleError::NonPositive { .. } => "non_positive",
            OracleError::LowConfidence { .. } => "low_confidence",
            OracleError::UnknownFeed(_) => "unknown_feed",
            OracleError::Timeout(_) => "timeout",
        }
    }
}

/// Thresholds a reading must satisfy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OracleLimits {
    pub max_staleness: chrono::Duration,
    /// Reject when `confidence > price * max_confidence_ratio`
    pub max_confidence_ratio: Decimal,
}

impl Default for OracleLimits {
    fn default() -> Self {
        Self {
            max_staleness: chrono::Duration::seconds(20),
            max_confidence_ratio: Decimal::new(1, 1),
        }
    }
}

/// Raw feed publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceReading {
    pub price: Decimal,
    pub confidence: Decimal,
    pub status: PriceStatus,
    pub published_at: DateTime<Utc>,
}

impl PriceReading {
    /// A fresh trading reading with zero confidence width.
    pub fn trading(price: Decimal) -> Self {
        Self {
            price,
            confidence: Decimal::ZERO,
            status: PriceStatus::Trading,
            published_at: Utc::now(),
        }
    }

    /// Validate against `limits` at `now`, returning the usable price.
    pub fn validate(
        &self,
        feed: &FeedId,
        limits: &OracleLimits,
        now: DateTime<Utc>,
    ) -> Result<Decimal, OracleError> {
        let age = now - self.published_at;
        if age >= limits.max_staleness {
            return Err(OracleError::Stale {
                feed: feed.clone(),
                age_secs: age.num_seconds(),
                max_secs: limits.max_staleness.num_seconds(),
            });
        }

        if self.status != PriceStatus::Trading {
            return Err(OracleError::Status {
                feed: feed.clone(),
                status: self.status,
            });
        }

        if self.price <= Decimal::ZERO {
            return Err(OracleError::NonPositive {
                feed: feed.clone(),
                price: self.price,
            });
        }

        if self.confidence > self.price * limits.max_confidence_ratio {
            return Err(OracleError::LowConfidence {
                feed: feed.clone(),
                price: self.price,
                confidence: self.confidence,
            });
        }

        Ok(self.price)
    }
}

/// Source of validated USD prices.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, feed: &FeedId) -> Result<Decimal, OracleError>;
}
