//! In-process oracle with settable readings, for paper sessions and tests.

use super::{FeedId, OracleError, OracleLimits, PriceOracle, PriceReading};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Oracle that serves whatever readings were last published to it.
pub struct PaperOracle {
    readings: Arc<RwLock<HashMap<FeedId, PriceReading>>>,
    limits: OracleLimits,
}

impl PaperOracle {
    pub fn new(limits: OracleLimits) -> Self {
        Self {
            readings: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    /// Publish a full reading for a feed.
    pub async fn publish(&self, feed: FeedId, reading: PriceReading) {
        self.readings.write().await.insert(feed, reading);
    }

    /// Publish a fresh, trading, zero-confidence price.
    pub async fn set_price(&self, feed: FeedId, price: Decimal) {
        self.publish(feed, PriceReading::trading(price)).await;
    }
}

#[async_trait]
impl PriceOracle for PaperOracle {
    async fn get_price(&self, feed: &FeedId) -> Result<Decimal, OracleError> {
        let readings = self.readings.read().await;
        let reading = readings
            .get(feed)
            .ok_or_else(|| OracleError::UnknownFeed(feed.clone()))?;
        reading.validate(feed, &self.limits, Utc::now())
    }
}
