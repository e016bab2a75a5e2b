//! Consecutive tick failure detection.
//!
//! Emits a structured alert once the failure streak reaches the threshold.
//! Alerts never stop the loop; a single bad tick must not end the session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

/// Alert raised when ticks keep failing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthAlert {
    pub timestamp: DateTime<Utc>,
    pub market: String,
    pub tick: u32,
    pub consecutive_failures: u32,
    pub last_operation: String,
    pub last_error_kind: String,
    pub message: String,
}

impl HealthAlert {
    /// Emit alert as a single-line JSON log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        error!(target: "quote_alert", "{}", json);
    }
}

/// Tracks the current failure streak for one session.
#[derive(Debug, Clone)]
pub struct TickHealth {
    market: String,
    threshold: u32,
    consecutive_failures: u32,
    total_failures: u32,
    alerted: bool,
}

impl TickHealth {
    /// A threshold of zero disables alerts.
    pub fn new(market: impl Into<String>, threshold: u32) -> Self {
        Self {
            market: market.into(),
            threshold,
            consecutive_failures: 0,
            total_failures: 0,
            alerted: false,
        }
    }

    pub fn record_success(&mut self) {
        if self.alerted {
            info!(
                market = %self.market,
                after = self.consecutive_failures,
                "Quoting recovered"
            );
        }
        self.consecutive_failures = 0;
        self.alerted = false;
    }

    /// Record a failed tick. Returns an alert the first time the streak hits the threshold.
    pub fn record_failure(
        &mut self,
        tick: u32,
        operation: &str,
        error_kind: &str,
    ) -> Option<HealthAlert> {
        self.consecutive_failures += 1;
        self.total_failures += 1;

        if self.threshold == 0 || self.alerted || self.consecutive_failures < self.threshold {
            return None;
        }

        self.alerted = true;
        let alert = HealthAlert {
            timestamp: Utc::now(),
            market: self.market.clone(),
            tick,
            consecutive_failures: self.consecutive_failures,
            last_operation: operation.to_string(),
            last_error_kind: error_kind.to_string(),
            message: format!(
                "{} consecutive ticks failed on {}",
                self.consecutive_failures, self.market
            ),
        };
        alert.emit();
        Some(alert)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u32 {
        self.total_failures
    }
}
