//! Idempotent strategy/seat setup.
//!
//! Three steps, each attempted regardless of the others:
//! 1. create the on-venue strategy state
//! 2. request a trading seat
//! 3. claim the seat
//!
//! "Already exists" answers count as done. Only a configuration rejection
//! is returned as an error; everything else lands in the [`InitReport`].

use super::policy::PolicyError;
use crate::config::StrategyConfig;
use crate::exchange::{ExchangeClient, MarketId, TraderId, TxRef, VenueError};
use crate::utils::with_deadline;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Result of one venue step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed(TxRef),
    AlreadyDone,
    Failed(VenueError),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn tx(&self) -> Option<&TxRef> {
        match self {
            StepOutcome::Completed(tx) => Some(tx),
            _ => None,
        }
    }
}

/// Per-step results of [`SessionInitializer::ensure_initialized`].
#[derive(Debug, Clone, PartialEq)]
pub struct InitReport {
    pub strategy: StepOutcome,
    pub seat_request: StepOutcome,
    pub seat_claim: StepOutcome,
}

impl InitReport {
    /// Every step either completed now or was already done.
    pub fn is_ready(&self) -> bool {
        !self.strategy.is_failed() && !self.seat_request.is_failed() && !self.seat_claim.is_failed()
    }

    pub fn all_failed(&self) -> bool {
        self.strategy.is_failed() && self.seat_request.is_failed() && self.seat_claim.is_failed()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InitError {
    #[error("invalid strategy config: {0}")]
    InvalidConfig(#[from] PolicyError),

    #[error("venue rejected strategy config: {0}")]
    ConfigRejected(VenueError),
}

/// Creates strategy state and seat for a (trader, market) pair.
#[derive(Debug, Clone)]
pub struct SessionInitializer {
    timeout: Duration,
}

impl SessionInitializer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Bring the pair to a quotable state. Safe to call repeatedly.
    pub async fn ensure_initialized(
        &self,
        client: &dyn ExchangeClient,
        trader: &TraderId,
        market: &MarketId,
        config: &StrategyConfig,
    ) -> Result<InitReport, InitError> {
        config.validate()?;

        let strategy = self
            .step(
                "initialize_strategy",
                client.initialize_strategy(trader, market, config),
            )
            .await;
        if let StepOutcome::Failed(e) = &strategy {
            if e.is_config_rejection() {
                return Err(InitError::ConfigRejected(e.clone()));
            }
        }

        let seat_request = self
            .step("request_seat", client.request_seat(trader, market))
            .await;
        let seat_claim = self
            .step("claim_seat", client.claim_seat(trader, market))
            .await;

        let report = InitReport {
            strategy,
            seat_request,
            seat_claim,
        };

        if report.all_failed() {
            warn!(%trader, %market, "All initialization steps failed; continuing");
        } else if report.is_ready() {
            info!(%trader, %market, "✅ [INIT] Strategy and seat ready");
        }

        Ok(report)
    }

    async fn step<F>(&self, operation: &'static str, request: F) -> StepOutcome
    where
        F: Future<Output = Result<TxRef, VenueError>>,
    {
        match with_deadline(self.timeout, request, VenueError::Timeout).await {
            Ok(tx) => {
                info!(operation, %tx, "Initialization step completed");
                StepOutcome::Completed(tx)
            }
            Err(VenueError::AlreadyExists(what)) => {
                info!(operation, %what, "Already exists, skipping");
                StepOutcome::AlreadyDone
            }
            Err(e) => {
                warn!(operation, error = %e, kind = %e.kind(), "Initialization step failed");
                StepOutcome::Failed(e)
            }
        }
    }
}
