//! End-of-session cleanup: cancel, withdraw, settle, read final balances.
//!
//! Each step runs even if the previous one failed.

use super::initializer::StepOutcome;
use crate::accounting::{AccountingTracker, BalanceCheckpoint, CheckpointLabel};
use crate::exchange::{AccountId, ExchangeClient, MarketId, TraderId, TxRef, VenueError};
use crate::utils::with_deadline;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TeardownResult {
    pub cancel: StepOutcome,
    pub withdraw: StepOutcome,
    /// Final balances read after the settle delay
    pub final_checkpoint: BalanceCheckpoint,
}

impl TeardownResult {
    pub fn is_clean(&self) -> bool {
        !self.cancel.is_failed()
            && !self.withdraw.is_failed()
            && self.final_checkpoint.balances.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SessionTeardown {
    settle_delay: Duration,
    timeout: Duration,
}

impl SessionTeardown {
    pub fn new(settle_delay: Duration, timeout: Duration) -> Self {
        Self {
            settle_delay,
            timeout,
        }
    }

    pub async fn teardown(
        &self,
        client: &dyn ExchangeClient,
        tracker: &AccountingTracker,
        trader: &TraderId,
        market: &MarketId,
        base_account: &AccountId,
        quote_account: &AccountId,
    ) -> TeardownResult {
        info!(%trader, %market, "🧹 [TEARDOWN] Cancelling orders and withdrawing funds");

        let cancel = self
            .step("cancel_all_orders", client.cancel_all_orders(trader, market))
            .await;
        let withdraw = self
            .step("withdraw_all", client.withdraw_all(trader, market))
            .await;

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let final_checkpoint = tracker
            .checkpoint(client, base_account, quote_account, CheckpointLabel::End)
            .await;

        TeardownResult {
            cancel,
            withdraw,
            final_checkpoint,
        }
    }

    async fn step<F>(&self, operation: &'static str, request: F) -> StepOutcome
    where
        F: Future<Output = Result<TxRef, VenueError>>,
    {
        match with_deadline(self.timeout, request, VenueError::Timeout).await {
            Ok(tx) => {
                info!(operation, %tx, "Teardown step completed");
                StepOutcome::Completed(tx)
            }
            Err(e) => {
                warn!(operation, error = %e, kind = %e.kind(), "Teardown step failed");
                StepOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{BalanceError, MockExchangeClient};
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    fn trader() -> TraderId {
        TraderId::new("trader-1")
    }

    fn market() -> MarketId {
        MarketId::new("SOL-USDC")
    }

    async fn run_teardown(client: &MockExchangeClient) -> TeardownResult {
        let tracker = AccountingTracker::new(9, 6, Duration::from_secs(1));
        SessionTeardown::new(Duration::from_secs(5), Duration::from_secs(1))
            .teardown(
                client,
                &tracker,
                &trader(),
                &market(),
                &AccountId::new("base"),
                &AccountId::new("quote"),
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order() {
        let mut seq = Sequence::new();
        let mut client = MockExchangeClient::new();
        client
            .expect_cancel_all_orders()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(TxRef::new("cancel")));
        client
            .expect_withdraw_all()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(TxRef::new("withdraw")));
        client
            .expect_get_balance()
            .times(2)
            .returning(|_| Ok(1_000_000_000));

        let result = run_teardown(&client).await;

        assert!(result.is_clean());
        assert_eq!(result.cancel, StepOutcome::Completed(TxRef::new("cancel")));
        assert_eq!(result.final_checkpoint.label, CheckpointLabel::End);
        let balances = result.final_checkpoint.balances.unwrap();
        assert_eq!(balances.base, dec!(1));
        assert_eq!(balances.quote, dec!(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_failure_does_not_block_withdraw() {
        let mut client = MockExchangeClient::new();
        client
            .expect_cancel_all_orders()
            .returning(|_, _| Err(VenueError::Network("reset".into())));
        client
            .expect_withdraw_all()
            .times(1)
            .returning(|_, _| Ok(TxRef::new("withdraw")));
        client.expect_get_balance().returning(|_| Ok(0));

        let result = run_teardown(&client).await;

        assert!(result.cancel.is_failed());
        assert!(!result.withdraw.is_failed());
        assert!(!result.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdraw_failure_does_not_block_accounting() {
        let mut client = MockExchangeClient::new();
        client
            .expect_cancel_all_orders()
            .returning(|_, _| Ok(TxRef::new("cancel")));
        client
            .expect_withdraw_all()
            .returning(|_, _| Err(VenueError::AccountState("no seat".into())));
        client
            .expect_get_balance()
            .times(2)
            .returning(|_| Ok(5_000_000));

        let result = run_teardown(&client).await;

        assert!(result.withdraw.is_failed());
        assert!(result.final_checkpoint.balances.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_balances_are_reported() {
        let mut client = MockExchangeClient::new();
        client
            .expect_cancel_all_orders()
            .returning(|_, _| Ok(TxRef::new("cancel")));
        client
            .expect_withdraw_all()
            .returning(|_, _| Ok(TxRef::new("withdraw")));
        client
            .expect_get_balance()
            .returning(|_| Err(BalanceError::Io("rpc down".into())));

        let result = run_teardown(&client).await;

        assert!(result.final_checkpoint.balances.is_none());
        assert_eq!(
            result.final_checkpoint.error,
            Some(BalanceError::Io("rpc down".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_precedes_final_read() {
        let mut client = MockExchangeClient::new();
        client
            .expect_cancel_all_orders()
            .returning(|_, _| Ok(TxRef::new("cancel")));
        client
            .expect_withdraw_all()
            .returning(|_, _| Ok(TxRef::new("withdraw")));
        client.expect_get_balance().returning(|_| Ok(0));

        let start = tokio::time::Instant::now();
        run_teardown(&client).await;

        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
