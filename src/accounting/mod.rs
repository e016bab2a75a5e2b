//! Inventory snapshots and realized PnL.

use crate::exchange::{AccountId, BalanceError, ExchangeClient};
use crate::oracle::ComponentPrices;
use crate::utils::decimal::from_atoms;
use crate::utils::with_deadline;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Token holdings in human units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub base: Decimal,
    pub quote: Decimal,
}

/// When a checkpoint was taken in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointLabel {
    Start,
    Tick(u32),
    End,
}

impl fmt::Display for CheckpointLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointLabel::Start => write!(f, "start"),
            CheckpointLabel::Tick(i) => write!(f, "tick-{}", i),
            CheckpointLabel::End => write!(f, "end"),
        }
    }
}

/// A balance read; `balances` is `None` when the read failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceCheckpoint {
    pub label: CheckpointLabel,
    pub taken_at: DateTime<Utc>,
    pub balances: Option<Balances>,
    pub error: Option<BalanceError>,
}

/// Realized PnL breakdown valued at oracle prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlReport {
    pub base_delta: Decimal,
    pub quote_delta: Decimal,
    pub base_price_usd: Decimal,
    pub quote_price_usd: Decimal,
    pub realized_pnl: Decimal,
}

/// `(end.base - start.base) * base_usd + (end.quote - start.quote) * quote_usd`
pub fn compute_realized_pnl(
    start: &Balances,
    end: &Balances,
    base_price_usd: Decimal,
    quote_price_usd: Decimal,
) -> Decimal {
    (end.base - start.base) * base_price_usd + (end.quote - start.quote) * quote_price_usd
}

impl PnlReport {
    pub fn new(start: &Balances, end: &Balances, prices: ComponentPrices) -> Self {
        Self {
            base_delta: end.base - start.base,
            quote_delta: end.quote - start.quote,
            base_price_usd: prices.base_usd,
            quote_price_usd: prices.quote_usd,
            realized_pnl: compute_realized_pnl(start, end, prices.base_usd, prices.quote_usd),
        }
    }
}

/// Reads the trader's token accounts and converts atoms to human units.
#[derive(Debug, Clone)]
pub struct AccountingTracker {
    base_decimals: u32,
    quote_decimals: u32,
    timeout: Duration,
}

impl AccountingTracker {
    pub fn new(base_decimals: u32, quote_decimals: u32, timeout: Duration) -> Self {
        Self {
            base_decimals,
            quote_decimals,
            timeout,
        }
    }

    /// Read both token accounts, each bounded by the request timeout.
    pub async fn snapshot(
        &self,
        client: &dyn ExchangeClient,
        base_account: &AccountId,
        quote_account: &AccountId,
    ) -> Result<Balances, BalanceError> {
        let base_atoms = with_deadline(
            self.timeout,
            client.get_balance(base_account),
            BalanceError::Timeout,
        )
        .await?;
        let quote_atoms = with_deadline(
            self.timeout,
            client.get_balance(quote_account),
            BalanceError::Timeout,
        )
        .await?;

        Ok(Balances {
            base: from_atoms(base_atoms, self.base_decimals),
            quote: from_atoms(quote_atoms, self.quote_decimals),
        })
    }

    /// Take a labelled snapshot, recording a failed read instead of returning it.
    pub async fn checkpoint(
        &self,
        client: &dyn ExchangeClient,
        base_account: &AccountId,
        quote_account: &AccountId,
        label: CheckpointLabel,
    ) -> BalanceCheckpoint {
        let taken_at = Utc::now();
        match self.snapshot(client, base_account, quote_account).await {
            Ok(balances) => {
                info!(
                    %label,
                    base = %balances.base,
                    quote = %balances.quote,
                    "💰 [BALANCE] Checkpoint"
                );
                BalanceCheckpoint {
                    label,
                    taken_at,
                    balances: Some(balances),
                    error: None,
                }
            }
            Err(e) => {
                warn!(%label, error = %e, "Balance checkpoint unavailable");
                BalanceCheckpoint {
                    label,
                    taken_at,
                    balances: None,
                    error: Some(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchangeClient;
    use rust_decimal_macros::dec;

    #[test]
    fn test_realized_pnl() {
        let start = Balances {
            base: dec!(10),
            quote: dec!(1000),
        };
        let end = Balances {
            base: dec!(8),
            quote: dec!(1200),
        };

        assert_eq!(compute_realized_pnl(&start, &end, dec!(20), dec!(1)), dec!(160));

        let report = PnlReport::new(
            &start,
            &end,
            ComponentPrices {
                base_usd: dec!(20),
                quote_usd: dec!(1),
            },
        );
        assert_eq!(report.base_delta, dec!(-2));
        assert_eq!(report.quote_delta, dec!(200));
        assert_eq!(report.realized_pnl, dec!(160));
    }

    #[tokio::test]
    async fn test_snapshot_scales_atoms() {
        let mut client = MockExchangeClient::new();
        client
            .expect_get_balance()
            .returning(|account| match account.as_str() {
                "base" => Ok(2_500_000_000),
                _ => Ok(1_234_567),
            });

        let tracker = AccountingTracker::new(9, 6, Duration::from_secs(1));
        let balances = tracker
            .snapshot(&client, &AccountId::new("base"), &AccountId::new("quote"))
            .await
            .unwrap();

        assert_eq!(balances.base, dec!(2.5));
        assert_eq!(balances.quote, dec!(1.234567));
    }

    #[tokio::test]
    async fn test_failed_read_becomes_unavailable_checkpoint() {
        let mut client = MockExchangeClient::new();
        client
            .expect_get_balance()
            .returning(|account| Err(BalanceError::AccountNotFound(account.clone())));

        let tracker = AccountingTracker::new(9, 6, Duration::from_secs(1));
        let checkpoint = tracker
            .checkpoint(
                &client,
                &AccountId::new("base"),
                &AccountId::new("quote"),
                CheckpointLabel::Tick(9),
            )
            .await;

        assert_eq!(checkpoint.label, CheckpointLabel::Tick(9));
        assert!(checkpoint.balances.is_none());
        assert_eq!(
            checkpoint.error,
            Some(BalanceError::AccountNotFound(AccountId::new("base")))
        );
    }
}
