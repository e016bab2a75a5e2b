//! Quote refresh control loop.
//!
//! Runs a fixed number of ticks. Each tick fetches the fair price and the
//! book, computes quotes and submits one refresh. Failures are recorded
//! against the tick and never end the loop; only the stop signal does.

use super::health::TickHealth;
use super::initializer::SessionInitializer;
use super::policy::PolicyError;
use super::quote::{compute_quotes, MarketSnapshot, QuoteParams};
use crate::accounting::{AccountingTracker, CheckpointLabel};
use crate::config::SessionConfig;
use crate::exchange::{ExchangeClient, QuoteRefresh, TxRef, VenueError, VenueErrorKind};
use crate::oracle::{OracleError, PriceOracle};
use crate::session::Session;
use crate::utils::with_deadline;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cooperative stop flag, checked at each tick boundary.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Step of a tick that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOperation {
    FairPrice,
    MarketFetch,
    QuoteCompute,
    QuoteSubmit,
}

impl TickOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOperation::FairPrice => "fair_price",
            TickOperation::MarketFetch => "market_fetch",
            TickOperation::QuoteCompute => "quote_compute",
            TickOperation::QuoteSubmit => "refresh_quotes",
        }
    }
}

impl fmt::Display for TickOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl TickError {
    pub fn kind(&self) -> &'static str {
        match self {
            TickError::Oracle(e) => e.kind(),
            TickError::Venue(e) => e.kind().as_str(),
            TickError::Policy(_) => "invalid_params",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickFailure {
    pub operation: TickOperation,
    pub error: TickError,
}

impl TickFailure {
    fn new(operation: TickOperation, error: impl Into<TickError>) -> Self {
        Self {
            operation,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Quoted {
        fair_price: Decimal,
        quotes: QuoteParams,
        tx: TxRef,
    },
    Failed(TickFailure),
}

impl TickOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TickOutcome::Failed(_))
    }
}

/// One loop iteration as it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct TickRecord {
    pub index: u32,
    pub started_at: DateTime<Utc>,
    /// Start of this tick relative to the start of the loop
    pub offset: Duration,
    pub elapsed: Duration,
    /// Pause taken after the tick
    pub sleep: Duration,
    pub outcome: TickOutcome,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_count: u32,
    pub tick_interval: Duration,
    /// Balance checkpoint every K ticks (0 disables)
    pub balance_report_every: u32,
    pub request_timeout: Duration,
    pub failure_alert_threshold: u32,
}

impl From<&SessionConfig> for SchedulerConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            tick_count: config.tick_count,
            tick_interval: config.tick_interval(),
            balance_report_every: config.balance_report_every,
            request_timeout: config.request_timeout(),
            failure_alert_threshold: config.failure_alert_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks_run: u32,
    pub ticks_failed: u32,
    pub stopped_early: bool,
}

/// Drives the quote loop for one session.
pub struct QuoteScheduler<'a> {
    client: &'a dyn ExchangeClient,
    oracle: &'a dyn PriceOracle,
    tracker: AccountingTracker,
    initializer: SessionInitializer,
    config: SchedulerConfig,
}

impl<'a> QuoteScheduler<'a> {
    pub fn new(
        client: &'a dyn ExchangeClient,
        oracle: &'a dyn PriceOracle,
        tracker: AccountingTracker,
        config: SchedulerConfig,
    ) -> Self {
        let initializer = SessionInitializer::new(config.request_timeout);
        Self {
            client,
            oracle,
            tracker,
            initializer,
            config,
        }
    }

    /// Run up to `tick_count` ticks, appending records and checkpoints to `session`.
    pub async fn run(&self, session: &mut Session, stop: &StopSignal) -> LoopSummary {
        let loop_start = Instant::now();
        let mut health = TickHealth::new(
            session.market.to_string(),
            self.config.failure_alert_threshold,
        );
        let mut summary = LoopSummary::default();
        let mut recheck = false;

        info!(
            market = %session.market,
            ticks = self.config.tick_count,
            interval_ms = self.config.tick_interval.as_millis() as u64,
            mode = %session.strategy.price_improvement_mode,
            "🚀 Starting quote loop"
        );

        for index in 0..self.config.tick_count {
            if stop.is_triggered() {
                info!(tick = index, "🛑 Stop requested, leaving quote loop");
                summary.stopped_early = true;
                break;
            }

            let tick_start = Instant::now();
            let started_at = Utc::now();

            if recheck {
                recheck = false;
                self.recheck_initialization(session).await;
            }

            let outcome = match self.run_tick(session).await {
                Ok(outcome) => {
                    health.record_success();
                    outcome
                }
                Err(failure) => {
                    warn!(
                        tick = index,
                        operation = %failure.operation,
                        kind = failure.error.kind(),
                        error = %failure.error,
                        "Tick failed"
                    );
                    // Missing strategy or seat state; funding shortfalls are not rechecked
                    if matches!(
                        &failure.error,
                        TickError::Venue(e) if e.kind() == VenueErrorKind::AccountState
                    ) {
                        recheck = true;
                    }
                    health.record_failure(index, failure.operation.as_str(), failure.error.kind());
                    summary.ticks_failed += 1;
                    TickOutcome::Failed(failure)
                }
            };
            summary.ticks_run += 1;

            if let TickOutcome::Quoted {
                fair_price,
                quotes,
                tx,
            } = &outcome
            {
                info!(
                    tick = index,
                    fair = %fair_price,
                    bid = %quotes.bid_price,
                    ask = %quotes.ask_price,
                    %tx,
                    "📈 [QUOTE] Refreshed"
                );
            }

            let report_every = self.config.balance_report_every;
            if report_every > 0 && (index + 1) % report_every == 0 {
                let checkpoint = self
                    .tracker
                    .checkpoint(
                        self.client,
                        &session.base_account,
                        &session.quote_account,
                        CheckpointLabel::Tick(index),
                    )
                    .await;
                session.checkpoints.push(checkpoint);
            }

            let elapsed = tick_start.elapsed();
            let sleep = self.config.tick_interval.saturating_sub(elapsed);
            session.ticks.push(TickRecord {
                index,
                started_at,
                offset: tick_start.duration_since(loop_start),
                elapsed,
                sleep,
                outcome,
            });

            debug!(
                tick = index,
                elapsed_ms = elapsed.as_millis() as u64,
                sleep_ms = sleep.as_millis() as u64,
                "Tick paced"
            );
            if !sleep.is_zero() {
                tokio::time::sleep(sleep).await;
            }
        }

        info!(
            ticks_run = summary.ticks_run,
            ticks_failed = summary.ticks_failed,
            stopped_early = summary.stopped_early,
            "Quote loop finished"
        );
        summary
    }

    async fn run_tick(&self, session: &Session) -> Result<TickOutcome, TickFailure> {
        let timeout = self.config.request_timeout;

        let prices = with_deadline(
            timeout,
            session.feeds.component_prices(self.oracle),
            OracleError::Timeout,
        )
        .await
        .map_err(|e| TickFailure::new(TickOperation::FairPrice, e))?;
        let fair_price = prices.fair_price();

        let market = with_deadline(
            timeout,
            self.client.fetch_market(&session.market),
            VenueError::Timeout,
        )
        .await
        .map_err(|e| TickFailure::new(TickOperation::MarketFetch, e))?;

        let snapshot = MarketSnapshot::new(fair_price, market);
        let quotes = compute_quotes(&session.strategy, &snapshot)
            .map_err(|e| TickFailure::new(TickOperation::QuoteCompute, e))?;

        let refresh = QuoteRefresh::new(fair_price, quotes, &session.strategy);
        let tx = with_deadline(
            timeout,
            self.client
                .refresh_quotes(&session.trader, &session.market, &refresh),
            VenueError::Timeout,
        )
        .await
        .map_err(|e| TickFailure::new(TickOperation::QuoteSubmit, e))?;

        Ok(TickOutcome::Quoted {
            fair_price,
            quotes,
            tx,
        })
    }

    /// Re-run setup after the venue reported missing strategy or seat state.
    async fn recheck_initialization(&self, session: &Session) {
        info!(market = %session.market, "Re-checking strategy and seat");
        match self
            .initializer
            .ensure_initialized(
                self.client,
                &session.trader,
                &session.market,
                &session.strategy,
            )
            .await
        {
            Ok(report) if report.is_ready() => debug!("Re-check complete"),
            Ok(report) => warn!(?report, "Re-check left steps failing"),
            Err(e) => warn!(error = %e, "Re-check rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::exchange::{
        AccountId, LocalSigner, MarketId, MarketState, MockExchangeClient, PaperVenue, TraderId,
    };
    use crate::oracle::{
        FeedId, FeedPair, MockPriceOracle, OracleLimits, PaperOracle, PriceStatus,
    };
    use rust_decimal_macros::dec;

    fn trader() -> TraderId {
        TraderId::new("trader-1")
    }

    fn market() -> MarketId {
        MarketId::new("SOL-USDC")
    }

    fn market_state() -> MarketState {
        MarketState {
            market: market(),
            best_bid: Some(dec!(19.990)),
            best_ask: Some(dec!(20.010)),
            tick_size: dec!(0.001),
            base_decimals: 9,
            quote_decimals: 6,
            base_vault: AccountId::new("vault-base"),
            quote_vault: AccountId::new("vault-quote"),
        }
    }

    fn test_session() -> Session {
        Session::new(
            trader(),
            market(),
            StrategyConfig::default(),
            FeedPair {
                base: FeedId::new("SOL/USD"),
                quote: FeedId::new("USDC/USD"),
            },
            AccountId::new("trader-base"),
            AccountId::new("trader-quote"),
        )
    }

    fn scheduler_config(tick_count: u32) -> SchedulerConfig {
        SchedulerConfig {
            tick_count,
            tick_interval: Duration::from_millis(1000),
            balance_report_every: 100,
            request_timeout: Duration::from_secs(5),
            failure_alert_threshold: 3,
        }
    }

    fn tracker() -> AccountingTracker {
        AccountingTracker::new(9, 6, Duration::from_secs(5))
    }

    async fn paper_oracle() -> PaperOracle {
        let oracle = PaperOracle::new(OracleLimits::default());
        oracle.set_price(FeedId::new("SOL/USD"), dec!(20)).await;
        oracle.set_price(FeedId::new("USDC/USD"), dec!(1)).await;
        oracle
    }

    async fn paper_venue(latency: Duration, seated: bool) -> PaperVenue {
        let venue = PaperVenue::new(Arc::new(LocalSigner::new(trader(), "secret")))
            .with_latency(latency);
        venue.add_market(market_state()).await;
        venue
            .fund_trader(
                &trader(),
                &market(),
                AccountId::new("trader-base"),
                AccountId::new("trader-quote"),
                10_000_000_000,
                1_000_000_000,
            )
            .await;
        venue
            .initialize_strategy(&trader(), &market(), &StrategyConfig::default())
            .await
            .unwrap();
        if seated {
            venue.request_seat(&trader(), &market()).await.unwrap();
            venue.claim_seat(&trader(), &market()).await.unwrap();
        }
        venue
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_exactly_tick_count() {
        let venue = paper_venue(Duration::ZERO, true).await;
        let oracle = paper_oracle().await;
        let mut config = scheduler_config(5);
        config.balance_report_every = 2;
        let scheduler = QuoteScheduler::new(&venue, &oracle, tracker(), config);
        let mut session = test_session();

        let summary = scheduler.run(&mut session, &StopSignal::new()).await;

        assert_eq!(summary.ticks_run, 5);
        assert_eq!(summary.ticks_failed, 0);
        assert!(!summary.stopped_early);
        assert_eq!(session.ticks.len(), 5);
        assert!(session.ticks.iter().all(|t| !t.outcome.is_failed()));

        let labels: Vec<_> = session.checkpoints.iter().map(|c| c.label).collect();
        assert_eq!(labels, vec![CheckpointLabel::Tick(1), CheckpointLabel::Tick(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_ticks_do_not_end_loop() {
        let mut oracle = MockPriceOracle::new();
        oracle.expect_get_price().returning(|feed| {
            Err(OracleError::Status {
                feed: feed.clone(),
                status: PriceStatus::Halted,
            })
        });
        let mut client = MockExchangeClient::new();
        client.expect_refresh_quotes().never();

        let scheduler = QuoteScheduler::new(&client, &oracle, tracker(), scheduler_config(4));
        let mut session = test_session();

        let summary = scheduler.run(&mut session, &StopSignal::new()).await;

        assert_eq!(summary.ticks_run, 4);
        assert_eq!(summary.ticks_failed, 4);
        for (i, tick) in session.ticks.iter().enumerate() {
            assert_eq!(tick.index, i as u32);
            match &tick.outcome {
                TickOutcome::Failed(failure) => {
                    assert_eq!(failure.operation, TickOperation::FairPrice);
                    assert_eq!(failure.error.kind(), "status");
                }
                other => panic!("expected failure, got {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_ends_loop_at_tick_boundary() {
        let oracle = paper_oracle().await;
        let stop = StopSignal::new();
        let stop_from_venue = stop.clone();
        let mut refreshes = 0;

        let mut client = MockExchangeClient::new();
        client
            .expect_fetch_market()
            .returning(|_| Ok(market_state()));
        client.expect_refresh_quotes().returning(move |_, _, _| {
            refreshes += 1;
            if refreshes == 2 {
                stop_from_venue.trigger();
            }
            Ok(TxRef::new(format!("tx-{}", refreshes)))
        });

        let scheduler = QuoteScheduler::new(&client, &oracle, tracker(), scheduler_config(10));
        let mut session = test_session();

        let summary = scheduler.run(&mut session, &stop).await;

        assert_eq!(summary.ticks_run, 2);
        assert!(summary.stopped_early);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_sleeps_only_the_remainder() {
        // Two venue calls per tick: 2 x 100ms
        let venue = paper_venue(Duration::from_millis(100), true).await;
        let oracle = paper_oracle().await;
        let scheduler = QuoteScheduler::new(&venue, &oracle, tracker(), scheduler_config(2));
        let mut session = test_session();

        scheduler.run(&mut session, &StopSignal::new()).await;

        let first = &session.ticks[0];
        assert_eq!(first.elapsed, Duration::from_millis(200));
        assert_eq!(first.sleep, Duration::from_millis(800));
        assert_eq!(session.ticks[1].offset, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_tick_starts_next_immediately() {
        // Two venue calls per tick: 2 x 600ms = 1200ms against a 1000ms interval
        let venue = paper_venue(Duration::from_millis(600), true).await;
        let oracle = paper_oracle().await;
        let scheduler = QuoteScheduler::new(&venue, &oracle, tracker(), scheduler_config(2));
        let mut session = test_session();

        scheduler.run(&mut session, &StopSignal::new()).await;

        assert_eq!(session.ticks[0].elapsed, Duration::from_millis(1200));
        assert_eq!(session.ticks[0].sleep, Duration::ZERO);
        assert_eq!(session.ticks[1].offset, Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_venue_times_out_tick() {
        let venue = paper_venue(Duration::from_secs(3), true).await;
        let oracle = paper_oracle().await;
        let mut config = scheduler_config(1);
        config.request_timeout = Duration::from_secs(1);
        let scheduler = QuoteScheduler::new(&venue, &oracle, tracker(), config);
        let mut session = test_session();

        let summary = scheduler.run(&mut session, &StopSignal::new()).await;

        assert_eq!(summary.ticks_failed, 1);
        match &session.ticks[0].outcome {
            TickOutcome::Failed(failure) => {
                assert_eq!(failure.operation, TickOperation::MarketFetch);
                assert_eq!(
                    failure.error,
                    TickError::Venue(VenueError::Timeout(Duration::from_secs(1)))
                );
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_seat_triggers_recheck() {
        let venue = paper_venue(Duration::ZERO, false).await;
        let oracle = paper_oracle().await;
        let scheduler = QuoteScheduler::new(&venue, &oracle, tracker(), scheduler_config(2));
        let mut session = test_session();

        let summary = scheduler.run(&mut session, &StopSignal::new()).await;

        assert_eq!(summary.ticks_failed, 1);
        match &session.ticks[0].outcome {
            TickOutcome::Failed(failure) => {
                assert_eq!(failure.operation, TickOperation::QuoteSubmit);
                assert_eq!(failure.error.kind(), "account_state");
            }
            other => panic!("expected account state failure, got {:?}", other),
        }
        assert!(!session.ticks[1].outcome.is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_quote_price_fails_tick() {
        let mut oracle = MockPriceOracle::new();
        oracle
            .expect_get_price()
            .returning(|feed| match feed.as_str() {
                "SOL/USD" => Ok(dec!(20)),
                _ => Ok(Decimal::ZERO),
            });
        let mut client = MockExchangeClient::new();
        client.expect_refresh_quotes().never();

        let scheduler = QuoteScheduler::new(&client, &oracle, tracker(), scheduler_config(1));
        let mut session = test_session();

        let summary = scheduler.run(&mut session, &StopSignal::new()).await;

        assert_eq!(summary.ticks_run, 1);
        assert_eq!(summary.ticks_failed, 1);
        match &session.ticks[0].outcome {
            TickOutcome::Failed(failure) => {
                assert_eq!(failure.operation, TickOperation::FairPrice);
                assert_eq!(failure.error.kind(), "non_positive");
            }
            other => panic!("expected fair price failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_funds_skips_recheck() {
        let oracle = paper_oracle().await;
        let mut client = MockExchangeClient::new();
        client
            .expect_fetch_market()
            .returning(|_| Ok(market_state()));
        client.expect_refresh_quotes().times(2).returning(|_, _, _| {
            Err(VenueError::InsufficientFunds(
                "need 20000000 atoms, have 0".to_string(),
            ))
        });
        client.expect_initialize_strategy().never();
        client.expect_request_seat().never();
        client.expect_claim_seat().never();

        let scheduler = QuoteScheduler::new(&client, &oracle, tracker(), scheduler_config(2));
        let mut session = test_session();

        let summary = scheduler.run(&mut session, &StopSignal::new()).await;

        assert_eq!(summary.ticks_failed, 2);
        match &session.ticks[1].outcome {
            TickOutcome::Failed(failure) => {
                assert_eq!(failure.operation, TickOperation::QuoteSubmit);
                assert_eq!(failure.error.kind(), "insufficient_funds");
            }
            other => panic!("expected funding failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quotes_follow_policy() {
        let venue = paper_venue(Duration::ZERO, true).await;
        let oracle = paper_oracle().await;
        let scheduler = QuoteScheduler::new(&venue, &oracle, tracker(), scheduler_config(1));
        let mut session = test_session();
        session.strategy.price_improvement_mode = crate::strategy::PriceImprovementMode::Ignore;

        scheduler.run(&mut session, &StopSignal::new()).await;

        match &session.ticks[0].outcome {
            TickOutcome::Quoted {
                fair_price, quotes, ..
            } => {
                assert_eq!(*fair_price, dec!(20));
                assert_eq!(quotes.bid_price, dec!(19.994));
                assert_eq!(quotes.ask_price, dec!(20.006));
            }
            other => panic!("expected quote, got {:?}", other),
        }
    }
}
