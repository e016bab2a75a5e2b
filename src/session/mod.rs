//! Session lifecycle: initialize, quote, tear down, account.
//!
//! Teardown runs exactly once after the quote loop, however the loop ended.

use crate::accounting::{
    AccountingTracker, BalanceCheckpoint, Balances, CheckpointLabel, PnlReport,
};
use crate::config::{SessionConfig, StrategyConfig};
use crate::exchange::{AccountId, ExchangeClient, MarketId, MarketState, TraderId, VenueError};
use crate::oracle::{FeedPair, FeedRegistry, OracleError, PriceOracle, RegistryError};
use crate::strategy::{
    InitError, InitReport, LoopSummary, PolicyError, QuoteScheduler, SchedulerConfig,
    SessionInitializer, SessionTeardown, StopSignal, TeardownResult, TickRecord,
};
use crate::utils::with_deadline;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Attempts to read market metadata before giving up on the session.
const MARKET_FETCH_ATTEMPTS: u32 = 3;
const MARKET_FETCH_BACKOFF: Duration = Duration::from_millis(500);

/// State of one quoting session on a (trader, market) pair.
#[derive(Debug, Clone)]
pub struct Session {
    pub trader: TraderId,
    pub market: MarketId,
    pub strategy: StrategyConfig,
    pub feeds: FeedPair,
    pub base_account: AccountId,
    pub quote_account: AccountId,
    pub started_at: DateTime<Utc>,
    pub ticks: Vec<TickRecord>,
    pub checkpoints: Vec<BalanceCheckpoint>,
    pub start_balances: Option<Balances>,
    pub end_balances: Option<Balances>,
}

impl Session {
    pub fn new(
        trader: TraderId,
        market: MarketId,
        strategy: StrategyConfig,
        feeds: FeedPair,
        base_account: AccountId,
        quote_account: AccountId,
    ) -> Self {
        Self {
            trader,
            market,
            strategy,
            feeds,
            base_account,
            quote_account,
            started_at: Utc::now(),
            ticks: Vec::new(),
            checkpoints: Vec::new(),
            start_balances: None,
            end_balances: None,
        }
    }
}

/// Who and what to quote.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub trader: TraderId,
    pub market: MarketId,
    pub strategy: StrategyConfig,
    pub base_account: AccountId,
    pub quote_account: AccountId,
}

/// Errors that prevent a session from starting. Nothing after the first tick is fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("invalid strategy config: {0}")]
    InvalidConfig(#[from] PolicyError),

    #[error(transparent)]
    Feeds(#[from] RegistryError),

    #[error("market metadata unavailable: {0}")]
    MarketUnavailable(VenueError),

    #[error(transparent)]
    Init(#[from] InitError),
}

#[derive(Debug, Clone)]
pub struct SessionResult {
    pub session: Session,
    pub init: InitReport,
    pub summary: LoopSummary,
    pub teardown: TeardownResult,
    /// `None` when balances or closing prices were unavailable
    pub pnl: Option<PnlReport>,
    pub finished_at: DateTime<Utc>,
}

/// Runs one session end to end.
pub struct SessionRunner<'a> {
    client: &'a dyn ExchangeClient,
    oracle: &'a dyn PriceOracle,
    feeds: &'a FeedRegistry,
    config: SessionConfig,
}

impl<'a> SessionRunner<'a> {
    pub fn new(
        client: &'a dyn ExchangeClient,
        oracle: &'a dyn PriceOracle,
        feeds: &'a FeedRegistry,
        config: SessionConfig,
    ) -> Self {
        Self {
            client,
            oracle,
            feeds,
            config,
        }
    }

    pub async fn run(
        &self,
        params: SessionParams,
        stop: &StopSignal,
    ) -> Result<SessionResult, SessionError> {
        params.strategy.validate()?;
        let feeds = self.feeds.resolve(&params.market)?.clone();
        let market = self.fetch_market_metadata(&params.market).await?;

        let timeout = self.config.request_timeout();
        let init = SessionInitializer::new(timeout)
            .ensure_initialized(self.client, &params.trader, &params.market, &params.strategy)
            .await?;

        let mut session = Session::new(
            params.trader,
            params.market,
            params.strategy,
            feeds,
            params.base_account,
            params.quote_account,
        );
        let tracker = AccountingTracker::new(market.base_decimals, market.quote_decimals, timeout);

        let start = tracker
            .checkpoint(
                self.client,
                &session.base_account,
                &session.quote_account,
                CheckpointLabel::Start,
            )
            .await;
        session.start_balances = start.balances;
        session.checkpoints.push(start);

        let scheduler = QuoteScheduler::new(
            self.client,
            self.oracle,
            tracker.clone(),
            SchedulerConfig::from(&self.config),
        );
        let summary = scheduler.run(&mut session, stop).await;

        let teardown = SessionTeardown::new(self.config.settle_delay(), timeout)
            .teardown(
                self.client,
                &tracker,
                &session.trader,
                &session.market,
                &session.base_account,
                &session.quote_account,
            )
            .await;
        session.end_balances = teardown.final_checkpoint.balances;
        session.checkpoints.push(teardown.final_checkpoint.clone());

        let pnl = self.realized_pnl(&session).await;

        Ok(SessionResult {
            session,
            init,
            summary,
            teardown,
            pnl,
            finished_at: Utc::now(),
        })
    }

    /// Market metadata, retrying transient failures with a fixed backoff.
    async fn fetch_market_metadata(&self, market: &MarketId) -> Result<MarketState, SessionError> {
        let timeout = self.config.request_timeout();
        let mut attempt = 1;
        loop {
            let fetched =
                with_deadline(timeout, self.client.fetch_market(market), VenueError::Timeout).await;
            match fetched {
                Ok(state) => return Ok(state),
                Err(e) if e.is_transient() && attempt < MARKET_FETCH_ATTEMPTS => {
                    warn!(%market, attempt, error = %e, "Market fetch failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(MARKET_FETCH_BACKOFF).await;
                }
                Err(e) => {
                    error!(%market, error = %e, "Market metadata unavailable");
                    return Err(SessionError::MarketUnavailable(e));
                }
            }
        }
    }

    async fn realized_pnl(&self, session: &Session) -> Option<PnlReport> {
        let (Some(start), Some(end)) = (session.start_balances, session.end_balances) else {
            warn!("Balances unavailable, realized PnL not computed");
            return None;
        };

        let prices = with_deadline(
            self.config.request_timeout(),
            session.feeds.component_prices(self.oracle),
            OracleError::Timeout,
        )
        .await;
        match prices {
            Ok(prices) => {
                let report = PnlReport::new(&start, &end, prices);
                info!(
                    base_delta = %report.base_delta,
                    quote_delta = %report.quote_delta,
                    base_usd = %report.base_price_usd,
                    quote_usd = %report.quote_price_usd,
                    pnl = %report.realized_pnl,
                    "💵 [PNL] Session realized"
                );
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Closing prices unavailable, realized PnL not computed");
                None
            }
        }
    }
}
