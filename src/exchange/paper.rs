//! Paper venue for simulated quoting sessions.
//!
//! Models the pieces of a limit-order-book venue a quoting session touches:
//! strategy state, seats, one resting bid and ask per trader, free and
//! locked funds, and token accounts holding raw atoms. The external book
//! is set by the caller; resting orders fill when it crosses them.

use super::signer::{sign_request, Signer};
use super::traits::{ExchangeClient, QuoteRefresh};
use super::types::*;
use crate::config::StrategyConfig;
use crate::strategy::PriceImprovementMode;
use crate::utils::decimal::{from_atoms, to_atoms};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Seat lifecycle on a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatStatus {
    Requested,
    Approved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// A resting limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestingOrder {
    pub price: Decimal,
    pub size_base: Decimal,
}

/// Executed trade against the external book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperFill {
    pub trader: TraderId,
    pub market: MarketId,
    pub side: Side,
    pub price: Decimal,
    pub size_base: Decimal,
}

/// Per (trader, market) order and fund state, in human units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraderBook {
    pub bid: Option<RestingOrder>,
    pub ask: Option<RestingOrder>,
    /// Withdrawable funds held by the venue
    pub free_base: Decimal,
    pub free_quote: Decimal,
}

#[derive(Debug, Clone)]
struct FundingAccounts {
    base: AccountId,
    quote: AccountId,
}

type PairKey = (TraderId, MarketId);

#[derive(Debug, Default)]
struct PaperVenueState {
    markets: HashMap<MarketId, MarketState>,
    strategies: HashMap<PairKey, StrategyConfig>,
    seats: HashMap<PairKey, SeatStatus>,
    books: HashMap<PairKey, TraderBook>,
    funding: HashMap<PairKey, FundingAccounts>,
    /// Raw token balances in atoms
    token_accounts: HashMap<AccountId, u64>,
    fills: Vec<PaperFill>,
}

/// Pending injected failures, consumed one per matching request.
#[derive(Debug, Default)]
struct FaultPlan {
    refresh: u32,
    cancel: u32,
    withdraw: u32,
    balance: u32,
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// Simulated venue implementing [`ExchangeClient`].
pub struct PaperVenue {
    signer: Arc<dyn Signer>,
    state: Arc<RwLock<PaperVenueState>>,
    faults: Arc<RwLock<FaultPlan>>,
    nonce: AtomicU64,
    latency: Duration,
}

impl PaperVenue {
    /// Create an empty venue that signs requests with `signer`.
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            state: Arc::new(RwLock::new(PaperVenueState::default())),
            faults: Arc::new(RwLock::new(FaultPlan::default())),
            nonce: AtomicU64::new(1),
            latency: Duration::ZERO,
        }
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// List a market. Its `best_bid`/`best_ask` seed the external book.
    pub async fn add_market(&self, market: MarketState) {
        info!(market = %market.market, tick = %market.tick_size, "Paper market listed");
        let mut state = self.state.write().await;
        state.markets.insert(market.market.clone(), market);
    }

    /// Move the external best bid/ask.
    pub async fn set_external_book(
        &self,
        market: &MarketId,
        best_bid: Option<Decimal>,
        best_ask: Option<Decimal>,
    ) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.markets.get_mut(market) {
            entry.best_bid = best_bid;
            entry.best_ask = best_ask;
        }
    }

    /// Create the trader's token accounts for a market with starting atoms.
    pub async fn fund_trader(
        &self,
        trader: &TraderId,
        market: &MarketId,
        base_account: AccountId,
        quote_account: AccountId,
        base_atoms: u64,
        quote_atoms: u64,
    ) {
        let mut state = self.state.write().await;
        state.token_accounts.insert(base_account.clone(), base_atoms);
        state.token_accounts.insert(quote_account.clone(), quote_atoms);
        state.funding.insert(
            (trader.clone(), market.clone()),
            FundingAccounts {
                base: base_account,
                quote: quote_account,
            },
        );
    }

    pub async fn inject_refresh_failures(&self, count: u32) {
        self.faults.write().await.refresh = count;
    }

    pub async fn inject_cancel_failures(&self, count: u32) {
        self.faults.write().await.cancel = count;
    }

    pub async fn inject_withdraw_failures(&self, count: u32) {
        self.faults.write().await.withdraw = count;
    }

    pub async fn inject_balance_failures(&self, count: u32) {
        self.faults.write().await.balance = count;
    }

    pub async fn seat_status(&self, trader: &TraderId, market: &MarketId) -> Option<SeatStatus> {
        let state = self.state.read().await;
        state.seats.get(&(trader.clone(), market.clone())).copied()
    }

    /// Strategy parameters as last stored by the venue.
    pub async fn stored_strategy(
        &self,
        trader: &TraderId,
        market: &MarketId,
    ) -> Option<StrategyConfig> {
        let state = self.state.read().await;
        state
            .strategies
            .get(&(trader.clone(), market.clone()))
            .cloned()
    }

    pub async fn trader_book(&self, trader: &TraderId, market: &MarketId) -> TraderBook {
        let state = self.state.read().await;
        state
            .books
            .get(&(trader.clone(), market.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn fills(&self) -> Vec<PaperFill> {
        self.state.read().await.fills.clone()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn authorize(&self, trader: &TraderId) -> Result<(), VenueError> {
        let signer = self.signer.trader();
        if &signer != trader {
            return Err(VenueError::AccountState(format!(
                "signer {} cannot act for trader {}",
                signer, trader
            )));
        }
        Ok(())
    }

    fn submit(&self, operation: &str, market: &MarketId) -> TxRef {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        sign_request(
            self.signer.as_ref(),
            operation,
            &[("market", market.to_string())],
            nonce,
        )
    }
}

fn validate_strategy_params(
    mode: PriceImprovementMode,
    edge_bps: u64,
    margin_bps: u64,
) -> Result<(), VenueError> {
    if edge_bps == 0 {
        return Err(VenueError::Program(ProgramErrorCode::EdgeMustBeNonZero));
    }
    if mode == PriceImprovementMode::Ubermensch && margin_bps > edge_bps {
        return Err(VenueError::Program(ProgramErrorCode::InvalidStrategyParams));
    }
    Ok(())
}

/// Move `amount` out of `free`, topping up from the token account when short.
fn draw_funds(
    free: &mut Decimal,
    account_atoms: &mut u64,
    amount: Decimal,
    decimals: u32,
) -> Result<(), VenueError> {
    if *free >= amount {
        *free -= amount;
        return Ok(());
    }

    let shortfall = amount - *free;
    let mut atoms = to_atoms(shortfall, decimals);
    if from_atoms(atoms, decimals) < shortfall {
        atoms += 1;
    }
    if *account_atoms < atoms {
        return Err(VenueError::InsufficientFunds(format!(
            "need {} atoms, have {}",
            atoms, account_atoms
        )));
    }

    *account_atoms -= atoms;
    *free = *free + from_atoms(atoms, decimals) - amount;
    Ok(())
}

/// Fill resting orders the external book has crossed.
fn settle_fills(
    book: &mut TraderBook,
    market: &MarketState,
    trader: &TraderId,
    fills: &mut Vec<PaperFill>,
) {
    if let (Some(order), Some(ask)) = (book.bid, market.best_ask) {
        if ask <= order.price {
            book.free_base += order.size_base;
            book.bid = None;
            fills.push(PaperFill {
                trader: trader.clone(),
                market: market.market.clone(),
                side: Side::Bid,
                price: order.price,
                size_base: order.size_base,
            });
        }
    }

    if let (Some(order), Some(bid)) = (book.ask, market.best_bid) {
        if bid >= order.price {
            book.free_quote += order.size_base * order.price;
            book.ask = None;
            fills.push(PaperFill {
                trader: trader.clone(),
                market: market.market.clone(),
                side: Side::Ask,
                price: order.price,
                size_base: order.size_base,
            });
        }
    }
}

/// Release the funds locked by resting orders.
fn cancel_resting(book: &mut TraderBook) -> usize {
    let mut cancelled = 0;
    if let Some(order) = book.bid.take() {
        book.free_quote += order.size_base * order.price;
        cancelled += 1;
    }
    if let Some(order) = book.ask.take() {
        book.free_base += order.size_base;
        cancelled += 1;
    }
    cancelled
}

#[async_trait]
impl ExchangeClient for PaperVenue {
    #[instrument(skip_all, fields(trader = %trader, market = %market))]
    async fn initialize_strategy(
        &self,
        trader: &TraderId,
        market: &MarketId,
        config: &StrategyConfig,
    ) -> Result<TxRef, VenueError> {
        self.simulate_latency().await;
        self.authorize(trader)?;
        validate_strategy_params(
            config.price_improvement_mode,
            config.quote_edge_bps,
            config.margin_bps,
        )?;

        let mut state = self.state.write().await;
        if !state.markets.contains_key(market) {
            return Err(VenueError::AccountState(format!("unknown market {}", market)));
        }

        let key = (trader.clone(), market.clone());
        if state.strategies.contains_key(&key) {
            return Err(VenueError::AlreadyExists(format!(
                "strategy state for {} on {}",
                trader, market
            )));
        }
        state.strategies.insert(key, config.clone());

        debug!("Strategy state created");
        Ok(self.submit("initialize_strategy", market))
    }

    async fn request_seat(
        &self,
        trader: &TraderId,
        market: &MarketId,
    ) -> Result<TxRef, VenueError> {
        self.simulate_latency().await;
        self.authorize(trader)?;

        let mut state = self.state.write().await;
        let key = (trader.clone(), market.clone());
        if state.seats.contains_key(&key) {
            return Err(VenueError::AlreadyExists(format!(
                "seat for {} on {}",
                trader, market
            )));
        }
        state.seats.insert(key, SeatStatus::Requested);

        debug!(%trader, %market, "Seat requested");
        Ok(self.submit("request_seat", market))
    }

    async fn claim_seat(&self, trader: &TraderId, market: &MarketId) -> Result<TxRef, VenueError> {
        self.simulate_latency().await;
        self.authorize(trader)?;

        let mut state = self.state.write().await;
        let key = (trader.clone(), market.clone());
        match state.seats.get(&key).copied() {
            None => Err(VenueError::AccountState(format!(
                "no seat requested for {} on {}",
                trader, market
            ))),
            Some(SeatStatus::Approved) => Err(VenueError::AlreadyExists(format!(
                "approved seat for {} on {}",
                trader, market
            ))),
            Some(SeatStatus::Requested) => {
                state.seats.insert(key, SeatStatus::Approved);
                debug!(%trader, %market, "Seat approved");
                Ok(self.submit("claim_seat", market))
            }
        }
    }

    #[instrument(skip_all, fields(trader = %trader, market = %market))]
    async fn refresh_quotes(
        &self,
        trader: &TraderId,
        market: &MarketId,
        refresh: &QuoteRefresh,
    ) -> Result<TxRef, VenueError> {
        self.simulate_latency().await;
        if take_fault(&mut self.faults.write().await.refresh) {
            return Err(VenueError::Network("injected refresh failure".to_string()));
        }
        self.authorize(trader)?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let key = (trader.clone(), market.clone());

        let market_state = state
            .markets
            .get(market)
            .cloned()
            .ok_or_else(|| VenueError::AccountState(format!("unknown market {}", market)))?;
        let Some(stored) = state.strategies.get(&key) else {
            return Err(VenueError::AccountState(
                "strategy state not initialized".to_string(),
            ));
        };
        if state.seats.get(&key) != Some(&SeatStatus::Approved) {
            return Err(VenueError::AccountState("seat not approved".to_string()));
        }

        // A zero edge keeps the stored one.
        let edge_bps = if refresh.quote_edge_bps > 0 {
            refresh.quote_edge_bps
        } else {
            stored.quote_edge_bps
        };
        validate_strategy_params(refresh.price_improvement_mode, edge_bps, refresh.margin_bps)?;

        let accounts = state.funding.get(&key).cloned().ok_or_else(|| {
            VenueError::AccountState(format!("no token accounts for {}", trader))
        })?;

        // Work on copies; nothing is written back unless both sides succeed.
        let mut book = state.books.get(&key).cloned().unwrap_or_default();
        let mut base_atoms = state.token_accounts.get(&accounts.base).copied().unwrap_or(0);
        let mut quote_atoms = state.token_accounts.get(&accounts.quote).copied().unwrap_or(0);
        let mut fills = Vec::new();

        settle_fills(&mut book, &market_state, trader, &mut fills);
        cancel_resting(&mut book);

        let quotes = &refresh.quotes;
        if quotes.has_bid() {
            let crosses = market_state
                .best_ask
                .is_some_and(|ask| ask <= quotes.bid_price);
            if crosses && refresh.post_only {
                debug!(bid = %quotes.bid_price, "Post-only bid would cross, skipped");
            } else {
                draw_funds(
                    &mut book.free_quote,
                    &mut quote_atoms,
                    quotes.bid_size_base * quotes.bid_price,
                    market_state.quote_decimals,
                )?;
                let order = RestingOrder {
                    price: quotes.bid_price,
                    size_base: quotes.bid_size_base,
                };
                if crosses {
                    book.free_base += order.size_base;
                    fills.push(PaperFill {
                        trader: trader.clone(),
                        market: market.clone(),
                        side: Side::Bid,
                        price: order.price,
                        size_base: order.size_base,
                    });
                } else {
                    book.bid = Some(order);
                }
            }
        }

        if quotes.has_ask() {
            let crosses = market_state
                .best_bid
                .is_some_and(|bid| bid >= quotes.ask_price);
            if crosses && refresh.post_only {
                debug!(ask = %quotes.ask_price, "Post-only ask would cross, skipped");
            } else {
                draw_funds(
                    &mut book.free_base,
                    &mut base_atoms,
                    quotes.ask_size_base,
                    market_state.base_decimals,
                )?;
                let order = RestingOrder {
                    price: quotes.ask_price,
                    size_base: quotes.ask_size_base,
                };
                if crosses {
                    book.free_quote += order.size_base * order.price;
                    fills.push(PaperFill {
                        trader: trader.clone(),
                        market: market.clone(),
                        side: Side::Ask,
                        price: order.price,
                        size_base: order.size_base,
                    });
                } else {
                    book.ask = Some(order);
                }
            }
        }

        debug!(
            bid = ?book.bid.map(|o| o.price),
            ask = ?book.ask.map(|o| o.price),
            "Quotes refreshed"
        );

        if let Some(stored) = state.strategies.get_mut(&key) {
            stored.quote_edge_bps = edge_bps;
            stored.quote_size_quote_atoms = refresh.quote_size_quote_atoms;
            stored.margin_bps = refresh.margin_bps;
            stored.post_only = refresh.post_only;
            stored.price_improvement_mode = refresh.price_improvement_mode;
        }
        for (account, atoms) in [(&accounts.base, base_atoms), (&accounts.quote, quote_atoms)] {
            if let Some(balance) = state.token_accounts.get_mut(account) {
                *balance = atoms;
            }
        }
        state.books.insert(key, book);
        state.fills.extend(fills);
        Ok(self.submit("refresh_quotes", market))
    }

    async fn cancel_all_orders(
        &self,
        trader: &TraderId,
        market: &MarketId,
    ) -> Result<TxRef, VenueError> {
        self.simulate_latency().await;
        if take_fault(&mut self.faults.write().await.cancel) {
            return Err(VenueError::Network("injected cancel failure".to_string()));
        }
        self.authorize(trader)?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let market_state = state
            .markets
            .get(market)
            .cloned()
            .ok_or_else(|| VenueError::AccountState(format!("unknown market {}", market)))?;

        let key = (trader.clone(), market.clone());
        if let Some(book) = state.books.get_mut(&key) {
            settle_fills(book, &market_state, trader, &mut state.fills);
            let cancelled = cancel_resting(book);
            info!(%trader, %market, cancelled, "Orders cancelled");
        }

        Ok(self.submit("cancel_all_orders", market))
    }

    async fn withdraw_all(
        &self,
        trader: &TraderId,
        market: &MarketId,
    ) -> Result<TxRef, VenueError> {
        self.simulate_latency().await;
        if take_fault(&mut self.faults.write().await.withdraw) {
            return Err(VenueError::Network("injected withdraw failure".to_string()));
        }
        self.authorize(trader)?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let key = (trader.clone(), market.clone());
        let market_state = state
            .markets
            .get(market)
            .cloned()
            .ok_or_else(|| VenueError::AccountState(format!("unknown market {}", market)))?;
        let accounts = state.funding.get(&key).cloned().ok_or_else(|| {
            VenueError::AccountState(format!("no token accounts for {}", trader))
        })?;

        if let Some(book) = state.books.get_mut(&key) {
            let base_atoms = to_atoms(book.free_base, market_state.base_decimals);
            let quote_atoms = to_atoms(book.free_quote, market_state.quote_decimals);
            book.free_base -= from_atoms(base_atoms, market_state.base_decimals);
            book.free_quote -= from_atoms(quote_atoms, market_state.quote_decimals);

            *state.token_accounts.entry(accounts.base).or_default() += base_atoms;
            *state.token_accounts.entry(accounts.quote).or_default() += quote_atoms;

            if book.bid.is_some() || book.ask.is_some() {
                warn!(%trader, %market, "Withdrew free funds while orders still rest");
            }
            info!(%trader, %market, base_atoms, quote_atoms, "Funds withdrawn");
        }

        Ok(self.submit("withdraw_funds", market))
    }

    async fn get_balance(&self, account: &AccountId) -> Result<u64, BalanceError> {
        self.simulate_latency().await;
        if take_fault(&mut self.faults.write().await.balance) {
            return Err(BalanceError::Io("injected balance failure".to_string()));
        }

        let state = self.state.read().await;
        state
            .token_accounts
            .get(account)
            .copied()
            .ok_or_else(|| BalanceError::AccountNotFound(account.clone()))
    }

    async fn fetch_market(&self, market: &MarketId) -> Result<MarketState, VenueError> {
        self.simulate_latency().await;
        let state = self.state.read().await;
        state
            .markets
            .get(market)
            .cloned()
            .ok_or_else(|| VenueError::AccountState(format!("unknown market {}", market)))
    }
}
