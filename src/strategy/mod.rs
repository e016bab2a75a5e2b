//! Quoting strategy.
//!
//! Contains the core logic for:
//! - Price-improvement policy around the best bid/offer
//! - Quote sizing from a quote-notional budget
//! - Idempotent strategy/seat initialization
//! - The paced quote refresh loop and its failure health tracking
//! - End-of-session teardown

mod health;
mod initializer;
mod policy;
mod quote;
mod scheduler;
mod teardown;

pub use health::{HealthAlert, TickHealth};
pub use initializer::{InitError, InitReport, SessionInitializer, StepOutcome};
pub use policy::{
    decide_quotes, validate_params, PolicyError, PolicyInput, PriceImprovementMode, QuotePrices,
    MAX_BPS,
};
pub use quote::{compute_quotes, MarketSnapshot, QuoteParams};
pub use scheduler::{
    LoopSummary, QuoteScheduler, SchedulerConfig, StopSignal, TickError, TickFailure,
    TickOperation, TickOutcome, TickRecord,
};
pub use teardown::{SessionTeardown, TeardownResult};
