//! # Uber MM
//!
//! BBO-aware two-sided quoting against a limit-order-book venue.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Venue client interface, request signing and the paper venue
//! - `oracle`: Price feeds, validation and fair price derivation
//! - `strategy`: Price-improvement policy, quote loop, initialization and teardown
//! - `accounting`: Balance checkpoints and realized PnL
//! - `session`: End-to-end session lifecycle
//! - `persistence`: SQLite session journal
//! - `utils`: Shared utilities and decimal arithmetic

pub mod accounting;
pub mod config;
pub mod exchange;
pub mod oracle;
pub mod persistence;
pub mod session;
pub mod strategy;
pub mod utils;

pub use config::Config;
