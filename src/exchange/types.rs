//! Venue-facing identifiers, market metadata and error taxonomy.

use crate::utils::string_id;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

string_id!(
    /// Trader (wallet) identity that owns seats, orders and token accounts.
    TraderId
);
string_id!(
    /// Limit-order-book market address.
    MarketId
);
string_id!(
    /// Token account address holding raw atoms.
    AccountId
);
string_id!(
    /// Reference of a submitted venue request (its signature).
    TxRef
);

/// Market metadata as reported by the venue.
///
/// `best_bid`/`best_ask` exclude the requesting trader's own resting orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub market: MarketId,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    /// Minimum price increment
    pub tick_size: Decimal,
    pub base_decimals: u32,
    pub quote_decimals: u32,
    pub base_vault: AccountId,
    pub quote_vault: AccountId,
}

/// Coarse classification of a venue failure, used for reporting and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueErrorKind {
    Transient,
    AlreadyExists,
    AccountState,
    InsufficientFunds,
    Program,
}

impl VenueErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueErrorKind::Transient => "transient",
            VenueErrorKind::AlreadyExists => "already_exists",
            VenueErrorKind::AccountState => "account_state",
            VenueErrorKind::InsufficientFunds => "insufficient_funds",
            VenueErrorKind::Program => "program",
        }
    }
}

impl fmt::Display for VenueErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes raised by the on-venue strategy program.
///
/// Codes start at 6000 and follow declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramErrorCode {
    NoReturnData,
    InvalidStrategyParams,
    EdgeMustBeNonZero,
    InvalidPhoenixProgram,
    FailedToDeserializeMarket,
    OracleStatus,
    OracleValidSlot,
    OracleNegativePrice,
    OracleConfidence,
}

impl ProgramErrorCode {
    const BASE: u32 = 6000;

    const ALL: [ProgramErrorCode; 9] = [
        ProgramErrorCode::NoReturnData,
        ProgramErrorCode::InvalidStrategyParams,
        ProgramErrorCode::EdgeMustBeNonZero,
        ProgramErrorCode::InvalidPhoenixProgram,
        ProgramErrorCode::FailedToDeserializeMarket,
        ProgramErrorCode::OracleStatus,
        ProgramErrorCode::OracleValidSlot,
        ProgramErrorCode::OracleNegativePrice,
        ProgramErrorCode::OracleConfidence,
    ];

    /// Numeric code as returned in venue logs.
    pub fn code(&self) -> u32 {
        Self::BASE + *self as u32
    }

    /// Decode a numeric program error code.
    pub fn from_code(code: u32) -> Option<Self> {
        code.checked_sub(Self::BASE)
            .and_then(|offset| Self::ALL.get(offset as usize).copied())
    }

    /// Whether this code means the venue refused the strategy configuration itself.
    pub fn is_config_rejection(&self) -> bool {
        matches!(
            self,
            ProgramErrorCode::InvalidStrategyParams | ProgramErrorCode::EdgeMustBeNonZero
        )
    }
}

impl fmt::Display for ProgramErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// Errors returned by venue requests.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VenueError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("account state mismatch: {0}")]
    AccountState(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("program error {0}")]
    Program(ProgramErrorCode),
}

impl VenueError {
    pub fn kind(&self) -> VenueErrorKind {
        match self {
            VenueError::Network(_) | VenueError::Timeout(_) => VenueErrorKind::Transient,
            VenueError::AlreadyExists(_) => VenueErrorKind::AlreadyExists,
            VenueError::AccountState(_) => VenueErrorKind::AccountState,
            VenueError::InsufficientFunds(_) => VenueErrorKind::InsufficientFunds,
            VenueError::Program(_) => VenueErrorKind::Program,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == VenueErrorKind::Transient
    }

    /// Whether the venue refused the strategy configuration (fatal at session start).
    pub fn is_config_rejection(&self) -> bool {
        matches!(self, VenueError::Program(code) if code.is_config_rejection())
    }
}

/// Errors returned by token balance reads.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BalanceError {
    #[error("token account {0} not found")]
    AccountNotFound(AccountId),

    #[error("balance read failed: {0}")]
    Io(String),

    #[error("balance read timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}
