// 8.0.2: receipts and errors for engine operations.

use crate::account::AccountError;
use crate::config::ConfigError;
use crate::custody::CustodyError;
use crate::liquidation::{InsuranceDraw, LiquidationPayout};
use crate::margin::MarginStatus;
use crate::price_feed::OracleError;
use crate::types::{FundingRate, Leverage, MarketId, MathError, OwnerId, Price, Quote, Side, SignedSize, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingResult {
    pub market_id: MarketId,
    pub mark_price: Price,
    pub index_price: Price,
    pub premium: i128,
    pub rate: FundingRate,
    /// Added to the accumulator this interval, quote per base unit.
    pub increment: i128,
    pub cumulative_funding: i128,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionReceipt {
    pub market_id: MarketId,
    pub owner: OwnerId,
    pub side: Side,
    pub added_size: u64,
    pub fill_price: Price,
    pub margin: Quote,
    pub fee: Quote,
    pub leverage: Leverage,
    /// Position after the open.
    pub size: SignedSize,
    pub entry_price: Price,
    /// Funding settled before adding. Positive = paid.
    pub funding_settled: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReceipt {
    pub market_id: MarketId,
    pub owner: OwnerId,
    pub closed_size: SignedSize,
    pub exit_price: Price,
    pub realized_pnl: Quote,
    pub collateral_returned: Quote,
    pub funding_settled: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationReceipt {
    pub market_id: MarketId,
    pub owner: OwnerId,
    pub liquidator: OwnerId,
    pub liquidated_size: SignedSize,
    pub liquidation_price: Price,
    pub equity: Quote,
    pub maintenance_margin: Quote,
    pub payout: LiquidationPayout,
    pub insurance_draw: InsuranceDraw,
    /// The vault ran dry and the market went into emergency.
    pub market_halted: bool,
}

/// Read-only view of a single position at the current index price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionHealth {
    pub market_id: MarketId,
    pub owner: OwnerId,
    pub size: SignedSize,
    pub entry_price: Option<Price>,
    pub index_price: Price,
    pub collateral: Quote,
    pub pending_funding: Quote,
    pub unrealized_pnl: Quote,
    /// collateral - pending funding + unrealized pnl
    pub equity: Quote,
    pub maintenance_margin: Quote,
    pub status: MarginStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Invalid leverage {requested}x: allowed 1x to {max}")]
    InvalidLeverage { requested: u16, max: Leverage },

    #[error("Insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral { required: Quote, available: Quote },

    #[error("Withdrawal would leave equity {equity_after} below maintenance margin {maintenance}")]
    MaintenanceMarginViolation { equity_after: Quote, maintenance: Quote },

    #[error("Position is not liquidatable: equity {equity}, maintenance margin {maintenance}")]
    NotLiquidatable { equity: Quote, maintenance: Quote },

    #[error("Cannot liquidate own position")]
    CannotLiquidateOwnPosition,

    #[error("Funding interval has not elapsed, next update allowed at {next_allowed:?}")]
    FundingTooSoon { next_allowed: Timestamp },

    #[error("Market {0} is halted")]
    MarketHalted(MarketId),

    #[error("Market {0} not found")]
    MarketNotFound(MarketId),

    #[error("Account {0} not found")]
    AccountNotFound(OwnerId),

    #[error("No open position for {owner} in {market}")]
    NoOpenPosition { owner: OwnerId, market: MarketId },

    #[error("Existing {existing} position, close it before opening {requested}")]
    PositionSideConflict { existing: Side, requested: Side },

    #[error("Position equity {equity} is negative, it must be liquidated")]
    NegativeEquity { equity: Quote },

    #[error("{0} is not the admin")]
    Unauthorized(OwnerId),

    #[error("Clearinghouse is paused")]
    Paused,

    #[error("Clearinghouse not initialized")]
    NotInitialized,

    #[error("Clearinghouse already initialized")]
    AlreadyInitialized,

    #[error("Market {0} already exists")]
    MarketExists(MarketId),

    #[error("Account for {0} already exists")]
    AccountExists(OwnerId),

    #[error("Invalid market params: {0}")]
    InvalidMarketParams(#[from] ConfigError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("Math error: {0}")]
    Math(#[from] MathError),

    #[error("Gave up after {attempts} conflicting commit attempts")]
    Contention { attempts: u32 },
}

impl From<AccountError> for EngineError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientCollateral { required, available } => {
                EngineError::InsufficientCollateral { required, available }
            }
            AccountError::Math(e) => EngineError::Math(e),
        }
    }
}
