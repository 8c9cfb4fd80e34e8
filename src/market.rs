//! Market and global configuration records.
//!
//! A market is one perpetual on a single oracle feed with its own risk
//! parameters, funding accumulator, open interest and insurance vault. The
//! global config is a singleton holding the admin, the trading fee and the
//! pause switch.

use crate::config::MarketParams;
use crate::funding::{FundingParams, FundingState};
use crate::liquidation::LiquidationParams;
use crate::types::{Bps, FeedId, Leverage, MarketId, MathError, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub admin: OwnerId,
    /// Charged on opened notional, routed to the market's insurance vault.
    pub trading_fee_bps: Bps,
    /// Blocks user operations while set. Admin calls still go through.
    pub paused: bool,
    pub created_at: Timestamp,
}

impl GlobalConfig {
    pub fn new(admin: OwnerId, trading_fee_bps: Bps, timestamp: Timestamp) -> Self {
        Self {
            admin,
            trading_fee_bps,
            paused: false,
            created_at: timestamp,
        }
    }

    pub fn is_admin(&self, caller: OwnerId) -> bool {
        self.admin == caller
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    /// e.g. "SOL-PERP"
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub oracle_feed: FeedId,
    pub max_leverage: Leverage,
    pub maintenance_margin_bps: Bps,
    pub funding_params: FundingParams,
    pub funding: FundingState,
    pub liquidation_params: LiquidationParams,
    /// Sum of |size| over open positions, in base units.
    pub open_interest: u64,
    /// Custody pool holding this market's collateral.
    pub collateral_vault: String,
    /// Set when the insurance vault could not absorb bad debt.
    pub emergency: bool,
    pub created_at: Timestamp,
}

impl Market {
    pub fn from_params(params: &MarketParams, timestamp: Timestamp) -> Self {
        Self {
            id: params.id,
            symbol: params.symbol.clone(),
            base_asset: params.base_asset.clone(),
            quote_asset: params.quote_asset.clone(),
            oracle_feed: params.oracle_feed,
            max_leverage: params.max_leverage,
            maintenance_margin_bps: params.maintenance_margin_bps,
            funding_params: params.funding.clone(),
            funding: FundingState::new(timestamp),
            liquidation_params: params.liquidation.clone(),
            open_interest: 0,
            collateral_vault: params.collateral_vault.clone(),
            emergency: false,
            created_at: timestamp,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.emergency
    }

    pub fn allows_leverage(&self, leverage: Leverage) -> bool {
        leverage <= self.max_leverage
    }

    pub fn cumulative_funding(&self) -> i128 {
        self.funding.cumulative_funding
    }

    pub fn add_open_interest(&mut self, size: u64) -> Result<(), MathError> {
        self.open_interest = self
            .open_interest
            .checked_add(size)
            .ok_or(MathError::Overflow)?;
        Ok(())
    }

    pub fn remove_open_interest(&mut self, size: u64) -> Result<(), MathError> {
        // open interest dropping below zero means the ledger is corrupt
        self.open_interest = self
            .open_interest
            .checked_sub(size)
            .ok_or(MathError::Overflow)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_from_preset() {
        let market = Market::from_params(&MarketParams::sol_perp(), Timestamp::from_secs(100));

        assert_eq!(market.symbol, "SOL-PERP");
        assert!(!market.is_halted());
        assert_eq!(market.open_interest, 0);
        assert_eq!(market.cumulative_funding(), 0);
        assert_eq!(market.funding.last_funding_ts, Timestamp::from_secs(100));
        assert_eq!(market.liquidation_params, LiquidationParams::default());
    }

    #[test]
    fn leverage_bounds() {
        let market = Market::from_params(&MarketParams::sol_perp(), Timestamp::from_secs(0));
        assert!(market.allows_leverage(Leverage::new(10).unwrap()));
        assert!(!market.allows_leverage(Leverage::new(11).unwrap()));
    }

    #[test]
    fn open_interest_tracking() {
        let mut market = Market::from_params(&MarketParams::sol_perp(), Timestamp::from_secs(0));

        market.add_open_interest(10).unwrap();
        market.add_open_interest(5).unwrap();
        market.remove_open_interest(10).unwrap();
        assert_eq!(market.open_interest, 5);

        assert_eq!(market.remove_open_interest(6), Err(MathError::Overflow));
        assert_eq!(market.open_interest, 5);
    }

    #[test]
    fn admin_check() {
        let global = GlobalConfig::new(OwnerId(7), Bps::new(10), Timestamp::from_secs(0));
        assert!(global.is_admin(OwnerId(7)));
        assert!(!global.is_admin(OwnerId(8)));
        assert!(!global.paused);
    }
}
