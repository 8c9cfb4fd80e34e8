//! User accounts and free collateral.
//!
//! An account holds collateral that is not locked in any position. Margin moves
//! from here into an isolated position on open and comes back on close, so a
//! position's collateral is always sourced from and returned to exactly one
//! account. `open_markets` indexes where the owner currently has exposure; the
//! withdrawal check walks it to aggregate maintenance margin.

use crate::types::{MarketId, MathError, OwnerId, Quote, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub owner: OwnerId,
    /// Free collateral. Never negative.
    pub collateral_balance: Quote,
    pub open_markets: BTreeSet<MarketId>,
    pub total_deposited: Quote,
    pub total_withdrawn: Quote,
    pub created_at: Timestamp,
}

impl UserAccount {
    pub fn new(owner: OwnerId, timestamp: Timestamp) -> Self {
        Self {
            owner,
            collateral_balance: Quote::zero(),
            open_markets: BTreeSet::new(),
            total_deposited: Quote::zero(),
            total_withdrawn: Quote::zero(),
            created_at: timestamp,
        }
    }

    pub fn deposit(&mut self, amount: Quote) -> Result<(), AccountError> {
        self.collateral_balance = self.collateral_balance.checked_add(amount)?;
        self.total_deposited = self.total_deposited.checked_add(amount)?;
        Ok(())
    }

    pub fn withdraw(&mut self, amount: Quote) -> Result<(), AccountError> {
        self.reserve(amount)?;
        self.total_withdrawn = self.total_withdrawn.checked_add(amount)?;
        Ok(())
    }

    /// Moves free collateral out of the account (margin lock, fee).
    pub fn reserve(&mut self, amount: Quote) -> Result<(), AccountError> {
        if amount > self.collateral_balance {
            return Err(AccountError::InsufficientCollateral {
                required: amount,
                available: self.collateral_balance,
            });
        }
        self.collateral_balance = self.collateral_balance.checked_sub(amount)?;
        Ok(())
    }

    /// Returns collateral released by a close or liquidation.
    pub fn release(&mut self, amount: Quote) -> Result<(), AccountError> {
        debug_assert!(!amount.is_negative());
        self.collateral_balance = self.collateral_balance.checked_add(amount)?;
        Ok(())
    }

    pub fn mark_open(&mut self, market: MarketId) {
        self.open_markets.insert(market);
    }

    pub fn mark_closed(&mut self, market: MarketId) {
        self.open_markets.remove(&market);
    }

    pub fn has_open_positions(&self) -> bool {
        !self.open_markets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral { required: Quote, available: Quote },

    #[error(transparent)]
    Math(#[from] MathError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_account() -> UserAccount {
        let mut account = UserAccount::new(OwnerId(1), Timestamp::from_secs(0));
        account.deposit(Quote::from_units(1_000)).unwrap();
        account
    }

    #[test]
    fn deposit_withdraw() {
        let mut account = test_account();
        assert_eq!(account.collateral_balance, Quote::from_units(1_000));

        account.deposit(Quote::from_units(500)).unwrap();
        account.withdraw(Quote::from_units(300)).unwrap();
        assert_eq!(account.collateral_balance, Quote::from_units(1_200));
        assert_eq!(account.total_deposited, Quote::from_units(1_500));
        assert_eq!(account.total_withdrawn, Quote::from_units(300));
    }

    #[test]
    fn withdraw_insufficient_balance() {
        let mut account = test_account();
        let result = account.withdraw(Quote::from_units(2_000));
        assert_eq!(
            result,
            Err(AccountError::InsufficientCollateral {
                required: Quote::from_units(2_000),
                available: Quote::from_units(1_000),
            })
        );
        // nothing moved
        assert_eq!(account.collateral_balance, Quote::from_units(1_000));
    }

    #[test]
    fn reserve_and_release() {
        let mut account = test_account();
        account.reserve(Quote::from_units(100)).unwrap();
        assert_eq!(account.collateral_balance, Quote::from_units(900));

        account.release(Quote::from_units(10)).unwrap();
        assert_eq!(account.collateral_balance, Quote::from_units(910));
        // reserve/release are not deposits or withdrawals
        assert_eq!(account.total_withdrawn, Quote::zero());
    }

    #[test]
    fn open_market_index() {
        let mut account = test_account();
        assert!(!account.has_open_positions());

        account.mark_open(MarketId(2));
        account.mark_open(MarketId(1));
        account.mark_open(MarketId(2));
        assert_eq!(account.open_markets.iter().copied().collect::<Vec<_>>(), vec![MarketId(1), MarketId(2)]);

        account.mark_closed(MarketId(1));
        account.mark_closed(MarketId(2));
        assert!(!account.has_open_positions());
    }
}
