// 9.2 custody.rs: MOCKED. the ledger only tells custody to move collateral;
// actual token movement belongs to whatever implements CollateralTransfer.
// transfers are called inside the commit critical section, so an Err here aborts the
// whole operation and nothing is written.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::{MarketId, MathError, OwnerId, Quote};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("Insufficient wallet funds for {owner}: requested {requested}, available {available}")]
    InsufficientWalletFunds {
        owner: OwnerId,
        requested: Quote,
        available: Quote,
    },

    #[error("Insufficient pool funds in {market}: requested {requested}, available {available}")]
    InsufficientPoolFunds {
        market: MarketId,
        requested: Quote,
        available: Quote,
    },

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Math(#[from] MathError),
}

// Moves collateral between an owner's wallet and a market's custody pool.
pub trait CollateralTransfer: Send + Sync {
    // wallet -> pool
    fn transfer_in(&self, owner: OwnerId, market: MarketId, amount: Quote) -> Result<(), CustodyError>;

    // pool -> wallet
    fn transfer_out(&self, owner: OwnerId, market: MarketId, amount: Quote) -> Result<(), CustodyError>;
}

// In-memory custody for tests and the simulator
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    wallets: DashMap<OwnerId, Quote>,
    pools: DashMap<MarketId, Quote>,
    fail_next: AtomicBool,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund_wallet(&self, owner: OwnerId, amount: Quote) -> Result<(), CustodyError> {
        let mut balance = self.wallets.entry(owner).or_insert_with(Quote::zero);
        *balance = balance.checked_add(amount)?;
        Ok(())
    }

    pub fn wallet_balance(&self, owner: OwnerId) -> Quote {
        self.wallets.get(&owner).map(|b| *b).unwrap_or_default()
    }

    pub fn pool_balance(&self, market: MarketId) -> Quote {
        self.pools.get(&market).map(|b| *b).unwrap_or_default()
    }

    // Makes the next transfer fail once. Used to exercise rollback.
    pub fn fail_next_transfer(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_injected_failure(&self) -> Result<(), CustodyError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CustodyError::Rejected("injected failure".to_string()));
        }
        Ok(())
    }
}

impl CollateralTransfer for InMemoryCustody {
    fn transfer_in(&self, owner: OwnerId, market: MarketId, amount: Quote) -> Result<(), CustodyError> {
        self.check_injected_failure()?;

        let mut wallet = self.wallets.entry(owner).or_insert_with(Quote::zero);
        if *wallet < amount {
            return Err(CustodyError::InsufficientWalletFunds {
                owner,
                requested: amount,
                available: *wallet,
            });
        }
        let debited = wallet.checked_sub(amount)?;
        let mut pool = self.pools.entry(market).or_insert_with(Quote::zero);
        *pool = pool.checked_add(amount)?;
        *wallet = debited;
        Ok(())
    }

    fn transfer_out(&self, owner: OwnerId, market: MarketId, amount: Quote) -> Result<(), CustodyError> {
        self.check_injected_failure()?;

        // wallet before pool in both directions
        let mut wallet = self.wallets.entry(owner).or_insert_with(Quote::zero);
        let mut pool = self.pools.entry(market).or_insert_with(Quote::zero);
        if *pool < amount {
            return Err(CustodyError::InsufficientPoolFunds {
                market,
                requested: amount,
                available: *pool,
            });
        }
        let credited = wallet.checked_add(amount)?;
        *pool = pool.checked_sub(amount)?;
        *wallet = credited;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_flow() {
        let custody = InMemoryCustody::new();
        custody.fund_wallet(OwnerId(1), Quote::from_units(1_000)).unwrap();

        custody.transfer_in(OwnerId(1), MarketId(1), Quote::from_units(400)).unwrap();
        assert_eq!(custody.wallet_balance(OwnerId(1)), Quote::from_units(600));
        assert_eq!(custody.pool_balance(MarketId(1)), Quote::from_units(400));
    }

    #[test]
    fn test_withdrawal_flow() {
        let custody = InMemoryCustody::new();
        custody.fund_wallet(OwnerId(1), Quote::from_units(1_000)).unwrap();
        custody.transfer_in(OwnerId(1), MarketId(1), Quote::from_units(1_000)).unwrap();

        // a different owner can be paid from the same pool (liquidator fee)
        custody.transfer_out(OwnerId(2), MarketId(1), Quote::from_units(25)).unwrap();
        assert_eq!(custody.wallet_balance(OwnerId(2)), Quote::from_units(25));
        assert_eq!(custody.pool_balance(MarketId(1)), Quote::from_units(975));
    }

    #[test]
    fn test_insufficient_wallet() {
        let custody = InMemoryCustody::new();
        let result = custody.transfer_in(OwnerId(1), MarketId(1), Quote::from_units(1));
        assert!(matches!(result, Err(CustodyError::InsufficientWalletFunds { .. })));
        assert!(custody.pool_balance(MarketId(1)).is_zero());
    }

    #[test]
    fn test_insufficient_pool() {
        let custody = InMemoryCustody::new();
        let result = custody.transfer_out(OwnerId(1), MarketId(1), Quote::from_units(1));
        assert!(matches!(result, Err(CustodyError::InsufficientPoolFunds { .. })));
        assert!(custody.wallet_balance(OwnerId(1)).is_zero());
    }

    #[test]
    fn test_wallet_overflow_rejected() {
        let custody = InMemoryCustody::new();
        custody.fund_wallet(OwnerId(1), Quote::new(i128::MAX)).unwrap();

        let result = custody.fund_wallet(OwnerId(1), Quote::new(1));
        assert_eq!(result, Err(CustodyError::Math(MathError::Overflow)));
        assert_eq!(custody.wallet_balance(OwnerId(1)), Quote::new(i128::MAX));
    }

    #[test]
    fn test_overflowing_payout_leaves_pool_untouched() {
        let custody = InMemoryCustody::new();
        custody.fund_wallet(OwnerId(1), Quote::from_units(10)).unwrap();
        custody.transfer_in(OwnerId(1), MarketId(1), Quote::from_units(10)).unwrap();
        custody.fund_wallet(OwnerId(2), Quote::new(i128::MAX)).unwrap();

        let result = custody.transfer_out(OwnerId(2), MarketId(1), Quote::from_units(5));
        assert!(matches!(result, Err(CustodyError::Math(_))));
        assert_eq!(custody.pool_balance(MarketId(1)), Quote::from_units(10));
        assert_eq!(custody.wallet_balance(OwnerId(2)), Quote::new(i128::MAX));
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let custody = InMemoryCustody::new();
        custody.fund_wallet(OwnerId(1), Quote::from_units(10)).unwrap();
        custody.fail_next_transfer();

        let first = custody.transfer_in(OwnerId(1), MarketId(1), Quote::from_units(5));
        assert!(matches!(first, Err(CustodyError::Rejected(_))));
        assert_eq!(custody.wallet_balance(OwnerId(1)), Quote::from_units(10));

        custody.transfer_in(OwnerId(1), MarketId(1), Quote::from_units(5)).unwrap();
        assert_eq!(custody.wallet_balance(OwnerId(1)), Quote::from_units(5));
    }
}
