//! Margin calculation for initial and maintenance requirements.
//!
//! Initial margin is what an open locks: notional divided by the requested
//! leverage, rounded up so the ledger never under-collateralizes. Maintenance
//! margin is the floor below which a position can be liquidated, a fixed
//! fraction (bps) of current notional.
//!
//! Account-level health aggregates every open position of one owner. It backs
//! the withdrawal check: free balance can only leave while the remaining equity
//! still covers the summed maintenance margin.

use crate::types::{Bps, Leverage, MathError, Price, Quote, SignedSize, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};

/// `|size| * price`. Base sizes are whole units, so the product is already a
/// PRICE_SCALE quote amount.
pub fn notional_value(size: SignedSize, price: Price) -> Result<Quote, MathError> {
    let abs_size = size.abs() as i128;
    abs_size
        .checked_mul(price.value() as i128)
        .map(Quote::new)
        .ok_or(MathError::Overflow)
}

/// `ceil(notional / leverage)`.
pub fn initial_margin(notional: Quote, leverage: Leverage) -> Result<Quote, MathError> {
    ceil_div(notional.value(), leverage.value() as i128).map(Quote::new)
}

/// `notional * maintenance_bps / 10_000`, truncating.
pub fn maintenance_margin(notional: Quote, maintenance_bps: Bps) -> Result<Quote, MathError> {
    notional.bps(maintenance_bps)
}

pub fn ceil_div(numerator: i128, denominator: i128) -> Result<i128, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder != 0 && ((remainder > 0) == (denominator > 0)) {
        quotient.checked_add(1).ok_or(MathError::Overflow)
    } else {
        Ok(quotient)
    }
}

/// Whether maintenance can ever sit below initial margin for a market: at max
/// leverage the initial margin fraction is `1 / max_leverage`.
pub fn maintenance_below_initial(maintenance_bps: Bps, max_leverage: Leverage) -> bool {
    (maintenance_bps.value() as i128) * (max_leverage.value() as i128) < BPS_DENOMINATOR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginStatus {
    Healthy,
    Liquidatable,
}

pub fn evaluate_margin_status(equity: Quote, maintenance: Quote) -> MarginStatus {
    if equity >= maintenance {
        MarginStatus::Healthy
    } else {
        MarginStatus::Liquidatable
    }
}

/// Aggregate view over one owner's free balance and open positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountHealth {
    /// Free collateral balance plus every position's collateral and unrealized PnL.
    pub equity: Quote,
    /// Summed maintenance margin of open positions.
    pub maintenance: Quote,
}

impl AccountHealth {
    pub fn new(free_balance: Quote) -> Self {
        Self {
            equity: free_balance,
            maintenance: Quote::zero(),
        }
    }

    pub fn add_position(&mut self, position_equity: Quote, position_maintenance: Quote) -> Result<(), MathError> {
        self.equity = self.equity.checked_add(position_equity)?;
        self.maintenance = self.maintenance.checked_add(position_maintenance)?;
        Ok(())
    }

    /// Equity left after removing `amount`, or None when it would breach maintenance.
    pub fn equity_after_withdrawal(&self, amount: Quote) -> Result<Option<Quote>, MathError> {
        let remaining = self.equity.checked_sub(amount)?;
        if remaining < self.maintenance {
            Ok(None)
        } else {
            Ok(Some(remaining))
        }
    }
}
