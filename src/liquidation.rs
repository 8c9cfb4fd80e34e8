//! Liquidation conditions, payout split and the insurance backstop.
//!
//! A position is liquidatable once its equity (collateral plus unrealized pnl,
//! after funding settlement) drops below maintenance margin. Liquidation always
//! closes the whole position. Whatever equity is left is split between the
//! liquidator, the market's insurance vault and the owner, in that order; a
//! negative equity is bad debt drawn from the vault.

use crate::types::{Bps, MarketId, MathError, Quote};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationParams {
    /// Share of notional paid to whoever triggers the liquidation.
    pub liquidation_fee_bps: Bps,
    /// Share of notional credited to the insurance vault.
    pub insurance_penalty_bps: Bps,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            liquidation_fee_bps: Bps::new(250),
            insurance_penalty_bps: Bps::new(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    Safe { equity: Quote, maintenance: Quote },
    Liquidatable { equity: Quote, shortfall: Quote },
    Bankrupt { bad_debt: Quote },
}

impl LiquidationStatus {
    pub fn is_liquidatable(&self) -> bool {
        !matches!(self, LiquidationStatus::Safe { .. })
    }
}

pub fn evaluate_liquidation(equity: Quote, maintenance: Quote) -> Result<LiquidationStatus, MathError> {
    if equity.is_negative() {
        return Ok(LiquidationStatus::Bankrupt {
            bad_debt: equity.checked_neg()?,
        });
    }
    if equity < maintenance {
        return Ok(LiquidationStatus::Liquidatable {
            equity,
            shortfall: maintenance.checked_sub(equity)?,
        });
    }
    Ok(LiquidationStatus::Safe { equity, maintenance })
}

/// How a liquidated position's equity is distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiquidationPayout {
    pub liquidator_fee: Quote,
    pub insurance_penalty: Quote,
    /// Returned to the owner's free balance.
    pub owner_remainder: Quote,
    /// `|equity|` when equity is negative, else zero.
    pub bad_debt: Quote,
}

pub fn calculate_liquidation_payout(
    equity: Quote,
    notional: Quote,
    params: &LiquidationParams,
) -> Result<LiquidationPayout, MathError> {
    if equity.is_negative() {
        return Ok(LiquidationPayout {
            bad_debt: equity.checked_neg()?,
            ..LiquidationPayout::default()
        });
    }

    let recovered = equity;
    let liquidator_fee = notional.bps(params.liquidation_fee_bps)?.min(recovered);
    let after_fee = recovered.checked_sub(liquidator_fee)?;
    let insurance_penalty = notional.bps(params.insurance_penalty_bps)?.min(after_fee);
    let owner_remainder = after_fee.checked_sub(insurance_penalty)?;

    Ok(LiquidationPayout {
        liquidator_fee,
        insurance_penalty,
        owner_remainder,
        bad_debt: Quote::zero(),
    })
}

// per-market reserve. one vault per market, created alongside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceVault {
    pub market: MarketId,
    pub balance: Quote,
    /// Voluntary deposits, trading fees and liquidation penalties.
    pub total_deposits: Quote,
    pub total_payouts: Quote,
    /// Bad debt the vault could not absorb. Protocol loss.
    pub uncovered_bad_debt: Quote,
}

/// Result of a bad-debt draw against the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InsuranceDraw {
    pub covered: Quote,
    pub uncovered: Quote,
}

impl InsuranceDraw {
    pub fn exhausted(&self) -> bool {
        self.uncovered.is_positive()
    }
}

impl InsuranceVault {
    pub fn new(market: MarketId) -> Self {
        Self {
            market,
            balance: Quote::zero(),
            total_deposits: Quote::zero(),
            total_payouts: Quote::zero(),
            uncovered_bad_debt: Quote::zero(),
        }
    }

    pub fn deposit(&mut self, amount: Quote) -> Result<(), MathError> {
        self.balance = self.balance.checked_add(amount)?;
        self.total_deposits = self.total_deposits.checked_add(amount)?;
        Ok(())
    }

    /// Draws `min(deficit, balance)`. Whatever is left is recorded as uncovered
    /// and the vault is left at zero.
    pub fn cover_bad_debt(&mut self, deficit: Quote) -> Result<InsuranceDraw, MathError> {
        let covered = deficit.min(self.balance);
        let uncovered = deficit.checked_sub(covered)?;

        self.balance = self.balance.checked_sub(covered)?;
        self.total_payouts = self.total_payouts.checked_add(covered)?;
        self.uncovered_bad_debt = self.uncovered_bad_debt.checked_add(uncovered)?;

        Ok(InsuranceDraw { covered, uncovered })
    }
}
