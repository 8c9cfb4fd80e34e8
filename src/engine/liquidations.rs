//! Liquidation execution and bad-debt handling.

use super::core::{load_account, load_active_global, load_market, load_open_position, load_vault, Engine, Transfer};
use super::funding::settle_into;
use super::results::{EngineError, LiquidationReceipt};
use crate::events::{BadDebtEvent, EventPayload, LiquidationEvent, MarketHaltedEvent};
use crate::liquidation::{calculate_liquidation_payout, evaluate_liquidation, InsuranceDraw, LiquidationStatus};
use crate::position::PositionStatus;
use crate::types::{MarketId, OwnerId};

impl Engine {
    /// Closes an under-margined position in full at the current index price.
    ///
    /// Recovered equity is split liquidator fee first, then insurance penalty,
    /// then back to the owner. Negative equity is drawn from the market's
    /// insurance vault; if the vault cannot cover all of it the market is halted.
    pub fn liquidate_position(
        &self,
        liquidator: OwnerId,
        owner: OwnerId,
        market_id: MarketId,
    ) -> Result<LiquidationReceipt, EngineError> {
        if liquidator == owner {
            return Err(EngineError::CannotLiquidateOwnPosition);
        }

        let receipt = self.atomically("liquidate_position", |tx, effects, now| {
            load_active_global(tx)?;
            let mut market = load_market(tx, market_id)?;
            let mut position = load_open_position(tx, owner, market_id)?;
            let mut account = load_account(tx, owner)?;
            let price = self.index_price(&market, now)?;

            settle_into(&mut position, &market, effects)?;
            let equity = position.equity(price)?;
            let maintenance_margin = position.maintenance_margin(price, market.maintenance_margin_bps)?;

            if let LiquidationStatus::Safe { equity, maintenance } = evaluate_liquidation(equity, maintenance_margin)? {
                return Err(EngineError::NotLiquidatable { equity, maintenance });
            }

            let notional = position.notional(price)?;
            let payout = calculate_liquidation_payout(equity, notional, &market.liquidation_params)?;
            let realized_pnl = position.unrealized_pnl(price)?;
            let liquidated_size = position.size;

            if payout.liquidator_fee.is_positive() {
                effects.transfer(Transfer::Out {
                    owner: liquidator,
                    market: market_id,
                    amount: payout.liquidator_fee,
                });
            }
            account.release(payout.owner_remainder)?;
            account.mark_closed(market_id);

            let mut vault = load_vault(tx, market_id)?;
            if payout.insurance_penalty.is_positive() {
                vault.deposit(payout.insurance_penalty)?;
            }

            let mut insurance_draw = InsuranceDraw::default();
            let mut market_halted = false;
            if payout.bad_debt.is_positive() {
                insurance_draw = vault.cover_bad_debt(payout.bad_debt)?;
                effects.emit(EventPayload::BadDebt(BadDebtEvent {
                    market_id,
                    owner,
                    debt_amount: payout.bad_debt,
                    covered_by_insurance: insurance_draw.covered,
                    uncovered: insurance_draw.uncovered,
                }));
                if insurance_draw.exhausted() {
                    market.emergency = true;
                    market_halted = true;
                    effects.emit(EventPayload::MarketHalted(MarketHaltedEvent {
                        market_id,
                        uncovered_bad_debt: vault.uncovered_bad_debt,
                    }));
                }
            }

            market.remove_open_interest(liquidated_size.abs())?;
            position.close_out(PositionStatus::Liquidated, realized_pnl, now)?;

            effects.emit(EventPayload::Liquidation(LiquidationEvent {
                market_id,
                owner,
                liquidator,
                liquidated_size,
                liquidation_price: price,
                equity,
                liquidator_fee: payout.liquidator_fee,
                insurance_penalty: payout.insurance_penalty,
                owner_remainder: payout.owner_remainder,
            }));

            tx.put(position);
            tx.put(account);
            tx.put(vault);
            tx.put(market);
            Ok(LiquidationReceipt {
                market_id,
                owner,
                liquidator,
                liquidated_size,
                liquidation_price: price,
                equity,
                maintenance_margin,
                payout,
                insurance_draw,
                market_halted,
            })
        })?;

        tracing::info!(
            %owner,
            %liquidator,
            market = %market_id,
            price = %receipt.liquidation_price,
            equity = %receipt.equity,
            fee = %receipt.payout.liquidator_fee,
            "position liquidated"
        );
        if receipt.payout.bad_debt.is_positive() {
            tracing::warn!(
                market = %market_id,
                bad_debt = %receipt.payout.bad_debt,
                covered = %receipt.insurance_draw.covered,
                uncovered = %receipt.insurance_draw.uncovered,
                "bad debt absorbed by insurance"
            );
        }
        if receipt.market_halted {
            tracing::warn!(market = %market_id, "insurance exhausted, market halted");
        }
        Ok(receipt)
    }

    /// Whether `owner`'s position would currently pass the liquidation check.
    pub fn is_liquidatable(&self, owner: OwnerId, market_id: MarketId) -> Result<bool, EngineError> {
        let health = self.position_health(owner, market_id)?;
        Ok(evaluate_liquidation(health.equity, health.maintenance_margin)?.is_liquidatable())
    }
}
