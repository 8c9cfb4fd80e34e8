//! Opening, closing and collateral withdrawal.

use super::core::{
    load_account, load_active_global, load_market, load_open_position, load_slot, load_vault, Effects,
    Engine, Transfer,
};
use super::funding::settle_into;
use super::results::{CloseReceipt, EngineError, PositionHealth, PositionReceipt};
use crate::account::UserAccount;
use crate::events::{EventPayload, PositionClosedEvent, PositionOpenedEvent, WithdrawalEvent};
use crate::margin::{evaluate_margin_status, initial_margin, notional_value, AccountHealth};
use crate::market::Market;
use crate::position::{Position, PositionStatus};
use crate::store::Transaction;
use crate::types::{Leverage, MarketId, OwnerId, Price, Quote, Side, SignedSize, Timestamp};

impl Engine {
    /// Opens a new position or adds to an existing one on the same side, at the
    /// current index price. Margin is `ceil(notional / leverage)`, rounded up
    /// rather than truncated, so it can exceed `notional / leverage` by one raw
    /// unit. The trading fee goes to the market's insurance vault.
    pub fn open_position(
        &self,
        owner: OwnerId,
        market_id: MarketId,
        side: Side,
        size: u64,
        leverage: u16,
    ) -> Result<PositionReceipt, EngineError> {
        if size == 0 {
            return Err(EngineError::InvalidAmount);
        }

        let receipt = self.atomically("open_position", |tx, effects, now| {
            let global = load_active_global(tx)?;
            let mut market = load_market(tx, market_id)?;
            if market.is_halted() {
                return Err(EngineError::MarketHalted(market_id));
            }
            let leverage = Leverage::new(leverage)
                .filter(|l| market.allows_leverage(*l))
                .ok_or(EngineError::InvalidLeverage {
                    requested: leverage,
                    max: market.max_leverage,
                })?;

            let mut account = load_account(tx, owner)?;
            let fill_price = self.index_price(&market, now)?;
            let mut position = load_slot(tx, owner, market_id, now);

            let mut funding_settled = Quote::zero();
            if position.is_open() {
                if let Some(existing) = position.side() {
                    if existing != side {
                        return Err(EngineError::PositionSideConflict {
                            existing,
                            requested: side,
                        });
                    }
                }
                funding_settled = settle_into(&mut position, &market, effects)?;
            }

            let delta = SignedSize::from_side(side, size)?;
            let notional = notional_value(delta, fill_price)?;
            let margin = initial_margin(notional, leverage)?;
            let fee = notional.bps(global.trading_fee_bps)?;
            account.reserve(margin.checked_add(fee)?)?;

            if position.is_open() {
                position.increase(delta, fill_price, margin, leverage, now)?;
            } else {
                position.open(delta, fill_price, margin, leverage, market.cumulative_funding(), now);
            }
            market.add_open_interest(size)?;
            account.mark_open(market_id);

            if fee.is_positive() {
                let mut vault = load_vault(tx, market_id)?;
                vault.deposit(fee)?;
                tx.put(vault);
            }

            let receipt = PositionReceipt {
                market_id,
                owner,
                side,
                added_size: size,
                fill_price,
                margin,
                fee,
                leverage,
                size: position.size,
                entry_price: position.entry_price.unwrap_or(fill_price),
                funding_settled,
            };
            effects.emit(EventPayload::PositionOpened(PositionOpenedEvent {
                market_id,
                owner,
                side,
                added_size: size,
                fill_price,
                margin,
                fee,
                leverage,
                new_size: receipt.size,
                entry_price: receipt.entry_price,
            }));

            tx.put(position);
            tx.put(account);
            tx.put(market);
            Ok(receipt)
        })?;

        tracing::info!(
            %owner,
            market = %market_id,
            %side,
            size,
            price = %receipt.fill_price,
            margin = %receipt.margin,
            leverage = %receipt.leverage,
            "position opened"
        );
        Ok(receipt)
    }

    /// Closes the whole position at the current index price and returns its
    /// equity to the owner's free balance. A position under water must be
    /// liquidated instead.
    pub fn close_position(&self, owner: OwnerId, market_id: MarketId) -> Result<CloseReceipt, EngineError> {
        let receipt = self.atomically("close_position", |tx, effects, now| {
            load_active_global(tx)?;
            let mut market = load_market(tx, market_id)?;
            let mut position = load_open_position(tx, owner, market_id)?;
            let mut account = load_account(tx, owner)?;
            let exit_price = self.index_price(&market, now)?;

            let funding_settled = settle_into(&mut position, &market, effects)?;
            let realized_pnl = position.unrealized_pnl(exit_price)?;
            let equity = position.equity(exit_price)?;
            if equity.is_negative() {
                return Err(EngineError::NegativeEquity { equity });
            }

            let closed_size = position.size;
            account.release(equity)?;
            account.mark_closed(market_id);
            market.remove_open_interest(closed_size.abs())?;
            position.close_out(PositionStatus::Closed, realized_pnl, now)?;

            effects.emit(EventPayload::PositionClosed(PositionClosedEvent {
                market_id,
                owner,
                size: closed_size,
                exit_price,
                realized_pnl,
                collateral_returned: equity,
            }));

            tx.put(position);
            tx.put(account);
            tx.put(market);
            Ok(CloseReceipt {
                market_id,
                owner,
                closed_size,
                exit_price,
                realized_pnl,
                collateral_returned: equity,
                funding_settled,
            })
        })?;

        tracing::info!(
            %owner,
            market = %market_id,
            pnl = %receipt.realized_pnl,
            returned = %receipt.collateral_returned,
            "position closed"
        );
        Ok(receipt)
    }

    /// Pays free collateral out of the market's custody pool. Every open
    /// position of the owner is settled first, and the withdrawal must leave
    /// total equity at or above the summed maintenance margin. An owner with
    /// no open positions is only checked against the free balance. Rejected
    /// with `MarketHalted` on an emergency market.
    pub fn withdraw_collateral(&self, owner: OwnerId, market_id: MarketId, amount: Quote) -> Result<Quote, EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount);
        }

        let new_balance = self.atomically("withdraw_collateral", |tx, effects, now| {
            load_active_global(tx)?;
            let market = load_market(tx, market_id)?;
            if market.is_halted() {
                return Err(EngineError::MarketHalted(market_id));
            }
            let mut account = load_account(tx, owner)?;

            // margin first while positions are open, otherwise only the free balance matters
            if account.has_open_positions() {
                let health = self.settle_and_measure(tx, &account, now, Some(&mut *effects))?;
                if health.equity_after_withdrawal(amount)?.is_none() {
                    return Err(EngineError::MaintenanceMarginViolation {
                        equity_after: health.equity.checked_sub(amount)?,
                        maintenance: health.maintenance,
                    });
                }
            }
            account.withdraw(amount)?;

            let new_balance = account.collateral_balance;
            tx.put(account);

            effects.transfer(Transfer::Out {
                owner,
                market: market_id,
                amount,
            });
            effects.emit(EventPayload::Withdrawal(WithdrawalEvent {
                owner,
                market_id,
                amount,
                new_balance,
            }));
            Ok(new_balance)
        })?;

        tracing::info!(%owner, market = %market_id, %amount, %new_balance, "collateral withdrawn");
        Ok(new_balance)
    }

    /// Read-only health of one position at the current index price. Pending
    /// funding is included without being settled.
    pub fn position_health(&self, owner: OwnerId, market_id: MarketId) -> Result<PositionHealth, EngineError> {
        let mut tx = self.store.begin();
        let now = self.clock.now();
        let market = load_market(&mut tx, market_id)?;
        let position = load_open_position(&mut tx, owner, market_id)?;
        let index_price = self.index_price(&market, now)?;

        let pending_funding = position.pending_funding(market.cumulative_funding())?;
        let unrealized_pnl = position.unrealized_pnl(index_price)?;
        let (equity, maintenance_margin) = equity_and_maintenance(&position, &market, index_price)?;

        Ok(PositionHealth {
            market_id,
            owner,
            size: position.size,
            entry_price: position.entry_price,
            index_price,
            collateral: position.collateral_allocated,
            pending_funding,
            unrealized_pnl,
            equity,
            maintenance_margin,
            status: evaluate_margin_status(equity, maintenance_margin),
        })
    }

    /// Read-only aggregate over the owner's free balance and open positions.
    pub fn account_health(&self, owner: OwnerId) -> Result<AccountHealth, EngineError> {
        let mut tx = self.store.begin();
        let now = self.clock.now();
        let account = load_account(&mut tx, owner)?;
        self.settle_and_measure(&mut tx, &account, now, None)
    }

    // walks open_markets; settles each position when effects are given
    fn settle_and_measure(
        &self,
        tx: &mut Transaction<'_>,
        account: &UserAccount,
        now: Timestamp,
        mut effects: Option<&mut Effects>,
    ) -> Result<AccountHealth, EngineError> {
        let mut health = AccountHealth::new(account.collateral_balance);
        for &market_id in &account.open_markets {
            let market = load_market(tx, market_id)?;
            let mut position = load_open_position(tx, account.owner, market_id)?;
            if let Some(effects) = effects.as_deref_mut() {
                settle_into(&mut position, &market, effects)?;
                tx.put(position.clone());
            }
            let index_price = self.index_price(&market, now)?;
            let (equity, maintenance) = equity_and_maintenance(&position, &market, index_price)?;
            health.add_position(equity, maintenance)?;
        }
        Ok(health)
    }
}

/// Equity net of unsettled funding, and maintenance margin, at `price`.
fn equity_and_maintenance(position: &Position, market: &Market, price: Price) -> Result<(Quote, Quote), EngineError> {
    let pending = position.pending_funding(market.cumulative_funding())?;
    let equity = position.equity(price)?.checked_sub(pending)?;
    let maintenance = position.maintenance_margin(price, market.maintenance_margin_bps)?;
    Ok((equity, maintenance))
}
