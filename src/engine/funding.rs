//! Funding accumulator updates and lazy per-position settlement.

use super::core::{load_account, load_active_global, load_market, load_open_position, Effects, Engine};
use super::results::{EngineError, FundingResult};
use crate::events::{EventPayload, FundingSettledEvent, FundingUpdatedEvent};
use crate::funding::compute_funding_step;
use crate::market::Market;
use crate::position::Position;
use crate::types::{MarketId, OwnerId, Price, Quote};

impl Engine {
    /// Permissionless crank. Moves the market accumulator by one interval's
    /// clamped premium; no position is touched.
    pub fn update_funding(&self, market_id: MarketId, mark_price: Price) -> Result<FundingResult, EngineError> {
        let result = self.atomically("update_funding", |tx, effects, now| {
            load_active_global(tx)?;
            let mut market = load_market(tx, market_id)?;
            if market.is_halted() {
                return Err(EngineError::MarketHalted(market_id));
            }
            if !market.funding.interval_elapsed(now, &market.funding_params) {
                return Err(EngineError::FundingTooSoon {
                    next_allowed: market
                        .funding
                        .last_funding_ts
                        .plus_secs(market.funding_params.funding_interval_secs),
                });
            }

            let index_price = self.index_price(&market, now)?;
            let step = compute_funding_step(mark_price, index_price, &market.funding_params)?;
            market.funding.apply(&step, now)?;

            let result = FundingResult {
                market_id,
                mark_price,
                index_price,
                premium: step.premium,
                rate: step.rate,
                increment: step.increment,
                cumulative_funding: market.cumulative_funding(),
                timestamp: now,
            };
            effects.emit(EventPayload::FundingUpdated(FundingUpdatedEvent {
                market_id,
                mark_price,
                index_price,
                rate: step.rate,
                cumulative_funding: result.cumulative_funding,
            }));
            tx.put(market);
            Ok(result)
        })?;

        tracing::info!(
            market = %market_id,
            rate = %result.rate,
            cumulative = result.cumulative_funding,
            "funding updated"
        );
        Ok(result)
    }

    /// Settles one open position against the market accumulator. Returns what
    /// the position paid (positive) or received (negative). Calling it twice in
    /// the same funding epoch settles zero the second time.
    pub fn settle_position_funding(&self, owner: OwnerId, market_id: MarketId) -> Result<Quote, EngineError> {
        let payment = self.atomically("settle_position_funding", |tx, effects, _now| {
            load_active_global(tx)?;
            let market = load_market(tx, market_id)?;
            if market.is_halted() {
                return Err(EngineError::MarketHalted(market_id));
            }
            load_account(tx, owner)?;
            let mut position = load_open_position(tx, owner, market_id)?;
            let payment = settle_into(&mut position, &market, effects)?;
            tx.put(position);
            Ok(payment)
        })?;
        tracing::debug!(%owner, market = %market_id, %payment, "position funding settled");
        Ok(payment)
    }
}

/// Applies pending funding to `position` in place and records the event.
pub(super) fn settle_into(position: &mut Position, market: &Market, effects: &mut Effects) -> Result<Quote, EngineError> {
    let payment = position.settle_funding(market.cumulative_funding())?;
    if !payment.is_zero() {
        effects.emit(EventPayload::FundingSettled(FundingSettledEvent {
            market_id: market.id,
            owner: position.owner,
            payment,
            position_size: position.size,
            checkpoint: position.funding_checkpoint,
        }));
    }
    Ok(payment)
}
