// 4.0: isolated position tracking, one record per (owner, market). pnl = size * (mark - entry).
// 4.1 has the open/increase/close transitions at the bottom.
// closing or liquidating zeroes the record in place; a later open reuses the slot.

use crate::funding::calculate_funding_owed;
use crate::margin::{maintenance_margin, notional_value};
use crate::types::{Bps, Leverage, MarketId, MathError, OwnerId, Price, Quote, Side, SignedSize, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionStatus {
    #[default]
    Closed,
    Open,
    Liquidated,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Closed => write!(f, "closed"),
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::Liquidated => write!(f, "liquidated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub owner: OwnerId,
    pub market_id: MarketId,
    pub size: SignedSize,
    /// None while the slot is empty.
    pub entry_price: Option<Price>,
    /// Margin locked in the position. Funding can push it below zero.
    pub collateral_allocated: Quote,
    pub funding_checkpoint: i128,
    pub leverage: Option<Leverage>,
    /// Lifetime realized pnl across every close on this slot.
    pub realized_pnl: Quote,
    pub status: PositionStatus,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn empty(owner: OwnerId, market_id: MarketId, timestamp: Timestamp) -> Self {
        Self {
            owner,
            market_id,
            size: SignedSize::zero(),
            entry_price: None,
            collateral_allocated: Quote::zero(),
            funding_checkpoint: 0,
            leverage: None,
            realized_pnl: Quote::zero(),
            status: PositionStatus::Closed,
            opened_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open && !self.size.is_zero()
    }

    pub fn side(&self) -> Option<Side> {
        self.size.side()
    }

    // 4.1: paper gains/losses at the given price
    pub fn unrealized_pnl(&self, mark_price: Price) -> Result<Quote, MathError> {
        match self.entry_price {
            Some(entry) => calculate_unrealized_pnl(self.size, entry, mark_price),
            None => Ok(Quote::zero()),
        }
    }

    // 4.2: collateral + pnl. funding is already folded into collateral after settlement
    pub fn equity(&self, mark_price: Price) -> Result<Quote, MathError> {
        self.collateral_allocated
            .checked_add(self.unrealized_pnl(mark_price)?)
    }

    pub fn notional(&self, mark_price: Price) -> Result<Quote, MathError> {
        notional_value(self.size, mark_price)
    }

    pub fn maintenance_margin(&self, mark_price: Price, maintenance_bps: Bps) -> Result<Quote, MathError> {
        maintenance_margin(self.notional(mark_price)?, maintenance_bps)
    }

    /// Funding the position would pay if settled now. Positive = pays.
    pub fn pending_funding(&self, cumulative_funding: i128) -> Result<Quote, MathError> {
        calculate_funding_owed(self.size, self.funding_checkpoint, cumulative_funding)
    }

    /// Brings the position up to the market accumulator. Returns what was paid
    /// (positive) or received (negative). A second call at the same accumulator
    /// value is a no-op.
    pub fn settle_funding(&mut self, cumulative_funding: i128) -> Result<Quote, MathError> {
        let owed = self.pending_funding(cumulative_funding)?;
        self.collateral_allocated = self.collateral_allocated.checked_sub(owed)?;
        self.funding_checkpoint = cumulative_funding;
        Ok(owed)
    }

    /// Fills an empty slot.
    pub fn open(
        &mut self,
        size: SignedSize,
        entry_price: Price,
        margin: Quote,
        leverage: Leverage,
        cumulative_funding: i128,
        timestamp: Timestamp,
    ) {
        debug_assert!(!self.is_open(), "open on a live position");
        self.size = size;
        self.entry_price = Some(entry_price);
        self.collateral_allocated = margin;
        self.funding_checkpoint = cumulative_funding;
        self.leverage = Some(leverage);
        self.status = PositionStatus::Open;
        self.opened_at = timestamp;
        self.updated_at = timestamp;
    }

    // 4.3: adds same-side size. caller settles funding first so the checkpoint is current
    pub fn increase(
        &mut self,
        delta: SignedSize,
        fill_price: Price,
        margin: Quote,
        leverage: Leverage,
        timestamp: Timestamp,
    ) -> Result<(), MathError> {
        debug_assert!(
            self.size.side() == delta.side(),
            "increase must be same direction as existing position"
        );

        let new_size = self.size.checked_add(delta.value())?;
        let new_entry = match self.entry_price {
            Some(entry) => weighted_entry_price(self.size, entry, delta, fill_price)?,
            None => fill_price,
        };

        self.size = new_size;
        self.entry_price = Some(new_entry);
        self.collateral_allocated = self.collateral_allocated.checked_add(margin)?;
        self.leverage = Some(leverage);
        self.updated_at = timestamp;
        Ok(())
    }

    /// Zeroes the slot with the given terminal status. Lifetime realized pnl is kept.
    pub fn close_out(&mut self, status: PositionStatus, realized: Quote, timestamp: Timestamp) -> Result<(), MathError> {
        debug_assert!(status != PositionStatus::Open);
        self.realized_pnl = self.realized_pnl.checked_add(realized)?;
        self.size = SignedSize::zero();
        self.entry_price = None;
        self.collateral_allocated = Quote::zero();
        self.leverage = None;
        self.status = status;
        self.updated_at = timestamp;
        Ok(())
    }
}

// 4.4: the pnl formula. size * (mark - entry)
pub fn calculate_unrealized_pnl(
    size: SignedSize,
    entry_price: Price,
    mark_price: Price,
) -> Result<Quote, MathError> {
    let move_per_unit = mark_price.value() as i128 - entry_price.value() as i128;
    (size.value() as i128)
        .checked_mul(move_per_unit)
        .map(Quote::new)
        .ok_or(MathError::Overflow)
}

/// `(|old| * old_entry + |add| * fill) / (|old| + |add|)`, truncating.
pub fn weighted_entry_price(
    old_size: SignedSize,
    old_entry: Price,
    added: SignedSize,
    fill_price: Price,
) -> Result<Price, MathError> {
    let old_abs = old_size.abs() as i128;
    let add_abs = added.abs() as i128;
    let total = old_abs.checked_add(add_abs).ok_or(MathError::Overflow)?;
    if total == 0 {
        return Err(MathError::DivisionByZero);
    }
    let weighted = old_abs
        .checked_mul(old_entry.value() as i128)
        .and_then(|a| {
            add_abs
                .checked_mul(fill_price.value() as i128)
                .and_then(|b| a.checked_add(b))
        })
        .ok_or(MathError::Overflow)?;
    // a weighted mean of two positive i64 prices stays a positive i64
    let entry = i64::try_from(weighted / total).map_err(|_| MathError::Overflow)?;
    Price::new(entry).ok_or(MathError::Overflow)
}
