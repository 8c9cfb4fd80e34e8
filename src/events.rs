// 11.0: every committed state change produces an event. used for audit trails and
// notifying external systems. the EventPayload enum lists all event types.
// events are appended inside the commit critical section, so a rolled back operation
// never leaves an event behind and the log order matches commit order.

use crate::types::{Bps, FeedId, FundingRate, Leverage, MarketId, OwnerId, Price, Quote, Side, SignedSize, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Ledger commit that produced this event.
    pub commit_seq: u64,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    // Admin events
    GlobalInitialized(GlobalInitializedEvent),
    TradingFeeUpdated(TradingFeeUpdatedEvent),
    PauseToggled(PauseToggledEvent),
    MarketCreated(MarketCreatedEvent),

    // Account events
    AccountCreated(AccountCreatedEvent),
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
    InsuranceDeposit(InsuranceDepositEvent),

    // Funding events
    FundingUpdated(FundingUpdatedEvent),
    FundingSettled(FundingSettledEvent),

    // Position events
    PositionOpened(PositionOpenedEvent),
    PositionClosed(PositionClosedEvent),

    // Risk events
    Liquidation(LiquidationEvent),
    BadDebt(BadDebtEvent),
    MarketHalted(MarketHaltedEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalInitializedEvent {
    pub admin: OwnerId,
    pub trading_fee_bps: Bps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingFeeUpdatedEvent {
    pub old_fee_bps: Bps,
    pub new_fee_bps: Bps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseToggledEvent {
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCreatedEvent {
    pub market_id: MarketId,
    pub symbol: String,
    pub oracle_feed: FeedId,
    pub max_leverage: Leverage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreatedEvent {
    pub owner: OwnerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub owner: OwnerId,
    pub market_id: MarketId,
    pub amount: Quote,
    pub new_balance: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub owner: OwnerId,
    pub market_id: MarketId,
    pub amount: Quote,
    pub new_balance: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceDepositEvent {
    pub depositor: OwnerId,
    pub market_id: MarketId,
    pub amount: Quote,
    pub vault_balance: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingUpdatedEvent {
    pub market_id: MarketId,
    pub mark_price: Price,
    pub index_price: Price,
    pub rate: FundingRate,
    pub cumulative_funding: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingSettledEvent {
    pub market_id: MarketId,
    pub owner: OwnerId,
    /// Positive = the position paid.
    pub payment: Quote,
    pub position_size: SignedSize,
    pub checkpoint: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub market_id: MarketId,
    pub owner: OwnerId,
    pub side: Side,
    pub added_size: u64,
    pub fill_price: Price,
    pub margin: Quote,
    pub fee: Quote,
    pub leverage: Leverage,
    pub new_size: SignedSize,
    pub entry_price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub market_id: MarketId,
    pub owner: OwnerId,
    pub size: SignedSize,
    pub exit_price: Price,
    pub realized_pnl: Quote,
    pub collateral_returned: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub market_id: MarketId,
    pub owner: OwnerId,
    pub liquidator: OwnerId,
    pub liquidated_size: SignedSize,
    pub liquidation_price: Price,
    pub equity: Quote,
    pub liquidator_fee: Quote,
    pub insurance_penalty: Quote,
    pub owner_remainder: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadDebtEvent {
    pub market_id: MarketId,
    pub owner: OwnerId,
    pub debt_amount: Quote,
    pub covered_by_insurance: Quote,
    pub uncovered: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketHaltedEvent {
    pub market_id: MarketId,
    pub uncovered_bad_debt: Quote,
}

#[derive(Debug)]
struct LogState {
    events: VecDeque<Event>,
    next_id: u64,
}

/// Bounded in-memory audit log. Oldest events fall off past `max_events`.
#[derive(Debug)]
pub struct EventLog {
    state: Mutex<LogState>,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            state: Mutex::new(LogState {
                events: VecDeque::new(),
                next_id: 1,
            }),
            max_events,
        }
    }

    /// Appends every payload of one commit, in order.
    pub fn record(&self, commit_seq: u64, timestamp: Timestamp, payloads: Vec<EventPayload>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for payload in payloads {
            let id = EventId(state.next_id);
            state.next_id += 1;
            state.events.push_back(Event {
                id,
                commit_seq,
                timestamp,
                payload,
            });
        }
        while state.events.len() > self.max_events {
            state.events.pop_front();
        }
    }

    pub fn events(&self) -> Vec<Event> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.events.iter().cloned().collect()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let start = state.events.len().saturating_sub(count);
        state.events.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit(amount: i64) -> EventPayload {
        EventPayload::Deposit(DepositEvent {
            owner: OwnerId(1),
            market_id: MarketId(1),
            amount: Quote::from_units(amount),
            new_balance: Quote::from_units(amount),
        })
    }

    #[test]
    fn event_log_assigns_ids() {
        let log = EventLog::new(10);
        log.record(1, Timestamp::from_secs(1_000), vec![deposit(1), deposit(2)]);
        log.record(2, Timestamp::from_secs(1_001), vec![deposit(3)]);

        let events = log.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].id, EventId(1));
        assert_eq!(events[2].id, EventId(3));
        assert_eq!(events[1].commit_seq, 1);
        assert_eq!(events[2].commit_seq, 2);
    }

    #[test]
    fn event_log_trims_oldest() {
        let log = EventLog::new(2);
        log.record(1, Timestamp::from_secs(0), vec![deposit(1), deposit(2), deposit(3)]);

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, EventId(2));
        assert_eq!(log.recent(1)[0].payload, deposit(3));
    }

    #[test]
    fn events_serialize() {
        let log = EventLog::new(10);
        log.record(
            1,
            Timestamp::from_secs(0),
            vec![EventPayload::MarketHalted(MarketHaltedEvent {
                market_id: MarketId(1),
                uncovered_bad_debt: Quote::from_units(350),
            })],
        );
        let json = serde_json::to_string(&log.events()).unwrap();
        assert!(json.contains("MarketHalted"));
    }
}
