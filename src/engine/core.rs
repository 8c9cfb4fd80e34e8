// 8.0 engine/core.rs: main engine. owns the ledger store and the audit log, holds
// handles to the oracle, custody and clock. every mutating call runs as one optimistic
// transaction through `atomically`; the other engine files add the operations.

use std::sync::Arc;

use super::clock::Clock;
use super::config::EngineConfig;
use super::results::EngineError;
use crate::account::UserAccount;
use crate::config::{ClearinghouseConfig, ConfigError, MarketParams};
use crate::custody::CollateralTransfer;
use crate::events::{
    AccountCreatedEvent, DepositEvent, Event, EventLog, EventPayload, GlobalInitializedEvent,
    InsuranceDepositEvent, MarketCreatedEvent, PauseToggledEvent, TradingFeeUpdatedEvent,
};
use crate::liquidation::InsuranceVault;
use crate::market::{GlobalConfig, Market};
use crate::position::Position;
use crate::price_feed::{OracleError, PriceOracle};
use crate::store::{CommitError, GlobalKey, LedgerSnapshot, LedgerStore, PositionKey, Transaction};
use crate::types::{Bps, MarketId, OwnerId, Price, Quote, Timestamp};

const MAX_TRADING_FEE_BPS: u16 = 100;

/// External collateral movement performed at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Transfer {
    In { owner: OwnerId, market: MarketId, amount: Quote },
    Out { owner: OwnerId, market: MarketId, amount: Quote },
}

/// Side effects of one attempt. Only performed if the attempt commits.
#[derive(Debug, Default)]
pub(super) struct Effects {
    transfer: Option<Transfer>,
    events: Vec<EventPayload>,
}

impl Effects {
    pub(super) fn emit(&mut self, payload: EventPayload) {
        self.events.push(payload);
    }

    // one external transfer per operation
    pub(super) fn transfer(&mut self, transfer: Transfer) {
        debug_assert!(self.transfer.is_none(), "second transfer in one operation");
        self.transfer = Some(transfer);
    }
}

/** 8.1: main engine struct. ledger state lives in the store */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) store: LedgerStore,
    pub(super) events: EventLog,
    pub(super) oracle: Arc<dyn PriceOracle>,
    pub(super) custody: Arc<dyn CollateralTransfer>,
    pub(super) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        oracle: Arc<dyn PriceOracle>,
        custody: Arc<dyn CollateralTransfer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_store(config, LedgerStore::new(), oracle, custody, clock)
    }

    /// Resumes from a previously exported snapshot.
    pub fn from_snapshot(
        config: EngineConfig,
        snapshot: LedgerSnapshot,
        oracle: Arc<dyn PriceOracle>,
        custody: Arc<dyn CollateralTransfer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_store(config, LedgerStore::restore(snapshot), oracle, custody, clock)
    }

    /// Builds an engine and lists everything in `config`.
    pub fn bootstrap(
        config: &ClearinghouseConfig,
        oracle: Arc<dyn PriceOracle>,
        custody: Arc<dyn CollateralTransfer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let engine = Self::new(config.engine.clone(), oracle, custody, clock);
        engine.initialize_global(config.admin, config.trading_fee_bps)?;
        for params in &config.markets {
            engine.create_market(config.admin, params.clone())?;
        }
        Ok(engine)
    }

    fn with_store(
        config: EngineConfig,
        store: LedgerStore,
        oracle: Arc<dyn PriceOracle>,
        custody: Arc<dyn CollateralTransfer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let events = EventLog::new(config.max_events);
        Self {
            config,
            store,
            events,
            oracle,
            custody,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `attempt` in a fresh transaction until it commits. A business error
    /// returns immediately; a read conflict retries up to `max_commit_retries`.
    pub(super) fn atomically<T, F>(&self, operation: &'static str, mut attempt: F) -> Result<T, EngineError>
    where
        F: FnMut(&mut Transaction<'_>, &mut Effects, Timestamp) -> Result<T, EngineError>,
    {
        let max_attempts = self.config.max_commit_retries.max(1);
        for attempt_no in 1..=max_attempts {
            let now = self.clock.now();
            let mut tx = self.store.begin();
            let mut effects = Effects::default();
            let value = attempt(&mut tx, &mut effects, now)?;

            match tx.commit(|seq| self.apply_effects(seq, now, effects)) {
                Ok(seq) => {
                    tracing::trace!(operation, seq, "committed");
                    return Ok(value);
                }
                Err(CommitError::Conflict) => {
                    tracing::debug!(operation, attempt = attempt_no, "commit conflict, retrying");
                }
                Err(CommitError::Aborted(err)) => {
                    tracing::warn!(operation, error = %err, "commit aborted");
                    return Err(err);
                }
            }
        }
        tracing::warn!(operation, attempts = max_attempts, "giving up under contention");
        Err(EngineError::Contention {
            attempts: max_attempts,
        })
    }

    // runs under the commit lock, after validation and before any write lands
    fn apply_effects(&self, seq: u64, now: Timestamp, effects: Effects) -> Result<(), EngineError> {
        match effects.transfer {
            Some(Transfer::In { owner, market, amount }) => {
                self.custody.transfer_in(owner, market, amount)?
            }
            Some(Transfer::Out { owner, market, amount }) => {
                self.custody.transfer_out(owner, market, amount)?
            }
            None => {}
        }
        if !effects.events.is_empty() {
            self.events.record(seq, now, effects.events);
        }
        Ok(())
    }

    /// Current index price for a market, subject to the staleness limit.
    pub(super) fn index_price(&self, market: &Market, now: Timestamp) -> Result<Price, EngineError> {
        let answer = self.oracle.current_price(market.oracle_feed)?;
        if let Some(max_age_secs) = self.config.max_oracle_age_secs {
            if answer.is_stale(now, max_age_secs) {
                return Err(OracleError::Stale {
                    feed: market.oracle_feed,
                    age_secs: answer.age(now),
                    max_age_secs,
                }
                .into());
            }
        }
        Ok(answer.price)
    }

    // --- admin ---

    pub fn initialize_global(&self, admin: OwnerId, trading_fee_bps: Bps) -> Result<(), EngineError> {
        validate_trading_fee(trading_fee_bps)?;
        self.atomically("initialize_global", |tx, effects, now| {
            if tx.get::<GlobalConfig>(GlobalKey).is_some() {
                return Err(EngineError::AlreadyInitialized);
            }
            tx.put(GlobalConfig::new(admin, trading_fee_bps, now));
            effects.emit(EventPayload::GlobalInitialized(GlobalInitializedEvent {
                admin,
                trading_fee_bps,
            }));
            Ok(())
        })?;
        tracing::info!(%admin, fee_bps = trading_fee_bps.value(), "clearinghouse initialized");
        Ok(())
    }

    pub fn update_trading_fee(&self, caller: OwnerId, trading_fee_bps: Bps) -> Result<(), EngineError> {
        validate_trading_fee(trading_fee_bps)?;
        self.atomically("update_trading_fee", |tx, effects, _now| {
            let mut global = load_global(tx)?;
            require_admin(&global, caller)?;
            let old_fee_bps = global.trading_fee_bps;
            global.trading_fee_bps = trading_fee_bps;
            tx.put(global);
            effects.emit(EventPayload::TradingFeeUpdated(TradingFeeUpdatedEvent {
                old_fee_bps,
                new_fee_bps: trading_fee_bps,
            }));
            Ok(())
        })?;
        tracing::info!(fee_bps = trading_fee_bps.value(), "trading fee updated");
        Ok(())
    }

    pub fn set_paused(&self, caller: OwnerId, paused: bool) -> Result<(), EngineError> {
        self.atomically("set_paused", |tx, effects, _now| {
            let mut global = load_global(tx)?;
            require_admin(&global, caller)?;
            global.paused = paused;
            tx.put(global);
            effects.emit(EventPayload::PauseToggled(PauseToggledEvent { paused }));
            Ok(())
        })?;
        tracing::warn!(paused, "pause switch toggled");
        Ok(())
    }

    /// Lists a market and its insurance vault in one commit.
    pub fn create_market(&self, caller: OwnerId, params: MarketParams) -> Result<MarketId, EngineError> {
        params.validate()?;
        let market_id = params.id;
        self.atomically("create_market", |tx, effects, now| {
            let global = load_global(tx)?;
            require_admin(&global, caller)?;
            if tx.get::<Market>(market_id).is_some() {
                return Err(EngineError::MarketExists(market_id));
            }

            let market = Market::from_params(&params, now);
            // the feed must answer before anything can trade against it
            self.index_price(&market, now)?;

            effects.emit(EventPayload::MarketCreated(MarketCreatedEvent {
                market_id,
                symbol: market.symbol.clone(),
                oracle_feed: market.oracle_feed,
                max_leverage: market.max_leverage,
            }));
            tx.put(market);
            tx.put(InsuranceVault::new(market_id));
            Ok(())
        })?;
        tracing::info!(market = %market_id, symbol = %params.symbol, "market created");
        Ok(market_id)
    }

    // --- accounts ---

    pub fn create_user_account(&self, owner: OwnerId) -> Result<(), EngineError> {
        self.atomically("create_user_account", |tx, effects, now| {
            load_active_global(tx)?;
            if tx.get::<UserAccount>(owner).is_some() {
                return Err(EngineError::AccountExists(owner));
            }
            tx.put(UserAccount::new(owner, now));
            effects.emit(EventPayload::AccountCreated(AccountCreatedEvent { owner }));
            Ok(())
        })?;
        tracing::debug!(%owner, "account created");
        Ok(())
    }

    /// Pulls `amount` from the owner's wallet into the market's custody pool and
    /// credits it as free collateral. Returns the new balance.
    pub fn deposit_collateral(&self, owner: OwnerId, market_id: MarketId, amount: Quote) -> Result<Quote, EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount);
        }
        let new_balance = self.atomically("deposit_collateral", |tx, effects, _now| {
            load_active_global(tx)?;
            let market = load_market(tx, market_id)?;
            if market.is_halted() {
                return Err(EngineError::MarketHalted(market_id));
            }
            let mut account = load_account(tx, owner)?;
            account.deposit(amount)?;
            let new_balance = account.collateral_balance;
            tx.put(account);

            effects.transfer(Transfer::In {
                owner,
                market: market_id,
                amount,
            });
            effects.emit(EventPayload::Deposit(DepositEvent {
                owner,
                market_id,
                amount,
                new_balance,
            }));
            Ok(new_balance)
        })?;
        tracing::info!(%owner, market = %market_id, %amount, %new_balance, "collateral deposited");
        Ok(new_balance)
    }

    /// Permissionless top-up of a market's insurance vault. Returns the vault balance.
    pub fn deposit_insurance(&self, depositor: OwnerId, market_id: MarketId, amount: Quote) -> Result<Quote, EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount);
        }
        let vault_balance = self.atomically("deposit_insurance", |tx, effects, _now| {
            load_active_global(tx)?;
            if load_market(tx, market_id)?.is_halted() {
                return Err(EngineError::MarketHalted(market_id));
            }
            let mut vault = load_vault(tx, market_id)?;
            vault.deposit(amount)?;
            let vault_balance = vault.balance;
            tx.put(vault);

            effects.transfer(Transfer::In {
                owner: depositor,
                market: market_id,
                amount,
            });
            effects.emit(EventPayload::InsuranceDeposit(InsuranceDepositEvent {
                depositor,
                market_id,
                amount,
                vault_balance,
            }));
            Ok(vault_balance)
        })?;
        tracing::info!(%depositor, market = %market_id, %amount, %vault_balance, "insurance deposited");
        Ok(vault_balance)
    }

    // --- queries ---

    pub fn global_config(&self) -> Option<GlobalConfig> {
        self.store.get::<GlobalConfig>(GlobalKey)
    }

    pub fn market(&self, market_id: MarketId) -> Option<Market> {
        self.store.get::<Market>(market_id)
    }

    pub fn markets(&self) -> Vec<Market> {
        let mut markets = self.store.all_markets();
        markets.sort_by_key(|m| m.id);
        markets
    }

    pub fn user_account(&self, owner: OwnerId) -> Option<UserAccount> {
        self.store.get::<UserAccount>(owner)
    }

    pub fn accounts(&self) -> Vec<UserAccount> {
        let mut accounts = self.store.all_accounts();
        accounts.sort_by_key(|a| a.owner);
        accounts
    }

    pub fn position(&self, owner: OwnerId, market_id: MarketId) -> Option<Position> {
        self.store.get::<Position>(PositionKey::new(owner, market_id))
    }

    pub fn positions_in_market(&self, market_id: MarketId) -> Vec<Position> {
        let mut positions = self.store.positions_in_market(market_id);
        positions.sort_by_key(|p| p.owner);
        positions
    }

    pub fn insurance_vault(&self, market_id: MarketId) -> Option<InsuranceVault> {
        self.store.get::<InsuranceVault>(market_id)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.events()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events.recent(count)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.store.snapshot()
    }
}

fn validate_trading_fee(fee: Bps) -> Result<(), EngineError> {
    if fee.value() > MAX_TRADING_FEE_BPS {
        return Err(ConfigError::InvalidFees {
            reason: format!("Trading fee {} bps above {} bps", fee.value(), MAX_TRADING_FEE_BPS),
        }
        .into());
    }
    Ok(())
}

fn require_admin(global: &GlobalConfig, caller: OwnerId) -> Result<(), EngineError> {
    if !global.is_admin(caller) {
        return Err(EngineError::Unauthorized(caller));
    }
    Ok(())
}

pub(super) fn load_global(tx: &mut Transaction<'_>) -> Result<GlobalConfig, EngineError> {
    tx.get::<GlobalConfig>(GlobalKey).ok_or(EngineError::NotInitialized)
}

/// Global config, rejecting while paused.
pub(super) fn load_active_global(tx: &mut Transaction<'_>) -> Result<GlobalConfig, EngineError> {
    let global = load_global(tx)?;
    if global.paused {
        return Err(EngineError::Paused);
    }
    Ok(global)
}

pub(super) fn load_market(tx: &mut Transaction<'_>, market_id: MarketId) -> Result<Market, EngineError> {
    tx.get::<Market>(market_id).ok_or(EngineError::MarketNotFound(market_id))
}

pub(super) fn load_account(tx: &mut Transaction<'_>, owner: OwnerId) -> Result<UserAccount, EngineError> {
    tx.get::<UserAccount>(owner).ok_or(EngineError::AccountNotFound(owner))
}

pub(super) fn load_vault(tx: &mut Transaction<'_>, market_id: MarketId) -> Result<InsuranceVault, EngineError> {
    tx.get::<InsuranceVault>(market_id).ok_or(EngineError::MarketNotFound(market_id))
}

/// The (owner, market) slot, empty if never used.
pub(super) fn load_slot(tx: &mut Transaction<'_>, owner: OwnerId, market_id: MarketId, now: Timestamp) -> Position {
    tx.get::<Position>(PositionKey::new(owner, market_id))
        .unwrap_or_else(|| Position::empty(owner, market_id, now))
}

pub(super) fn load_open_position(tx: &mut Transaction<'_>, owner: OwnerId, market_id: MarketId) -> Result<Position, EngineError> {
    tx.get::<Position>(PositionKey::new(owner, market_id))
        .filter(Position::is_open)
        .ok_or(EngineError::NoOpenPosition {
            owner,
            market: market_id,
        })
}
