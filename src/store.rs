//! Versioned ledger store with optimistic transactions.
//!
//! Every record sits in a `DashMap` table next to a version counter. A
//! [`Transaction`] remembers the version of everything it read and buffers
//! everything it writes. [`Transaction::commit`] takes the single commit lock,
//! re-checks every read version, runs the caller's hook (external transfers,
//! event append) and only then applies the buffered writes. A stale read fails
//! the commit with [`CommitError::Conflict`] and the caller retries from scratch;
//! a failing hook aborts with nothing written.
//!
//! Readers outside a transaction see individual records as of the latest
//! commit. Multi-record consistency is only guaranteed inside a transaction.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use crate::account::UserAccount;
use crate::liquidation::InsuranceVault;
use crate::market::{GlobalConfig, Market};
use crate::position::Position;
use crate::types::{MarketId, OwnerId};

/// A record together with the number of commits that have written it.
/// Version 0 means the record does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub owner: OwnerId,
    pub market: MarketId,
}

impl PositionKey {
    pub fn new(owner: OwnerId, market: MarketId) -> Self {
        Self { owner, market }
    }
}

/// Address of any record in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKey {
    Global,
    Market(MarketId),
    Account(OwnerId),
    Position(PositionKey),
    Insurance(MarketId),
}

/// A buffered write.
#[derive(Debug, Clone)]
pub enum StagedRecord {
    Global(GlobalConfig),
    Market(Market),
    Account(UserAccount),
    Position(Position),
    Insurance(InsuranceVault),
}

/// A record type the store knows how to address and stage.
pub trait LedgerRecord: Clone + Sized {
    type Key: Copy + Eq + Hash;

    fn key(&self) -> Self::Key;
    fn record_key(key: Self::Key) -> RecordKey;
    fn table(store: &LedgerStore) -> &DashMap<Self::Key, Versioned<Self>>;
    fn stage(self) -> StagedRecord;
    fn staged(record: &StagedRecord) -> Option<&Self>;
}

impl LedgerRecord for GlobalConfig {
    type Key = GlobalKey;

    fn key(&self) -> GlobalKey {
        GlobalKey
    }
    fn record_key(_: GlobalKey) -> RecordKey {
        RecordKey::Global
    }
    fn table(store: &LedgerStore) -> &DashMap<GlobalKey, Versioned<Self>> {
        &store.global
    }
    fn stage(self) -> StagedRecord {
        StagedRecord::Global(self)
    }
    fn staged(record: &StagedRecord) -> Option<&Self> {
        match record {
            StagedRecord::Global(v) => Some(v),
            _ => None,
        }
    }
}

impl LedgerRecord for Market {
    type Key = MarketId;

    fn key(&self) -> MarketId {
        self.id
    }
    fn record_key(key: MarketId) -> RecordKey {
        RecordKey::Market(key)
    }
    fn table(store: &LedgerStore) -> &DashMap<MarketId, Versioned<Self>> {
        &store.markets
    }
    fn stage(self) -> StagedRecord {
        StagedRecord::Market(self)
    }
    fn staged(record: &StagedRecord) -> Option<&Self> {
        match record {
            StagedRecord::Market(v) => Some(v),
            _ => None,
        }
    }
}

impl LedgerRecord for UserAccount {
    type Key = OwnerId;

    fn key(&self) -> OwnerId {
        self.owner
    }
    fn record_key(key: OwnerId) -> RecordKey {
        RecordKey::Account(key)
    }
    fn table(store: &LedgerStore) -> &DashMap<OwnerId, Versioned<Self>> {
        &store.accounts
    }
    fn stage(self) -> StagedRecord {
        StagedRecord::Account(self)
    }
    fn staged(record: &StagedRecord) -> Option<&Self> {
        match record {
            StagedRecord::Account(v) => Some(v),
            _ => None,
        }
    }
}

impl LedgerRecord for Position {
    type Key = PositionKey;

    fn key(&self) -> PositionKey {
        PositionKey::new(self.owner, self.market_id)
    }
    fn record_key(key: PositionKey) -> RecordKey {
        RecordKey::Position(key)
    }
    fn table(store: &LedgerStore) -> &DashMap<PositionKey, Versioned<Self>> {
        &store.positions
    }
    fn stage(self) -> StagedRecord {
        StagedRecord::Position(self)
    }
    fn staged(record: &StagedRecord) -> Option<&Self> {
        match record {
            StagedRecord::Position(v) => Some(v),
            _ => None,
        }
    }
}

impl LedgerRecord for InsuranceVault {
    type Key = MarketId;

    fn key(&self) -> MarketId {
        self.market
    }
    fn record_key(key: MarketId) -> RecordKey {
        RecordKey::Insurance(key)
    }
    fn table(store: &LedgerStore) -> &DashMap<MarketId, Versioned<Self>> {
        &store.vaults
    }
    fn stage(self) -> StagedRecord {
        StagedRecord::Insurance(self)
    }
    fn staged(record: &StagedRecord) -> Option<&Self> {
        match record {
            StagedRecord::Insurance(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError<E> {
    #[error("Commit conflict: a record read by this transaction changed")]
    Conflict,

    #[error("Commit aborted: {0}")]
    Aborted(E),
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Point-in-time copy of every table, taken under the commit lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub commit_seq: u64,
    pub global: Option<Versioned<GlobalConfig>>,
    pub markets: Vec<Versioned<Market>>,
    pub accounts: Vec<Versioned<UserAccount>>,
    pub positions: Vec<Versioned<Position>>,
    pub vaults: Vec<Versioned<InsuranceVault>>,
}

impl LedgerSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Default)]
pub struct LedgerStore {
    global: DashMap<GlobalKey, Versioned<GlobalConfig>>,
    markets: DashMap<MarketId, Versioned<Market>>,
    accounts: DashMap<OwnerId, Versioned<UserAccount>>,
    positions: DashMap<PositionKey, Versioned<Position>>,
    vaults: DashMap<MarketId, Versioned<InsuranceVault>>,
    /// Serializes commits. Holds the last commit sequence number.
    commit_lock: Mutex<u64>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Latest committed value, outside any transaction.
    pub fn get<R: LedgerRecord>(&self, key: R::Key) -> Option<R> {
        R::table(self).get(&key).map(|entry| entry.value.clone())
    }

    pub fn version_of<R: LedgerRecord>(&self, key: R::Key) -> u64 {
        R::table(self).get(&key).map(|entry| entry.version).unwrap_or(0)
    }

    pub fn commit_seq(&self) -> u64 {
        *self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn positions_in_market(&self, market: MarketId) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|entry| entry.key().market == market)
            .map(|entry| entry.value.clone())
            .collect()
    }

    pub fn all_accounts(&self) -> Vec<UserAccount> {
        self.accounts.iter().map(|entry| entry.value.clone()).collect()
    }

    pub fn all_markets(&self) -> Vec<Market> {
        self.markets.iter().map(|entry| entry.value.clone()).collect()
    }

    fn current_version(&self, key: RecordKey) -> u64 {
        match key {
            RecordKey::Global => self.version_of::<GlobalConfig>(GlobalKey),
            RecordKey::Market(id) => self.version_of::<Market>(id),
            RecordKey::Account(owner) => self.version_of::<UserAccount>(owner),
            RecordKey::Position(pk) => self.version_of::<Position>(pk),
            RecordKey::Insurance(id) => self.version_of::<InsuranceVault>(id),
        }
    }

    fn apply(&self, record: StagedRecord, version: u64) {
        match record {
            StagedRecord::Global(v) => put(&self.global, v, version),
            StagedRecord::Market(v) => put(&self.markets, v, version),
            StagedRecord::Account(v) => put(&self.accounts, v, version),
            StagedRecord::Position(v) => put(&self.positions, v, version),
            StagedRecord::Insurance(v) => put(&self.vaults, v, version),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let seq = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        LedgerSnapshot {
            commit_seq: *seq,
            global: self.global.get(&GlobalKey).map(|e| e.value().clone()),
            markets: sorted(&self.markets),
            accounts: sorted(&self.accounts),
            positions: sorted(&self.positions),
            vaults: sorted(&self.vaults),
        }
    }

    pub fn restore(snapshot: LedgerSnapshot) -> Self {
        let store = Self::new();
        if let Some(global) = snapshot.global {
            store.global.insert(GlobalKey, global);
        }
        for entry in snapshot.markets {
            store.markets.insert(entry.value.key(), entry);
        }
        for entry in snapshot.accounts {
            store.accounts.insert(entry.value.key(), entry);
        }
        for entry in snapshot.positions {
            store.positions.insert(entry.value.key(), entry);
        }
        for entry in snapshot.vaults {
            store.vaults.insert(entry.value.key(), entry);
        }
        *store.commit_lock.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.commit_seq;
        store
    }
}

fn put<R: LedgerRecord>(table: &DashMap<R::Key, Versioned<R>>, value: R, version: u64) {
    table.insert(value.key(), Versioned { version, value });
}

fn sorted<K, R>(table: &DashMap<K, Versioned<R>>) -> Vec<Versioned<R>>
where
    K: Ord + Eq + Hash + Copy,
    R: Clone,
{
    let mut rows: Vec<(K, Versioned<R>)> = table
        .iter()
        .map(|entry| (*entry.key(), entry.value().clone()))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows.into_iter().map(|(_, v)| v).collect()
}

/// Read-set / write-set over the store. Dropping it without commit discards it.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a LedgerStore,
    reads: HashMap<RecordKey, u64>,
    writes: BTreeMap<RecordKey, StagedRecord>,
}

impl<'a> Transaction<'a> {
    /// Reads a record, seeing this transaction's own staged writes first.
    pub fn get<R: LedgerRecord>(&mut self, key: R::Key) -> Option<R> {
        let record_key = R::record_key(key);
        if let Some(staged) = self.writes.get(&record_key) {
            return R::staged(staged).cloned();
        }
        let (version, value) = match R::table(self.store).get(&key) {
            Some(entry) => (entry.version, Some(entry.value.clone())),
            None => (0, None),
        };
        // keep the first observed version; a later change shows up as a conflict
        self.reads.entry(record_key).or_insert(version);
        value
    }

    /// Stages a write. The record's version is pinned if it was never read.
    pub fn put<R: LedgerRecord>(&mut self, record: R) {
        let record_key = R::record_key(record.key());
        if !self.reads.contains_key(&record_key) {
            let version = self.store.version_of::<R>(record.key());
            self.reads.insert(record_key, version);
        }
        self.writes.insert(record_key, record.stage());
    }

    /// Validates, runs `before_apply` with the new commit sequence number, then
    /// applies every staged write. Returns the sequence number.
    pub fn commit<E, F>(self, before_apply: F) -> Result<u64, CommitError<E>>
    where
        F: FnOnce(u64) -> Result<(), E>,
    {
        let mut seq = self
            .store
            .commit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for (key, version) in &self.reads {
            if self.store.current_version(*key) != *version {
                return Err(CommitError::Conflict);
            }
        }

        let next = *seq + 1;
        before_apply(next).map_err(CommitError::Aborted)?;

        for (key, record) in self.writes {
            let read_version = self.reads.get(&key).copied().unwrap_or(0);
            self.store.apply(record, read_version + 1);
        }
        *seq = next;
        Ok(next)
    }
}
