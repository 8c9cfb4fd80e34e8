// Price Feed Integration
//
// This module abstracts how the engine receives index prices. The core engine
// is agnostic to whether prices come from Pyth, Chainlink or an admin-set feed;
// anything that can answer "latest price for this feed" implements PriceOracle.
// The engine only reads prices. Writing them is the feed owner's business.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::{FeedId, OwnerId, Price, Timestamp};

/// A price answer from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OraclePrice {
    pub price: Price,
    /// When the feed was last written.
    pub timestamp: Timestamp,
}

impl OraclePrice {
    pub fn age(&self, now: Timestamp) -> i64 {
        now.seconds_since(self.timestamp)
    }

    pub fn is_stale(&self, now: Timestamp, max_age_secs: i64) -> bool {
        self.age(now) > max_age_secs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("Unknown price feed {0:?}")]
    UnknownFeed(FeedId),

    #[error("Price feed {feed:?} is stale: {age_secs}s old, limit {max_age_secs}s")]
    Stale {
        feed: FeedId,
        age_secs: i64,
        max_age_secs: i64,
    },

    #[error("Invalid price {raw} for feed {feed:?}")]
    InvalidPrice { feed: FeedId, raw: i64 },

    #[error("Price feed {0:?} already registered")]
    FeedExists(FeedId),

    #[error("Caller {caller} may not update feed {feed:?}")]
    Unauthorized { feed: FeedId, caller: OwnerId },
}

/// Read side of an index price source. Implement this to integrate with
/// specific oracle networks.
pub trait PriceOracle: Send + Sync {
    fn current_price(&self, feed: FeedId) -> Result<OraclePrice, OracleError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeedEntry {
    admin: OwnerId,
    price: Price,
    last_update_ts: Timestamp,
}

/// Feed whose price is pushed by a single admin per feed.
#[derive(Debug, Default)]
pub struct ManualOracle {
    feeds: DashMap<FeedId, FeedEntry>,
}

impl ManualOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a feed. Fails if the feed already exists.
    pub fn register_feed(
        &self,
        feed: FeedId,
        admin: OwnerId,
        initial_price: Price,
        timestamp: Timestamp,
    ) -> Result<(), OracleError> {
        use dashmap::mapref::entry::Entry;
        match self.feeds.entry(feed) {
            Entry::Occupied(_) => Err(OracleError::FeedExists(feed)),
            Entry::Vacant(slot) => {
                slot.insert(FeedEntry {
                    admin,
                    price: initial_price,
                    last_update_ts: timestamp,
                });
                tracing::debug!(?feed, %admin, price = %initial_price, "price feed registered");
                Ok(())
            }
        }
    }

    /// Admin-only price push. `raw_price` is PRICE_SCALE fixed point and must be positive.
    pub fn set_price(
        &self,
        caller: OwnerId,
        feed: FeedId,
        raw_price: i64,
        timestamp: Timestamp,
    ) -> Result<(), OracleError> {
        let mut entry = self.feeds.get_mut(&feed).ok_or(OracleError::UnknownFeed(feed))?;
        if entry.admin != caller {
            return Err(OracleError::Unauthorized { feed, caller });
        }
        let price = Price::new(raw_price).ok_or(OracleError::InvalidPrice { feed, raw: raw_price })?;
        entry.price = price;
        entry.last_update_ts = timestamp;
        tracing::debug!(?feed, %price, ts = timestamp.as_secs(), "oracle price set");
        Ok(())
    }
}

impl PriceOracle for ManualOracle {
    fn current_price(&self, feed: FeedId) -> Result<OraclePrice, OracleError> {
        self.feeds
            .get(&feed)
            .map(|entry| OraclePrice {
                price: entry.price,
                timestamp: entry.last_update_ts,
            })
            .ok_or(OracleError::UnknownFeed(feed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: OwnerId = OwnerId(1);

    fn oracle() -> ManualOracle {
        let oracle = ManualOracle::new();
        oracle
            .register_feed(FeedId(1), ADMIN, Price::from_units(100), Timestamp::from_secs(1_000))
            .unwrap();
        oracle
    }

    #[test]
    fn test_read_registered_feed() {
        let answer = oracle().current_price(FeedId(1)).unwrap();
        assert_eq!(answer.price, Price::from_units(100));
        assert_eq!(answer.timestamp, Timestamp::from_secs(1_000));
    }

    #[test]
    fn test_unknown_feed() {
        let result = oracle().current_price(FeedId(9));
        assert_eq!(result, Err(OracleError::UnknownFeed(FeedId(9))));
    }

    #[test]
    fn test_admin_sets_price() {
        let oracle = oracle();
        oracle
            .set_price(ADMIN, FeedId(1), 91_000_000, Timestamp::from_secs(1_060))
            .unwrap();
        let answer = oracle.current_price(FeedId(1)).unwrap();
        assert_eq!(answer.price, Price::from_units(91));
        assert_eq!(answer.timestamp, Timestamp::from_secs(1_060));
    }

    #[test]
    fn test_non_admin_rejected() {
        let oracle = oracle();
        let result = oracle.set_price(OwnerId(2), FeedId(1), 1, Timestamp::from_secs(1_060));
        assert!(matches!(result, Err(OracleError::Unauthorized { .. })));
        assert_eq!(oracle.current_price(FeedId(1)).unwrap().price, Price::from_units(100));
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let oracle = oracle();
        let result = oracle.set_price(ADMIN, FeedId(1), 0, Timestamp::from_secs(1_060));
        assert_eq!(result, Err(OracleError::InvalidPrice { feed: FeedId(1), raw: 0 }));
    }

    #[test]
    fn test_duplicate_registration() {
        let oracle = oracle();
        let result = oracle.register_feed(FeedId(1), OwnerId(2), Price::from_units(1), Timestamp::from_secs(0));
        assert_eq!(result, Err(OracleError::FeedExists(FeedId(1))));
    }

    #[test]
    fn test_staleness() {
        let answer = OraclePrice {
            price: Price::from_units(100),
            timestamp: Timestamp::from_secs(1_000),
        };
        assert!(!answer.is_stale(Timestamp::from_secs(1_060), 60)); // exactly at limit
        assert!(answer.is_stale(Timestamp::from_secs(1_061), 60));
    }
}
