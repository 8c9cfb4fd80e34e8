//! Stress tests
//!
//! These tests hammer the engine from many threads and through extreme price
//! moves to verify that optimistic commits serialize correctly and the ledger
//! stays solvent.

use std::sync::{Arc, Barrier};
use std::thread;

use clearing_core::*;

const ADMIN: OwnerId = OwnerId(0);
const SOL: MarketId = MarketId(1);
const FEED: FeedId = FeedId(1);
const T0: Timestamp = Timestamp(1_700_000_000);

struct Harness {
    engine: Arc<Engine>,
    oracle: Arc<ManualOracle>,
    custody: Arc<InMemoryCustody>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let mut config = ClearinghouseConfig::default();
    config.engine.max_commit_retries = 10_000;

    let oracle = Arc::new(ManualOracle::new());
    let custody = Arc::new(InMemoryCustody::new());
    let clock = Arc::new(ManualClock::new(T0));
    oracle.register_feed(FEED, ADMIN, Price::from_units(100), T0).unwrap();
    let engine = Engine::bootstrap(&config, oracle.clone(), custody.clone(), clock.clone()).unwrap();
    Harness {
        engine: Arc::new(engine),
        oracle,
        custody,
        clock,
    }
}

impl Harness {
    fn trader(&self, owner: OwnerId, units: i64) {
        self.custody.fund_wallet(owner, Quote::from_units(units)).unwrap();
        self.engine.create_user_account(owner).unwrap();
        self.engine.deposit_collateral(owner, SOL, Quote::from_units(units)).unwrap();
    }

    fn set_price(&self, units: i64) {
        self.oracle
            .set_price(ADMIN, FEED, units * 1_000_000, self.clock.now())
            .unwrap();
    }
}

/// Runs `f(i)` on `n` threads released together.
fn race<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(n));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let barrier = barrier.clone();
            let f = f.clone();
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// Many callers racing on shared records.
mod contention_tests {
    use super::*;

    #[test]
    fn concurrent_funding_updates_single_success() {
        let h = harness();
        h.clock.advance(3_600);
        h.set_price(100);

        let engine = h.engine.clone();
        let results = race(16, move |_| engine.update_funding(SOL, Price::from_units(101)));

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert!(matches!(result, Err(EngineError::FundingTooSoon { .. })));
        }

        // one interval of 1% on $100
        let market = h.engine.market(SOL).unwrap();
        assert_eq!(market.funding.cumulative_funding, 1_000_000);
        assert_eq!(market.funding.last_funding_ts, T0.plus_secs(3_600));
    }

    #[test]
    fn concurrent_opens_preserve_open_interest() {
        let h = harness();
        let traders = 8usize;
        let opens_per_trader = 10u64;
        for i in 0..traders {
            h.trader(OwnerId(i as u64 + 1), 10_000);
        }

        let engine = h.engine.clone();
        race(traders, move |i| {
            let owner = OwnerId(i as u64 + 1);
            let side = if i % 2 == 0 { Side::Long } else { Side::Short };
            for _ in 0..opens_per_trader {
                engine.open_position(owner, SOL, side, 3, 5).unwrap();
            }
        });

        let market = h.engine.market(SOL).unwrap();
        assert_eq!(market.open_interest, traders as u64 * opens_per_trader * 3);

        for i in 0..traders {
            let owner = OwnerId(i as u64 + 1);
            let position = h.engine.position(owner, SOL).unwrap();
            assert_eq!(position.size.abs(), opens_per_trader * 3);
            // each open of 3 @ $100 at 5x locks $60
            assert_eq!(position.collateral_allocated, Quote::from_units(600));
            assert_eq!(h.engine.user_account(owner).unwrap().collateral_balance, Quote::from_units(9_400));
        }

        let opened = h
            .engine
            .events()
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::PositionOpened(_)))
            .count();
        assert_eq!(opened, traders * opens_per_trader as usize);
    }

    #[test]
    fn concurrent_deposits_to_one_account() {
        let h = harness();
        let owner = OwnerId(1);
        h.custody.fund_wallet(owner, Quote::from_units(1_000)).unwrap();
        h.engine.create_user_account(owner).unwrap();

        let engine = h.engine.clone();
        let results = race(20, move |_| {
            for _ in 0..5 {
                engine.deposit_collateral(owner, SOL, Quote::from_units(10)).unwrap();
            }
        });
        assert_eq!(results.len(), 20);

        let account = h.engine.user_account(owner).unwrap();
        assert_eq!(account.collateral_balance, Quote::from_units(1_000));
        assert_eq!(account.total_deposited, Quote::from_units(1_000));
        assert_eq!(h.custody.wallet_balance(owner), Quote::zero());
        assert_eq!(h.custody.pool_balance(SOL), Quote::from_units(1_000));
    }

    #[test]
    fn racing_liquidators_close_once() {
        let h = harness();
        let owner = OwnerId(1);
        h.trader(owner, 100);
        h.engine.open_position(owner, SOL, Side::Long, 10, 10).unwrap();
        h.set_price(91);

        let engine = h.engine.clone();
        let results = race(8, move |i| engine.liquidate_position(OwnerId(100 + i as u64), owner, SOL));

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert_eq!(
                result,
                &Err(EngineError::NoOpenPosition { owner, market: SOL })
            );
        }

        let winner = winners[0].liquidator;
        assert_eq!(h.custody.wallet_balance(winner), Quote::from_units(10));
        assert_eq!(h.engine.market(SOL).unwrap().open_interest, 0);
    }

    #[test]
    fn withdrawals_cannot_overdraw() {
        let h = harness();
        let owner = OwnerId(1);
        h.trader(owner, 100);

        let engine = h.engine.clone();
        let results = race(10, move |_| engine.withdraw_collateral(owner, SOL, Quote::from_units(30)));

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 3);
        assert_eq!(
            h.engine.user_account(owner).unwrap().collateral_balance,
            Quote::from_units(10)
        );
        assert_eq!(h.custody.wallet_balance(owner), Quote::from_units(90));
    }

    #[test]
    fn gives_up_after_retry_budget() {
        let mut config = ClearinghouseConfig::default();
        config.engine.max_commit_retries = 1;
        let oracle = Arc::new(ManualOracle::new());
        oracle.register_feed(FEED, ADMIN, Price::from_units(100), T0).unwrap();
        let custody = Arc::new(InMemoryCustody::new());
        let engine = Engine::bootstrap(&config, oracle, custody.clone(), Arc::new(ManualClock::new(T0))).unwrap();
        let engine = Arc::new(engine);

        for i in 0..8u64 {
            custody.fund_wallet(OwnerId(i + 1), Quote::from_units(1_000)).unwrap();
            engine.create_user_account(OwnerId(i + 1)).unwrap();
            engine
                .deposit_collateral(OwnerId(i + 1), SOL, Quote::from_units(1_000))
                .unwrap();
        }

        let shared = engine.clone();
        let results = race(8, move |i| {
            let owner = OwnerId(i as u64 + 1);
            (0..20)
                .map(|_| shared.open_position(owner, SOL, Side::Long, 1, 10))
                .collect::<Vec<_>>()
        });

        // every call either committed or reported contention; nothing half-applied
        let mut committed = 0u64;
        for result in results.into_iter().flatten() {
            match result {
                Ok(_) => committed += 1,
                Err(EngineError::Contention { attempts }) => assert_eq!(attempts, 1),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(engine.market(SOL).unwrap().open_interest, committed);
    }
}

/// Extreme price paths through the whole ledger.
mod cascade_tests {
    use super::*;

    #[test]
    fn liquidation_cascade_with_insurance() {
        let h = harness();
        let backer = OwnerId(50);
        h.custody.fund_wallet(backer, Quote::from_units(500)).unwrap();
        h.engine.deposit_insurance(backer, SOL, Quote::from_units(500)).unwrap();

        // ten longs from 2x to 10x
        let traders: Vec<OwnerId> = (1..=10).map(OwnerId).collect();
        for (i, &owner) in traders.iter().enumerate() {
            h.trader(owner, 1_000);
            let leverage = 2 + (i as u16 * 8) / 9;
            h.engine.open_position(owner, SOL, Side::Long, 10, leverage).unwrap();
        }

        let keeper = OwnerId(99);
        let mut liquidated = 0;
        for price in (80..=100).rev().step_by(2) {
            h.set_price(price);
            for &owner in &traders {
                if h.engine.position(owner, SOL).map(|p| p.is_open()).unwrap_or(false)
                    && h.engine.is_liquidatable(owner, SOL).unwrap()
                {
                    h.engine.liquidate_position(keeper, owner, SOL).unwrap();
                    liquidated += 1;
                }
            }
            for account in h.engine.accounts() {
                assert!(!account.collateral_balance.is_negative());
            }
        }

        assert!(liquidated > 0);
        let vault = h.engine.insurance_vault(SOL).unwrap();
        assert!(vault.balance >= Quote::from_units(500));
        assert!(vault.uncovered_bad_debt.is_zero());
        assert!(!h.engine.market(SOL).unwrap().emergency);

        // the low-leverage positions survive a 20% drop
        assert!(h.engine.position(traders[0], SOL).unwrap().is_open());
        let open: u64 = h
            .engine
            .positions_in_market(SOL)
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.size.abs())
            .sum();
        assert_eq!(h.engine.market(SOL).unwrap().open_interest, open);
    }

    #[test]
    fn funding_drains_an_idle_position_into_liquidation() {
        let h = harness();
        let (long, short) = (OwnerId(1), OwnerId(2));
        h.trader(long, 100);
        h.trader(short, 1_000);
        h.engine.open_position(long, SOL, Side::Long, 10, 10).unwrap();
        h.engine.open_position(short, SOL, Side::Short, 10, 2).unwrap();

        // perp pinned 5% rich: clamped to 1% of $100 per interval, $10 per interval on 10 units
        let mut intervals = 0;
        while !h.engine.is_liquidatable(long, SOL).unwrap() {
            h.clock.advance(3_600);
            h.set_price(100);
            h.engine.update_funding(SOL, Price::from_units(105)).unwrap();
            intervals += 1;
            assert!(intervals < 100);
        }
        // collateral 100 - 10n < maintenance 50 first at n = 6
        assert_eq!(intervals, 6);

        let health = h.engine.position_health(long, SOL).unwrap();
        assert_eq!(health.pending_funding, Quote::from_units(60));
        assert_eq!(health.equity, Quote::from_units(40));

        let receipt = h.engine.liquidate_position(short, long, SOL).unwrap();
        assert_eq!(receipt.equity, Quote::from_units(40));
        let received = h.engine.settle_position_funding(short, SOL).unwrap();
        assert_eq!(received, Quote::from_units(-60));
    }

    #[test]
    fn event_log_is_bounded() {
        let mut config = ClearinghouseConfig::default();
        config.engine.max_events = 16;
        let oracle = Arc::new(ManualOracle::new());
        oracle.register_feed(FEED, ADMIN, Price::from_units(100), T0).unwrap();
        let custody = Arc::new(InMemoryCustody::new());
        let engine = Engine::bootstrap(&config, oracle, custody.clone(), Arc::new(ManualClock::new(T0))).unwrap();

        let owner = OwnerId(1);
        custody.fund_wallet(owner, Quote::from_units(1_000)).unwrap();
        engine.create_user_account(owner).unwrap();
        for _ in 0..100 {
            engine.deposit_collateral(owner, SOL, Quote::from_units(1)).unwrap();
        }

        let events = engine.events();
        assert_eq!(events.len(), 16);
        assert!(events.windows(2).all(|w| w[0].id < w[1].id));
        assert!(matches!(events[15].payload, EventPayload::Deposit(_)));
        assert_eq!(engine.recent_events(3).len(), 3);
    }
}
