//! Margin Clearinghouse Simulation.
//!
//! Walks the ledger through its main paths: a leveraged long liquidated after a
//! crash, a crash deep enough to exhaust insurance, a blocked withdrawal, and
//! funding flowing from longs to shorts.

use std::error::Error;
use std::sync::Arc;

use clearing_core::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ADMIN: OwnerId = OwnerId(0);
const SOL: MarketId = MarketId(1);
const SOL_FEED: FeedId = FeedId(1);
const START: Timestamp = Timestamp(1_700_000_000);

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("Margin Clearinghouse Simulation");
    println!("SOL-PERP, 10x max leverage, 5% maintenance margin\n");

    scenario_1_crash_liquidation()?;
    scenario_2_insurance_exhaustion()?;
    scenario_3_withdrawal_guard()?;
    scenario_4_funding_flow()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

struct Sim {
    engine: Engine,
    oracle: Arc<ManualOracle>,
    custody: Arc<InMemoryCustody>,
    clock: Arc<ManualClock>,
}

impl Sim {
    fn new() -> Result<Self, Box<dyn Error>> {
        let oracle = Arc::new(ManualOracle::new());
        let custody = Arc::new(InMemoryCustody::new());
        let clock = Arc::new(ManualClock::new(START));
        oracle.register_feed(SOL_FEED, ADMIN, Price::from_units(100), START)?;

        let engine = Engine::bootstrap(
            &Environment::Development.config(),
            oracle.clone(),
            custody.clone(),
            clock.clone(),
        )?;
        Ok(Self {
            engine,
            oracle,
            custody,
            clock,
        })
    }

    fn trader(&self, owner: OwnerId, units: i64) -> Result<(), EngineError> {
        self.custody.fund_wallet(owner, Quote::from_units(units))?;
        self.engine.create_user_account(owner)?;
        self.engine.deposit_collateral(owner, SOL, Quote::from_units(units))?;
        Ok(())
    }

    fn set_price(&self, units: i64) -> Result<(), OracleError> {
        self.oracle
            .set_price(ADMIN, SOL_FEED, Price::from_units(units).value(), self.clock.now())
    }
}

/// Long 10 SOL at $100 with 10x, index crashes to $91.
fn scenario_1_crash_liquidation() -> Result<(), Box<dyn Error>> {
    println!("Scenario 1: Crash Liquidation\n");

    let sim = Sim::new()?;
    let (alice, keeper) = (OwnerId(1), OwnerId(9));
    sim.trader(alice, 100)?;

    let receipt = sim.engine.open_position(alice, SOL, Side::Long, 10, 10)?;
    println!("  Alice opens {} SOL @ ${}, margin ${}", receipt.size, receipt.fill_price, receipt.margin);

    sim.set_price(91)?;
    let health = sim.engine.position_health(alice, SOL)?;
    println!(
        "  Index crashes to ${}: equity ${}, maintenance ${}, {:?}",
        health.index_price, health.equity, health.maintenance_margin, health.status
    );

    let liquidation = sim.engine.liquidate_position(keeper, alice, SOL)?;
    println!(
        "  Keeper liquidates: fee ${}, insurance ${}, returned ${}",
        liquidation.payout.liquidator_fee, liquidation.payout.insurance_penalty, liquidation.payout.owner_remainder
    );
    if let Some(position) = sim.engine.position(alice, SOL) {
        println!("  Position afterwards: size {}, status {}\n", position.size, position.status);
    }
    Ok(())
}

/// Same position, crash to $5 against a $100 insurance vault.
fn scenario_2_insurance_exhaustion() -> Result<(), Box<dyn Error>> {
    println!("Scenario 2: Insurance Exhaustion\n");

    let sim = Sim::new()?;
    let (alice, keeper, backer) = (OwnerId(1), OwnerId(9), OwnerId(7));
    sim.trader(alice, 100)?;
    sim.custody.fund_wallet(backer, Quote::from_units(100))?;
    sim.engine.deposit_insurance(backer, SOL, Quote::from_units(100))?;

    sim.engine.open_position(alice, SOL, Side::Long, 10, 10)?;
    sim.set_price(5)?;

    let liquidation = sim.engine.liquidate_position(keeper, alice, SOL)?;
    println!(
        "  Equity ${}: bad debt ${}, insurance covered ${}, uncovered ${}",
        liquidation.equity,
        liquidation.payout.bad_debt,
        liquidation.insurance_draw.covered,
        liquidation.insurance_draw.uncovered
    );
    if let Some(vault) = sim.engine.insurance_vault(SOL) {
        println!("  Vault balance ${}", vault.balance);
    }
    println!("  Market halted: {}", liquidation.market_halted);

    match sim.engine.open_position(alice, SOL, Side::Long, 1, 1) {
        Err(err) => println!("  New open rejected: {err}\n"),
        Ok(_) => println!("  New open unexpectedly accepted\n"),
    }
    Ok(())
}

/// Withdrawal blocked while the position needs the collateral.
fn scenario_3_withdrawal_guard() -> Result<(), Box<dyn Error>> {
    println!("Scenario 3: Withdrawal Guard\n");

    let sim = Sim::new()?;
    let bob = OwnerId(2);
    sim.trader(bob, 110)?;
    sim.engine.open_position(bob, SOL, Side::Long, 10, 10)?;
    println!("  Bob deposits $110 and opens 10 SOL long at 10x");

    match sim.engine.withdraw_collateral(bob, SOL, Quote::from_units(70)) {
        Err(err) => println!("  Withdraw $70 rejected: {err}"),
        Ok(balance) => println!("  Withdraw $70 accepted, balance ${balance}"),
    }

    let close = sim.engine.close_position(bob, SOL)?;
    println!("  Closes position, ${} returned", close.collateral_returned);

    let balance = sim.engine.withdraw_collateral(bob, SOL, Quote::from_units(70))?;
    println!("  Withdraw $70 accepted, balance ${}", balance);
    println!("  Wallet now ${}\n", sim.custody.wallet_balance(bob));
    Ok(())
}

/// Perp trades 1% over index for three intervals.
fn scenario_4_funding_flow() -> Result<(), Box<dyn Error>> {
    println!("Scenario 4: Funding Flow\n");

    let sim = Sim::new()?;
    let (long, short) = (OwnerId(3), OwnerId(4));
    sim.trader(long, 500)?;
    sim.trader(short, 500)?;
    sim.engine.open_position(long, SOL, Side::Long, 10, 5)?;
    sim.engine.open_position(short, SOL, Side::Short, 10, 5)?;

    let interval = sim.engine.market(SOL).map(|m| m.funding_params.funding_interval_secs).unwrap_or(3600);
    for _ in 0..3 {
        sim.clock.advance(interval);
        sim.set_price(100)?;
        let result = sim.engine.update_funding(SOL, Price::new_unchecked(101_000_000))?;
        println!("  Rate {}, cumulative {}", result.rate, result.cumulative_funding);
    }

    let paid = sim.engine.settle_position_funding(long, SOL)?;
    let received = sim.engine.settle_position_funding(short, SOL)?;
    println!("  Long paid ${}, short paid ${}", paid, received);
    println!("  Second settle: ${}", sim.engine.settle_position_funding(long, SOL)?);
    println!("  Events recorded: {}", sim.engine.events().len());
    Ok(())
}
