// clearing-core: margin clearinghouse for perpetual futures.
// solvency first: funding, margin and liquidation math run on fixed-point integers
// and every state change commits atomically or not at all.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, OwnerId, Side, Price, Quote, Leverage
//   3.x  margin.rs: notional, initial/maintenance margin, account health
//   4.x  position.rs: position record, pnl, funding settlement, open/increase/close
//   5.x  funding.rs: premium, clamped rate, cumulative accumulator
//   6.x  liquidation.rs: liquidation check, payout split, insurance vault
//   7.x  config.rs: market presets, deployment config, env presets
//   8.x  engine/: admin, accounts, funding crank, positions, liquidations
//   9.x  price_feed.rs: oracle trait + admin-set feed
//   9.2  custody.rs: collateral transfer trait (mocked)
//   10.x account.rs: free collateral balance per owner
//   11.x events.rs: audit log of committed state changes
//   12.x market.rs: global config + market runtime state
//   13.x store.rs: versioned records, optimistic transactions, snapshots

// core ledger modules
pub mod account;
pub mod engine;
pub mod events;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod position;
pub mod store;
pub mod types;

// integration modules
pub mod config;
pub mod custody;
pub mod price_feed;

// re exports for convenience
pub use account::*;
pub use engine::*;
pub use events::*;
pub use funding::*;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use position::*;
pub use types::*;
pub use config::{ClearinghouseConfig, ConfigError, Environment, MarketParams};
pub use custody::{CollateralTransfer, CustodyError, InMemoryCustody};
pub use price_feed::{ManualOracle, OracleError, OraclePrice, PriceOracle};
pub use store::{LedgerSnapshot, LedgerStore, SnapshotError};
