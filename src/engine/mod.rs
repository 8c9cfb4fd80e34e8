// 8.0: clearing engine. every mutating operation is one optimistic transaction
// over the ledger store: admin and accounts in core, the funding crank,
// position open/close/withdraw, and liquidation with insurance draws.

mod clock;
mod config;
mod core;
mod funding;
mod liquidations;
mod positions;
mod results;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use core::Engine;
pub use results::{CloseReceipt, EngineError, FundingResult, LiquidationReceipt, PositionHealth, PositionReceipt};
